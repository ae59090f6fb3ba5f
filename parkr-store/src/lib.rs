pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod lot_repo;
pub mod memory;
pub mod redis_repo;
pub mod remote;

pub use booking_repo::PgBookingService;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use lot_repo::PgLotDirectory;
pub use memory::{InMemoryBookingService, InMemoryLotDirectory, InMemorySlotStore, RecordingNotifier};
pub use redis_repo::RedisSlotStore;
pub use remote::HttpParkingClient;

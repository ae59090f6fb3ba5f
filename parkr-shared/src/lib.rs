pub mod models;
pub mod pii;

pub use models::events::{NotificationAction, SlotNotification};
pub use pii::Masked;

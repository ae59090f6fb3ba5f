//! Builds the server's collaborators from configuration.

use anyhow::{anyhow, Context};
use std::sync::Arc;
use tracing::info;

use parkr_core::{BookingService, Clock, Lot, LotDirectory, Notifier, SlotStore};
use parkr_reservation::LogNotifier;
use parkr_store::app_config::{Config, SeedLot, StorageBackend};
use parkr_store::{
    DbClient, EventProducer, InMemoryBookingService, InMemoryLotDirectory, InMemorySlotStore, KafkaNotifier,
    PgBookingService, PgLotDirectory, RedisSlotStore,
};

use crate::state::{AppState, AuthConfig};

pub async fn build_state(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<AppState> {
    let slots = slot_store(config, clock.clone()).await?;

    let mut business_rules = config.business_rules.clone();
    let lots: Arc<dyn LotDirectory>;
    let bookings: Arc<dyn BookingService>;
    match &config.database {
        Some(db) => {
            let db = DbClient::new(&db.url).await.context("connecting to Postgres")?;
            db.migrate().await.context("running migrations")?;
            business_rules = db.fetch_business_rules(business_rules).await?;
            lots = Arc::new(PgLotDirectory::new(db.pool.clone()));
            bookings = Arc::new(PgBookingService::new(db.pool.clone(), clock.clone()));
        }
        None => {
            info!("No database configured, keeping lots and bookings in memory");
            let seeded = config.storage.seed.iter().map(|s| seed_lot(s, clock.as_ref())).collect();
            lots = Arc::new(InMemoryLotDirectory::new(seeded));
            bookings = Arc::new(InMemoryBookingService::new(clock.clone()));
        }
    }

    let notifier: Arc<dyn Notifier> = match &config.kafka {
        Some(kafka) => {
            let producer = EventProducer::new(&kafka.brokers).context("creating Kafka producer")?;
            info!("Publishing slot notifications to {}", kafka.topic);
            Arc::new(KafkaNotifier::new(producer, kafka.topic.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    Ok(AppState::new(
        slots,
        lots,
        bookings,
        notifier,
        clock,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        business_rules,
    ))
}

async fn slot_store(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn SlotStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = InMemorySlotStore::new(clock);
            for lot in &config.storage.seed {
                for slot in &lot.slots {
                    store.insert_slot(&lot.lot_id, slot).await;
                }
            }
            info!("In-memory slot store seeded with {} lots", config.storage.seed.len());
            Ok(Arc::new(store))
        }
        StorageBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| anyhow!("storage.backend = \"redis\" needs a [redis] section"))?;
            let store = RedisSlotStore::new(&redis.url, clock).await?;
            for lot in &config.storage.seed {
                for slot in &lot.slots {
                    store.insert_slot(&lot.lot_id, slot).await?;
                }
            }
            Ok(Arc::new(store))
        }
    }
}

fn seed_lot(seed: &SeedLot, clock: &dyn Clock) -> Lot {
    Lot {
        lot_id: seed.lot_id.clone(),
        name: seed.name.clone(),
        capacity: u32::try_from(seed.slots.len()).unwrap_or(u32::MAX),
        location: seed.location.clone(),
        created_at: clock.now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parkr_core::FixedClock;

    fn config() -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 0

                [auth]
                jwt_secret = "secret"

                [[storage.seed]]
                lot_id = "L1"
                name = "Lot One"
                slots = ["A1", "A2"]
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_bootstrap_seeds_slots_and_lots() {
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        let state = build_state(&config(), clock).await.unwrap();

        let slots = state.slots.list_slots(Some("L1")).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.is_free()));

        let lots = state.lots.list_lots().await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].capacity, 2);
    }
}

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::Arc;

use parkr_api::middleware::Claims;
use parkr_api::state::AuthConfig;
use parkr_api::AppState;
use parkr_core::{Clock, FixedClock, Lot};
use parkr_store::app_config::BusinessRules;
use parkr_store::{InMemoryBookingService, InMemoryLotDirectory, InMemorySlotStore, RecordingNotifier};

pub const SECRET: &str = "test-secret";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn token(email: &str, name: &str, role: &str) -> String {
    let claims = Claims {
        sub: format!("user-{}", email),
        email: email.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        // 2100-01-01
        exp: 4_102_444_800,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub struct TestServer {
    pub state: AppState,
    pub slots: Arc<InMemorySlotStore>,
    pub bookings: Arc<InMemoryBookingService>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<dyn Clock>,
}

/// Two lots: L1 with A1, A2 and L2 with B1.
pub async fn test_server() -> TestServer {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
    let slots = Arc::new(InMemorySlotStore::new(clock.clone()));
    for (lot, slot) in [("L1", "A1"), ("L1", "A2"), ("L2", "B1")] {
        slots.insert_slot(lot, slot).await;
    }

    let lots = Arc::new(InMemoryLotDirectory::new(vec![
        Lot {
            lot_id: "L1".into(),
            name: "Lot One".into(),
            capacity: 2,
            location: Some("North".into()),
            created_at: now(),
        },
        Lot {
            lot_id: "L2".into(),
            name: "Lot Two".into(),
            capacity: 1,
            location: None,
            created_at: now(),
        },
    ]));
    let bookings = Arc::new(InMemoryBookingService::new(clock.clone()));
    let notifier = Arc::new(RecordingNotifier::new());

    let state = AppState::new(
        slots.clone(),
        lots,
        bookings.clone(),
        notifier.clone(),
        clock.clone(),
        AuthConfig {
            secret: SECRET.to_string(),
        },
        BusinessRules::default(),
    );

    TestServer {
        state,
        slots,
        bookings,
        notifier,
        clock,
    }
}

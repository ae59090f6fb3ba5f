use std::sync::Arc;
use tracing::{info, warn};

use parkr_core::slot::{find, held_by};
use parkr_core::{CoreResult, ReservationError, Slot, SlotStore, StoreError};
use parkr_shared::{Masked, NotificationAction, SlotNotification};

use crate::notify::NotificationDispatcher;
use crate::session::Session;

/// Validates reserve/free intents against the caller's latest snapshot before
/// asking the slot store to apply them.
///
/// The local checks are a fast rejection only. Two clients can both pass them for
/// the same free slot; the store's conditional update decides the winner and the
/// loser gets `SlotUnavailable`.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn SlotStore>,
    dispatcher: NotificationDispatcher,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn SlotStore>, dispatcher: NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Occupy `slot_id` in `lot_id` for the session's user.
    pub async fn reserve(
        &self,
        session: &Session,
        lot_id: &str,
        slot_id: &str,
        snapshot: &[Slot],
    ) -> CoreResult<Slot> {
        let user = session.user();

        // 1. Single active slot per user
        if let Some(held) = held_by(snapshot, user.rfid()) {
            warn!(
                "Reserve {}/{} rejected: {:?} already holds {}/{}",
                lot_id, slot_id, Masked(&user.email), held.lot_id, held.slot_id
            );
            return Err(ReservationError::AlreadyHoldingSlot {
                lot_id: held.lot_id.clone(),
                slot_id: held.slot_id.clone(),
            });
        }

        // 2. Target must be free in the snapshot
        let target = find(snapshot, lot_id, slot_id).ok_or_else(|| ReservationError::UnknownSlot {
            lot_id: lot_id.to_string(),
            slot_id: slot_id.to_string(),
        })?;
        if !target.is_free() {
            return Err(ReservationError::SlotUnavailable {
                lot_id: lot_id.to_string(),
                slot_id: slot_id.to_string(),
            });
        }

        // 3. Conditional update; the store breaks races
        let updated = self
            .store
            .reserve(lot_id, slot_id, user.rfid())
            .await
            .map_err(|e| match e {
                StoreError::Conflict { .. } => ReservationError::SlotUnavailable {
                    lot_id: lot_id.to_string(),
                    slot_id: slot_id.to_string(),
                },
                other => ReservationError::Store(other),
            })?;

        let count = session.record_reservation();
        info!("Slot {}/{} reserved (reservation #{} for this user)", lot_id, slot_id, count);

        self.dispatcher.dispatch(SlotNotification::new(
            &user.email,
            &user.name,
            slot_id,
            NotificationAction::Reserve,
            updated.timestamp,
        ));

        Ok(updated)
    }

    /// Release `slot_id` in `lot_id`; only its current holder may do this.
    pub async fn free(
        &self,
        session: &Session,
        lot_id: &str,
        slot_id: &str,
        snapshot: &[Slot],
    ) -> CoreResult<Slot> {
        let user = session.user();
        let not_owner = || ReservationError::NotSlotOwner {
            lot_id: lot_id.to_string(),
            slot_id: slot_id.to_string(),
        };

        match find(snapshot, lot_id, slot_id) {
            Some(slot) if slot.is_held_by(user.rfid()) => {}
            _ => return Err(not_owner()),
        }

        let updated = self
            .store
            .free(lot_id, slot_id, user.rfid())
            .await
            .map_err(|e| match e {
                // Someone else's state now: we no longer own it
                StoreError::Conflict { .. } => not_owner(),
                other => ReservationError::Store(other),
            })?;

        info!("Slot {}/{} freed", lot_id, slot_id);

        self.dispatcher.dispatch(SlotNotification::new(
            &user.email,
            &user.name,
            slot_id,
            NotificationAction::Free,
            updated.timestamp,
        ));

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parkr_core::{Clock, FixedClock, ManualClock, UserIdentity};
    use parkr_store::memory::{InMemorySlotStore, RecordingNotifier};
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemorySlotStore>,
        notifier: Arc<RecordingNotifier>,
        engine: ReservationEngine,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        let store = Arc::new(InMemorySlotStore::new(clock.clone()));
        store.insert_slot("L1", "A1").await;
        store.insert_slot("L1", "A2").await;
        store.insert_slot("L2", "B1").await;

        let notifier = Arc::new(RecordingNotifier::new());
        let engine = ReservationEngine::new(store.clone(), NotificationDispatcher::new(notifier.clone()));
        Fixture { store, notifier, engine }
    }

    fn session(email: &str) -> Session {
        Session::new(UserIdentity::new(email, "Test User"))
    }

    async fn wait_for_notifications(notifier: &RecordingNotifier, n: usize) -> Vec<SlotNotification> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let sent = notifier.sent().await;
                if sent.len() >= n {
                    return sent;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_reserve_then_free_scenario() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");

        // u1 reserves A1
        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();
        let slot = fx.engine.reserve(&u1, "L1", "A1", &snapshot).await.unwrap();
        assert!(slot.is_held_by("u1@x.com"));
        assert_eq!(u1.reservation_count(), 1);

        // Any snapshot that reflects the hold blocks a second reservation
        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();
        let err = fx.engine.reserve(&u1, "L1", "A2", &snapshot).await.unwrap_err();
        assert!(matches!(err, ReservationError::AlreadyHoldingSlot { ref slot_id, .. } if slot_id == "A1"));

        // u1 frees A1
        let freed = fx.engine.free(&u1, "L1", "A1", &snapshot).await.unwrap();
        assert!(freed.is_free());
        assert_eq!(freed.rfid, None);

        let fresh = fx.store.list_slots(Some("L1")).await.unwrap();
        let a1 = fresh.iter().find(|s| s.slot_id == "A1").unwrap();
        assert!(a1.is_free() && a1.rfid.is_none());

        // Now A2 is allowed
        let a2 = fx.engine.reserve(&u1, "L1", "A2", &fresh).await.unwrap();
        assert!(a2.is_held_by("u1@x.com"));
        assert_eq!(u1.reservation_count(), 2);

        let sent = wait_for_notifications(&fx.notifier, 3).await;
        let reserves = sent.iter().filter(|n| n.action == NotificationAction::Reserve).count();
        let frees = sent.iter().filter(|n| n.action == NotificationAction::Free).count();
        assert_eq!((reserves, frees), (2, 1));
    }

    #[tokio::test]
    async fn test_single_active_slot_spans_lots() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");

        let all = fx.store.list_slots(None).await.unwrap();
        fx.engine.reserve(&u1, "L2", "B1", &all).await.unwrap();

        let all = fx.store.list_slots(None).await.unwrap();
        let err = fx.engine.reserve(&u1, "L1", "A1", &all).await.unwrap_err();
        assert!(matches!(err, ReservationError::AlreadyHoldingSlot { ref lot_id, .. } if lot_id == "L2"));
    }

    #[tokio::test]
    async fn test_reserve_occupied_slot_keeps_owner() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");
        let u2 = session("u2@x.com");

        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();
        fx.engine.reserve(&u1, "L1", "A1", &snapshot).await.unwrap();

        // Fresh snapshot: local rejection
        let fresh = fx.store.list_slots(Some("L1")).await.unwrap();
        let err = fx.engine.reserve(&u2, "L1", "A1", &fresh).await.unwrap_err();
        assert!(matches!(err, ReservationError::SlotUnavailable { .. }));

        // Stale snapshot: the store's conditional update rejects it
        let err = fx.engine.reserve(&u2, "L1", "A1", &snapshot).await.unwrap_err();
        assert!(matches!(err, ReservationError::SlotUnavailable { .. }));
        assert_eq!(u2.reservation_count(), 0);

        let after = fx.store.list_slots(Some("L1")).await.unwrap();
        assert!(after.iter().find(|s| s.slot_id == "A1").unwrap().is_held_by("u1@x.com"));
    }

    #[tokio::test]
    async fn test_concurrent_reserve_has_one_winner() {
        let fx = fixture().await;
        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = fx.engine.clone();
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move {
                let s = session(&format!("user{}@x.com", i));
                engine.reserve(&s, "L1", "A1", &snapshot).await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => winners += 1,
                Err(ReservationError::SlotUnavailable { .. }) => losers += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
    }

    #[tokio::test]
    async fn test_free_requires_ownership() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");
        let u2 = session("u2@x.com");

        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();
        fx.engine.reserve(&u1, "L1", "A1", &snapshot).await.unwrap();
        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();

        let err = fx.engine.free(&u2, "L1", "A1", &snapshot).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotSlotOwner { .. }));
        assert!(err.is_precondition());

        // Free slot and unknown slot are not ownable either
        assert!(matches!(
            fx.engine.free(&u2, "L1", "A2", &snapshot).await,
            Err(ReservationError::NotSlotOwner { .. })
        ));
        assert!(matches!(
            fx.engine.free(&u2, "L1", "Z9", &snapshot).await,
            Err(ReservationError::NotSlotOwner { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_free_cannot_release_new_holder() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");
        let u2 = session("u2@x.com");

        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();
        fx.engine.reserve(&u1, "L1", "A1", &snapshot).await.unwrap();
        let u1_view = fx.store.list_slots(Some("L1")).await.unwrap();

        // u1 frees from another device, u2 grabs the slot
        fx.store.free("L1", "A1", "u1@x.com").await.unwrap();
        let fresh = fx.store.list_slots(Some("L1")).await.unwrap();
        fx.engine.reserve(&u2, "L1", "A1", &fresh).await.unwrap();

        // u1's stale view still shows them as holder
        let err = fx.engine.free(&u1, "L1", "A1", &u1_view).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotSlotOwner { .. }));

        let after = fx.store.list_slots(Some("L1")).await.unwrap();
        assert!(after.iter().find(|s| s.slot_id == "A1").unwrap().is_held_by("u2@x.com"));
    }

    #[tokio::test]
    async fn test_unknown_slot_rejected_without_mutation() {
        let fx = fixture().await;
        let u1 = session("u1@x.com");
        let snapshot = fx.store.list_slots(Some("L1")).await.unwrap();

        let err = fx.engine.reserve(&u1, "L1", "Z9", &snapshot).await.unwrap_err();
        assert!(matches!(err, ReservationError::UnknownSlot { .. }));
        assert_eq!(u1.reservation_count(), 0);
        assert!(fx.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_carries_transition_time() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        let store = Arc::new(InMemorySlotStore::new(clock.clone()));
        store.insert_slot("L1", "A1").await;
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = ReservationEngine::new(store.clone(), NotificationDispatcher::new(notifier.clone()));
        let u1 = session("u1@x.com");

        clock.advance(chrono::Duration::minutes(3));
        let snapshot = store.list_slots(None).await.unwrap();
        let reserved = engine.reserve(&u1, "L1", "A1", &snapshot).await.unwrap();

        clock.advance(chrono::Duration::minutes(7));
        let snapshot = store.list_slots(None).await.unwrap();
        let freed = engine.free(&u1, "L1", "A1", &snapshot).await.unwrap();

        let sent = wait_for_notifications(&notifier, 2).await;
        let at = |action: NotificationAction| sent.iter().find(|n| n.action == action).unwrap().timestamp;
        assert_eq!(at(NotificationAction::Reserve), reserved.timestamp);
        assert_eq!(at(NotificationAction::Free), freed.timestamp);
        assert_eq!(freed.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 9, 10, 0).unwrap());
    }
}

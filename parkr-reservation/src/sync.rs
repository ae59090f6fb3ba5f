//! Live view of slot occupancy.
//!
//! A `LiveView` polls the slot store on a fixed interval and keeps the last good
//! snapshot visible. Every fetch covers all lots so the user's hold is known wherever
//! it is; a lot-scoped view only shows its own lot's slots.
//!
//! Each view cycles `Idle -> Fetching -> Synced -> Fetching ...`; a failed fetch
//! drops back to `Idle` and leaves the previous snapshot on screen. Closing the
//! view cancels the timer and any result that arrives afterwards is discarded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parkr_core::slot::held_by;
use parkr_core::{Clock, CoreResult, ReservationError, Slot, SlotKey, SlotStore, SnapshotStats};

use crate::rules::ReservationEngine;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Synced,
}

/// Result of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Snapshot merged into the view.
    Applied,
    /// A timer tick found a fetch already in flight and did nothing.
    Skipped,
    /// A newer fetch was applied first; this result was dropped.
    Superseded,
    /// The view was closed before the result arrived.
    Discarded,
    /// The store could not be read; the previous snapshot is kept.
    Failed(String),
}

#[derive(Debug)]
struct ViewModel {
    /// Every lot, merged. Scoped views filter on read.
    slots: Vec<Slot>,
    /// Results of this client's own reserve/free calls, kept until a fetch catches up.
    local: HashMap<SlotKey, Slot>,
    phase: SyncPhase,
    applied_seq: u64,
    last_synced: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct ViewInner {
    store: Arc<dyn SlotStore>,
    clock: Arc<dyn Clock>,
    scope: Option<String>,
    interval: Duration,
    model: RwLock<ViewModel>,
    in_flight: AtomicUsize,
    next_seq: AtomicU64,
    cancel: CancellationToken,
}

/// A cancellable, polling view over one lot (or every lot when unscoped).
#[derive(Clone)]
pub struct LiveView {
    inner: Arc<ViewInner>,
}

impl LiveView {
    /// `scope = Some(lot)` limits the view to that lot; `None` is the administrative view.
    pub fn new(
        store: Arc<dyn SlotStore>,
        clock: Arc<dyn Clock>,
        scope: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                store,
                clock,
                scope,
                interval,
                model: RwLock::new(ViewModel {
                    slots: Vec::new(),
                    local: HashMap::new(),
                    phase: SyncPhase::Idle,
                    applied_seq: 0,
                    last_synced: None,
                    last_error: None,
                }),
                in_flight: AtomicUsize::new(0),
                next_seq: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.inner.scope.as_deref()
    }

    /// Start the polling timer. The first fetch happens immediately.
    pub fn spawn(&self) -> JoinHandle<()> {
        // The timer only holds a weak reference so dropping every handle ends it.
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let interval = self.inner.interval;
        let scope = self.inner.scope.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Live view started (scope: {:?})", scope);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        LiveView { inner }.poll_once().await;
                    }
                }
            }

            info!("Live view stopped (scope: {:?})", scope);
        })
    }

    /// One timer tick: fetch unless a fetch is already outstanding.
    pub async fn poll_once(&self) -> FetchOutcome {
        if self
            .inner
            .in_flight
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Poll tick skipped: fetch already in flight");
            return FetchOutcome::Skipped;
        }
        self.fetch_claimed().await
    }

    /// Fetch now, regardless of the timer. Used after the user's own actions.
    pub async fn refresh(&self) -> CoreResult<()> {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        match self.fetch_claimed().await {
            FetchOutcome::Failed(msg) => Err(ReservationError::TransientFetchError(msg)),
            _ => Ok(()),
        }
    }

    /// Fetch with an `in_flight` slot already taken by the caller.
    async fn fetch_claimed(&self) -> FetchOutcome {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.model.write().await.phase = SyncPhase::Fetching;

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => None,
            r = self.inner.store.list_slots(None) => Some(r),
        };

        let still_fetching = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) > 1;

        let result = match result {
            Some(r) if !self.inner.cancel.is_cancelled() => r,
            _ => {
                debug!("Discarding fetch #{} for closed view", seq);
                return FetchOutcome::Discarded;
            }
        };

        let mut model = self.inner.model.write().await;
        match result {
            Ok(slots) => {
                if seq <= model.applied_seq {
                    debug!("Fetch #{} superseded by #{}", seq, model.applied_seq);
                    if !still_fetching {
                        model.phase = SyncPhase::Synced;
                    }
                    return FetchOutcome::Superseded;
                }
                model.slots = merge(slots, &mut model.local);
                model.applied_seq = seq;
                model.last_synced = Some(self.inner.clock.now());
                model.last_error = None;
                model.phase = if still_fetching { SyncPhase::Fetching } else { SyncPhase::Synced };
                FetchOutcome::Applied
            }
            Err(e) => {
                warn!("Slot fetch failed, keeping last snapshot: {}", e);
                model.last_error = Some(e.to_string());
                model.phase = if still_fetching { SyncPhase::Fetching } else { SyncPhase::Idle };
                FetchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop polling and detach. Idempotent.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// The latest completed snapshot of this view's lot, including this client's own
    /// unconfirmed changes.
    pub async fn snapshot(&self) -> Vec<Slot> {
        let model = self.inner.model.read().await;
        match self.inner.scope.as_deref() {
            Some(lot_id) => model.slots.iter().filter(|s| s.lot_id == lot_id).cloned().collect(),
            None => model.slots.clone(),
        }
    }

    pub async fn stats(&self) -> SnapshotStats {
        SnapshotStats::from_slots(&self.snapshot().await)
    }

    /// Every lot, whatever the scope. Rule checks run against this.
    async fn full_snapshot(&self) -> Vec<Slot> {
        self.inner.model.read().await.slots.clone()
    }

    pub async fn phase(&self) -> SyncPhase {
        self.inner.model.read().await.phase
    }

    pub async fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.inner.model.read().await.last_synced
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.model.read().await.last_error.clone()
    }

    /// Reserve through the engine using this view's latest snapshot.
    ///
    /// The store's answer is shown immediately, then the view refreshes.
    pub async fn reserve(
        &self,
        engine: &ReservationEngine,
        session: &Session,
        lot_id: &str,
        slot_id: &str,
    ) -> CoreResult<Slot> {
        let snapshot = self.full_snapshot().await;
        let result = engine.reserve(session, lot_id, slot_id, &snapshot).await;
        self.after_action(&result).await;
        result
    }

    /// Free through the engine using this view's latest snapshot.
    pub async fn free(
        &self,
        engine: &ReservationEngine,
        session: &Session,
        lot_id: &str,
        slot_id: &str,
    ) -> CoreResult<Slot> {
        let snapshot = self.full_snapshot().await;
        let result = engine.free(session, lot_id, slot_id, &snapshot).await;
        self.after_action(&result).await;
        result
    }

    /// Gate for the schedule-later flow: refused while the user holds a slot in any lot.
    pub async fn ensure_can_schedule(&self, session: &Session) -> CoreResult<()> {
        let model = self.inner.model.read().await;
        match held_by(&model.slots, session.user().rfid()) {
            Some(held) => Err(ReservationError::AlreadyHoldingSlot {
                lot_id: held.lot_id.clone(),
                slot_id: held.slot_id.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn after_action(&self, result: &CoreResult<Slot>) {
        if self.is_closed() {
            return;
        }

        match result {
            Ok(slot) => self.apply_local(slot.clone()).await,
            // Only store-side outcomes are worth resyncing for
            Err(ReservationError::SlotUnavailable { .. }) | Err(ReservationError::NotSlotOwner { .. }) => {}
            Err(_) => return,
        }

        if let Err(e) = self.refresh().await {
            debug!("Refresh after action failed, next tick will retry: {}", e);
        }
    }

    async fn apply_local(&self, slot: Slot) {
        let mut model = self.inner.model.write().await;
        let key = slot.key();
        match model.slots.iter_mut().find(|s| s.key() == key) {
            Some(existing) => *existing = slot.clone(),
            None => model.slots.push(slot.clone()),
        }
        model.local.insert(key, slot);
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Combine a fetched snapshot with local results the fetch may predate.
///
/// A local entry wins only if it is strictly newer than the fetched record; once a
/// fetch has caught up (same or newer timestamp) the local entry is dropped.
/// Slots missing from the fetch are gone from the view.
fn merge(fetched: Vec<Slot>, local: &mut HashMap<SlotKey, Slot>) -> Vec<Slot> {
    let merged: Vec<Slot> = fetched
        .into_iter()
        .map(|remote| {
            let key = remote.key();
            match local.get(&key) {
                Some(mine) if mine.timestamp > remote.timestamp => mine.clone(),
                Some(_) => {
                    local.remove(&key);
                    remote
                }
                None => remote,
            }
        })
        .collect();

    local.retain(|key, _| merged.iter().any(|s| &s.key() == key));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parkr_core::{FixedClock, ManualClock, StoreError, UserIdentity};
    use parkr_store::memory::{InMemorySlotStore, RecordingNotifier};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    use crate::notify::NotificationDispatcher;

    /// Wraps the in-memory store with call counting, failure injection and an optional gate.
    struct TestStore {
        inner: Arc<InMemorySlotStore>,
        list_calls: AtomicUsize,
        failing: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl TestStore {
        fn new(inner: Arc<InMemorySlotStore>) -> Self {
            Self {
                inner,
                list_calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                gate: None,
            }
        }

        fn gated(inner: Arc<InMemorySlotStore>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(inner)
            }
        }

        fn calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SlotStore for TestStore {
        async fn list_slots(&self, lot_id: Option<&str>) -> Result<Vec<Slot>, StoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.list_slots(lot_id).await
        }

        async fn reserve(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
            self.inner.reserve(lot_id, slot_id, rfid).await
        }

        async fn free(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
            self.inner.free(lot_id, slot_id, rfid).await
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()))
    }

    async fn seeded() -> Arc<InMemorySlotStore> {
        let store = Arc::new(InMemorySlotStore::new(clock()));
        store.insert_slot("L1", "A1").await;
        store.insert_slot("L1", "A2").await;
        store.insert_slot("L2", "B1").await;
        store
    }

    fn view(store: Arc<dyn SlotStore>, scope: Option<&str>) -> LiveView {
        LiveView::new(store, clock(), scope.map(String::from), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_scoped_view_only_sees_its_lot() {
        let store = seeded().await;

        let scoped = view(store.clone(), Some("L1"));
        assert_eq!(scoped.poll_once().await, FetchOutcome::Applied);
        let slots = scoped.snapshot().await;
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.lot_id == "L1"));
        assert_eq!(scoped.phase().await, SyncPhase::Synced);

        let admin = view(store, None);
        admin.poll_once().await;
        assert_eq!(admin.snapshot().await.len(), 3);
        assert_eq!(admin.stats().await, SnapshotStats { total: 3, available: 3, occupied: 0 });
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let inner = seeded().await;
        let store = Arc::new(TestStore::new(inner));
        let v = view(store.clone(), Some("L1"));

        assert_eq!(v.poll_once().await, FetchOutcome::Applied);
        store.failing.store(true, Ordering::SeqCst);

        assert!(matches!(v.poll_once().await, FetchOutcome::Failed(_)));
        assert_eq!(v.phase().await, SyncPhase::Idle);
        assert_eq!(v.snapshot().await.len(), 2);
        assert!(v.last_error().await.is_some());
        assert!(matches!(v.refresh().await, Err(ReservationError::TransientFetchError(_))));

        // Recovers on the next good tick
        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(v.poll_once().await, FetchOutcome::Applied);
        assert!(v.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_tick_skipped_while_fetch_in_flight() {
        let inner = seeded().await;
        let gate = Arc::new(Notify::new());
        let store = Arc::new(TestStore::gated(inner, gate.clone()));
        let v = view(store.clone(), Some("L1"));

        let first = tokio::spawn({
            let v = v.clone();
            async move { v.poll_once().await }
        });
        while store.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(v.phase().await, SyncPhase::Fetching);

        // Second tick while the first is outstanding
        assert_eq!(v.poll_once().await, FetchOutcome::Skipped);
        assert_eq!(store.calls(), 1);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), FetchOutcome::Applied);
        assert_eq!(v.phase().await, SyncPhase::Synced);
    }

    #[tokio::test]
    async fn test_close_discards_in_flight_result() {
        let inner = seeded().await;
        let gate = Arc::new(Notify::new());
        let store = Arc::new(TestStore::gated(inner, gate.clone()));
        let v = view(store.clone(), Some("L1"));

        let pending = tokio::spawn({
            let v = v.clone();
            async move { v.poll_once().await }
        });
        while store.calls() == 0 {
            tokio::task::yield_now().await;
        }

        v.close();
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), FetchOutcome::Discarded);
        assert!(v.snapshot().await.is_empty());
        assert!(v.last_synced().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval_until_closed() {
        let inner = seeded().await;
        let store = Arc::new(TestStore::new(inner.clone()));
        let v = view(store.clone(), Some("L1"));
        let handle = v.spawn();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.calls(), 1);
        assert_eq!(v.stats().await.occupied, 0);

        // Another client takes a slot between ticks
        inner.reserve("L1", "A2", "u2@x.com").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.calls(), 2);
        assert_eq!(v.stats().await.occupied, 1);

        v.close();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_reserve_and_free_through_view() {
        let store = seeded().await;
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = ReservationEngine::new(store.clone(), NotificationDispatcher::new(notifier));
        let session = Session::new(UserIdentity::new("u1@x.com", "U One"));
        let v = view(store.clone(), Some("L1"));
        v.poll_once().await;

        v.reserve(&engine, &session, "L1", "A1").await.unwrap();
        assert!(v.snapshot().await.iter().any(|s| s.is_held_by("u1@x.com")));

        // Same cycle: the view already knows about the hold
        let err = v.reserve(&engine, &session, "L1", "A2").await.unwrap_err();
        assert!(matches!(err, ReservationError::AlreadyHoldingSlot { .. }));
        assert!(matches!(
            v.ensure_can_schedule(&session).await,
            Err(ReservationError::AlreadyHoldingSlot { .. })
        ));

        v.free(&engine, &session, "L1", "A1").await.unwrap();
        let a1 = v.snapshot().await.into_iter().find(|s| s.slot_id == "A1").unwrap();
        assert!(a1.is_free());
        assert!(v.ensure_can_schedule(&session).await.is_ok());

        v.reserve(&engine, &session, "L1", "A2").await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_race_resyncs_view() {
        let store = seeded().await;
        let engine = ReservationEngine::new(store.clone(), NotificationDispatcher::new(Arc::new(RecordingNotifier::new())));
        let session = Session::new(UserIdentity::new("u1@x.com", "U One"));
        let v = view(store.clone(), Some("L1"));
        v.poll_once().await;

        // Another client wins A1 after our last poll
        store.reserve("L1", "A1", "u2@x.com").await.unwrap();

        let err = v.reserve(&engine, &session, "L1", "A1").await.unwrap_err();
        assert!(matches!(err, ReservationError::SlotUnavailable { .. }));

        let a1 = v.snapshot().await.into_iter().find(|s| s.slot_id == "A1").unwrap();
        assert!(a1.is_held_by("u2@x.com"));
    }

    #[tokio::test]
    async fn test_hold_in_another_lot_blocks_scoped_view() {
        let store = seeded().await;
        let engine = ReservationEngine::new(store.clone(), NotificationDispatcher::new(Arc::new(RecordingNotifier::new())));
        let session = Session::new(UserIdentity::new("u1@x.com", "U One"));

        let l2 = view(store.clone(), Some("L2"));
        l2.poll_once().await;
        l2.reserve(&engine, &session, "L2", "B1").await.unwrap();

        // A fresh L1 view shows only L1 but still knows about the L2 hold
        let l1 = view(store.clone(), Some("L1"));
        l1.poll_once().await;
        assert!(l1.snapshot().await.iter().all(|s| s.lot_id == "L1"));
        assert_eq!(l1.stats().await, SnapshotStats { total: 2, available: 2, occupied: 0 });

        let err = l1.reserve(&engine, &session, "L1", "A1").await.unwrap_err();
        assert!(matches!(err, ReservationError::AlreadyHoldingSlot { ref lot_id, ref slot_id } if lot_id == "L2" && slot_id == "B1"));
        assert!(matches!(
            l1.ensure_can_schedule(&session).await,
            Err(ReservationError::AlreadyHoldingSlot { .. })
        ));

        let held: Vec<Slot> = store
            .list_slots(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_held_by("u1@x.com"))
            .collect();
        assert_eq!(held.len(), 1);

        // Freeing from the L2 view reopens L1 on its next poll
        l2.free(&engine, &session, "L2", "B1").await.unwrap();
        l1.poll_once().await;
        assert!(l1.ensure_can_schedule(&session).await.is_ok());
        l1.reserve(&engine, &session, "L1", "A1").await.unwrap();
    }

    #[test]
    fn test_merge_prefers_newer_local_changes() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(3);

        let mut local = HashMap::new();
        let mine = Slot::occupied("L1", "A1", "u1@x.com", t1);
        local.insert(mine.key(), mine.clone());

        // Fetch started before our reservation landed
        let stale = vec![Slot::free("L1", "A1", t0), Slot::free("L1", "A2", t0)];
        let merged = merge(stale, &mut local);
        assert_eq!(merged[0], mine);
        assert_eq!(local.len(), 1);

        // Fetch has caught up
        let fresh = vec![Slot::occupied("L1", "A1", "u1@x.com", t1), Slot::free("L1", "A2", t0)];
        let merged = merge(fresh, &mut local);
        assert!(merged[0].is_held_by("u1@x.com"));
        assert!(local.is_empty());

        // Slot removed by an administrator disappears along with any local entry
        let mut local = HashMap::new();
        local.insert(mine.key(), mine);
        let merged = merge(vec![Slot::free("L1", "A2", t0)], &mut local);
        assert_eq!(merged.len(), 1);
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_last_synced_uses_clock() {
        let store = seeded().await;
        let manual = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        let v = LiveView::new(store, manual.clone(), None, Duration::from_secs(5));

        v.poll_once().await;
        manual.advance(chrono::Duration::seconds(5));
        v.poll_once().await;

        assert_eq!(
            v.last_synced().await,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 5).unwrap())
        );
    }
}

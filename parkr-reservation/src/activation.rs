use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use parkr_core::slot::{find, held_by};
use parkr_core::{Booking, BookingService, BookingStatus, Clock, CoreResult, Slot, SlotStore, StoreError};
use parkr_shared::{NotificationAction, SlotNotification};

use crate::notify::NotificationDispatcher;

/// Counts from one activation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub activated: usize,
    pub missed: usize,
    pub completed: usize,
}

/// Time-triggered job that turns scheduled bookings into real occupancy and
/// releases them when their window ends.
///
/// Activation goes through the same conditional reserve as a live user and honours
/// the single-active-slot rule against a fresh snapshot. A booking that cannot be
/// honoured becomes `missed`; nothing is retried past its window.
pub struct BookingActivator {
    store: Arc<dyn SlotStore>,
    bookings: Arc<dyn BookingService>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

impl BookingActivator {
    pub fn new(
        store: Arc<dyn SlotStore>,
        bookings: Arc<dyn BookingService>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bookings,
            dispatcher,
            clock,
        }
    }

    /// Run the job every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Booking activation worker started, every {:?}", interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report != ActivationReport::default() => {
                                info!(
                                    "Activation pass: {} activated, {} missed, {} completed",
                                    report.activated, report.missed, report.completed
                                );
                            }
                            Ok(_) => {}
                            Err(e) => error!("Activation pass failed: {}", e),
                        }
                    }
                }
            }

            info!("Booking activation worker stopped");
        })
    }

    pub async fn run_once(&self) -> CoreResult<ActivationReport> {
        let now = self.clock.now();
        let mut report = ActivationReport::default();
        let mut snapshot = self.store.list_slots(None).await?;

        // 1. Close out running bookings first so their slots are free for the next ones
        for booking in self.bookings.list_by_status(BookingStatus::Active).await? {
            if !booking.has_ended_by(now) {
                continue;
            }
            if self.release(&booking, &mut snapshot).await? {
                self.notify(&booking, NotificationAction::Free);
            }
            self.bookings.update_status(booking.booking_id, BookingStatus::Completed).await?;
            report.completed += 1;
        }

        // 2. Start due bookings in start order
        let mut due = self.bookings.list_by_status(BookingStatus::Scheduled).await?;
        due.sort_by_key(|b| b.starts_at());

        for booking in due {
            if booking.has_ended_by(now) {
                // Occupied by an earlier pass whose status write never landed
                if self.release(&booking, &mut snapshot).await? {
                    info!("Booking {} ended before its activation was recorded", booking.booking_id);
                    self.notify(&booking, NotificationAction::Free);
                    self.bookings.update_status(booking.booking_id, BookingStatus::Completed).await?;
                    report.completed += 1;
                    continue;
                }
                warn!("Booking {} window passed without activation", booking.booking_id);
                self.bookings.update_status(booking.booking_id, BookingStatus::Missed).await?;
                report.missed += 1;
                continue;
            }
            if !booking.is_running_at(now) {
                continue;
            }

            if self.occupy(&booking, &mut snapshot).await? {
                self.bookings.update_status(booking.booking_id, BookingStatus::Active).await?;
                self.notify(&booking, NotificationAction::Reserve);
                report.activated += 1;
            } else {
                self.bookings.update_status(booking.booking_id, BookingStatus::Missed).await?;
                report.missed += 1;
            }
        }

        Ok(report)
    }

    /// Try to occupy the booked slot. `Ok(false)` means the booking cannot be honoured.
    ///
    /// A user already holding this very slot counts as occupied, so a pass that
    /// reserved but failed to record `active` is picked up on the next one.
    async fn occupy(&self, booking: &Booking, snapshot: &mut Vec<Slot>) -> CoreResult<bool> {
        if let Some(held) = held_by(snapshot, &booking.user_email) {
            if held.matches(&booking.lot_id, &booking.slot_id) {
                info!(
                    "Booking {} already holds {}/{}, recording activation",
                    booking.booking_id, booking.lot_id, booking.slot_id
                );
                return Ok(true);
            }
            warn!(
                "Booking {} not activated: user already holds {}/{}",
                booking.booking_id, held.lot_id, held.slot_id
            );
            return Ok(false);
        }

        match self
            .store
            .reserve(&booking.lot_id, &booking.slot_id, &booking.user_email)
            .await
        {
            Ok(slot) => {
                info!(
                    "Booking {} activated on {}/{}",
                    booking.booking_id, booking.lot_id, booking.slot_id
                );
                upsert(snapshot, slot);
                Ok(true)
            }
            Err(StoreError::Conflict { current }) => {
                warn!(
                    "Booking {} not activated: slot {}/{} is {}",
                    booking.booking_id, booking.lot_id, booking.slot_id, current.action
                );
                upsert(snapshot, *current);
                Ok(false)
            }
            Err(StoreError::NotFound(what)) => {
                warn!("Booking {} not activated: {} no longer exists", booking.booking_id, what);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Free the booked slot if the booking's user still holds it.
    async fn release(&self, booking: &Booking, snapshot: &mut Vec<Slot>) -> CoreResult<bool> {
        let still_held = find(snapshot, &booking.lot_id, &booking.slot_id)
            .is_some_and(|s| s.is_held_by(&booking.user_email));
        if !still_held {
            return Ok(false);
        }

        match self
            .store
            .free(&booking.lot_id, &booking.slot_id, &booking.user_email)
            .await
        {
            Ok(slot) => {
                upsert(snapshot, slot);
                Ok(true)
            }
            // Already released by the user
            Err(StoreError::Conflict { current }) => {
                upsert(snapshot, *current);
                Ok(false)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, booking: &Booking, action: NotificationAction) {
        self.dispatcher.dispatch(SlotNotification::new(
            &booking.user_email,
            &booking.user_name,
            &booking.slot_id,
            action,
            self.clock.now(),
        ));
    }
}

fn upsert(snapshot: &mut Vec<Slot>, slot: Slot) {
    match snapshot.iter_mut().find(|s| s.matches(&slot.lot_id, &slot.slot_id)) {
        Some(existing) => *existing = slot,
        None => snapshot.push(slot),
    }
}

//! In-process collaborators. Used by the single-node server mode and by tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use parkr_core::{
    Booking, BookingRequest, BookingService, BookingStatus, Clock, Lot, LotDirectory, Notifier, NotifyError, Slot,
    SlotKey, SlotStore, StoreError,
};
use parkr_shared::SlotNotification;

/// Slot store backed by an ordered map.
///
/// The write lock is held across each compare-and-set, so concurrent reserve/free
/// calls on the same slot are serialized and exactly one of two racing reserves wins.
pub struct InMemorySlotStore {
    slots: RwLock<BTreeMap<SlotKey, Slot>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySlotStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Administrative seeding: create a free slot. An existing slot is left as is.
    pub async fn insert_slot(&self, lot_id: &str, slot_id: &str) -> Slot {
        let mut slots = self.slots.write().await;
        slots
            .entry(SlotKey::new(lot_id, slot_id))
            .or_insert_with(|| Slot::free(lot_id, slot_id, self.clock.now()))
            .clone()
    }

    fn not_found(lot_id: &str, slot_id: &str) -> StoreError {
        StoreError::NotFound(format!("slot {}/{}", lot_id, slot_id))
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn list_slots(&self, lot_id: Option<&str>) -> Result<Vec<Slot>, StoreError> {
        let slots = self.slots.read().await;
        Ok(slots
            .values()
            .filter(|s| lot_id.map_or(true, |lot| s.lot_id == lot))
            .cloned()
            .collect())
    }

    async fn reserve(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&SlotKey::new(lot_id, slot_id))
            .ok_or_else(|| Self::not_found(lot_id, slot_id))?;

        if !slot.is_free() {
            return Err(StoreError::Conflict {
                current: Box::new(slot.clone()),
            });
        }

        *slot = slot.reserved_by(rfid, self.clock.now());
        Ok(slot.clone())
    }

    async fn free(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&SlotKey::new(lot_id, slot_id))
            .ok_or_else(|| Self::not_found(lot_id, slot_id))?;

        if !slot.is_held_by(rfid) {
            return Err(StoreError::Conflict {
                current: Box::new(slot.clone()),
            });
        }

        *slot = slot.released(self.clock.now());
        Ok(slot.clone())
    }
}

/// Fixed lot list.
pub struct InMemoryLotDirectory {
    lots: Vec<Lot>,
}

impl InMemoryLotDirectory {
    pub fn new(lots: Vec<Lot>) -> Self {
        Self { lots }
    }
}

#[async_trait]
impl LotDirectory for InMemoryLotDirectory {
    async fn list_lots(&self) -> Result<Vec<Lot>, StoreError> {
        Ok(self.lots.clone())
    }
}

/// Booking records kept in insertion order.
pub struct InMemoryBookingService {
    bookings: RwLock<Vec<Booking>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBookingService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bookings: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bookings.read().await.is_empty()
    }
}

#[async_trait]
impl BookingService for InMemoryBookingService {
    async fn schedule(&self, request: &BookingRequest) -> Result<Booking, StoreError> {
        let booking = Booking::from_request(request, self.clock.now());
        self.bookings.write().await.push(booking.clone());
        info!("Stored booking {} for slot {}", booking.booking_id, booking.slot_id);
        Ok(booking)
    }

    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .await
            .iter()
            .filter(|b| b.user_email == user_email)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .await
            .iter()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn update_status(&self, booking_id: Uuid, status: BookingStatus) -> Result<Booking, StoreError> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .iter_mut()
            .find(|b| b.booking_id == booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?;
        booking.status = status;
        Ok(booking.clone())
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SlotNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SlotNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &SlotNotification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

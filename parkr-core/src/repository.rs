use async_trait::async_trait;
use uuid::Uuid;

use crate::{Booking, BookingRequest, BookingStatus, Lot, NotifyError, Slot, StoreError};
use parkr_shared::SlotNotification;

/// Authoritative slot-state store.
///
/// `reserve` and `free` are conditional updates: the store must compare and set
/// atomically per slot and report `StoreError::Conflict` to the loser of a race
/// rather than overwrite.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// All slots, or only the slots of `lot_id`. Ordered by lot id, then slot id.
    async fn list_slots(&self, lot_id: Option<&str>) -> Result<Vec<Slot>, StoreError>;

    /// Occupy a slot for `rfid`; succeeds only while the slot is free.
    async fn reserve(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError>;

    /// Release a slot; succeeds only while the slot is occupied by `rfid`.
    async fn free(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError>;
}

/// Read side of the lot directory. Lot CRUD lives elsewhere.
#[async_trait]
pub trait LotDirectory: Send + Sync {
    async fn list_lots(&self) -> Result<Vec<Lot>, StoreError>;
}

/// Persistence for advance bookings.
#[async_trait]
pub trait BookingService: Send + Sync {
    async fn schedule(&self, request: &BookingRequest) -> Result<Booking, StoreError>;

    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Booking>, StoreError>;

    async fn list_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError>;

    async fn update_status(&self, booking_id: Uuid, status: BookingStatus) -> Result<Booking, StoreError>;
}

/// Outbound user notifications (email or event bus). Best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &SlotNotification) -> Result<(), NotifyError>;
}

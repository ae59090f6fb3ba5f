pub mod booking;
pub mod clock;
pub mod identity;
pub mod lot;
pub mod repository;
pub mod slot;

pub use booking::{Booking, BookingRequest, BookingStatus, BookingTime};
pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use identity::UserIdentity;
pub use lot::Lot;
pub use repository::{BookingService, LotDirectory, Notifier, SlotStore};
pub use slot::{Slot, SlotAction, SlotKey, SnapshotStats};

/// Failures of a user-initiated slot or booking action.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Already holding slot {slot_id} in lot {lot_id}; free it before booking another")]
    AlreadyHoldingSlot { lot_id: String, slot_id: String },
    #[error("Slot {slot_id} in lot {lot_id} is not available")]
    SlotUnavailable { lot_id: String, slot_id: String },
    #[error("Slot {slot_id} in lot {lot_id} is not held by this user")]
    NotSlotOwner { lot_id: String, slot_id: String },
    #[error("Slot {slot_id} not found in lot {lot_id}")]
    UnknownSlot { lot_id: String, slot_id: String },
    #[error("Invalid booking window: {0}")]
    InvalidBookingWindow(String),
    #[error("Slot snapshot unavailable: {0}")]
    TransientFetchError(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Errors raised before any mutation was sent to the store.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ReservationError::AlreadyHoldingSlot { .. }
                | ReservationError::NotSlotOwner { .. }
                | ReservationError::UnknownSlot { .. }
                | ReservationError::InvalidBookingWindow(_)
        )
    }
}

/// Failures reported by a collaborator store (slot, lot or booking service).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The conditional update lost: the record no longer matches the expected state.
    #[error("Conflicting update on slot {}/{}", current.lot_id, current.slot_id)]
    Conflict { current: Box<Slot> },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed record: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

pub type CoreResult<T> = Result<T, ReservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let local = ReservationError::AlreadyHoldingSlot {
            lot_id: "L1".into(),
            slot_id: "A1".into(),
        };
        assert!(local.is_precondition());

        let raced = ReservationError::SlotUnavailable {
            lot_id: "L1".into(),
            slot_id: "A1".into(),
        };
        assert!(!raced.is_precondition());

        let transient = ReservationError::TransientFetchError("timeout".into());
        assert!(!transient.is_precondition());
    }
}

pub mod activation;
pub mod notify;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod sync;

pub use activation::{ActivationReport, BookingActivator};
pub use notify::{LogNotifier, NotificationDispatcher};
pub use rules::ReservationEngine;
pub use scheduler::{BookingScheduler, SchedulingPolicy};
pub use session::{PersistedSession, Session, SessionError, SessionFile};
pub use sync::{FetchOutcome, LiveView, SyncPhase};

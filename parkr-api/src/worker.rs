use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parkr_reservation::BookingActivator;

use crate::state::AppState;

/// Start the booking activation job against the server's own collaborators.
pub fn start_activation_worker(state: &AppState, cancel: CancellationToken) -> JoinHandle<()> {
    let activator = Arc::new(BookingActivator::new(
        state.slots.clone(),
        state.bookings.clone(),
        state.dispatcher.clone(),
        state.clock.clone(),
    ));

    activator.spawn(state.business_rules.activation_interval(), cancel)
}

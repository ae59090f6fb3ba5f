use std::sync::Arc;

use parkr_core::{BookingService, Clock, LotDirectory, Notifier, SlotStore};
use parkr_reservation::{BookingScheduler, NotificationDispatcher, SchedulingPolicy};
use parkr_store::app_config::BusinessRules;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub slots: Arc<dyn SlotStore>,
    pub lots: Arc<dyn LotDirectory>,
    pub bookings: Arc<dyn BookingService>,
    pub scheduler: BookingScheduler,
    pub dispatcher: NotificationDispatcher,
    pub clock: Arc<dyn Clock>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

impl AppState {
    pub fn new(
        slots: Arc<dyn SlotStore>,
        lots: Arc<dyn LotDirectory>,
        bookings: Arc<dyn BookingService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        auth: AuthConfig,
        business_rules: BusinessRules,
    ) -> Self {
        let scheduler = BookingScheduler::new(bookings.clone(), clock.clone(), scheduling_policy(&business_rules));

        Self {
            slots,
            lots,
            bookings,
            scheduler,
            dispatcher: NotificationDispatcher::new(notifier),
            clock,
            auth,
            business_rules,
        }
    }
}

pub fn scheduling_policy(rules: &BusinessRules) -> SchedulingPolicy {
    SchedulingPolicy {
        max_advance_days: rules.max_advance_days,
        min_duration_hours: rules.min_duration_hours,
        max_duration_hours: rules.max_duration_hours,
    }
}

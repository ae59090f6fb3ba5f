use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::info;

use parkr_core::{
    Booking, BookingRequest, BookingService, BookingTime, Clock, CoreResult, ReservationError, UserIdentity,
};

/// Limits applied to advance bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    /// Latest bookable day, counted from today (inclusive).
    pub max_advance_days: u32,
    pub min_duration_hours: u32,
    pub max_duration_hours: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            max_advance_days: 30,
            min_duration_hours: 1,
            max_duration_hours: 24,
        }
    }
}

impl SchedulingPolicy {
    /// Check a requested day and duration. Bookable days are `(today, today + max_advance_days]`.
    pub fn validate(&self, today: NaiveDate, date: NaiveDate, duration: u32) -> CoreResult<()> {
        if date <= today {
            return Err(ReservationError::InvalidBookingWindow(format!(
                "{} is not after today ({})",
                date, today
            )));
        }

        let last = today + Duration::days(i64::from(self.max_advance_days));
        if date > last {
            return Err(ReservationError::InvalidBookingWindow(format!(
                "{} is more than {} days ahead (last bookable day is {})",
                date, self.max_advance_days, last
            )));
        }

        if duration < self.min_duration_hours || duration > self.max_duration_hours {
            return Err(ReservationError::InvalidBookingWindow(format!(
                "duration must be {}-{} hours, got {}",
                self.min_duration_hours, self.max_duration_hours, duration
            )));
        }

        Ok(())
    }
}

/// Records advance bookings. Never touches current slot occupancy.
#[derive(Clone)]
pub struct BookingScheduler {
    bookings: Arc<dyn BookingService>,
    clock: Arc<dyn Clock>,
    policy: SchedulingPolicy,
}

impl BookingScheduler {
    pub fn new(bookings: Arc<dyn BookingService>, clock: Arc<dyn Clock>, policy: SchedulingPolicy) -> Self {
        Self {
            bookings,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Validate and persist a future booking for `user`.
    ///
    /// All validation happens before the booking service is called; the service's
    /// result is returned as is.
    pub async fn schedule(
        &self,
        user: &UserIdentity,
        lot_id: &str,
        slot_id: &str,
        date: NaiveDate,
        time: &str,
        duration: u32,
    ) -> CoreResult<Booking> {
        let time: BookingTime = time
            .parse()
            .map_err(ReservationError::InvalidBookingWindow)?;
        self.policy.validate(self.clock.today(), date, duration)?;

        let request = BookingRequest {
            slot_id: slot_id.to_string(),
            lot_id: lot_id.to_string(),
            user_email: user.email.clone(),
            user_name: user.name.clone(),
            date,
            time,
            duration,
        };

        let booking = self.bookings.schedule(&request).await?;
        info!(
            "Booking {} scheduled for {}/{} on {} at {} ({}h)",
            booking.booking_id, lot_id, slot_id, date, time, duration
        );
        Ok(booking)
    }

    pub async fn list_for_user(&self, user: &UserIdentity) -> CoreResult<Vec<Booking>> {
        Ok(self.bookings.list_for_user(&user.email).await?)
    }
}

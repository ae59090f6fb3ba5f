use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use parkr_core::{Booking, BookingRequest, BookingService, BookingStatus, BookingTime, Clock, StoreError};
use std::sync::Arc;

use crate::database::store_error;

const BOOKING_COLUMNS: &str =
    "booking_id, slot_id, lot_id, user_email, user_name, date, start_hour, duration, status, created_at";

pub struct PgBookingService {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgBookingService {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    booking_id: Uuid,
    slot_id: String,
    lot_id: String,
    user_email: String,
    user_name: String,
    date: NaiveDate,
    start_hour: i16,
    duration: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let time = u8::try_from(row.start_hour)
            .ok()
            .and_then(BookingTime::from_hour)
            .ok_or_else(|| StoreError::Serialization(format!("booking {} has start hour {}", row.booking_id, row.start_hour)))?;
        let duration = u32::try_from(row.duration)
            .map_err(|_| StoreError::Serialization(format!("booking {} has duration {}", row.booking_id, row.duration)))?;
        let status = row.status.parse().map_err(StoreError::Serialization)?;

        Ok(Booking {
            booking_id: row.booking_id,
            slot_id: row.slot_id,
            lot_id: row.lot_id,
            user_email: row.user_email,
            user_name: row.user_name,
            date: row.date,
            time,
            duration,
            status,
            created_at: row.created_at,
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[async_trait]
impl BookingService for PgBookingService {
    async fn schedule(&self, request: &BookingRequest) -> Result<Booking, StoreError> {
        let booking = Booking::from_request(request, self.clock.now());
        let duration = i32::try_from(booking.duration)
            .map_err(|_| StoreError::Serialization(format!("duration {} out of range", booking.duration)))?;

        sqlx::query(
            "INSERT INTO bookings (booking_id, slot_id, lot_id, user_email, user_name, date, start_hour, duration, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(booking.booking_id)
        .bind(&booking.slot_id)
        .bind(&booking.lot_id)
        .bind(&booking.user_email)
        .bind(&booking.user_name)
        .bind(booking.date)
        .bind(i16::from(booking.time.hour()))
        .bind(duration)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        info!("Stored booking {} for slot {}/{}", booking.booking_id, booking.lot_id, booking.slot_id);
        Ok(booking)
    }

    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE user_email = $1 ORDER BY date, start_hour",
            BOOKING_COLUMNS
        ))
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        into_bookings(rows)
    }

    async fn list_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE status = $1 ORDER BY date, start_hour",
            BOOKING_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        into_bookings(rows)
    }

    async fn update_status(&self, booking_id: Uuid, status: BookingStatus) -> Result<Booking, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings SET status = $2 WHERE booking_id = $1 RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let row = row.ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?;
        Booking::try_from(row)
    }
}

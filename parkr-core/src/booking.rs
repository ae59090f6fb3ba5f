use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an advance booking. Transitions are owned by the booking service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Scheduled,
    Active,
    Completed,
    Missed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Missed => "missed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(BookingStatus::Scheduled),
            "active" => Ok(BookingStatus::Active),
            "completed" => Ok(BookingStatus::Completed),
            "missed" => Ok(BookingStatus::Missed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

/// Start hour of a booking, written `"HH:00"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookingTime(u8);

impl BookingTime {
    pub fn from_hour(hour: u8) -> Option<Self> {
        (hour < 24).then_some(Self(hour))
    }

    pub fn hour(&self) -> u8 {
        self.0
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.0), 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for BookingTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minutes) = s
            .split_once(':')
            .ok_or_else(|| format!("time must be HH:00, got {:?}", s))?;
        if minutes != "00" || hour.len() != 2 {
            return Err(format!("time must be on the hour (HH:00), got {:?}", s));
        }
        let hour: u8 = hour
            .parse()
            .map_err(|_| format!("invalid hour in {:?}", s))?;
        BookingTime::from_hour(hour).ok_or_else(|| format!("hour out of range in {:?}", s))
    }
}

impl TryFrom<String> for BookingTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BookingTime> for String {
    fn from(t: BookingTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for BookingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00", self.0)
    }
}

/// Details submitted when a user schedules a future booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub slot_id: String,
    pub lot_id: String,
    pub user_email: String,
    pub user_name: String,
    pub date: NaiveDate,
    pub time: BookingTime,
    pub duration: u32,
}

/// An advance booking record as returned by the booking service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_id: Uuid,
    pub slot_id: String,
    pub lot_id: String,
    pub user_email: String,
    #[serde(default)]
    pub user_name: String,
    pub date: NaiveDate,
    pub time: BookingTime,
    pub duration: u32,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Build the record a booking service stores for a fresh request.
    pub fn from_request(req: &BookingRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            booking_id: Uuid::new_v4(),
            slot_id: req.slot_id.clone(),
            lot_id: req.lot_id.clone(),
            user_email: req.user_email.clone(),
            user_name: req.user_name.clone(),
            date: req.date,
            time: req.time,
            duration: req.duration,
            status: BookingStatus::Scheduled,
            created_at,
        }
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(self.time.as_naive_time()))
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at() + Duration::hours(i64::from(self.duration))
    }

    /// Whether `now` lies inside `[start, start + duration)`.
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at() <= now && now < self.ends_at()
    }

    pub fn has_ended_by(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at()
    }
}

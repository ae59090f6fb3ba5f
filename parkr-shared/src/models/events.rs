use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pii::Masked;

/// Which slot transition a notification reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    Reserve,
    Free,
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationAction::Reserve => write!(f, "reserve"),
            NotificationAction::Free => write!(f, "free"),
        }
    }
}

/// Payload sent to the notification service after a successful reserve/free.
///
/// Field names follow the notification endpoint's JSON contract.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotNotification {
    pub user_email: Masked<String>,
    pub user_name: String,
    pub slot_id: String,
    pub action: NotificationAction,
    pub timestamp: DateTime<Utc>,
}

impl SlotNotification {
    pub fn new(
        user_email: &str,
        user_name: &str,
        slot_id: &str,
        action: NotificationAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_email: Masked(user_email.to_string()),
            user_name: user_name.to_string(),
            slot_id: slot_id.to_string(),
            action,
            timestamp,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parking facility as listed by the lot directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub lot_id: String,
    pub name: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

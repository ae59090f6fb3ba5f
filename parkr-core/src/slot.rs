use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use parkr_shared::Masked;

/// Occupancy state of a slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SlotAction {
    Free,
    Occupied,
}

impl fmt::Display for SlotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotAction::Free => write!(f, "free"),
            SlotAction::Occupied => write!(f, "occupied"),
        }
    }
}

/// Identity of a slot. Slot ids are only unique within their lot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub lot_id: String,
    pub slot_id: String,
}

impl SlotKey {
    pub fn new(lot_id: impl Into<String>, slot_id: impl Into<String>) -> Self {
        Self {
            lot_id: lot_id.into(),
            slot_id: slot_id.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lot_id, self.slot_id)
    }
}

/// A single parking space and its current occupant.
///
/// `rfid` is `Some` exactly when `action` is `Occupied`. The constructors and the
/// wire decoder both uphold this; a record that violates it is rejected on decode.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "SlotRecord")]
pub struct Slot {
    pub slot_id: String,
    pub lot_id: String,
    pub action: SlotAction,
    pub rfid: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Slot {
    pub fn free(lot_id: impl Into<String>, slot_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            slot_id: slot_id.into(),
            lot_id: lot_id.into(),
            action: SlotAction::Free,
            rfid: None,
            timestamp: at,
        }
    }

    pub fn occupied(
        lot_id: impl Into<String>,
        slot_id: impl Into<String>,
        rfid: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            slot_id: slot_id.into(),
            lot_id: lot_id.into(),
            action: SlotAction::Occupied,
            rfid: Some(rfid.into()),
            timestamp: at,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.lot_id.clone(), self.slot_id.clone())
    }

    pub fn is_free(&self) -> bool {
        self.action == SlotAction::Free
    }

    pub fn is_held_by(&self, rfid: &str) -> bool {
        self.action == SlotAction::Occupied && self.rfid.as_deref() == Some(rfid)
    }

    pub fn matches(&self, lot_id: &str, slot_id: &str) -> bool {
        self.lot_id == lot_id && self.slot_id == slot_id
    }

    /// The slot after a successful reservation by `rfid`.
    pub fn reserved_by(&self, rfid: &str, at: DateTime<Utc>) -> Self {
        Slot::occupied(self.lot_id.clone(), self.slot_id.clone(), rfid, at)
    }

    /// The slot after being released.
    pub fn released(&self, at: DateTime<Utc>) -> Self {
        Slot::free(self.lot_id.clone(), self.slot_id.clone(), at)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("slot_id", &self.slot_id)
            .field("lot_id", &self.lot_id)
            .field("action", &self.action)
            .field("rfid", &self.rfid.as_ref().map(Masked))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotRecord {
    slot_id: String,
    lot_id: String,
    action: SlotAction,
    #[serde(default)]
    rfid: Option<String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<SlotRecord> for Slot {
    type Error = String;

    fn try_from(rec: SlotRecord) -> Result<Self, Self::Error> {
        // Empty strings are how some producers spell "no occupant".
        let rfid = rec.rfid.filter(|r| !r.is_empty());
        match (rec.action, rfid) {
            (SlotAction::Free, None) => Ok(Slot::free(rec.lot_id, rec.slot_id, rec.timestamp)),
            (SlotAction::Occupied, Some(rfid)) => {
                Ok(Slot::occupied(rec.lot_id, rec.slot_id, rfid, rec.timestamp))
            }
            (SlotAction::Free, Some(_)) => Err(format!(
                "slot {}/{} is free but carries an rfid",
                rec.lot_id, rec.slot_id
            )),
            (SlotAction::Occupied, None) => Err(format!(
                "slot {}/{} is occupied without an rfid",
                rec.lot_id, rec.slot_id
            )),
        }
    }
}

/// Counts shown in the slot view header and the admin dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub total: usize,
    pub available: usize,
    pub occupied: usize,
}

impl SnapshotStats {
    pub fn from_slots<'a>(slots: impl IntoIterator<Item = &'a Slot>) -> Self {
        slots.into_iter().fold(Self::default(), |mut acc, slot| {
            acc.total += 1;
            match slot.action {
                SlotAction::Free => acc.available += 1,
                SlotAction::Occupied => acc.occupied += 1,
            }
            acc
        })
    }
}

/// The slot `rfid` currently holds in `snapshot`, if any.
pub fn held_by<'a>(snapshot: &'a [Slot], rfid: &str) -> Option<&'a Slot> {
    snapshot.iter().find(|s| s.is_held_by(rfid))
}

/// Look up a slot by its lot-scoped identity.
pub fn find<'a>(snapshot: &'a [Slot], lot_id: &str, slot_id: &str) -> Option<&'a Slot> {
    snapshot.iter().find(|s| s.matches(lot_id, slot_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_slot_json_contract() {
        let slot = Slot::occupied("L1", "A1", "u1@x.com", at());
        let value = serde_json::to_value(&slot).unwrap();
        assert_eq!(value["slotId"], "A1");
        assert_eq!(value["lotId"], "L1");
        assert_eq!(value["action"], "occupied");
        assert_eq!(value["rfid"], "u1@x.com");

        let free: Slot = serde_json::from_value(serde_json::json!({
            "slotId": "A2",
            "lotId": "L1",
            "action": "free",
            "rfid": "",
            "timestamp": "2024-05-01T08:00:00Z"
        }))
        .unwrap();
        assert!(free.is_free());
        assert_eq!(free.rfid, None);
    }

    #[test]
    fn test_rfid_invariant_enforced_on_decode() {
        let occupied_without_owner = serde_json::json!({
            "slotId": "A1",
            "lotId": "L1",
            "action": "occupied",
            "timestamp": "2024-05-01T08:00:00Z"
        });
        assert!(serde_json::from_value::<Slot>(occupied_without_owner).is_err());

        let free_with_owner = serde_json::json!({
            "slotId": "A1",
            "lotId": "L1",
            "action": "free",
            "rfid": "u1@x.com",
            "timestamp": "2024-05-01T08:00:00Z"
        });
        assert!(serde_json::from_value::<Slot>(free_with_owner).is_err());
    }

    #[test]
    fn test_snapshot_helpers() {
        let snapshot = vec![
            Slot::free("L1", "A1", at()),
            Slot::occupied("L1", "A2", "u1@x.com", at()),
            Slot::occupied("L2", "A1", "u2@x.com", at()),
        ];

        assert_eq!(held_by(&snapshot, "u1@x.com").map(|s| s.slot_id.as_str()), Some("A2"));
        assert!(held_by(&snapshot, "u3@x.com").is_none());
        assert!(find(&snapshot, "L2", "A1").unwrap().is_held_by("u2@x.com"));

        let stats = SnapshotStats::from_slots(&snapshot);
        assert_eq!(stats, SnapshotStats { total: 3, available: 1, occupied: 2 });
    }

    #[test]
    fn test_debug_masks_occupant() {
        let slot = Slot::occupied("L1", "A1", "u1@x.com", at());
        assert!(!format!("{:?}", slot).contains("u1@x.com"));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use parkr_core::{Clock, Slot, SlotAction, SlotStore, StoreError};

const LOTS_KEY: &str = "lots";

// KEYS[1] = slot hash, ARGV[1] = rfid, ARGV[2] = timestamp
const RESERVE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return {"missing"}
    end
    local action = redis.call("HGET", KEYS[1], "action")
    if action ~= "free" then
        return {"conflict", action, redis.call("HGET", KEYS[1], "rfid") or "", redis.call("HGET", KEYS[1], "timestamp") or ""}
    end
    redis.call("HSET", KEYS[1], "action", "occupied", "rfid", ARGV[1], "timestamp", ARGV[2])
    return {"ok", "occupied", ARGV[1], ARGV[2]}
"#;

const FREE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return {"missing"}
    end
    local action = redis.call("HGET", KEYS[1], "action")
    local rfid = redis.call("HGET", KEYS[1], "rfid") or ""
    if action ~= "occupied" or rfid ~= ARGV[1] then
        return {"conflict", action, rfid, redis.call("HGET", KEYS[1], "timestamp") or ""}
    end
    redis.call("HSET", KEYS[1], "action", "free", "rfid", "", "timestamp", ARGV[2])
    return {"ok", "free", "", ARGV[2]}
"#;

/// Slot store kept in Redis, one hash per slot.
///
/// Layout: `lots` (set of lot ids), `slots:{lot}` (set of slot ids) and
/// `slot:{lot}:{slot}` (hash with `action`, `rfid`, `timestamp`).
#[derive(Clone)]
pub struct RedisSlotStore {
    client: redis::Client,
    clock: Arc<dyn Clock>,
}

impl RedisSlotStore {
    pub async fn new(connection_string: &str, clock: Arc<dyn Clock>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client, clock })
    }

    fn slot_key(lot_id: &str, slot_id: &str) -> String {
        format!("slot:{}:{}", lot_id, slot_id)
    }

    fn lot_key(lot_id: &str) -> String {
        format!("slots:{}", lot_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)
    }

    /// Administrative seeding: create a free slot unless it already exists.
    pub async fn insert_slot(&self, lot_id: &str, slot_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = Self::slot_key(lot_id, slot_id);
        let ts = self.clock.now().to_rfc3339();

        redis::pipe()
            .atomic()
            .sadd(LOTS_KEY, lot_id)
            .ignore()
            .sadd(Self::lot_key(lot_id), slot_id)
            .ignore()
            .hset_nx(&key, "action", SlotAction::Free.to_string())
            .ignore()
            .hset_nx(&key, "rfid", "")
            .ignore()
            .hset_nx(&key, "timestamp", ts)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)?;

        info!("Seeded slot {}/{}", lot_id, slot_id);
        Ok(())
    }

    async fn conditional(
        &self,
        script: &str,
        lot_id: &str,
        slot_id: &str,
        rfid: &str,
    ) -> Result<Slot, StoreError> {
        let mut conn = self.connection().await?;
        let ts = self.clock.now().to_rfc3339();

        let reply: Vec<String> = redis::Script::new(script)
            .key(Self::slot_key(lot_id, slot_id))
            .arg(rfid)
            .arg(&ts)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        match reply.first().map(String::as_str) {
            Some("ok") => slot_from_reply(lot_id, slot_id, &reply[1..]),
            Some("conflict") => Err(StoreError::Conflict {
                current: Box::new(slot_from_reply(lot_id, slot_id, &reply[1..])?),
            }),
            Some("missing") => Err(StoreError::NotFound(format!("slot {}/{}", lot_id, slot_id))),
            other => Err(StoreError::Serialization(format!("unexpected script reply {:?}", other))),
        }
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {:?}: {}", raw, e)))
}

fn build_slot(lot_id: &str, slot_id: &str, action: &str, rfid: &str, timestamp: &str) -> Result<Slot, StoreError> {
    let at = parse_timestamp(timestamp)?;
    match action {
        "free" => Ok(Slot::free(lot_id, slot_id, at)),
        "occupied" if !rfid.is_empty() => Ok(Slot::occupied(lot_id, slot_id, rfid, at)),
        _ => Err(StoreError::Serialization(format!(
            "slot {}/{} has inconsistent state {:?}",
            lot_id, slot_id, action
        ))),
    }
}

/// `[action, rfid, timestamp]` as returned by the scripts.
fn slot_from_reply(lot_id: &str, slot_id: &str, fields: &[String]) -> Result<Slot, StoreError> {
    match fields {
        [action, rfid, timestamp] => build_slot(lot_id, slot_id, action, rfid, timestamp),
        _ => Err(StoreError::Serialization(format!("short script reply for {}/{}", lot_id, slot_id))),
    }
}

fn slot_from_hash(lot_id: &str, slot_id: &str, fields: &HashMap<String, String>) -> Result<Slot, StoreError> {
    let get = |name: &str| fields.get(name).map(String::as_str).unwrap_or_default();
    build_slot(lot_id, slot_id, get("action"), get("rfid"), get("timestamp"))
}

#[async_trait]
impl SlotStore for RedisSlotStore {
    async fn list_slots(&self, lot_id: Option<&str>) -> Result<Vec<Slot>, StoreError> {
        let mut conn = self.connection().await?;

        let mut lots: Vec<String> = match lot_id {
            Some(lot) => vec![lot.to_string()],
            None => conn.smembers(LOTS_KEY).await.map_err(unavailable)?,
        };
        lots.sort();

        let mut keys = Vec::new();
        for lot in &lots {
            let mut slot_ids: Vec<String> = conn.smembers(Self::lot_key(lot)).await.map_err(unavailable)?;
            slot_ids.sort();
            keys.extend(slot_ids.into_iter().map(|s| (lot.clone(), s)));
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for (lot, slot) in &keys {
            pipe.hgetall(Self::slot_key(lot, slot));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await.map_err(unavailable)?;

        let mut slots = Vec::with_capacity(rows.len());
        for ((lot, slot), fields) in keys.iter().zip(rows.iter()) {
            if fields.is_empty() {
                // Index entry without a hash; skip rather than fail the whole listing
                warn!("Slot {}/{} indexed but missing", lot, slot);
                continue;
            }
            slots.push(slot_from_hash(lot, slot, fields)?);
        }
        Ok(slots)
    }

    async fn reserve(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        let slot = self.conditional(RESERVE_SCRIPT, lot_id, slot_id, rfid).await?;
        info!("Slot {}/{} reserved", lot_id, slot_id);
        Ok(slot)
    }

    async fn free(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        let slot = self.conditional(FREE_SCRIPT, lot_id, slot_id, rfid).await?;
        info!("Slot {}/{} freed", lot_id, slot_id);
        Ok(slot)
    }
}

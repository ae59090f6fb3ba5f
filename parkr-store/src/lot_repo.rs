use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use parkr_core::{Lot, LotDirectory, StoreError};

use crate::database::store_error;

pub struct PgLotDirectory {
    pool: PgPool,
}

impl PgLotDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LotRow {
    lot_id: String,
    name: String,
    capacity: i32,
    location: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Lot {
            lot_id: row.lot_id,
            name: row.name,
            capacity: u32::try_from(row.capacity).unwrap_or(0),
            location: row.location,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl LotDirectory for PgLotDirectory {
    async fn list_lots(&self) -> Result<Vec<Lot>, StoreError> {
        let rows: Vec<LotRow> = sqlx::query_as(
            "SELECT lot_id, name, capacity, location, created_at FROM lots ORDER BY lot_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Lot::from).collect())
    }
}

//! Get/set on the `ingestion_cursors` relation — the sole coordination
//! mechanism between collector restarts. No in-memory state is shared
//! between collectors; every resumability property must be derivable
//! from rows in this relation.

use super::{Store, StoreError};
use crate::models::CursorRow;

impl Store {
    /// Read the current cursor value for `source`, if one has been
    /// written yet. Returns `None` on first run.
    pub async fn get_cursor(&self, source: &str) -> Result<Option<String>, StoreError> {
        let row: Option<CursorRow> = sqlx::query_as(
            "SELECT source, value, updated_at FROM ingestion_cursors WHERE source = $1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(row.map(|r| r.value))
    }

    /// Upsert the cursor for `source`. Callers are responsible for only
    /// ever advancing it (the store does not enforce monotonicity; that
    /// is a property of the collectors' cycle logic, verified in
    /// `tests/`).
    pub async fn set_cursor(&self, source: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ingestion_cursors (source, value, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (source) DO UPDATE SET
               value = EXCLUDED.value,
               updated_at = EXCLUDED.updated_at",
        )
        .bind(source)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }
}

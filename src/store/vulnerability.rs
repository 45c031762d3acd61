//! Batched upsert primitives for raw and enriched vulnerability records.
//!
//! Each row is its own statement inside one transaction so a constraint
//! violation can be pinned to a specific index without aborting rows
//! already validated — the transaction as a whole still rolls back on
//! failure, which is correct here: a permanent storage error should
//! abort the cycle rather than silently drop just the bad row, since a
//! constraint violation on input the collector considered valid is
//! treated as a bug to investigate.

use super::{Store, StoreError};
use crate::models::{EnrichedVulnerability, RawVulnerability};

impl Store {
    pub async fn upsert_raw_vulnerabilities(
        &self,
        records: &[RawVulnerability],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        for (index, record) in records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO raw_vulnerabilities (identifier, source, payload, modified_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (identifier, source) DO UPDATE SET
                   payload = EXCLUDED.payload,
                   modified_at = EXCLUDED.modified_at",
            )
            .bind(&record.identifier)
            .bind(record.source.as_str())
            .bind(&record.payload)
            .bind(record.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| at_index(index, e))?;
        }

        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }

    pub async fn upsert_enriched_vulnerabilities(
        &self,
        records: &[EnrichedVulnerability],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        for (index, record) in records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO enriched_vulnerabilities
                    (identifier, source, payload, base_severity_score, exploit_probability, modified_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, now())
                 ON CONFLICT (identifier, source) DO UPDATE SET
                   payload = EXCLUDED.payload,
                   base_severity_score = EXCLUDED.base_severity_score,
                   exploit_probability = EXCLUDED.exploit_probability,
                   modified_at = EXCLUDED.modified_at,
                   updated_at = EXCLUDED.updated_at",
            )
            .bind(&record.identifier)
            .bind(record.source.as_str())
            .bind(&record.payload)
            .bind(record.base_severity_score)
            .bind(record.exploit_probability)
            .bind(record.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| at_index(index, e))?;
        }

        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }
}

fn at_index(index: usize, err: sqlx::Error) -> StoreError {
    match StoreError::classify(err) {
        StoreError::Permanent(msg) => {
            StoreError::Permanent(format!("batch index {index}: {msg}"))
        }
        other => other,
    }
}

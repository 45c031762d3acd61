//! Partition-on-demand and bulk row streaming for the daily
//! exploit-probability relation.
//!
//! Ordinary statement-level inserts would not sustain the ~300k rows a
//! full daily score bulletin can carry, so `bulk_append_probabilities`
//! uses Postgres's native `COPY FROM STDIN` via `sqlx`'s `PgCopyIn` — the
//! ecosystem's standard high-throughput row-copy channel for `sqlx` +
//! Postgres.

use chrono::{Datelike, NaiveDate};
use sqlx::postgres::PgPoolCopyExt;
use sqlx::Row;

use super::{Store, StoreError};
use crate::models::DailyProbability;

/// The first day of the month containing `date`, and the first day of
/// the following month — the half-open range a monthly partition covers.
fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .expect("first-of-month is always a valid date");
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
    .expect("first-of-next-month is always a valid date");
    (start, next)
}

impl Store {
    /// Idempotently create the monthly partition covering `as_of_date`.
    /// Partition names are `daily_exploit_probabilities_yYYYY_mMM`.
    pub async fn ensure_partition(&self, as_of_date: NaiveDate) -> Result<(), StoreError> {
        let (start, end) = month_bounds(as_of_date);
        let partition_name = format!(
            "daily_exploit_probabilities_y{}_m{:02}",
            start.year(),
            start.month()
        );

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {partition_name} \
             PARTITION OF daily_exploit_probabilities \
             FOR VALUES FROM ('{start}') TO ('{end}')"
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(())
    }

    /// Whether any row already exists for `as_of_date` — the
    /// idempotence gate the EPSS collector uses to treat a date as
    /// already-ingested.
    pub async fn has_probabilities_for_date(
        &self,
        as_of_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM daily_exploit_probabilities WHERE as_of_date = $1) AS present",
        )
        .bind(as_of_date)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(row.get::<bool, _>("present"))
    }

    /// Stream `rows` into the correct monthly partition via `COPY FROM
    /// STDIN`. Callers must have called [`Store::ensure_partition`] for
    /// every distinct month represented in `rows` beforehand.
    pub async fn bulk_append_probabilities(
        &self,
        rows: &[DailyProbability],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut copy_in = self
            .pool
            .copy_in_raw(
                "COPY daily_exploit_probabilities (as_of_date, identifier, score, percentile, payload) \
                 FROM STDIN WITH (FORMAT csv)",
            )
            .await
            .map_err(StoreError::classify)?;

        let mut buf = Vec::with_capacity(rows.len() * 96);
        for row in rows {
            let payload = serde_json::to_string(&row.payload).unwrap_or_else(|_| "{}".to_string());
            buf.extend_from_slice(
                format!(
                    "{},{},{},{},\"{}\"\n",
                    row.as_of_date,
                    csv_escape(&row.identifier),
                    row.score,
                    row.percentile,
                    payload.replace('"', "\"\"")
                )
                .as_bytes(),
            );
        }

        copy_in
            .send(buf.as_slice())
            .await
            .map_err(StoreError::classify)?;
        copy_in.finish().await.map_err(StoreError::classify)?;
        Ok(())
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_mid_month() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        let (start, end) = month_bounds(date);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    }

    #[test]
    fn month_bounds_december_rolls_year() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let (start, end) = month_bounds(date);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }
}

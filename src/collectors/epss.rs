//! Exploit-probability collector.
//!
//! Once per upstream publication, ingests the entire scored population
//! into the daily-probability relation for that as-of-date, gated by an
//! idempotence check: if any row already exists for the date, the cycle
//! is a no-op.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::error::{retry_store, CollectorError};
use crate::models::DailyProbability;
use crate::store::ProbabilityStore;

use super::USER_AGENT;

const INTER_PAGE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    total: u32,
    #[allow(dead_code)]
    offset: u32,
    #[allow(dead_code)]
    limit: u32,
    data: Vec<ScoreRow>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct ScoreRow {
    cve: String,
    epss: String,
    percentile: String,
    date: String,
}

fn parse_row(row: &ScoreRow) -> Result<DailyProbability, CollectorError> {
    let as_of_date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
        .map_err(|e| CollectorError::Malformed(format!("bad epss date {:?}: {e}", row.date)))?;
    let score: f32 = row
        .epss
        .parse()
        .map_err(|e| CollectorError::Malformed(format!("bad epss score {:?}: {e}", row.epss)))?;
    let percentile: f32 = row
        .percentile
        .parse()
        .map_err(|e| CollectorError::Malformed(format!("bad epss percentile {:?}: {e}", row.percentile)))?;

    Ok(DailyProbability {
        as_of_date,
        identifier: row.cve.clone(),
        score,
        percentile,
        payload: serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
    })
}

pub async fn run_cycle<S: ProbabilityStore>(store: &S, config: &CatalogConfig) -> Result<(), CollectorError> {
    if !config.enabled {
        return Ok(());
    }

    let client = Client::builder().user_agent(USER_AGENT).build()?;
    let url = config
        .url
        .clone()
        .unwrap_or_else(|| "https://api.first.org/data/v1/epss".to_string());
    let page_size = config.epss_page_size();

    let page0 = fetch_page(&client, &url, page_size, 0).await?;
    if page0.data.is_empty() {
        info!("epss upstream returned no rows, nothing to ingest");
        return Ok(());
    }

    let Some((as_of_date, first_rows)) = ingest_first_page(store, &page0).await? else {
        return Ok(());
    };

    let total = page0.total;
    let mut offset = first_rows.len() as u32;

    while offset < total {
        tokio::time::sleep(INTER_PAGE_DELAY).await;
        let page = fetch_page(&client, &url, page_size, offset).await?;
        if page.data.is_empty() {
            warn!(offset, total, "epss page returned no rows before reaching total, stopping");
            break;
        }
        let page_rows: Vec<DailyProbability> = page
            .data
            .iter()
            .map(parse_row)
            .collect::<Result<_, _>>()?;
        retry_store(|| store.bulk_append_probabilities(&page_rows)).await?;
        offset += page_rows.len() as u32;
    }

    info!(as_of_date = %as_of_date, total, "epss cycle complete");
    Ok(())
}

/// Apply the idempotence gate for the first page's as-of-date and, if the
/// date hasn't already been ingested, write its rows. Split out from
/// [`run_cycle`] so the gate is testable against a fake store without also
/// mocking the upstream fetch.
async fn ingest_first_page<S: ProbabilityStore>(
    store: &S,
    page0: &PageEnvelope,
) -> Result<Option<(NaiveDate, Vec<DailyProbability>)>, CollectorError> {
    let first_row = parse_row(&page0.data[0])?;
    let as_of_date = first_row.as_of_date;

    if retry_store(|| store.has_probabilities_for_date(as_of_date)).await? {
        info!(as_of_date = %as_of_date, "epss date already ingested, skipping cycle");
        return Ok(None);
    }

    retry_store(|| store.ensure_partition(as_of_date)).await?;

    let rows: Vec<DailyProbability> = page0
        .data
        .iter()
        .map(parse_row)
        .collect::<Result<_, _>>()?;
    retry_store(|| store.bulk_append_probabilities(&rows)).await?;

    Ok(Some((as_of_date, rows)))
}

async fn fetch_page(
    client: &Client,
    url: &str,
    limit: u32,
    offset: u32,
) -> Result<PageEnvelope, CollectorError> {
    let response = client
        .get(url)
        .query(&[("limit", limit.to_string()), ("offset", offset.to_string())])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CollectorError::UnexpectedStatus(status));
    }
    Ok(response.json::<PageEnvelope>().await?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreError;

    #[test]
    fn parse_row_converts_string_fields() {
        let row = ScoreRow {
            cve: "CVE-TEST-0001".to_string(),
            epss: "0.12345".to_string(),
            percentile: "0.6789".to_string(),
            date: "2100-01-01".to_string(),
        };
        let parsed = parse_row(&row).unwrap();
        assert_eq!(parsed.identifier, "CVE-TEST-0001");
        assert_eq!(parsed.as_of_date, NaiveDate::from_ymd_opt(2100, 1, 1).unwrap());
        assert!((parsed.score - 0.12345).abs() < 1e-6);
        assert!((parsed.percentile - 0.6789).abs() < 1e-6);
    }

    #[test]
    fn parse_row_rejects_malformed_date() {
        let row = ScoreRow {
            cve: "CVE-TEST-0001".to_string(),
            epss: "0.1".to_string(),
            percentile: "0.1".to_string(),
            date: "not-a-date".to_string(),
        };
        assert!(parse_row(&row).is_err());
    }

    #[derive(Default)]
    struct FakeStore {
        ingested_dates: Mutex<HashSet<NaiveDate>>,
        partitions_ensured: Mutex<Vec<NaiveDate>>,
        appended: Mutex<Vec<DailyProbability>>,
    }

    #[async_trait]
    impl ProbabilityStore for FakeStore {
        async fn has_probabilities_for_date(&self, as_of_date: NaiveDate) -> Result<bool, StoreError> {
            Ok(self.ingested_dates.lock().unwrap().contains(&as_of_date))
        }

        async fn ensure_partition(&self, as_of_date: NaiveDate) -> Result<(), StoreError> {
            self.partitions_ensured.lock().unwrap().push(as_of_date);
            Ok(())
        }

        async fn bulk_append_probabilities(&self, rows: &[DailyProbability]) -> Result<(), StoreError> {
            if let Some(row) = rows.first() {
                self.ingested_dates.lock().unwrap().insert(row.as_of_date);
            }
            self.appended.lock().unwrap().extend(rows.iter().cloned());
            Ok(())
        }
    }

    fn page(date: &str, cve: &str) -> PageEnvelope {
        PageEnvelope {
            total: 1,
            offset: 0,
            limit: 1,
            data: vec![ScoreRow {
                cve: cve.to_string(),
                epss: "0.5".to_string(),
                percentile: "0.5".to_string(),
                date: date.to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn first_ingestion_of_a_date_writes_rows() {
        let store = FakeStore::default();
        let result = ingest_first_page(&store, &page("2100-01-01", "CVE-TEST-0001"))
            .await
            .unwrap();
        assert!(result.is_some());
        assert_eq!(store.appended.lock().unwrap().len(), 1);
        assert_eq!(store.partitions_ensured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn already_ingested_date_short_circuits_without_writing() {
        let store = FakeStore::default();
        store
            .ingested_dates
            .lock()
            .unwrap()
            .insert(NaiveDate::from_ymd_opt(2100, 1, 1).unwrap());

        let result = ingest_first_page(&store, &page("2100-01-01", "CVE-TEST-0001"))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(store.appended.lock().unwrap().is_empty());
        assert!(store.partitions_ensured.lock().unwrap().is_empty());
    }
}

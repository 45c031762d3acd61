//! Known-Exploited-Catalog collector.
//!
//! A single whole-catalog fetch per cycle: compare the upstream release
//! timestamp to the stored cursor and, if unchanged, the cycle is a
//! no-op.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::config::CatalogConfig;
use crate::error::{retry_store, CollectorError};
use crate::models::{EnrichedVulnerability, VulnSource};
use crate::store::CatalogStore;

use super::USER_AGENT;

const CURSOR_KEY: &str = "known-exploited-catalog";

#[derive(Debug, Deserialize)]
struct CatalogEnvelope {
    #[serde(rename = "catalogVersion")]
    catalog_version: String,
    #[serde(rename = "dateReleased")]
    date_released: String,
    vulnerabilities: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "cveID")]
    cve_id: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

/// Normalise the release timestamp to RFC3339 where parseable, else fall
/// back to the raw catalog-version string. Cursor comparison then degrades
/// to string equality in that fallback case, which is acceptable but
/// fragile: a catalog that reuses version strings across releases would
/// be missed.
fn release_cursor(envelope: &CatalogEnvelope) -> String {
    DateTime::parse_from_rfc3339(&envelope.date_released)
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
        .unwrap_or_else(|_| envelope.catalog_version.clone())
}

pub async fn run_cycle<S: CatalogStore>(store: &S, config: &CatalogConfig) -> Result<(), CollectorError> {
    if !config.enabled {
        return Ok(());
    }

    let client = Client::builder().user_agent(USER_AGENT).build()?;
    let url = config
        .url
        .clone()
        .unwrap_or_else(|| "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json".to_string());

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(CollectorError::UnexpectedStatus(response.status()));
    }
    let envelope: CatalogEnvelope = response.json().await?;

    ingest_envelope(store, envelope).await
}

/// Apply the cursor-equality short-circuit and, if the catalog has moved
/// on, write the new records and advance the cursor. Split out from
/// [`run_cycle`] so this decision is testable against a fake store
/// without also mocking the upstream fetch.
async fn ingest_envelope<S: CatalogStore>(
    store: &S,
    envelope: CatalogEnvelope,
) -> Result<(), CollectorError> {
    let new_cursor = release_cursor(&envelope);
    let stored_cursor = retry_store(|| store.get_cursor(CURSOR_KEY)).await?;

    if stored_cursor.as_deref() == Some(new_cursor.as_str()) {
        info!(cursor = %new_cursor, "kev catalog unchanged, skipping");
        return Ok(());
    }

    let modified_at = DateTime::parse_from_rfc3339(&envelope.date_released)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let records: Vec<EnrichedVulnerability> = envelope
        .vulnerabilities
        .iter()
        .map(|entry| EnrichedVulnerability {
            identifier: entry.cve_id.clone(),
            source: VulnSource::KnownExploitedCatalog,
            payload: entry.rest.clone(),
            base_severity_score: None,
            exploit_probability: None,
            modified_at,
        })
        .collect();

    retry_store(|| store.upsert_enriched_vulnerabilities(&records)).await?;
    retry_store(|| store.set_cursor(CURSOR_KEY, &new_cursor)).await?;

    info!(
        count = records.len(),
        catalog_version = %envelope.catalog_version,
        "kev catalog ingested"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreError;

    fn envelope(date_released: &str, version: &str) -> CatalogEnvelope {
        CatalogEnvelope {
            catalog_version: version.to_string(),
            date_released: date_released.to_string(),
            vulnerabilities: vec![],
        }
    }

    #[test]
    fn release_cursor_normalizes_rfc3339() {
        let e = envelope("2099-01-01T00:00:00Z", "2099.01.01");
        assert_eq!(release_cursor(&e), "2099-01-01T00:00:00+00:00");
    }

    #[test]
    fn release_cursor_falls_back_to_version_string() {
        let e = envelope("not-a-timestamp", "2099.01.01");
        assert_eq!(release_cursor(&e), "2099.01.01");
    }

    #[derive(Default)]
    struct FakeStore {
        cursor: Mutex<Option<String>>,
        writes: Mutex<Vec<EnrichedVulnerability>>,
    }

    #[async_trait]
    impl CatalogStore for FakeStore {
        async fn get_cursor(&self, _source: &str) -> Result<Option<String>, StoreError> {
            Ok(self.cursor.lock().unwrap().clone())
        }

        async fn set_cursor(&self, _source: &str, value: &str) -> Result<(), StoreError> {
            *self.cursor.lock().unwrap() = Some(value.to_string());
            Ok(())
        }

        async fn upsert_enriched_vulnerabilities(
            &self,
            records: &[EnrichedVulnerability],
        ) -> Result<(), StoreError> {
            self.writes.lock().unwrap().extend(records.iter().cloned());
            Ok(())
        }
    }

    fn envelope_with_entry(date_released: &str, version: &str, cve_id: &str) -> CatalogEnvelope {
        CatalogEnvelope {
            catalog_version: version.to_string(),
            date_released: date_released.to_string(),
            vulnerabilities: vec![CatalogEntry {
                cve_id: cve_id.to_string(),
                rest: serde_json::json!({}),
            }],
        }
    }

    #[tokio::test]
    async fn unchanged_cursor_short_circuits_without_writing() {
        let store = FakeStore::default();
        *store.cursor.lock().unwrap() = Some("2099-01-01T00:00:00+00:00".to_string());

        let e = envelope_with_entry("2099-01-01T00:00:00Z", "2099.01.01", "CVE-2099-0001");
        ingest_envelope(&store, e).await.unwrap();

        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn changed_cursor_writes_records_and_advances_cursor() {
        let store = FakeStore::default();
        *store.cursor.lock().unwrap() = Some("2098-01-01T00:00:00+00:00".to_string());

        let e = envelope_with_entry("2099-01-01T00:00:00Z", "2099.01.01", "CVE-2099-0001");
        ingest_envelope(&store, e).await.unwrap();

        assert_eq!(store.writes.lock().unwrap().len(), 1);
        assert_eq!(
            store.cursor.lock().unwrap().as_deref(),
            Some("2099-01-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn first_run_with_no_cursor_writes_and_sets_cursor() {
        let store = FakeStore::default();

        let e = envelope_with_entry("2099-01-01T00:00:00Z", "2099.01.01", "CVE-2099-0001");
        ingest_envelope(&store, e).await.unwrap();

        assert_eq!(store.writes.lock().unwrap().len(), 1);
        assert!(store.cursor.lock().unwrap().is_some());
    }
}

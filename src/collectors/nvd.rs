//! Vulnerability-database collector.
//!
//! Walks time windows forward from the persisted cursor, paginating each
//! window with the upstream's `start-index`/`results-per-page` protocol.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::NvdConfig;
use crate::error::{retry_store, CollectorError};
use crate::models::{RawVulnerability, VulnSource};
use crate::store::Store;

use super::ratelimit::{Backoff, IntervalLimiter};
use super::USER_AGENT;

const SOURCE: &str = "canonical-database";
const CURSOR_KEY: &str = SOURCE;
const MAX_WINDOW_DAYS: i64 = 120;
const BACKOFF_START_SECS: u64 = 6;
const BACKOFF_MAX_SECS: u64 = 60;

fn epoch_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

/// One page of the upstream's JSON response envelope.
#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(rename = "resultsPerPage")]
    results_per_page: u32,
    #[serde(rename = "startIndex")]
    start_index: u32,
    #[serde(rename = "totalResults")]
    total_results: u32,
    vulnerabilities: Vec<serde_json::Value>,
}

/// Compute the closed-open `[start, end)` windows covering
/// `[cursor, now)`, each no wider than [`MAX_WINDOW_DAYS`]. Pure function
/// so the windowing invariant is testable without
/// any I/O.
pub fn windows(cursor: DateTime<Utc>, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut out = Vec::new();
    let mut start = cursor;
    while start < now {
        let end = (start + ChronoDuration::days(MAX_WINDOW_DAYS)).min(now);
        out.push((start, end));
        start = end;
    }
    out
}

/// Prefer CVSS v3.1, fall back to v3.0, else `None` (the scalar
/// extraction).
pub fn extract_base_score(payload: &serde_json::Value) -> Option<f32> {
    let metrics = payload.pointer("/cve/metrics")?;
    for key in ["cvssMetricV31", "cvssMetricV30"] {
        if let Some(score) = metrics
            .get(key)
            .and_then(|list| list.get(0))
            .and_then(|entry| entry.pointer("/cvssData/baseScore"))
            .and_then(|v| v.as_f64())
        {
            return Some(score as f32);
        }
    }
    None
}

fn identifier_of(record: &serde_json::Value) -> Option<String> {
    record
        .pointer("/cve/id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn last_modified_of(record: &serde_json::Value) -> Option<DateTime<Utc>> {
    record
        .pointer("/cve/lastModified")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub async fn run_cycle(store: &Store, config: &NvdConfig) -> Result<(), CollectorError> {
    if !config.common.enabled {
        return Ok(());
    }

    let client = Client::builder().user_agent(USER_AGENT).build()?;
    let base_url = config
        .common
        .url
        .clone()
        .unwrap_or_else(|| "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string());
    let page_size = config.page_size();

    let cursor = match retry_store(|| store.get_cursor(CURSOR_KEY)).await? {
        Some(value) => DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| epoch_start()),
        None => epoch_start(),
    };

    let now = Utc::now();
    let mut limiter = IntervalLimiter::for_credential(config.common.api_key.as_deref());

    for (start, end) in windows(cursor, now) {
        ingest_window(
            store,
            &client,
            &base_url,
            config.common.api_key.as_deref(),
            page_size,
            &mut limiter,
            start,
            end,
        )
        .await?;

        let end_rfc3339 = end.to_rfc3339();
        retry_store(|| store.set_cursor(CURSOR_KEY, &end_rfc3339)).await?;
        info!(window_start = %start, window_end = %end, "nvd window ingested");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn ingest_window(
    store: &Store,
    client: &Client,
    base_url: &str,
    api_key: Option<&str>,
    page_size: u32,
    limiter: &mut IntervalLimiter,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), CollectorError> {
    let mut start_index = 0u32;

    loop {
        limiter.acquire().await;
        let envelope = fetch_page(client, base_url, api_key, start, end, page_size, start_index)
            .await?;

        let mut batch = Vec::with_capacity(envelope.vulnerabilities.len());
        for record in &envelope.vulnerabilities {
            let Some(identifier) = identifier_of(record) else {
                warn!("nvd record missing cve.id, dropping");
                continue;
            };
            let modified_at = last_modified_of(record).unwrap_or(end);
            batch.push(RawVulnerability {
                identifier,
                source: VulnSource::CanonicalDatabase,
                payload: record.clone(),
                modified_at,
            });
        }
        retry_store(|| store.upsert_raw_vulnerabilities(&batch)).await?;

        let enriched: Vec<_> = envelope
            .vulnerabilities
            .iter()
            .filter_map(|record| {
                let identifier = identifier_of(record)?;
                Some(crate::models::EnrichedVulnerability {
                    identifier,
                    source: VulnSource::CanonicalDatabase,
                    base_severity_score: extract_base_score(record),
                    exploit_probability: None,
                    modified_at: last_modified_of(record).unwrap_or(end),
                    payload: record.clone(),
                })
            })
            .collect();
        retry_store(|| store.upsert_enriched_vulnerabilities(&enriched)).await?;

        start_index += envelope.vulnerabilities.len().max(1) as u32;
        if envelope.vulnerabilities.is_empty() || start_index >= envelope.total_results {
            break;
        }
        let _ = envelope.results_per_page;
        let _ = envelope.start_index;
    }

    Ok(())
}

async fn fetch_page(
    client: &Client,
    base_url: &str,
    api_key: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    page_size: u32,
    start_index: u32,
) -> Result<PageEnvelope, CollectorError> {
    let mut backoff = Backoff::new(
        std::time::Duration::from_secs(BACKOFF_START_SECS),
        std::time::Duration::from_secs(BACKOFF_MAX_SECS),
    );

    loop {
        let mut request = client
            .get(base_url)
            .query(&[
                ("pubStartDate", start.to_rfc3339()),
                ("pubEndDate", end.to_rfc3339()),
                ("resultsPerPage", page_size.to_string()),
                ("startIndex", start_index.to_string()),
            ]);
        if let Some(key) = api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<PageEnvelope>().await?);
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            let delay = backoff.next_delay();
            warn!(status = %status, delay_secs = delay.as_secs(), "nvd upstream throttled, backing off");
            tokio::time::sleep(delay).await;
            continue;
        }

        return Err(CollectorError::UnexpectedStatus(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_range_with_no_gaps_or_overlaps_and_respect_ceiling() {
        // Scenario S3: cursor 2000-01-01, now 2000-08-01 -> two windows,
        // the first running the full 120-day ceiling to 2000-04-30, the
        // second clipped to `now` rather than running the full ceiling.
        let cursor = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2000, 8, 1, 0, 0, 0).unwrap();
        let w = windows(cursor, now);

        assert_eq!(w.len(), 2);
        assert_eq!(w[0], (cursor, cursor + ChronoDuration::days(120)));
        assert_eq!(w[0].1, Utc.with_ymd_and_hms(2000, 4, 30, 0, 0, 0).unwrap());
        assert_eq!(w[1].0, w[0].1);
        assert_eq!(w[1].1, now);
        for (start, end) in &w {
            assert!((*end - *start) <= ChronoDuration::days(120));
        }
    }

    #[test]
    fn windows_empty_when_cursor_is_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(windows(now, now).is_empty());
    }

    #[test]
    fn extract_base_score_prefers_v31_over_v30() {
        let payload = serde_json::json!({
            "cve": {
                "metrics": {
                    "cvssMetricV31": [{"cvssData": {"baseScore": 9.8}}],
                    "cvssMetricV30": [{"cvssData": {"baseScore": 5.0}}]
                }
            }
        });
        assert_eq!(extract_base_score(&payload), Some(9.8));
    }

    #[test]
    fn extract_base_score_falls_back_to_v30() {
        let payload = serde_json::json!({
            "cve": {"metrics": {"cvssMetricV30": [{"cvssData": {"baseScore": 5.0}}]}}
        });
        assert_eq!(extract_base_score(&payload), Some(5.0));
    }

    #[test]
    fn extract_base_score_none_when_absent() {
        let payload = serde_json::json!({"cve": {"metrics": {}}});
        assert_eq!(extract_base_score(&payload), None);
    }

    proptest::proptest! {
        #[test]
        fn windows_always_tile_the_range_without_gaps_or_overlaps(
            cursor_secs in 0i64..2_000_000_000,
            span_secs in 0i64..40_000_000,
        ) {
            let cursor = Utc.timestamp_opt(cursor_secs, 0).unwrap();
            let now = cursor + ChronoDuration::seconds(span_secs);
            let w = windows(cursor, now);

            let mut cursor_pos = cursor;
            for (start, end) in &w {
                prop_assert_eq!(*start, cursor_pos);
                prop_assert!(*end <= now);
                prop_assert!(*end - *start <= ChronoDuration::days(MAX_WINDOW_DAYS));
                cursor_pos = *end;
            }
            prop_assert_eq!(cursor_pos, now);
        }
    }
}

//! Syndicated-feed collector.
//!
//! Fetches each configured feed over `reqwest`, parses it with `feed_rs`
//! (RSS 2.0 and Atom alike), sanitizes and dual-writes every entry, and
//! does so for many configured feeds fetched in parallel under a
//! bounded-concurrency gate.

use std::sync::Arc;

use chrono::Utc;
use feed_rs::model::Entry;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{FeedCollectorConfig, FeedConfig};
use crate::error::{retry_store, CollectorError};
use crate::models::Article;
use crate::sanitize::sanitize_html;
use crate::store::Store;

use super::USER_AGENT;

/// Run one cycle: fetch, parse, sanitise, and dual-write every enabled
/// feed, bounded to `config.concurrency` concurrent fetches. A per-feed
/// failure is logged and does not abort the cycle for other feeds; the
/// collector records no cursor (idempotence comes from the GUID-keyed
/// upsert).
pub async fn run_cycle(store: &Store, feeds: &[FeedConfig], config: &FeedCollectorConfig) {
    let client = match Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.per_feed_timeout())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build http client for feed collector");
            return;
        }
    };

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for feed in feeds {
        let client = client.clone();
        let semaphore = semaphore.clone();
        let store = store.clone();
        let feed = feed.clone();
        let max_bytes = config.max_response_bytes;

        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            process_feed(&client, &store, &feed, max_bytes).await
        });
    }

    while let Some(result) = tasks.next().await {
        if let Err(e) = result {
            warn!(error = %e, "feed cycle encountered an error");
        }
    }
}

async fn process_feed(
    client: &Client,
    store: &Store,
    feed: &FeedConfig,
    max_bytes: u64,
) -> Result<(), CollectorError> {
    debug!(feed = %feed.name, url = %feed.url, "fetching feed");

    let body = match fetch_capped(client, &feed.url, max_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(feed = %feed.name, error = %e, "feed fetch failed, skipping for this cycle");
            return Ok(());
        }
    };

    let parsed = match feed_rs::parser::parse(body.as_slice()) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(feed = %feed.name, error = %e, "feed failed to parse as rss or atom, skipping");
            return Ok(());
        }
    };

    for entry in &parsed.entries {
        match normalize_entry(entry, feed) {
            Some(article) => {
                if let Err(e) = retry_store(|| store.dual_write_article(&article)).await {
                    warn!(feed = %feed.name, guid = %article.guid, error = %e, "failed to write article");
                }
            }
            None => {
                warn!(feed = %feed.name, "item has neither guid nor link, dropping");
            }
        }
    }

    info!(feed = %feed.name, items = parsed.entries.len(), "feed cycle complete");
    Ok(())
}

/// Fetch `url`, aborting early if the response exceeds `max_bytes` —
/// the content-length cap this collector enforces to prevent unbounded
/// ingestion from a misbehaving or malicious upstream.
async fn fetch_capped(client: &Client, url: &str, max_bytes: u64) -> Result<Vec<u8>, CollectorError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CollectorError::UnexpectedStatus(status));
    }

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(CollectorError::Malformed(format!(
                "response for {url} exceeded {max_bytes} byte cap"
            )));
        }
    }
    Ok(buf)
}

/// Compute identity, resolve the published timestamp, and sanitise the
/// body/summary for one feed entry.
fn normalize_entry(entry: &Entry, feed: &FeedConfig) -> Option<Article> {
    let guid = identity(entry)?;

    let published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();

    let body_raw = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();

    let summary_raw = entry.summary.as_ref().map(|s| s.content.clone());

    let author = entry.authors.first().map(|p| p.name.clone());
    let categories = entry.categories.iter().map(|c| c.term.clone()).collect();

    Some(Article {
        guid,
        title,
        link,
        published_at,
        body: sanitize_html(&body_raw),
        summary: summary_raw.map(|s| sanitize_html(&s)),
        author,
        categories,
        feed_name: feed.name.clone(),
        feed_url: feed.url.clone(),
    })
}

/// GUID if present, else the item's link; `None` if neither is present
/// (such items are dropped).
fn identity(entry: &Entry) -> Option<String> {
    if !entry.id.is_empty() {
        return Some(entry.id.clone());
    }
    entry.links.first().map(|l| l.href.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use feed_rs::model::{Content, Link, Text};

    fn bare_entry() -> Entry {
        Entry::default()
    }

    #[test]
    fn identity_prefers_guid() {
        let mut entry = bare_entry();
        entry.id = "guid-1".to_string();
        entry.links.push(Link {
            href: "https://x/a".to_string(),
            ..Default::default()
        });
        assert_eq!(identity(&entry), Some("guid-1".to_string()));
    }

    #[test]
    fn identity_falls_back_to_link() {
        let mut entry = bare_entry();
        entry.links.push(Link {
            href: "https://x/a".to_string(),
            ..Default::default()
        });
        assert_eq!(identity(&entry), Some("https://x/a".to_string()));
    }

    #[test]
    fn identity_none_when_neither_present() {
        assert_eq!(identity(&bare_entry()), None);
    }

    #[test]
    fn published_falls_back_to_updated_then_now() {
        let feed = FeedConfig {
            name: "f".to_string(),
            url: "https://x".to_string(),
            type_hint: None,
            tags: vec![],
        };

        let mut entry = bare_entry();
        entry.id = "g1".to_string();
        entry.updated = Some(Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap());
        let article = normalize_entry(&entry, &feed).unwrap();
        assert_eq!(
            article.published_at,
            Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn sanitizes_body_and_summary() {
        let feed = FeedConfig {
            name: "f".to_string(),
            url: "https://x".to_string(),
            type_hint: None,
            tags: vec![],
        };
        let mut entry = bare_entry();
        entry.id = "g1".to_string();
        entry.content = Some(Content {
            body: Some("<p>hi</p><script>x</script>".to_string()),
            content_type: mime::TEXT_HTML,
            length: None,
            src: None,
        });
        entry.summary = Some(Text {
            content: "<p>sum</p><script>x</script>".to_string(),
            content_type: mime::TEXT_HTML,
            src: None,
        });
        let article = normalize_entry(&entry, &feed).unwrap();
        assert_eq!(article.body, "<p>hi</p>");
        assert_eq!(article.summary.as_deref(), Some("<p>sum</p>"));
    }
}

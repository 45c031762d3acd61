//! Domain types shared across collectors and the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single syndicated-feed item, normalised and sanitised, ready for the
/// store's dual-write primitive.
///
/// `guid` is the item's stable identity: its GUID if present, else its
/// link. Items with neither are rejected upstream of this type's
/// construction (see [`crate::collectors::feed`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub feed_name: String,
    pub feed_url: String,
}

/// The source a vulnerability record was last observed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VulnSource {
    CanonicalDatabase,
    KnownExploitedCatalog,
}

impl VulnSource {
    pub fn as_str(self) -> &'static str {
        match self {
            VulnSource::CanonicalDatabase => "canonical-database",
            VulnSource::KnownExploitedCatalog => "known-exploited-catalog",
        }
    }
}

/// A verbatim upstream payload keyed by (identifier, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVulnerability {
    pub identifier: String,
    pub source: VulnSource,
    pub payload: serde_json::Value,
    pub modified_at: DateTime<Utc>,
}

/// A vulnerability row carrying the upstream payload plus two indexed
/// scalar columns derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedVulnerability {
    pub identifier: String,
    pub source: VulnSource,
    pub payload: serde_json::Value,
    pub base_severity_score: Option<f32>,
    pub exploit_probability: Option<f32>,
    pub modified_at: DateTime<Utc>,
}

/// One row of the daily exploit-probability dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyProbability {
    pub as_of_date: NaiveDate,
    pub identifier: String,
    pub score: f32,
    pub percentile: f32,
    pub payload: serde_json::Value,
}

/// A per-collector checkpoint, persisted in `ingestion_cursors`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CursorRow {
    pub source: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

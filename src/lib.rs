//! # vulncollect
//!
//! A long-running, self-hosted vulnerability-intelligence ingestion engine.
//!
//! Four concurrent collectors aggregate heterogeneous public cybersecurity
//! data and land it, normalised and deduplicated, in a Postgres store:
//!
//! - `collectors::feed` — syndicated article feeds (RSS 2.0 / Atom)
//! - `collectors::nvd` — the canonical vulnerability database, windowed
//!   and paginated
//! - `collectors::kev` — the CISA Known Exploited Vulnerabilities catalog
//! - `collectors::epss` — the FIRST.org Exploit Prediction Scoring System
//!
//! `supervisor` starts each collector on its own cadence and owns graceful
//! shutdown; `store` owns the connection pool, schema migrations, and the
//! transactional write primitives collectors use to guarantee idempotent
//! writes across restarts.

pub mod collectors;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod sanitize;
pub mod store;
pub mod supervisor;

pub use config::Config;
pub use error::{CollectorError, StoreError};
pub use store::Store;

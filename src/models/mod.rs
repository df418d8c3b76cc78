use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A standing search query the scheduler re-evaluates periodically.
#[derive(Debug, Clone)]
pub struct Watch {
    pub id: i64,
    /// Search terms, at least one. Joined into the query sent to each source.
    pub terms: Vec<String>,
    pub active: bool,
    /// When set, raw items are kept only if the title contains every term.
    pub strict: bool,
    /// Source name -> enabled. Sources missing from the map are not queried.
    pub enabled_sites: HashMap<String, bool>,
    /// Stamped by the scheduler after a successful run, never by the store.
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    pub fn site_enabled(&self, source: &str) -> bool {
        self.enabled_sites.get(source).copied().unwrap_or(false)
    }
}

/// Insert form of a watch.
#[derive(Debug, Clone)]
pub struct NewWatch {
    pub terms: Vec<String>,
    pub strict: bool,
    pub enabled_sites: HashMap<String, bool>,
}

/// An unfiltered candidate result returned by one source for one search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    /// Canonical offer URL; the sole deduplication key within a watch.
    pub link: String,
    /// Opaque price string, never parsed or compared numerically.
    pub price: Option<String>,
    pub source: String,
    pub image: Option<String>,
}

/// A persisted, uniquely identified offer seen for a watch.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub id: i64,
    pub watch_id: i64,
    pub link: String,
    pub title: String,
    pub source: String,
    pub price: Option<String>,
    pub image: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// Unread-by-user state, cleared by acknowledge. Not recency of scrape.
    pub is_new: bool,
}

/// Materialized per-watch counts, recomputed from `results` on every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultsMeta {
    pub total_count: i64,
    pub new_count: i64,
}

/// What an ingest call changed.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub new_items: Vec<ResultItem>,
    pub total_count: i64,
}

/// Delta handed to the notifier after a successful ingest.
#[derive(Debug, Clone)]
pub struct IngestDelta {
    pub watch_id: i64,
    pub new_items: Vec<ResultItem>,
    pub total_count: i64,
}

mod aggregator;

pub use aggregator::{Aggregator, Collection};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::RawItem;

/// A single marketplace behind a uniform search capability.
///
/// Implementations own their scraping, sessions and internal retry
/// behavior; the engine only requires that `search` can be invoked
/// repeatedly and returns every candidate item for the given terms.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source name, used in `Watch::enabled_sites` and stored on
    /// every result row.
    fn name(&self) -> &str;

    async fn search(&self, terms: &[String]) -> anyhow::Result<Vec<RawItem>>;
}

/// Failure of one source during a collection. Isolated to that source,
/// never aborts the rest of the fan-out.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// The set of marketplace adapters known to the engine.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

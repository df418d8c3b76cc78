use std::collections::HashMap;
use std::time::Duration;

use futures::future;
use tokio::time::timeout;

use crate::models::{RawItem, Watch};

use super::{AdapterError, SourceRegistry};

/// Outcome of one fan-out over a watch's enabled sources.
#[derive(Debug, Default)]
pub struct Collection {
    pub items: Vec<RawItem>,
    pub errors: HashMap<String, AdapterError>,
    /// Number of sources that were actually invoked.
    pub attempted: usize,
}

impl Collection {
    /// Every invoked source failed. An empty registry or a watch with no
    /// enabled sites is not a failure, just an empty collection.
    pub fn total_failure(&self) -> bool {
        self.attempted > 0 && self.errors.len() == self.attempted
    }
}

/// Fan-out/fan-in boundary over the source adapters.
///
/// Queries every enabled source concurrently, each under its own
/// timeout, and folds the results into one item list plus a per-source
/// error map. Never persists and never deduplicates; that is the
/// repository's job.
pub struct Aggregator {
    registry: SourceRegistry,
    source_timeout: Duration,
}

impl Aggregator {
    pub fn new(registry: SourceRegistry, source_timeout: Duration) -> Self {
        Self {
            registry,
            source_timeout,
        }
    }

    pub async fn collect(&self, watch: &Watch) -> Collection {
        let enabled: Vec<_> = self
            .registry
            .adapters()
            .iter()
            .filter(|a| watch.site_enabled(a.name()))
            .collect();

        let searches = enabled.iter().map(|adapter| {
            let name = adapter.name().to_string();
            async move {
                let result = timeout(self.source_timeout, adapter.search(&watch.terms)).await;
                (name, result)
            }
        });

        let mut collection = Collection {
            attempted: enabled.len(),
            ..Collection::default()
        };

        for (name, result) in future::join_all(searches).await {
            match result {
                Ok(Ok(items)) => {
                    tracing::debug!("Fetched {} items from {}", items.len(), name);
                    collection.items.extend(
                        items
                            .into_iter()
                            .filter(|item| !watch.strict || matches_all_terms(&item.title, &watch.terms)),
                    );
                }
                Ok(Err(e)) => {
                    tracing::debug!("Source {} failed: {}", name, e);
                    collection
                        .errors
                        .insert(name, AdapterError::Failed(e.to_string()));
                }
                Err(_) => {
                    tracing::debug!("Source {} timed out", name);
                    collection
                        .errors
                        .insert(name, AdapterError::Timeout(self.source_timeout));
                }
            }
        }

        collection
    }
}

/// Case-insensitive substring match of every term against the title.
fn matches_all_terms(title: &str, terms: &[String]) -> bool {
    let title = title.to_lowercase();
    terms.iter().all(|term| title.contains(&term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::models::RawItem;
    use crate::sources::SourceAdapter;

    use super::*;

    struct FixedAdapter {
        name: &'static str,
        items: Vec<RawItem>,
    }

    #[async_trait]
    impl SourceAdapter for FixedAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _terms: &[String]) -> anyhow::Result<Vec<RawItem>> {
            Ok(self.items.clone())
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(&self, _terms: &[String]) -> anyhow::Result<Vec<RawItem>> {
            anyhow::bail!("503 from upstream")
        }
    }

    struct HangingAdapter;

    #[async_trait]
    impl SourceAdapter for HangingAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        async fn search(&self, _terms: &[String]) -> anyhow::Result<Vec<RawItem>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    fn item(source: &str, link: &str, title: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: link.to_string(),
            price: None,
            source: source.to_string(),
            image: None,
        }
    }

    fn watch_for(sites: &[&str], strict: bool, terms: &[&str]) -> Watch {
        Watch {
            id: 1,
            terms: terms.iter().map(|t| t.to_string()).collect(),
            active: true,
            strict,
            enabled_sites: sites.iter().map(|s| (s.to_string(), true)).collect(),
            last_run: None,
            created_at: Utc::now(),
        }
    }

    fn aggregator(adapters: Vec<Arc<dyn SourceAdapter>>) -> Aggregator {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        Aggregator::new(registry, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn collects_the_union_of_all_sources() {
        let agg = aggregator(vec![
            Arc::new(FixedAdapter {
                name: "alpha",
                items: vec![item("alpha", "a1", "ThinkPad X220")],
            }),
            Arc::new(FixedAdapter {
                name: "beta",
                items: vec![item("beta", "b1", "ThinkPad T480")],
            }),
        ]);

        let collection = agg.collect(&watch_for(&["alpha", "beta"], false, &["thinkpad"])).await;
        assert_eq!(collection.items.len(), 2);
        assert!(collection.errors.is_empty());
        assert_eq!(collection.attempted, 2);
        assert!(!collection.total_failure());
    }

    #[tokio::test]
    async fn failed_source_is_isolated() {
        let agg = aggregator(vec![
            Arc::new(FixedAdapter {
                name: "alpha",
                items: vec![item("alpha", "a1", "ThinkPad X220")],
            }),
            Arc::new(FailingAdapter),
        ]);

        let collection = agg.collect(&watch_for(&["alpha", "broken"], false, &["thinkpad"])).await;
        assert_eq!(collection.items.len(), 1);
        assert_eq!(collection.errors.len(), 1);
        assert!(matches!(collection.errors["broken"], AdapterError::Failed(_)));
        assert!(!collection.total_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_source_times_out_without_blocking_others() {
        let agg = aggregator(vec![
            Arc::new(FixedAdapter {
                name: "alpha",
                items: vec![item("alpha", "a1", "ThinkPad X220")],
            }),
            Arc::new(HangingAdapter),
        ]);

        let collection = agg.collect(&watch_for(&["alpha", "slow"], false, &["thinkpad"])).await;
        assert_eq!(collection.items.len(), 1);
        assert!(matches!(collection.errors["slow"], AdapterError::Timeout(_)));
    }

    #[tokio::test]
    async fn all_sources_failing_is_a_total_failure() {
        let agg = aggregator(vec![Arc::new(FailingAdapter)]);

        let collection = agg.collect(&watch_for(&["broken"], false, &["thinkpad"])).await;
        assert!(collection.items.is_empty());
        assert!(collection.total_failure());
    }

    #[tokio::test]
    async fn disabled_sites_are_never_invoked() {
        let agg = aggregator(vec![
            Arc::new(FixedAdapter {
                name: "alpha",
                items: vec![item("alpha", "a1", "ThinkPad X220")],
            }),
            Arc::new(FailingAdapter),
        ]);

        // Only alpha enabled; the broken adapter must not even count.
        let collection = agg.collect(&watch_for(&["alpha"], false, &["thinkpad"])).await;
        assert_eq!(collection.attempted, 1);
        assert!(collection.errors.is_empty());
        assert_eq!(collection.items.len(), 1);
    }

    #[tokio::test]
    async fn no_enabled_sites_is_an_empty_collection_not_a_failure() {
        let agg = aggregator(vec![Arc::new(FailingAdapter)]);

        let mut watch = watch_for(&[], false, &["thinkpad"]);
        watch.enabled_sites = HashMap::from([("broken".to_string(), false)]);

        let collection = agg.collect(&watch).await;
        assert_eq!(collection.attempted, 0);
        assert!(!collection.total_failure());
    }

    #[tokio::test]
    async fn strict_watch_drops_titles_missing_a_term() {
        let agg = aggregator(vec![Arc::new(FixedAdapter {
            name: "alpha",
            items: vec![
                item("alpha", "a1", "ThinkPad X220 8GB"),
                item("alpha", "a2", "Dell Latitude"),
                item("alpha", "a3", "Lenovo THINKPAD T480 x220 spares"),
            ],
        })]);

        let collection = agg
            .collect(&watch_for(&["alpha"], true, &["thinkpad", "x220"]))
            .await;
        let links: Vec<_> = collection.items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["a1", "a3"]);
    }

    #[test]
    fn term_matching_is_case_insensitive_substring() {
        assert!(matches_all_terms(
            "ThinkPad X220 8GB",
            &["thinkpad".to_string(), "X220".to_string()]
        ));
        assert!(!matches_all_terms(
            "ThinkPad T480",
            &["thinkpad".to_string(), "x220".to_string()]
        ));
        assert!(matches_all_terms("anything", &[]));
    }
}

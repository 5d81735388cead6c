//! Relevance-ranked subgraph retrieval
//!
//! A question is matched against node names through the store's full-text
//! index; every hit is returned with its one-hop neighbourhood. The result
//! is serialized as JSON and handed to the answer synthesizer as context.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::deadline::CallBudget;
use crate::domain::ontology::OntologyProfile;
use crate::error::{Error, Result};

use super::repository::{ContextRecord, GraphStore};
use super::writer::sanitize_label;

/// Retrieves graph context for natural-language queries
pub struct SubgraphRetriever {
    store: Arc<dyn GraphStore>,
    profile: Arc<OntologyProfile>,
    budget: CallBudget,
    index_ready: OnceCell<()>,
}

impl SubgraphRetriever {
    /// Create a retriever for `profile` on `store`
    pub fn new(store: Arc<dyn GraphStore>, profile: Arc<OntologyProfile>) -> Self {
        Self {
            store,
            profile,
            budget: CallBudget::unbounded(),
            index_ready: OnceCell::new(),
        }
    }

    /// Apply a timeout/cancellation budget to store calls
    pub fn with_budget(mut self, budget: CallBudget) -> Self {
        self.budget = budget;
        self
    }

    /// The profile whose labels are searched
    pub fn profile(&self) -> &Arc<OntologyProfile> {
        &self.profile
    }

    /// Labels searched by this retriever, as stored in the graph
    fn labels(&self) -> Vec<String> {
        self.profile
            .labels()
            .iter()
            .map(|l| sanitize_label(l.as_str()))
            .collect()
    }

    /// Bind the profile and create the full-text index, once per retriever
    async fn ensure_ready(&self) -> Result<()> {
        self.index_ready
            .get_or_try_init(|| async {
                self.budget
                    .run("claim profile", self.store.claim_profile(self.profile.id()))
                    .await?;
                self.budget
                    .run(
                        "ensure fulltext index",
                        self.store.ensure_fulltext_index(&self.labels()),
                    )
                    .await?;
                debug!(backend = self.store.backend(), "Full-text index ready");
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }

    /// Find nodes matching `query` and their neighbours.
    ///
    /// Returns at most `limit` records ordered by descending score, or a
    /// single [`ContextRecord::NoMatches`] when nothing matched. Queries
    /// with no letters or digits and `limit == 0` never match.
    pub async fn retrieve_context(&self, query: &str, limit: usize) -> Result<Vec<ContextRecord>> {
        let query = query.trim();
        if limit == 0 || !query.chars().any(char::is_alphanumeric) {
            debug!(query = %query, limit = limit, "Query cannot match anything");
            return Ok(vec![ContextRecord::no_matches(query)]);
        }

        self.ensure_ready().await?;

        let mut matches = self
            .budget
            .run(
                "fulltext search",
                self.store.fulltext_search(query, &self.labels(), limit),
            )
            .await?;

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);

        info!(
            backend = self.store.backend(),
            query = %query,
            matches = matches.len(),
            "Retrieved graph context"
        );

        if matches.is_empty() {
            return Ok(vec![ContextRecord::no_matches(query)]);
        }
        Ok(matches.into_iter().map(ContextRecord::Match).collect())
    }
}

/// Pretty-printed JSON array of context records, order preserved
pub fn render_context(records: &[ContextRecord]) -> String {
    serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::repository::ContextMatch;
    use crate::domain::knowledge::testing::{RecordingStore, StoreCall};
    use crate::domain::ontology::{CUSTOMER_COMMERCE_PROFILE, OntologyRegistry};

    fn hit(name: &str, score: f64) -> ContextMatch {
        ContextMatch {
            entity: name.into(),
            entity_type: "Brand".into(),
            related_entities: vec![],
            relationships: vec![],
            score,
        }
    }

    fn retriever(store: Arc<RecordingStore>) -> SubgraphRetriever {
        let profile = OntologyRegistry::builtin()
            .require(CUSTOMER_COMMERCE_PROFILE)
            .unwrap();
        SubgraphRetriever::new(store, profile)
    }

    #[tokio::test]
    async fn test_unmatchable_queries_return_sentinel_without_store_calls() {
        let store = Arc::new(RecordingStore::default());
        let retriever = retriever(store.clone());

        for (query, limit) in [("Apple", 0), ("", 5), ("  ?!  ", 5)] {
            let records = retriever.retrieve_context(query, limit).await.unwrap();
            assert_eq!(records.len(), 1);
            assert!(records[0].is_sentinel());
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_returns_sentinel() {
        let store = Arc::new(RecordingStore::default());
        let records = retriever(store)
            .retrieve_context("quantum", 5)
            .await
            .unwrap();
        assert_eq!(records, vec![ContextRecord::no_matches("quantum")]);
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let store = Arc::new(RecordingStore {
            results: vec![hit("low", 0.1), hit("high", 3.0), hit("mid", 1.0)],
            ..Default::default()
        });
        let records = retriever(store)
            .retrieve_context("anything", 2)
            .await
            .unwrap();

        let names: Vec<_> = records
            .iter()
            .map(|r| r.as_match().unwrap().entity.as_str())
            .collect();
        assert_eq!(names, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn test_index_ensured_once_per_retriever() {
        let store = Arc::new(RecordingStore::default());
        let retriever = retriever(store.clone());

        retriever.retrieve_context("Apple", 5).await.unwrap();
        retriever.retrieve_context("PayPal", 5).await.unwrap();

        let calls = store.calls();
        let index_calls = calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Index(_)))
            .count();
        assert_eq!(index_calls, 1);
        assert_eq!(calls[0], StoreCall::Claim(CUSTOMER_COMMERCE_PROFILE.into()));
        match &calls[1] {
            StoreCall::Index(labels) => assert!(labels.contains(&"PaymentMethod".to_string())),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_render_context_sentinel() {
        let rendered = render_context(&[ContextRecord::no_matches("quantum")]);
        assert_eq!(
            rendered,
            "[\n  {\n    \"message\": \"No related entities found for 'quantum'\"\n  }\n]"
        );
    }

    #[test]
    fn test_render_context_preserves_order() {
        let record = |name: &str, score: f64| {
            ContextRecord::Match(ContextMatch {
                entity: name.into(),
                entity_type: "Brand".into(),
                related_entities: vec![],
                relationships: vec![],
                score,
            })
        };
        let rendered = render_context(&[record("b", 2.0), record("a", 1.0)]);
        let first = rendered.find("\"b\"").unwrap();
        let second = rendered.find("\"a\"").unwrap();
        assert!(first < second);
        assert!(rendered.contains("\"related_entities\": []"));
    }
}

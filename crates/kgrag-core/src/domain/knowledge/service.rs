//! Ingestion service
//!
//! Drives the construction pipeline for a list of topics: fetch a preview
//! from the source, extract entities, persist them. A topic that fails is
//! recorded and the batch moves on.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::deadline::CallBudget;
use crate::domain::ontology::OntologyProfile;
use crate::error::{Error, Result};
use crate::llm::CompletionModel;

use super::entity::Entity;
use super::extractor::EntityExtractor;
use super::repository::GraphStore;
use super::source::SourceText;
use super::writer::{GraphWriter, PersistSummary};

/// What happened to one topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopicStatus {
    /// Entities were extracted and persisted
    Ingested { summary: PersistSummary },
    /// Extraction produced nothing usable; `raw_output` on the report holds the model text
    NoEntities,
    /// The source has no such topic
    Skipped { reason: String },
    /// Any other failure
    Failed { code: String, error: String },
}

/// Outcome of ingesting one topic
#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    pub entities: Vec<Entity>,
    #[serde(flatten)]
    pub status: TopicStatus,
}

impl TopicReport {
    fn without_preview(topic: &str, status: TopicStatus) -> Self {
        Self {
            topic: topic.to_string(),
            preview: None,
            raw_output: None,
            entities: Vec::new(),
            status,
        }
    }
}

/// Outcome of a batch of topics, in input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub topics: Vec<TopicReport>,
}

impl IngestReport {
    pub fn ingested(&self) -> usize {
        self.count(|s| matches!(s, TopicStatus::Ingested { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TopicStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TopicStatus::Failed { .. }))
    }

    pub fn empty(&self) -> usize {
        self.count(|s| matches!(s, TopicStatus::NoEntities))
    }

    /// Upserts issued across all ingested topics
    pub fn totals(&self) -> PersistSummary {
        self.topics
            .iter()
            .fold(PersistSummary::default(), |mut acc, t| {
                if let TopicStatus::Ingested { summary } = &t.status {
                    acc.nodes += summary.nodes;
                    acc.relationships += summary.relationships;
                }
                acc
            })
    }

    fn count(&self, pred: impl Fn(&TopicStatus) -> bool) -> usize {
        self.topics.iter().filter(|t| pred(&t.status)).count()
    }
}

/// Source → extractor → writer pipeline over one store and one profile
pub struct IngestionService {
    source: Arc<dyn SourceText>,
    store: Arc<dyn GraphStore>,
    extractor: EntityExtractor,
    writer: GraphWriter,
    budget: CallBudget,
}

impl IngestionService {
    /// Wire the pipeline for `profile`
    pub fn new(
        source: Arc<dyn SourceText>,
        model: Arc<dyn CompletionModel>,
        store: Arc<dyn GraphStore>,
        profile: Arc<OntologyProfile>,
    ) -> Self {
        Self {
            source,
            extractor: EntityExtractor::new(model, Arc::clone(&profile)),
            writer: GraphWriter::new(Arc::clone(&store), profile),
            store,
            budget: CallBudget::unbounded(),
        }
    }

    /// Apply one budget to every source, model and store call
    pub fn with_budget(mut self, budget: CallBudget) -> Self {
        self.extractor = self.extractor.with_budget(budget.clone());
        self.writer = self.writer.with_budget(budget.clone());
        self.budget = budget;
        self
    }

    /// The extractor used by this pipeline
    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    /// Store liveness probe
    pub async fn health_check(&self) -> Result<bool> {
        let alive = self.budget.run("health check", self.store.ping()).await?;
        debug!(backend = self.store.backend(), alive = alive, "Store health check");
        Ok(alive)
    }

    /// Fetch, extract and persist one topic; errors propagate
    pub async fn ingest_topic(&self, topic: &str) -> Result<TopicReport> {
        info!(topic = %topic, "Ingesting topic");

        let preview = self
            .budget
            .run("source preview", self.source.preview(topic))
            .await?;
        let raw = self.extractor.extract(&preview).await?;
        let entities = self.extractor.parse(&raw);

        if entities.is_empty() {
            warn!(topic = %topic, "No entities extracted");
            return Ok(TopicReport {
                topic: topic.to_string(),
                preview: Some(preview),
                raw_output: Some(raw),
                entities,
                status: TopicStatus::NoEntities,
            });
        }

        let summary = self.writer.persist(&entities).await?;
        Ok(TopicReport {
            topic: topic.to_string(),
            preview: Some(preview),
            raw_output: None,
            entities,
            status: TopicStatus::Ingested { summary },
        })
    }

    /// Ingest every topic in order, recording failures instead of stopping.
    ///
    /// Cancellation is the exception: once the budget is cancelled the
    /// remaining topics are not attempted.
    pub async fn ingest_topics<S: AsRef<str>>(&self, topics: &[S]) -> IngestReport {
        let mut report = IngestReport::default();

        for topic in topics {
            let topic = topic.as_ref();
            match self.ingest_topic(topic).await {
                Ok(topic_report) => report.topics.push(topic_report),
                Err(Error::TopicNotFound(_)) => {
                    warn!(topic = %topic, "Topic not found, skipping");
                    report.topics.push(TopicReport::without_preview(
                        topic,
                        TopicStatus::Skipped {
                            reason: "topic not found".to_string(),
                        },
                    ));
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Topic ingestion failed");
                    let cancelled = matches!(e, Error::Cancelled(_));
                    report.topics.push(TopicReport::without_preview(
                        topic,
                        TopicStatus::Failed {
                            code: e.code().to_string(),
                            error: e.to_string(),
                        },
                    ));
                    if cancelled {
                        break;
                    }
                }
            }
        }

        info!(
            ingested = report.ingested(),
            skipped = report.skipped(),
            failed = report.failed(),
            empty = report.empty(),
            "Ingestion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::testing::{MapSource, RecordingStore, ScriptedModel, StoreCall};
    use crate::domain::ontology::{CUSTOMER_COMMERCE_PROFILE, OntologyRegistry};
    use tokio_util::sync::CancellationToken;

    const APPLE_ANSWER: &str = r#"[{"entity": "Apple", "type": "Brand"}, {"entity": "iPhone", "type": "Product"}]"#;

    fn service(source: MapSource, model: ScriptedModel, store: Arc<RecordingStore>) -> IngestionService {
        let profile = OntologyRegistry::builtin()
            .require(CUSTOMER_COMMERCE_PROFILE)
            .unwrap();
        IngestionService::new(Arc::new(source), Arc::new(model), store, profile)
    }

    #[tokio::test]
    async fn test_ingest_topic_persists_entities() {
        let store = Arc::new(RecordingStore::default());
        let svc = service(
            MapSource::default().with_page("Apple_Inc.", "Apple sells the iPhone."),
            ScriptedModel::new([APPLE_ANSWER]),
            store.clone(),
        );

        let report = svc.ingest_topic("Apple_Inc.").await.unwrap();
        assert_eq!(report.entities.len(), 2);
        assert_eq!(
            report.status,
            TopicStatus::Ingested {
                summary: PersistSummary {
                    nodes: 2,
                    relationships: 1
                }
            }
        );
        assert!(store.calls().contains(&StoreCall::Edge(
            crate::domain::knowledge::NodeKey::new("Product", "iPhone"),
            crate::domain::knowledge::NodeKey::new("Brand", "Apple"),
            "OFFERED_BY".into()
        )));
    }

    #[tokio::test]
    async fn test_ingest_topics_records_each_outcome() {
        let store = Arc::new(RecordingStore::default());
        let svc = service(
            MapSource::default()
                .with_page("Apple_Inc.", "Apple sells the iPhone.")
                .with_page("Blank", "   ")
                .with_page("Weather", "It rained."),
            ScriptedModel::new([APPLE_ANSWER, "I found nothing relevant."]),
            store,
        );

        let report = svc
            .ingest_topics(&["Apple_Inc.", "Missing_Page", "Blank", "Weather"])
            .await;

        assert_eq!(report.topics.len(), 4);
        assert_eq!(report.ingested(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.empty(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.totals().nodes, 2);

        // Blank text never reaches the model, so its raw output is empty
        assert_eq!(report.topics[2].raw_output.as_deref(), Some(""));
        assert_eq!(
            report.topics[3].raw_output.as_deref(),
            Some("I found nothing relevant.")
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_recorded_and_batch_continues() {
        let store = Arc::new(RecordingStore {
            fail_edges: true,
            ..Default::default()
        });
        let svc = service(
            MapSource::default()
                .with_page("A", "Apple sells the iPhone.")
                .with_page("B", "Apple again."),
            ScriptedModel::new([APPLE_ANSWER]),
            store,
        );

        let report = svc.ingest_topics(&["A", "B"]).await;
        assert_eq!(report.failed(), 2);
        match &report.topics[0].status {
            TopicStatus::Failed { code, .. } => assert_eq!(code, "E402"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_batch() {
        let token = CancellationToken::new();
        token.cancel();
        let svc = service(
            MapSource::default().with_page("A", "text").with_page("B", "text"),
            ScriptedModel::new([APPLE_ANSWER]),
            Arc::new(RecordingStore::default()),
        )
        .with_budget(CallBudget::unbounded().with_cancellation(token));

        let report = svc.ingest_topics(&["A", "B"]).await;
        assert_eq!(report.topics.len(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let svc = service(
            MapSource::default(),
            ScriptedModel::new(["[]"]),
            Arc::new(RecordingStore::default()),
        );
        assert!(svc.health_check().await.unwrap());
    }

    #[test]
    fn test_report_serialization() {
        let report = TopicReport::without_preview(
            "Missing",
            TopicStatus::Skipped {
                reason: "topic not found".into(),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "topic not found");
        assert!(json.get("preview").is_none());
    }
}

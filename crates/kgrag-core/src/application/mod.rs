//! Application service layer
//!
//! Wires configuration, the ontology registry and the infrastructure
//! backends into ready-to-use pipeline components.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::deadline::CallBudget;
use crate::domain::knowledge::{
    AnswerSynthesizer, EntityExtractor, GraphStore, IngestionService, SubgraphRetriever,
};
use crate::domain::ontology::{OntologyProfile, OntologyRegistry};
use crate::error::{Error, Result};
use crate::infrastructure::graph::open_store;
use crate::infrastructure::source::WikipediaSource;
use crate::llm::{CompletionModel, LlmClient};

/// One store, one profile, one call budget
pub struct KnowledgeGraph {
    config: Config,
    profile: Arc<OntologyProfile>,
    store: Arc<dyn GraphStore>,
    budget: CallBudget,
}

impl KnowledgeGraph {
    /// Open the configured store for `profile_id` (or the configured profile)
    pub async fn open(config: Config, profile_id: Option<&str>, budget: CallBudget) -> Result<Self> {
        let registry = registry(&config)?;
        let profile = registry.require(profile_id.unwrap_or(&config.ontology.profile))?;
        let store = budget.run("open store", open_store(&config.graph)).await?;

        info!(
            backend = store.backend(),
            profile = %profile.id(),
            "Knowledge graph opened"
        );
        Ok(Self::from_parts(config, profile, store, budget))
    }

    /// Assemble from already constructed parts
    pub fn from_parts(
        config: Config,
        profile: Arc<OntologyProfile>,
        store: Arc<dyn GraphStore>,
        budget: CallBudget,
    ) -> Self {
        Self {
            config,
            profile,
            store,
            budget,
        }
    }

    /// Per-call budget derived from the ingest settings
    pub fn budget_from_config(config: &Config) -> CallBudget {
        match config.ingest.call_timeout_secs {
            0 => CallBudget::unbounded(),
            secs => CallBudget::unbounded().with_timeout(Duration::from_secs(secs)),
        }
    }

    pub fn profile(&self) -> &Arc<OntologyProfile> {
        &self.profile
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// LLM client built from config; fails when no API key is set
    pub fn model(&self) -> Result<Arc<dyn CompletionModel>> {
        Ok(Arc::new(LlmClient::from_config(&self.config.llm)?))
    }

    pub fn extractor(&self, model: Arc<dyn CompletionModel>) -> EntityExtractor {
        EntityExtractor::new(model, Arc::clone(&self.profile)).with_budget(self.budget.clone())
    }

    pub fn retriever(&self) -> SubgraphRetriever {
        SubgraphRetriever::new(Arc::clone(&self.store), Arc::clone(&self.profile))
            .with_budget(self.budget.clone())
    }

    pub fn synthesizer(&self, model: Arc<dyn CompletionModel>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(Arc::new(self.retriever()), model)
            .with_limit(self.config.graph.retrieval_limit)
            .with_budget(self.budget.clone())
    }

    /// Ingestion pipeline reading from Wikipedia
    pub fn ingestion(&self, model: Arc<dyn CompletionModel>) -> Result<IngestionService> {
        let source = WikipediaSource::new(&self.config.source)?;
        Ok(IngestionService::new(
            Arc::new(source),
            model,
            Arc::clone(&self.store),
            Arc::clone(&self.profile),
        )
        .with_budget(self.budget.clone()))
    }
}

/// Built-in plus config-declared profiles
pub fn registry(config: &Config) -> Result<OntologyRegistry> {
    config
        .ontology
        .registry()
        .map_err(|e| Error::InvalidProfile(format!("{:#}", e)))
}

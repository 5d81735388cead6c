//! Test doubles for the knowledge pipeline seams

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::{CompletionModel, ModelOutput, OutputSchema};

use super::repository::{
    ContextMatch, GraphStats, GraphStore, NodeKey, StoredRelationship,
};
use super::source::SourceText;

/// Replays queued answers; repeats the last one when the queue runs dry
pub struct ScriptedModel {
    answers: Mutex<VecDeque<ModelOutput>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, A>(answers: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ModelOutput>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn invoke(&self, prompt: &str, _schema: Option<&OutputSchema>) -> Result<ModelOutput> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut answers = self.answers.lock().unwrap();
        match answers.len() {
            0 => Err(Error::LLMError("no scripted answer".into())),
            1 => Ok(answers[0].clone()),
            _ => Ok(answers.pop_front().unwrap()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Source backed by a topic → text map; unknown topics are not found
#[derive(Default)]
pub struct MapSource {
    pages: HashMap<String, String>,
}

impl MapSource {
    pub fn with_page(mut self, topic: &str, text: &str) -> Self {
        self.pages.insert(topic.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl SourceText for MapSource {
    async fn preview(&self, topic: &str) -> Result<String> {
        self.pages
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Claim(String),
    Index(Vec<String>),
    Node(NodeKey),
    Edge(NodeKey, NodeKey, String),
    Search(String),
}

/// Store that records every call and can fail on request
#[derive(Default)]
pub struct RecordingStore {
    pub calls: Mutex<Vec<StoreCall>>,
    pub fail_edges: bool,
    pub results: Vec<ContextMatch>,
}

impl RecordingStore {
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GraphStore for RecordingStore {
    fn backend(&self) -> &'static str {
        "recording"
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn claim_profile(&self, profile_id: &str) -> Result<()> {
        self.record(StoreCall::Claim(profile_id.to_string()));
        Ok(())
    }

    async fn ensure_fulltext_index(&self, labels: &[String]) -> Result<()> {
        self.record(StoreCall::Index(labels.to_vec()));
        Ok(())
    }

    async fn merge_node(&self, node: &NodeKey) -> Result<()> {
        self.record(StoreCall::Node(node.clone()));
        Ok(())
    }

    async fn merge_relationship(
        &self,
        source: &NodeKey,
        target: &NodeKey,
        relationship: &str,
    ) -> Result<()> {
        if self.fail_edges {
            return Err(Error::StoreQuery("edge write rejected".into()));
        }
        self.record(StoreCall::Edge(
            source.clone(),
            target.clone(),
            relationship.to_string(),
        ));
        Ok(())
    }

    async fn fulltext_search(
        &self,
        query: &str,
        _labels: &[String],
        _limit: usize,
    ) -> Result<Vec<ContextMatch>> {
        self.record(StoreCall::Search(query.to_string()));
        Ok(self.results.clone())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats::default())
    }

    async fn list_relationships(&self, _limit: usize) -> Result<Vec<StoredRelationship>> {
        Ok(Vec::new())
    }
}

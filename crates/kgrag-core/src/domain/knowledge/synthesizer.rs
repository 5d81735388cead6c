//! Answer synthesis over retrieved graph context

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DEFAULT_RETRIEVAL_LIMIT;
use crate::deadline::CallBudget;
use crate::error::Result;
use crate::llm::CompletionModel;

use super::retriever::{SubgraphRetriever, render_context};

/// Answers questions from the subgraph retrieved for them
pub struct AnswerSynthesizer {
    retriever: Arc<SubgraphRetriever>,
    model: Arc<dyn CompletionModel>,
    budget: CallBudget,
    limit: usize,
}

impl AnswerSynthesizer {
    /// Create a synthesizer with the default retrieval limit
    pub fn new(retriever: Arc<SubgraphRetriever>, model: Arc<dyn CompletionModel>) -> Self {
        Self {
            retriever,
            model,
            budget: CallBudget::unbounded(),
            limit: DEFAULT_RETRIEVAL_LIMIT,
        }
    }

    /// Override the number of context records retrieved per question
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Apply a timeout/cancellation budget to model calls
    pub fn with_budget(mut self, budget: CallBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Answer `question` using the graph context retrieved for it
    pub async fn answer(&self, question: &str) -> Result<String> {
        let records = self.retriever.retrieve_context(question, self.limit).await?;
        let context = render_context(&records);
        let prompt = self.build_prompt(&context, question);

        debug!(
            model = %self.model.model_name(),
            records = records.len(),
            "Synthesizing answer"
        );

        let output = self
            .budget
            .run("answer synthesis", self.model.invoke(&prompt, None))
            .await?;
        let answer = output.normalize();

        info!(chars = answer.len(), "Answer synthesized");
        Ok(answer)
    }

    fn build_prompt(&self, context: &str, question: &str) -> String {
        let profile = self.retriever.profile();
        format!(
            r#"You are a knowledge-graph intelligence assistant analyzing {scope}.

Use the following graph context to answer the user's question:

Context:
{context}

Question:
{question}

Guidelines:
- Be factual and concise.
- Mention key entities: {labels}.
- Avoid speculation or repetition."#,
            scope = profile.description().to_lowercase(),
            context = context,
            question = question,
            labels = profile.label_names().join(", "),
        )
    }
}

//! Source-text collaborator

use async_trait::async_trait;

use crate::error::Result;

/// Supplies a bounded text preview for a topic identifier
#[async_trait]
pub trait SourceText: Send + Sync {
    /// Preview text for `topic`.
    ///
    /// Fails with `Error::TopicNotFound` when the topic does not exist, so
    /// callers can skip it and continue.
    async fn preview(&self, topic: &str) -> Result<String>;
}

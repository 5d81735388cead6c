//! Deadlines and cancellation for calls that leave the process
//!
//! Every model, store and source call is routed through [`CallBudget::run`],
//! so a caller can bound it with a timeout or abort it through a shared
//! [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Timeout and cancellation applied to each external call
#[derive(Debug, Clone, Default)]
pub struct CallBudget {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl CallBudget {
    /// A budget with no timeout that is never cancelled unless asked to
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bound every call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Per-call timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Token that aborts in-flight calls when cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one external call under this budget
    pub async fn run<F, T>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(call = what, timeout_secs = limit.as_secs(), "External call timed out");
                        Err(Error::Timeout(what.to_string(), limit.as_secs()))
                    }
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled(what.to_string())),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_passes_result_through() {
        let budget = CallBudget::unbounded();
        let value = budget.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let budget = CallBudget::unbounded().with_timeout(Duration::from_secs(2));
        let result: Result<()> = budget
            .run("slow call", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(ref what, 2)) if what == "slow call"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        let budget = CallBudget::unbounded().with_cancellation(token.clone());
        token.cancel();

        let result = budget.run("model", async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let token = CancellationToken::new();
        let budget = CallBudget::unbounded().with_cancellation(token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let result: Result<()> = budget
            .run("store", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_inner_error_is_preserved() {
        let budget = CallBudget::unbounded().with_timeout(Duration::from_secs(5));
        let result: Result<()> = budget
            .run("store", async { Err(Error::StoreQuery("boom".into())) })
            .await;
        assert!(matches!(result, Err(Error::StoreQuery(_))));
    }
}

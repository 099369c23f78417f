//! Retry layer around any provider.
//!
//! Up to `max_retries + 1` total attempts with a linear backoff of
//! `attempt * base` seconds between them. Only transport faults and
//! 5xx-class responses are retried; 4xx surfaces immediately, and a fired
//! timeout or cancellation is never retried.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use relayclaw_core::error::ProviderError;
use relayclaw_core::provider::{ChatRequest, ChatResponse, ChunkSink, Provider};

const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    backoff_base: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            backoff_base: BACKOFF_BASE,
        }
    }

    /// Shrink the backoff unit (tests).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.backoff_base * attempt).await;
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err = ProviderError::Unavailable("no attempts made".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.backoff(attempt).await;
            }
            match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "llm request failed, retrying"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        on_chunk: ChunkSink,
    ) -> Result<ChatResponse, ProviderError> {
        let mut last_err = ProviderError::Unavailable("no attempts made".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.backoff(attempt).await;
            }
            match self.inner.chat_stream(request.clone(), on_chunk.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "llm stream failed, retrying"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

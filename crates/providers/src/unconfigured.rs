//! Placeholder provider used when no API key is configured.
//!
//! Lets the gateway boot without credentials: internal agent turns fail
//! per-call (the orchestrator logs a status message and treats the turn
//! as a pass) instead of the whole process refusing to start.

use quorum_domain::error::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

pub struct UnconfiguredProvider {
    reason: String,
}

impl UnconfiguredProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for UnconfiguredProvider {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        Err(Error::Provider {
            provider: "unconfigured".into(),
            message: self.reason.clone(),
        })
    }

    fn provider_id(&self) -> &str {
        "unconfigured"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_fails_with_reason() {
        let provider = UnconfiguredProvider::new("QUORUM_LLM_API_KEY is not set");
        let err = provider.chat(ChatRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("QUORUM_LLM_API_KEY"));
    }
}

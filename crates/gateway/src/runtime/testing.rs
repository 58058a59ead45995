//! Test support: scripted LLM providers and tempdir-backed services.
//!
//! Used by the unit tests in this crate and the integration tests under
//! `tests/`. Not wired into any production path.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use quorum_domain::config::MeetingsConfig;
use quorum_domain::error::{Error, Result};
use quorum_domain::meeting::Participant;
use quorum_providers::{ChatRequest, ChatResponse, LlmProvider};
use quorum_store::{MessageLog, RoomRecord, SessionStore, SocketStore, WallStore};

use crate::events::EventBus;

use super::orchestrator::Services;
use super::registry::MeetingRegistry;

/// A deterministic provider: per-agent response queues, with a default
/// once a queue runs dry. Routes on the `You are <name>,` prompt prefix.
pub struct ScriptedProvider {
    responses: Mutex<HashMap<String, VecDeque<String>>>,
    default_response: String,
    failure: Option<String>,
}

impl ScriptedProvider {
    /// Every turn passes.
    pub fn always_pass() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            default_response: "[PASS]".into(),
            failure: None,
        }
    }

    /// Scripted per-agent responses; exhausted agents pass.
    pub fn with_script(script: Vec<(&str, Vec<&str>)>) -> Self {
        let responses = script
            .into_iter()
            .map(|(name, lines)| {
                (
                    name.to_owned(),
                    lines.into_iter().map(str::to_owned).collect(),
                )
            })
            .collect();
        Self {
            responses: Mutex::new(responses),
            default_response: "[PASS]".into(),
            failure: None,
        }
    }

    /// Every call fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            default_response: "[PASS]".into(),
            failure: Some(message.to_owned()),
        }
    }

    fn agent_name(system_prompt: &str) -> Option<String> {
        let rest = system_prompt.strip_prefix("You are ")?;
        Some(rest.split(',').next()?.to_owned())
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        if let Some(message) = &self.failure {
            return Err(Error::Provider {
                provider: "scripted".into(),
                message: message.clone(),
            });
        }

        let content = Self::agent_name(&req.system_prompt)
            .and_then(|name| self.responses.lock().get_mut(&name)?.pop_front())
            .unwrap_or_else(|| self.default_response.clone());

        Ok(ChatResponse {
            content,
            model: "scripted".into(),
        })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

/// Fresh services over a temp directory, with the given provider.
pub fn services_with_provider(llm: Arc<dyn LlmProvider>) -> (tempfile::TempDir, Services) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = MeetingsConfig::default();
    config.auto_interpret = false;
    config.auto_post_summaries = false;

    let services = Services {
        sessions: Arc::new(SessionStore::new(dir.path()).expect("session store")),
        log: Arc::new(MessageLog::new(dir.path()).expect("message log")),
        wall: Arc::new(WallStore::new(dir.path()).expect("wall store")),
        sockets: Arc::new(SocketStore::new(dir.path()).expect("socket store")),
        bus: Arc::new(EventBus::new()),
        registry: Arc::new(MeetingRegistry::new()),
        llm,
        config,
    };
    (dir, services)
}

/// Create a Waiting meeting room through the session store.
pub fn waiting_room(
    services: &Services,
    topic: &str,
    participants: Vec<Participant>,
    cooldown_seconds: f64,
    max_rounds: u32,
) -> RoomRecord {
    services.sessions.create_meeting(
        topic,
        "",
        "Host",
        None,
        None,
        participants,
        cooldown_seconds,
        max_rounds,
    )
}

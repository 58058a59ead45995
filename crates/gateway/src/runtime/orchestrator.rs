//! The meeting orchestrator: one per live meeting, driving agent turns
//! in rounds until the round cap, an idle streak, or a stop request.
//!
//! The loop task is the only writer to the round/pass counters. The
//! message log, directives, and human queue are shared with request
//! handlers and sit behind one mutex; appends persist to the JSONL log
//! and broadcast under that lock, so sequence order, persistence order,
//! and broadcast order always agree.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use quorum_domain::config::MeetingsConfig;
use quorum_domain::error::{Error, Result};
use quorum_domain::meeting::{
    MeetingMessage, MeetingState, MessageKind, Participant, ParticipantKind, SenderKind,
    CONTENT_TYPE_MARKDOWN, CONTENT_TYPE_TEXT,
};
use quorum_protocol::{meeting_topic, ServerEvent};
use quorum_providers::{ChatRequest, LlmProvider};
use quorum_store::{
    MessageLog, RoomRecord, SessionStatus, SessionStore, SocketPersona, SocketStore, WallStore,
};

use crate::events::EventBus;

use super::context::{self, PromptInputs, ARTIFACT_TAG, PASS_TOKEN};
use super::external::ExternalTurns;
use super::registry::MeetingRegistry;
use super::stop::{PauseGate, StopToken};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The shared services a meeting runs against. Tests build these over
/// temp directories with a scripted provider.
#[derive(Clone)]
pub struct Services {
    pub sessions: Arc<SessionStore>,
    pub log: Arc<MessageLog>,
    pub wall: Arc<WallStore>,
    pub sockets: Arc<SocketStore>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<MeetingRegistry>,
    pub llm: Arc<dyn LlmProvider>,
    pub config: MeetingsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State shared between the loop task and request handlers.
pub(crate) struct SharedState {
    pub(crate) participants: Vec<Participant>,
    pub(crate) directives: Vec<String>,
    pub(crate) human_queue: VecDeque<(String, String)>,
    pub(crate) sequence: u64,
}

pub struct MeetingOrchestrator {
    pub room_id: String,
    pub code: String,
    pub session_id: String,
    pub topic: String,
    pub task_description: String,
    pub host_name: String,
    pub(crate) cooldown: Duration,
    pub(crate) max_rounds: u32,
    pub(crate) topic_key: String,

    pub(crate) services: Services,

    pub(crate) status: RwLock<MeetingState>,
    pub(crate) shared: Mutex<SharedState>,
    pub(crate) current_round: AtomicU32,
    pub(crate) external: ExternalTurns,
    pub(crate) pause: PauseGate,
    pub(crate) stop: StopToken,
    pub(crate) finalized: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,

    // Context loaded once at start.
    pub(crate) memory_context: RwLock<String>,
    pub(crate) recent_notes: RwLock<Vec<(String, String)>>,
    pub(crate) socket_cache: RwLock<HashMap<String, SocketPersona>>,
}

/// JSON-friendly snapshot of the live meeting state.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingSnapshot {
    pub status: MeetingState,
    pub current_round: u32,
    pub max_rounds: u32,
    pub message_count: usize,
    pub agents: Vec<String>,
    pub directive_count: usize,
    pub pending_external: Vec<String>,
}

impl MeetingOrchestrator {
    /// Build an orchestrator for a Waiting room record.
    pub fn from_room(room: &RoomRecord, services: Services) -> Arc<Self> {
        Arc::new(Self {
            room_id: room.id.clone(),
            code: room.code.clone(),
            session_id: room.session_id.clone(),
            topic: room.topic.clone(),
            task_description: room.task_description.clone(),
            host_name: room.host_name.clone(),
            cooldown: Duration::from_secs_f64(room.cooldown_seconds.max(0.0)),
            max_rounds: room.max_rounds,
            topic_key: meeting_topic(&room.code),
            services,
            status: RwLock::new(MeetingState::Waiting),
            shared: Mutex::new(SharedState {
                participants: room.participants.clone(),
                directives: Vec::new(),
                human_queue: VecDeque::new(),
                sequence: 0,
            }),
            current_round: AtomicU32::new(0),
            external: ExternalTurns::new(),
            pause: PauseGate::new(),
            stop: StopToken::new(),
            finalized: AtomicBool::new(false),
            task: Mutex::new(None),
            memory_context: RwLock::new(String::new()),
            recent_notes: RwLock::new(Vec::new()),
            socket_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn status(&self) -> MeetingState {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: MeetingState) {
        *self.status.write() = status;
    }

    pub fn snapshot(&self) -> MeetingSnapshot {
        let shared = self.shared.lock();
        MeetingSnapshot {
            status: self.status(),
            current_round: self.current_round.load(Ordering::Acquire),
            max_rounds: self.max_rounds,
            message_count: self.services.log.count(&self.room_id),
            agents: shared.participants.iter().map(|p| p.name.clone()).collect(),
            directive_count: shared.directives.len(),
            pending_external: self.external.pending_names(),
        }
    }

    pub fn conversation_text(&self) -> String {
        context::build_conversation(
            &self.services.log.all(&self.room_id),
            self.services.config.max_context_messages,
        )
    }

    pub fn directives(&self) -> Vec<String> {
        self.shared.lock().directives.clone()
    }

    // ── Message log ────────────────────────────────────────────────

    /// Append a message to the meeting log: next dense sequence number,
    /// persisted to the JSONL log, then broadcast — all under the shared
    /// lock so the three orders can never diverge.
    pub fn append_message(
        &self,
        sender_name: &str,
        sender_kind: SenderKind,
        kind: MessageKind,
        content: &str,
        content_type: &str,
    ) -> Result<MeetingMessage> {
        let mut shared = self.shared.lock();
        shared.sequence += 1;
        let msg = MeetingMessage {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: self.room_id.clone(),
            sender_name: sender_name.to_owned(),
            sender_kind,
            kind,
            content: content.to_owned(),
            content_type: content_type.to_owned(),
            sequence: shared.sequence,
            created_at: Utc::now(),
        };
        self.services.log.append(&msg)?;
        self.services.bus.broadcast(
            &self.topic_key,
            &ServerEvent::MeetingMessage {
                message: msg.clone(),
            },
        );
        Ok(msg)
    }

    pub(crate) fn broadcast(&self, event: ServerEvent) {
        self.services.bus.broadcast(&self.topic_key, &event);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the meeting loop as a background task.
    ///
    /// Loads prompt context (socket personas, series memory, recent
    /// notes), registers the meeting under its code, then spawns the
    /// loop. Fails from any state but Waiting.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let status = self.status();
        if status != MeetingState::Waiting {
            return Err(Error::InvalidState(format!(
                "cannot start meeting in status '{status}'"
            )));
        }

        self.load_context();
        self.services.registry.register(&self.code, self.clone())?;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run_loop().await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    fn load_context(&self) {
        let socket_ids: Vec<String> = {
            let shared = self.shared.lock();
            shared
                .participants
                .iter()
                .filter_map(|p| p.socket_id.clone())
                .collect()
        };
        let mut cache = self.socket_cache.write();
        for id in socket_ids {
            if let Some(socket) = self.services.sockets.get(&id) {
                cache.insert(id, socket);
            } else {
                tracing::warn!(socket_id = %id, code = %self.code, "unknown socket persona");
            }
        }
        drop(cache);

        if let Some(memory) = self
            .services
            .sessions
            .memory_context_for_session(&self.session_id)
        {
            *self.memory_context.write() = memory;
        }
        *self.recent_notes.write() = self
            .services
            .sessions
            .recent_notes(&self.session_id, self.services.config.recent_notes_limit);
    }

    /// Stop the meeting: flag the loop, unblock pause and pending
    /// external waits, then give the loop a grace period to drain. A
    /// loop that overruns is aborted — finalization runs either way.
    pub async fn stop(&self) {
        self.stop.stop();
        self.external.cancel_all();
        self.pause.open();

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            let grace = Duration::from_secs(self.services.config.stop_grace_secs);
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!(code = %self.code, "meeting loop did not drain in time, aborting");
                handle.abort();
                // The loop tail never ran; finalize here instead.
                self.finalize().await;
            }
        }
    }

    /// Pause the meeting. Legal only from Active.
    pub fn pause_meeting(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status != MeetingState::Active {
            return Err(Error::InvalidState(format!(
                "cannot pause meeting in status '{}'",
                *status
            )));
        }
        *status = MeetingState::Paused;
        self.pause.close();
        Ok(())
    }

    /// Resume a paused meeting. No effect from any other state.
    pub fn resume_meeting(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status != MeetingState::Paused {
            return Err(Error::InvalidState(format!(
                "cannot resume meeting in status '{}'",
                *status
            )));
        }
        *status = MeetingState::Active;
        self.pause.open();
        Ok(())
    }

    // ── Host inputs ────────────────────────────────────────────────

    /// Record a host directive: joins every future prompt and lands in
    /// the log as a Directive entry.
    pub fn add_directive(&self, text: &str, from_name: &str) -> Result<MeetingMessage> {
        self.shared.lock().directives.push(text.to_owned());
        self.append_message(
            from_name,
            SenderKind::Human,
            MessageKind::Directive,
            text,
            CONTENT_TYPE_TEXT,
        )
    }

    /// Queue a human message; drained at the start of the next turn.
    pub fn add_human_message(&self, text: &str, from_name: &str) {
        self.shared
            .lock()
            .human_queue
            .push_back((from_name.to_owned(), text.to_owned()));
    }

    /// Dynamically add a participant mid-meeting. The scheduler picks
    /// them up on the next round.
    pub fn add_participant(&self, participant: Participant) -> Result<()> {
        if !self.status().is_running() {
            return Err(Error::InvalidState(format!(
                "cannot join meeting in status '{}'",
                self.status()
            )));
        }
        {
            let mut shared = self.shared.lock();
            if shared.participants.iter().any(|p| p.name == participant.name) {
                return Err(Error::InvalidState(format!(
                    "{} is already a participant",
                    participant.name
                )));
            }
            shared.participants.push(participant.clone());
        }
        self.append_message(
            "System",
            SenderKind::System,
            MessageKind::Status,
            &format!("{} has joined the meeting.", participant.name),
            CONTENT_TYPE_TEXT,
        )?;
        Ok(())
    }

    /// Resolve a pending external turn with the agent's response.
    pub fn submit_external_response(&self, agent_name: &str, response: &str) -> Result<()> {
        self.external.resolve(agent_name, response.to_owned())
    }

    // ── The loop ───────────────────────────────────────────────────

    async fn run_loop(self: Arc<Self>) {
        if let Err(e) = self.drive().await {
            tracing::error!(code = %self.code, error = %e, "meeting loop failed");
        }
        self.finalize().await;
    }

    async fn drive(&self) -> Result<()> {
        self.set_status(MeetingState::Active);
        if let Err(e) = self
            .services
            .sessions
            .set_room_status(&self.code, MeetingState::Active)
        {
            tracing::warn!(code = %self.code, error = %e, "failed to persist active status");
        }
        if let Err(e) = self
            .services
            .sessions
            .set_session_status(&self.session_id, SessionStatus::Recording)
        {
            tracing::warn!(code = %self.code, error = %e, "failed to persist session status");
        }

        self.append_message(
            "System",
            SenderKind::System,
            MessageKind::Status,
            &format!("Meeting started. Topic: {}", self.topic),
            CONTENT_TYPE_TEXT,
        )?;
        if !self.task_description.is_empty() {
            self.append_message(
                "System",
                SenderKind::System,
                MessageKind::Status,
                &format!("Task: {}", self.task_description),
                CONTENT_TYPE_TEXT,
            )?;
        }

        let mut consecutive_passes: u32 = 0;

        while self.current_round.load(Ordering::Acquire) < self.max_rounds
            && !self.stop.is_stopped()
        {
            self.pause.wait().await;
            if self.stop.is_stopped() {
                break;
            }

            self.current_round.fetch_add(1, Ordering::AcqRel);

            // Recent @mentions reorder this round's speakers.
            let participants = self.shared.lock().participants.clone();
            let messages = self.services.log.all(&self.room_id);
            let mentioned = context::recent_mentions(&messages, &participants);
            let order = context::prioritize(&participants, &mentioned);
            let idle_threshold =
                self.services.config.idle_pass_multiplier * order.len().max(1) as u32;

            let mut round_had_response = false;
            for participant in &order {
                if self.stop.is_stopped() {
                    break;
                }
                self.pause.wait().await;
                if self.stop.is_stopped() {
                    break;
                }

                // Human interjections land before the agent speaks and
                // reset the idle counter.
                loop {
                    let queued = self.shared.lock().human_queue.pop_front();
                    let Some((from_name, text)) = queued else { break };
                    self.append_message(
                        &from_name,
                        SenderKind::Human,
                        MessageKind::Message,
                        &text,
                        CONTENT_TYPE_TEXT,
                    )?;
                    consecutive_passes = 0;
                }

                self.broadcast(ServerEvent::AgentThinking {
                    agent_name: participant.name.clone(),
                });
                let response = self.run_turn(participant).await;
                self.broadcast(ServerEvent::AgentDone {
                    agent_name: participant.name.clone(),
                });

                match response {
                    Some(text) => {
                        if let Some(body) = text.strip_prefix(ARTIFACT_TAG) {
                            self.append_message(
                                &participant.name,
                                SenderKind::Agent,
                                MessageKind::Artifact,
                                body.trim(),
                                CONTENT_TYPE_MARKDOWN,
                            )?;
                        } else {
                            self.append_message(
                                &participant.name,
                                SenderKind::Agent,
                                MessageKind::Message,
                                &text,
                                CONTENT_TYPE_TEXT,
                            )?;
                        }
                        round_had_response = true;
                        consecutive_passes = 0;

                        if !self.cooldown.is_zero() && !self.stop.is_stopped() {
                            tokio::time::sleep(self.cooldown).await;
                        }
                    }
                    None => consecutive_passes += 1,
                }
            }

            if !round_had_response && consecutive_passes >= idle_threshold {
                self.append_message(
                    "System",
                    SenderKind::System,
                    MessageKind::Status,
                    "All agents have passed. Meeting ending due to idle.",
                    CONTENT_TYPE_TEXT,
                )?;
                break;
            }
        }

        Ok(())
    }

    // ── Turns ──────────────────────────────────────────────────────

    /// Run one participant's turn. `None` means a pass.
    async fn run_turn(&self, participant: &Participant) -> Option<String> {
        match participant.kind {
            ParticipantKind::Internal => self.run_internal_turn(participant).await,
            ParticipantKind::External => self.run_external_turn(participant).await,
        }
    }

    async fn run_internal_turn(&self, participant: &Participant) -> Option<String> {
        let directives = self.shared.lock().directives.clone();
        let messages = self.services.log.all(&self.room_id);
        let memory = self.memory_context.read().clone();
        let notes = self.recent_notes.read().clone();
        let socket = participant
            .socket_id
            .as_deref()
            .and_then(|id| self.socket_cache.read().get(id).cloned());

        let system_prompt = context::build_system_prompt(
            &PromptInputs {
                participant,
                topic: &self.topic,
                task_description: &self.task_description,
                socket: socket.as_ref(),
                memory_context: &memory,
                recent_notes: &notes,
                directives: &directives,
            },
            &self.services.config,
        );
        let conversation =
            context::build_conversation(&messages, self.services.config.max_context_messages);

        let req = ChatRequest {
            system_prompt,
            user_content: format!(
                "Conversation so far:\n{conversation}\n\nIt's your turn to speak."
            ),
            temperature: Some(0.7),
            max_tokens: Some(512),
            model: participant.model.clone(),
        };

        let response = match self.services.llm.chat(req).await {
            Ok(resp) => resp.content,
            Err(e) => {
                // A provider failure costs one turn, not the meeting.
                let detail: String = e.to_string().chars().take(100).collect();
                if let Err(log_err) = self.append_message(
                    "System",
                    SenderKind::System,
                    MessageKind::Status,
                    &format!(
                        "Error getting response from {}: {detail}",
                        participant.name
                    ),
                    CONTENT_TYPE_TEXT,
                ) {
                    tracing::error!(code = %self.code, error = %log_err, "failed to log provider error");
                }
                return None;
            }
        };

        let response = response.trim();
        if response.is_empty() || response == PASS_TOKEN {
            None
        } else {
            Some(response.to_owned())
        }
    }

    async fn run_external_turn(&self, participant: &Participant) -> Option<String> {
        let agent_name = &participant.name;
        let rx = self.external.begin(agent_name);

        let conversation = self.conversation_text();
        let directives = self.shared.lock().directives.clone();
        self.broadcast(ServerEvent::TurnRequest {
            agent_name: agent_name.clone(),
            topic: self.topic.clone(),
            conversation,
            directives,
        });

        let timeout_secs = self.services.config.external_turn_timeout_secs;
        let result =
            tokio::time::timeout(Duration::from_secs(timeout_secs), rx).await;

        match result {
            Ok(Ok(response)) => {
                let response = response.trim();
                if response.is_empty() || response == PASS_TOKEN {
                    None
                } else {
                    Some(response.to_owned())
                }
            }
            // Cancelled by a stop request: a silent pass.
            Ok(Err(_)) => None,
            Err(_) => {
                self.external.cancel(agent_name);
                if let Err(e) = self.append_message(
                    "System",
                    SenderKind::System,
                    MessageKind::Status,
                    &format!("{agent_name} timed out ({timeout_secs}s). Skipping turn."),
                    CONTENT_TYPE_TEXT,
                ) {
                    tracing::error!(code = %self.code, error = %e, "failed to log external timeout");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{services_with_provider, waiting_room, ScriptedProvider};

    fn orchestrator() -> (tempfile::TempDir, Arc<MeetingOrchestrator>) {
        let provider = ScriptedProvider::always_pass();
        let (dir, services) = services_with_provider(Arc::new(provider));
        let room = waiting_room(
            &services,
            "Roadmap",
            vec![Participant::internal("Ana"), Participant::internal("Ben")],
            0.0,
            3,
        );
        let orch = MeetingOrchestrator::from_room(&room, services);
        (dir, orch)
    }

    #[test]
    fn append_message_produces_dense_sequence() {
        let (_dir, orch) = orchestrator();
        for i in 1..=5u64 {
            let msg = orch
                .append_message(
                    "Ana",
                    SenderKind::Agent,
                    MessageKind::Message,
                    &format!("msg {i}"),
                    CONTENT_TYPE_TEXT,
                )
                .unwrap();
            assert_eq!(msg.sequence, i);
        }
        let all = orch.services.log.all(&orch.room_id);
        let seqs: Vec<u64> = all.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn pause_only_from_active() {
        let (_dir, orch) = orchestrator();
        // Waiting → pause rejected.
        assert!(orch.pause_meeting().is_err());

        orch.set_status(MeetingState::Active);
        orch.pause_meeting().unwrap();
        assert_eq!(orch.status(), MeetingState::Paused);
        // Double pause rejected.
        assert!(orch.pause_meeting().is_err());

        orch.resume_meeting().unwrap();
        assert_eq!(orch.status(), MeetingState::Active);
        // Resume when active rejected.
        assert!(orch.resume_meeting().is_err());
    }

    #[test]
    fn add_participant_requires_running_state() {
        let (_dir, orch) = orchestrator();
        let err = orch
            .add_participant(Participant::external("Scout"))
            .unwrap_err();
        assert!(err.to_string().contains("waiting"));

        orch.set_status(MeetingState::Active);
        orch.add_participant(Participant::external("Scout")).unwrap();
        // Duplicate rejected.
        assert!(orch.add_participant(Participant::external("Scout")).is_err());

        // The join produced a system message.
        let all = orch.services.log.all(&orch.room_id);
        assert!(all
            .iter()
            .any(|m| m.content == "Scout has joined the meeting."));

        orch.set_status(MeetingState::Closed);
        assert!(orch.add_participant(Participant::external("Late")).is_err());
    }

    #[test]
    fn directive_is_logged_and_active() {
        let (_dir, orch) = orchestrator();
        let msg = orch.add_directive("Keep it short", "Host").unwrap();
        assert_eq!(msg.kind, MessageKind::Directive);
        assert_eq!(orch.directives(), vec!["Keep it short".to_string()]);

        let snapshot = orch.snapshot();
        assert_eq!(snapshot.directive_count, 1);
        assert_eq!(snapshot.message_count, 1);
    }

    #[test]
    fn snapshot_reflects_participants() {
        let (_dir, orch) = orchestrator();
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.status, MeetingState::Waiting);
        assert_eq!(snapshot.agents, vec!["Ana", "Ben"]);
        assert_eq!(snapshot.current_round, 0);
        assert_eq!(snapshot.max_rounds, 3);
    }

    #[tokio::test]
    async fn start_requires_waiting_state() {
        let (_dir, orch) = orchestrator();
        orch.set_status(MeetingState::Closed);
        let err = orch.start().unwrap_err();
        assert!(err.to_string().contains("cannot start"));
    }
}

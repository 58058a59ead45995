//! Meeting finalization: transcript assembly, status transitions,
//! downstream triggers, and guaranteed registry cleanup.
//!
//! Runs exactly once per meeting regardless of how the loop exited —
//! normal completion, stop, abort, or a failed loop. Each step is
//! individually guarded: a persistence failure is logged and the
//! finalizer moves on, so registry cleanup and the closing broadcast
//! always happen.

use std::sync::atomic::Ordering;

use chrono::Utc;

use quorum_domain::meeting::{
    MeetingMessage, MeetingState, MessageKind, SenderKind, CONTENT_TYPE_TEXT,
};
use quorum_protocol::ServerEvent;
use quorum_store::{PostKind, SessionEvent, SessionStatus};

use super::interpret;
use super::orchestrator::MeetingOrchestrator;

/// Render the speaker-attributed transcript. Pure string work — this
/// step cannot fail.
pub fn build_transcript(messages: &[MeetingMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.kind {
            MessageKind::Status => format!("[System]: {}", m.content),
            MessageKind::Directive => {
                format!("[Directive from {}]: {}", m.sender_name, m.content)
            }
            MessageKind::Artifact => format!("[{} — artifact]:\n{}", m.sender_name, m.content),
            MessageKind::Message => format!("[{}]: {}", m.sender_name, m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl MeetingOrchestrator {
    /// End the meeting. Idempotent: only the first caller runs the steps.
    pub async fn finalize(&self) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions = &self.services.sessions;
        let rounds = self.current_round.load(Ordering::Acquire);

        // 1. Processing status (live + persisted).
        self.set_status(MeetingState::Processing);
        if let Err(e) = sessions.set_room_status(&self.code, MeetingState::Processing) {
            tracing::error!(code = %self.code, error = %e, "failed to persist processing status");
        }
        if let Err(e) = sessions.set_session_status(&self.session_id, SessionStatus::Processing) {
            tracing::error!(code = %self.code, error = %e, "failed to persist session processing status");
        }

        // 2. Closing status message.
        if let Err(e) = self.append_message(
            "System",
            SenderKind::System,
            MessageKind::Status,
            &format!("Meeting ended after {rounds} rounds."),
            CONTENT_TYPE_TEXT,
        ) {
            tracing::error!(code = %self.code, error = %e, "failed to append meeting-ended message");
        }

        // 3. Transcript (infallible).
        let messages = self.services.log.all(&self.room_id);
        let transcript = build_transcript(&messages);

        // 4. Persist the transcript onto the session and the room. Note:
        // the session is marked Complete even when this step fails — the
        // failure is logged and the meeting still converges to Closed.
        if let Err(e) = sessions.complete_session(&self.session_id, &transcript) {
            tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "failed to save transcript"
            );
        }
        if let Err(e) = sessions.set_room_transcript_log(&self.code, &transcript) {
            tracing::error!(code = %self.code, error = %e, "failed to save room transcript log");
        }

        // 5. Auto-interpret (failures logged and ignored).
        if self.services.config.auto_interpret {
            if let Err(e) =
                interpret::auto_interpret(&self.services, &self.session_id, &transcript).await
            {
                tracing::error!(
                    session_id = %self.session_id,
                    error = %e,
                    "auto-interpret failed"
                );
            }
        }

        // 6. Wall summary.
        if self.services.config.auto_post_summaries {
            let snippet = sessions
                .primary_interpretation(&self.session_id)
                .map(|i| i.output_markdown)
                .unwrap_or_else(|| transcript.clone());
            let snippet: String = snippet.chars().take(500).collect();
            let content = format!(
                "**Meeting completed**: {}\n\n{snippet}...\n\nView: /session/{}",
                self.topic, self.session_id
            );
            if let Err(e) =
                self.services
                    .wall
                    .add_post("Quorum", "system", &content, PostKind::Post, None)
            {
                tracing::error!(code = %self.code, error = %e, "failed to post meeting summary");
            }
        }

        // 7. session.complete event.
        let interpretations_count = sessions.interpretations_for(&self.session_id).len();
        let title = sessions
            .get_session(&self.session_id)
            .and_then(|s| s.title)
            .or_else(|| Some(self.topic.clone()));
        sessions.record_event(SessionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: "session.complete".into(),
            session_id: self.session_id.clone(),
            title,
            interpretations_count,
            created_at: Utc::now(),
        });

        // 8. Closed status.
        self.set_status(MeetingState::Closed);
        if let Err(e) = sessions.set_room_status(&self.code, MeetingState::Closed) {
            tracing::error!(code = %self.code, error = %e, "failed to persist closed status");
        }

        // 9. Closing broadcast.
        self.broadcast(ServerEvent::MeetingEnded {
            session_id: self.session_id.clone(),
            rounds,
            message_count: self.services.log.count(&self.room_id),
        });

        // 10. Registry + bus cleanup, then make the terminal state durable.
        self.services.registry.unregister(&self.code);
        self.services.bus.clear_kicks(&self.topic_key);
        self.services.log.evict(&self.room_id);
        if let Err(e) = sessions.flush() {
            tracing::warn!(code = %self.code, error = %e, "failed to flush session store");
        }

        tracing::info!(
            code = %self.code,
            rounds,
            interpretations = interpretations_count,
            "meeting finalized"
        );
    }
}

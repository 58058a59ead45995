//! Core meeting types shared between the stores and the gateway runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Meeting lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a meeting.
///
/// Legal transitions: `Waiting → Active ↔ Paused → Processing → Closed`.
/// There are no back-edges out of `Processing` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingState {
    Waiting,
    Active,
    Paused,
    Processing,
    Closed,
}

impl MeetingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingState::Waiting => "waiting",
            MeetingState::Active => "active",
            MeetingState::Paused => "paused",
            MeetingState::Processing => "processing",
            MeetingState::Closed => "closed",
        }
    }

    /// The meeting loop is (or may become) running.
    pub fn is_running(&self) -> bool {
        matches!(self, MeetingState::Active | MeetingState::Paused)
    }
}

impl std::fmt::Display for MeetingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Participants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a participant's turns are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    /// Driven by an LLM call on the participant's behalf.
    #[default]
    Internal,
    /// Driven by a networked agent answering turn requests.
    External,
}

/// One seat at the meeting table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParticipantKind,
    /// Optional socket persona (named system prompt + output schema).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    /// Optional free-text persona appended to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_prompt: Option<String>,
    /// Optional model override for internal turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Participant {
    pub fn internal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParticipantKind::Internal,
            socket_id: None,
            persona_prompt: None,
            model: None,
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParticipantKind::External,
            socket_id: None,
            persona_prompt: None,
            model: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Human,
    Agent,
    System,
}

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary conversational turn.
    Message,
    /// Structured markdown output (the `[ARTIFACT]` path).
    Artifact,
    /// Host instruction injected into future prompts.
    Directive,
    /// Lifecycle note from the orchestrator itself.
    Status,
}

/// One immutable entry in a meeting's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingMessage {
    pub id: String,
    pub meeting_id: String,
    pub sender_name: String,
    pub sender_kind: SenderKind,
    pub kind: MessageKind,
    pub content: String,
    pub content_type: String,
    /// Dense, strictly increasing per meeting (1, 2, 3, …).
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl MeetingMessage {
    /// Render this entry the way it appears in transcripts and prompt
    /// context: `[System]: …`, `[Directive from X]: …`, `[Name]: …`.
    pub fn speaker_prefix(&self) -> String {
        match self.kind {
            MessageKind::Status => "[System]".to_string(),
            MessageKind::Directive => format!("[Directive from {}]", self.sender_name),
            _ => format!("[{}]", self.sender_name),
        }
    }
}

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_MARKDOWN: &str = "text/markdown";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Meeting codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate a short human-memorable meeting code: a 4-letter prefix derived
/// from the title plus the MMDD date, e.g. `ROAD-0801`.
///
/// Titles shorter than 4 characters fall back to a random hex prefix.
/// Collision handling is the caller's job (append one random hex nibble).
pub fn generate_meeting_code(title: Option<&str>, now: DateTime<Utc>) -> String {
    let date = now.format("%m%d");
    let prefix = match title {
        Some(t) if t.chars().count() >= 4 => t
            .chars()
            .take(4)
            .map(|c| {
                if c == ' ' {
                    'X'
                } else {
                    c.to_ascii_uppercase()
                }
            })
            .collect::<String>(),
        _ => uuid::Uuid::new_v4().simple().to_string()[..4].to_uppercase(),
    };
    format!("{prefix}-{date}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn code_uses_title_prefix_and_date() {
        let code = generate_meeting_code(Some("Roadmap planning"), at(8, 1));
        assert_eq!(code, "ROAD-0801");
    }

    #[test]
    fn code_replaces_spaces_in_short_prefix() {
        let code = generate_meeting_code(Some("Q3 review"), at(12, 24));
        assert_eq!(code, "Q3XR-1224");
    }

    #[test]
    fn code_without_title_is_random_hex_prefix() {
        let code = generate_meeting_code(None, at(8, 1));
        assert_eq!(code.len(), 9);
        assert!(code.ends_with("-0801"));
        let prefix = &code[..4];
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_title_falls_back_to_random() {
        let code = generate_meeting_code(Some("ab"), at(8, 1));
        assert!(code.ends_with("-0801"));
    }

    #[test]
    fn speaker_prefix_variants() {
        let mut msg = MeetingMessage {
            id: "m1".into(),
            meeting_id: "r1".into(),
            sender_name: "Ana".into(),
            sender_kind: SenderKind::Agent,
            kind: MessageKind::Message,
            content: "hi".into(),
            content_type: CONTENT_TYPE_TEXT.into(),
            sequence: 1,
            created_at: Utc::now(),
        };
        assert_eq!(msg.speaker_prefix(), "[Ana]");

        msg.kind = MessageKind::Status;
        assert_eq!(msg.speaker_prefix(), "[System]");

        msg.kind = MessageKind::Directive;
        msg.sender_name = "Host".into();
        assert_eq!(msg.speaker_prefix(), "[Directive from Host]");
    }

    #[test]
    fn state_transitions_helpers() {
        assert!(MeetingState::Active.is_running());
        assert!(MeetingState::Paused.is_running());
        assert!(!MeetingState::Waiting.is_running());
        assert!(!MeetingState::Processing.is_running());
        assert!(!MeetingState::Closed.is_running());
        assert_eq!(MeetingState::Processing.to_string(), "processing");
    }
}

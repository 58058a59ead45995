//! Stream protocol: the typed WebSocket envelopes exchanged with observers.
//!
//! Observers subscribe to a topic (`meeting:<code>`, `room:<code>`,
//! `session:<id>`) and receive [`ServerEvent`]s; participants push
//! [`ClientMessage`]s on the same socket (directives, human messages,
//! external turn responses, identification).

use quorum_domain::meeting::MeetingMessage;
use serde::{Deserialize, Serialize};

/// Close code sent when a socket presents a missing or invalid token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code sent when an agent has been kicked from the topic.
pub const CLOSE_KICKED: u16 = 4003;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → observer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event envelope broadcast on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A message was appended to the meeting log (already persisted).
    #[serde(rename = "meeting_message")]
    MeetingMessage {
        #[serde(flatten)]
        message: MeetingMessage,
    },

    /// An agent's turn started.
    #[serde(rename = "agent_thinking")]
    AgentThinking { agent_name: String },

    /// An agent's turn finished (spoken or passed).
    #[serde(rename = "agent_done")]
    AgentDone { agent_name: String },

    /// An external agent is being asked to speak.
    #[serde(rename = "turn_request")]
    TurnRequest {
        agent_name: String,
        topic: String,
        conversation: String,
        directives: Vec<String>,
    },

    /// Someone identified themselves on the topic.
    #[serde(rename = "participant_joined")]
    ParticipantJoined {
        name: String,
        participant_type: String,
    },

    /// An observer connection for a named participant went away.
    #[serde(rename = "participant_left")]
    ParticipantLeft { name: String },

    /// The meeting was finalized.
    #[serde(rename = "meeting_ended")]
    MeetingEnded {
        session_id: String,
        rounds: u32,
        message_count: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observer → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Messages a connected client may push down the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Announce who is on this connection.
    #[serde(rename = "identify")]
    Identify {
        name: String,
        #[serde(default = "default_participant_type")]
        participant_type: String,
        #[serde(default)]
        agent_name: Option<String>,
    },

    /// Host directive for the running meeting.
    #[serde(rename = "directive")]
    Directive { text: String, from_name: String },

    /// Human interjection queued into the conversation.
    #[serde(rename = "human_message")]
    HumanMessage { text: String, from_name: String },

    /// An external agent answering its pending turn request.
    #[serde(rename = "external_agent_response")]
    ExternalAgentResponse {
        agent_name: String,
        response: String,
    },
}

fn default_participant_type() -> String {
    "human".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topic keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn meeting_topic(code: &str) -> String {
    format!("meeting:{code}")
}

pub fn room_topic(code: &str) -> String {
    format!("room:{code}")
}

pub fn session_topic(session_id: &str) -> String {
    format!("session:{session_id}")
}

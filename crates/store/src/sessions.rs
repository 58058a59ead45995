//! Session store: rooms, sessions, series memory, interpretations, and
//! session events.
//!
//! Persists everything in `sessions.json` under the configured state path.
//! A meeting is a room + session pair: the room carries the live meeting
//! metadata (code, status, topic), the session carries the durable output
//! (transcript, interpretations, series membership).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use quorum_domain::error::{Error, Result};
use quorum_domain::meeting::{generate_meeting_code, MeetingState, Participant};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Recording,
    Processing,
    Complete,
}

/// The durable record of one meeting's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    pub host_name: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub transcript: Option<String>,
    /// Free-form notes a human attached after the fact; surfaced as
    /// context in later meetings of the same series.
    #[serde(default)]
    pub manual_notes: String,
    pub created_at: DateTime<Utc>,
}

/// A logical group of related meetings sharing a living memory document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub memory_document: String,
    #[serde(default)]
    pub session_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A derived reading of a transcript (lens output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    pub id: String,
    pub session_id: String,
    pub source_name: String,
    pub model: String,
    pub output_markdown: String,
    #[serde(default)]
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// Downstream notification recorded when a session completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub event_type: String,
    pub session_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub interpretations_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Live meeting metadata keyed by the human-memorable code.
///
/// Also carries the meeting configuration (participants, cooldown,
/// round cap) so a Waiting meeting can be started later from the
/// persisted record alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub code: String,
    pub session_id: String,
    pub host_name: String,
    pub status: MeetingState,
    pub topic: String,
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub cooldown_seconds: f64,
    pub max_rounds: u32,
    #[serde(default)]
    pub transcript_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionState {
    #[serde(default)]
    rooms: HashMap<String, RoomRecord>,
    #[serde(default)]
    sessions: HashMap<String, SessionRecord>,
    #[serde(default)]
    series: HashMap<String, SeriesRecord>,
    #[serde(default)]
    interpretations: Vec<Interpretation>,
    #[serde(default)]
    events: Vec<SessionEvent>,
}

/// JSON-file backed store for rooms/sessions/series.
pub struct SessionStore {
    path: PathBuf,
    state: RwLock<SessionState>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("sessions.json");
        let state: SessionState = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            SessionState::default()
        };

        tracing::info!(
            rooms = state.rooms.len(),
            sessions = state.sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    // ── Rooms ──────────────────────────────────────────────────────

    /// Create a meeting room and its session. Returns the room record.
    ///
    /// Codes derive from the title (`TITL-MMDD`); a collision gets one
    /// random hex nibble appended.
    #[allow(clippy::too_many_arguments)]
    pub fn create_meeting(
        &self,
        topic: &str,
        task_description: &str,
        host_name: &str,
        title: Option<&str>,
        series_id: Option<String>,
        participants: Vec<Participant>,
        cooldown_seconds: f64,
        max_rounds: u32,
    ) -> RoomRecord {
        let now = Utc::now();
        let effective_title = title
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Agent Meeting: {}", truncate(topic, 50)));

        let mut state = self.state.write();

        let mut code = generate_meeting_code(Some(&effective_title), now);
        if state.rooms.contains_key(&code) {
            let nibble = uuid::Uuid::new_v4().simple().to_string()[..1].to_uppercase();
            code = format!("{code}{nibble}");
        }

        let session = SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title: Some(effective_title),
            series_id,
            room_id: None,
            host_name: host_name.to_owned(),
            status: SessionStatus::Created,
            transcript: None,
            manual_notes: String::new(),
            created_at: now,
        };
        let room = RoomRecord {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.clone(),
            session_id: session.id.clone(),
            host_name: host_name.to_owned(),
            status: MeetingState::Waiting,
            topic: topic.to_owned(),
            task_description: task_description.to_owned(),
            participants,
            cooldown_seconds,
            max_rounds,
            transcript_log: None,
            created_at: now,
        };

        let mut session = session;
        session.room_id = Some(room.id.clone());
        if let Some(sid) = &session.series_id {
            if let Some(series) = state.series.get_mut(sid) {
                series.session_count += 1;
                series.updated_at = now;
            }
        }
        state.sessions.insert(session.id.clone(), session);
        state.rooms.insert(code.clone(), room.clone());

        tracing::info!(code = %code, topic = %topic, "meeting room created");
        room
    }

    pub fn get_room(&self, code: &str) -> Option<RoomRecord> {
        self.state.read().rooms.get(code).cloned()
    }

    /// Rooms filtered by status, newest first.
    pub fn list_rooms(&self, status: Option<MeetingState>) -> Vec<RoomRecord> {
        let state = self.state.read();
        let mut rooms: Vec<RoomRecord> = state
            .rooms
            .values()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rooms
    }

    pub fn set_room_status(&self, code: &str, status: MeetingState) -> Result<()> {
        let mut state = self.state.write();
        let room = state
            .rooms
            .get_mut(code)
            .ok_or_else(|| Error::NotFound(format!("room {code}")))?;
        room.status = status;
        Ok(())
    }

    pub fn set_room_transcript_log(&self, code: &str, transcript: &str) -> Result<()> {
        let mut state = self.state.write();
        let room = state
            .rooms
            .get_mut(code)
            .ok_or_else(|| Error::NotFound(format!("room {code}")))?;
        room.transcript_log = Some(transcript.to_owned());
        Ok(())
    }

    /// Record a participant on the room. Rejects duplicate names.
    pub fn add_room_participant(&self, code: &str, participant: Participant) -> Result<()> {
        let mut state = self.state.write();
        let room = state
            .rooms
            .get_mut(code)
            .ok_or_else(|| Error::NotFound(format!("room {code}")))?;
        if room
            .participants
            .iter()
            .any(|p| p.name == participant.name)
        {
            return Err(Error::InvalidState(format!(
                "{} is already a participant",
                participant.name
            )));
        }
        room.participants.push(participant);
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.state.read().sessions.get(session_id).cloned()
    }

    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.status = status;
        Ok(())
    }

    /// Store the final transcript and mark the session complete.
    pub fn complete_session(&self, session_id: &str, transcript: &str) -> Result<()> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.transcript = Some(transcript.to_owned());
        session.status = SessionStatus::Complete;
        Ok(())
    }

    pub fn set_manual_notes(&self, session_id: &str, notes: &str) -> Result<()> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.manual_notes = notes.to_owned();
        Ok(())
    }

    // ── Series memory ──────────────────────────────────────────────

    pub fn create_series(&self, name: &str) -> SeriesRecord {
        let now = Utc::now();
        let series = SeriesRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            memory_document: String::new(),
            session_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .series
            .insert(series.id.clone(), series.clone());
        series
    }

    pub fn set_series_memory(&self, series_id: &str, memory: &str) -> Result<()> {
        let mut state = self.state.write();
        let series = state
            .series
            .get_mut(series_id)
            .ok_or_else(|| Error::NotFound(format!("series {series_id}")))?;
        series.memory_document = memory.to_owned();
        series.updated_at = Utc::now();
        Ok(())
    }

    /// The series memory document for a session, if it belongs to a
    /// series with a non-empty document.
    pub fn memory_context_for_session(&self, session_id: &str) -> Option<String> {
        let state = self.state.read();
        let series_id = state.sessions.get(session_id)?.series_id.clone()?;
        let doc = &state.series.get(&series_id)?.memory_document;
        if doc.is_empty() {
            None
        } else {
            Some(doc.clone())
        }
    }

    /// Titles + manual notes from the most recent sibling sessions in the
    /// same series (excluding this one), newest first.
    pub fn recent_notes(&self, session_id: &str, limit: usize) -> Vec<(String, String)> {
        let state = self.state.read();
        let Some(series_id) = state
            .sessions
            .get(session_id)
            .and_then(|s| s.series_id.clone())
        else {
            return Vec::new();
        };

        let mut siblings: Vec<&SessionRecord> = state
            .sessions
            .values()
            .filter(|s| {
                s.id != session_id
                    && s.series_id.as_deref() == Some(series_id.as_str())
                    && !s.manual_notes.is_empty()
            })
            .collect();
        siblings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        siblings
            .into_iter()
            .take(limit)
            .map(|s| {
                (
                    s.title.clone().unwrap_or_else(|| "Untitled".into()),
                    s.manual_notes.clone(),
                )
            })
            .collect()
    }

    // ── Interpretations & events ───────────────────────────────────

    pub fn add_interpretation(&self, interpretation: Interpretation) {
        self.state.write().interpretations.push(interpretation);
    }

    pub fn interpretations_for(&self, session_id: &str) -> Vec<Interpretation> {
        self.state
            .read()
            .interpretations
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn primary_interpretation(&self, session_id: &str) -> Option<Interpretation> {
        self.state
            .read()
            .interpretations
            .iter()
            .find(|i| i.session_id == session_id && i.is_primary)
            .cloned()
    }

    pub fn record_event(&self, event: SessionEvent) {
        self.state.write().events.push(event);
    }

    pub fn events_for(&self, session_id: &str) -> Vec<SessionEvent> {
        self.state
            .read()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.read();
        let json = serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

//! Append-only meeting message log.
//!
//! Each meeting gets a `<meetingId>.jsonl` file under `state_path/meetings`.
//! Appends are write-through: the line hits disk before the in-memory tail
//! is updated, and callers broadcast only after `append` returns — so a
//! live observer can never see a message that is absent from history.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use quorum_domain::error::{Error, Result};
use quorum_domain::meeting::MeetingMessage;

/// Write-through JSONL message log, one file per meeting.
pub struct MessageLog {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<MeetingMessage>>>,
}

impl MessageLog {
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("meetings");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn file_path(&self, meeting_id: &str) -> PathBuf {
        self.base_dir.join(format!("{meeting_id}.jsonl"))
    }

    /// Append one message: persisted to the JSONL file first, then added
    /// to the in-memory tail.
    pub fn append(&self, msg: &MeetingMessage) -> Result<()> {
        let json = serde_json::to_string(msg)
            .map_err(|e| Error::Other(format!("serializing meeting message: {e}")))?;

        let path = self.file_path(&msg.meeting_id);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;

        self.cache
            .write()
            .entry(msg.meeting_id.to_owned())
            .or_default()
            .push(msg.clone());
        Ok(())
    }

    /// All messages for a meeting, in sequence order.
    pub fn all(&self, meeting_id: &str) -> Vec<MeetingMessage> {
        if let Some(tail) = self.cache.read().get(meeting_id) {
            return tail.clone();
        }
        // Cold read: hydrate from disk (e.g. reading a finished meeting
        // after a restart).
        let loaded = self.load_from_disk(meeting_id);
        if !loaded.is_empty() {
            self.cache
                .write()
                .entry(meeting_id.to_owned())
                .or_insert_with(|| loaded.clone());
        }
        loaded
    }

    /// Messages with `sequence > after`, for resumable consumption.
    pub fn read_after(&self, meeting_id: &str, after: u64) -> Vec<MeetingMessage> {
        self.all(meeting_id)
            .into_iter()
            .filter(|m| m.sequence > after)
            .collect()
    }

    pub fn count(&self, meeting_id: &str) -> usize {
        self.all(meeting_id).len()
    }

    /// Drop a meeting's in-memory tail (the JSONL file stays).
    pub fn evict(&self, meeting_id: &str) {
        self.cache.write().remove(meeting_id);
    }

    fn load_from_disk(&self, meeting_id: &str) -> Vec<MeetingMessage> {
        let path = self.file_path(meeting_id);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MeetingMessage>(line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(
                        meeting_id = meeting_id,
                        error = %e,
                        "skipping malformed message log line"
                    );
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quorum_domain::meeting::{MessageKind, SenderKind, CONTENT_TYPE_TEXT};

    fn msg(meeting_id: &str, sequence: u64, content: &str) -> MeetingMessage {
        MeetingMessage {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: meeting_id.into(),
            sender_name: "Ana".into(),
            sender_kind: SenderKind::Agent,
            kind: MessageKind::Message,
            content: content.into(),
            content_type: CONTENT_TYPE_TEXT.into(),
            sequence,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path()).unwrap();

        log.append(&msg("m1", 1, "first")).unwrap();
        log.append(&msg("m1", 2, "second")).unwrap();
        log.append(&msg("m2", 1, "other meeting")).unwrap();

        let all = log.all("m1");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first");
        assert_eq!(all[1].sequence, 2);
        assert_eq!(log.count("m2"), 1);
    }

    #[test]
    fn read_after_filters_by_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path()).unwrap();
        for i in 1..=5 {
            log.append(&msg("m1", i, &format!("msg {i}"))).unwrap();
        }
        let tail = log.read_after("m1", 3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 4);
        assert_eq!(tail[1].sequence, 5);
        assert!(log.read_after("m1", 5).is_empty());
    }

    #[test]
    fn persisted_before_cached() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path()).unwrap();
        log.append(&msg("m1", 1, "durable")).unwrap();

        // A fresh log over the same directory sees the message from disk.
        let fresh = MessageLog::new(dir.path()).unwrap();
        let all = fresh.all("m1");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "durable");
    }

    #[test]
    fn evict_keeps_disk_copy() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path()).unwrap();
        log.append(&msg("m1", 1, "kept")).unwrap();
        log.evict("m1");
        assert_eq!(log.count("m1"), 1);
    }

    #[test]
    fn unknown_meeting_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path()).unwrap();
        assert!(log.all("ghost").is_empty());
        assert_eq!(log.count("ghost"), 0);
    }
}

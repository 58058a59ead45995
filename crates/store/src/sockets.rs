//! Socket personas: named structured-output descriptors (system prompt +
//! output schema) that agents can adopt across meetings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use quorum_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketPersona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub is_preset: bool,
    pub created_at: DateTime<Utc>,
}

/// JSON-file backed socket persona store. Presets are seeded on first load.
pub struct SocketStore {
    path: PathBuf,
    sockets: RwLock<HashMap<String, SocketPersona>>,
}

impl SocketStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("sockets.json");
        let mut sockets: HashMap<String, SocketPersona> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        seed_presets(&mut sockets);
        tracing::info!(sockets = sockets.len(), "socket store loaded");

        Ok(Self {
            path,
            sockets: RwLock::new(sockets),
        })
    }

    pub fn get(&self, id: &str) -> Option<SocketPersona> {
        self.sockets.read().get(id).cloned()
    }

    pub fn insert(&self, socket: SocketPersona) {
        self.sockets.write().insert(socket.id.clone(), socket);
    }

    /// Presets first, then by name.
    pub fn list(&self) -> Vec<SocketPersona> {
        let mut all: Vec<SocketPersona> = self.sockets.read().values().cloned().collect();
        all.sort_by(|a, b| {
            b.is_preset
                .cmp(&a.is_preset)
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    pub fn flush(&self) -> Result<()> {
        let sockets = self.sockets.read();
        let json = serde_json::to_string_pretty(&*sockets)
            .map_err(|e| Error::Other(format!("serializing sockets: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

fn seed_presets(sockets: &mut HashMap<String, SocketPersona>) {
    for (id, name, description, prompt) in [
        (
            "facilitator",
            "Facilitator",
            "Keeps the discussion structured and on-topic",
            "You are a neutral meeting facilitator. Keep the discussion on \
             topic, surface disagreements explicitly, and summarize decisions \
             as they are made.",
        ),
        (
            "devils-advocate",
            "Devil's Advocate",
            "Challenges assumptions and stress-tests proposals",
            "You challenge every proposal constructively. Name the strongest \
             counterargument, the riskiest assumption, and what evidence would \
             change your mind.",
        ),
        (
            "note-taker",
            "Note Taker",
            "Produces structured minutes as artifacts",
            "You track decisions and action items. When the discussion reaches \
             a milestone, emit a structured markdown summary of decisions made \
             and owners assigned.",
        ),
    ] {
        sockets.entry(id.to_string()).or_insert_with(|| SocketPersona {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            system_prompt: prompt.into(),
            output_schema: serde_json::json!({}),
            is_preset: true,
            created_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = SocketStore::new(dir.path()).unwrap();
        assert!(store.get("facilitator").is_some());
        assert!(store.get("devils-advocate").is_some());
        let list = store.list();
        assert!(list.len() >= 3);
        assert!(list[0].is_preset);
    }

    #[test]
    fn custom_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SocketStore::new(dir.path()).unwrap();
            store.insert(SocketPersona {
                id: "researcher".into(),
                name: "Researcher".into(),
                description: "cites sources".into(),
                system_prompt: "You cite sources.".into(),
                output_schema: serde_json::json!({"type": "object"}),
                is_preset: false,
                created_at: Utc::now(),
            });
            store.flush().unwrap();
        }
        let store = SocketStore::new(dir.path()).unwrap();
        let socket = store.get("researcher").unwrap();
        assert_eq!(socket.name, "Researcher");
        assert!(!socket.is_preset);
    }

    #[test]
    fn seeding_does_not_clobber_existing() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SocketStore::new(dir.path()).unwrap();
            let mut custom = store.get("facilitator").unwrap();
            custom.system_prompt = "customized".into();
            store.insert(custom);
            store.flush().unwrap();
        }
        let store = SocketStore::new(dir.path()).unwrap();
        assert_eq!(store.get("facilitator").unwrap().system_prompt, "customized");
    }
}

//! Pending-response table for the external-agent turn protocol.
//!
//! Each external turn parks a oneshot sender under the agent's name; the
//! respond endpoint (or an `external_agent_response` WS message) resolves
//! it. The table's lock is never held across an await — the orchestrator
//! awaits the receiver, not the map.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use quorum_domain::error::{Error, Result};

/// One meeting's table of awaited external responses.
#[derive(Default)]
pub struct ExternalTurns {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl ExternalTurns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a turn for `agent_name` and return the receiver the
    /// scheduler awaits. An existing pending turn for the same name is
    /// replaced (its receiver resolves as cancelled).
    pub fn begin(&self, agent_name: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(agent_name.to_owned(), tx);
        rx
    }

    /// Resolve a pending turn with the agent's response.
    pub fn resolve(&self, agent_name: &str, response: String) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .remove(agent_name)
            .ok_or_else(|| Error::InvalidState(format!("no pending turn for {agent_name}")))?;
        sender
            .send(response)
            .map_err(|_| Error::InvalidState(format!("turn for {agent_name} already finished")))
    }

    /// Close one pending turn without resolving it (timeout path).
    pub fn cancel(&self, agent_name: &str) {
        self.pending.lock().remove(agent_name);
    }

    /// Close every pending turn (stop path); awaiting receivers resolve
    /// as cancelled and the scheduler treats those turns as passes.
    pub fn cancel_all(&self) {
        self.pending.lock().clear();
    }

    pub fn is_pending(&self, agent_name: &str) -> bool {
        self.pending.lock().contains_key(agent_name)
    }

    /// Names with an open turn, for state snapshots.
    pub fn pending_names(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

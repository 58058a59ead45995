//! In-memory registry of live meeting orchestrators, keyed by code.
//!
//! Holds only meetings whose loop is running or finalizing; the
//! finalizer removes each entry exactly once. Mutations are serialized
//! through one lock so two concurrent creations cannot both claim the
//! same code.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use quorum_domain::error::{Error, Result};

use super::orchestrator::MeetingOrchestrator;

pub struct MeetingRegistry {
    meetings: Mutex<HashMap<String, Arc<MeetingOrchestrator>>>,
}

impl Default for MeetingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingRegistry {
    pub fn new() -> Self {
        Self {
            meetings: Mutex::new(HashMap::new()),
        }
    }

    /// Register a live meeting. Fails when the code is already present.
    pub fn register(&self, code: &str, meeting: Arc<MeetingOrchestrator>) -> Result<()> {
        let mut meetings = self.meetings.lock();
        if meetings.contains_key(code) {
            return Err(Error::InvalidState(format!(
                "meeting {code} is already running"
            )));
        }
        meetings.insert(code.to_owned(), meeting);
        tracing::info!(code = %code, "meeting registered");
        Ok(())
    }

    pub fn lookup(&self, code: &str) -> Option<Arc<MeetingOrchestrator>> {
        self.meetings.lock().get(code).cloned()
    }

    /// Remove a meeting. Idempotent.
    pub fn unregister(&self, code: &str) {
        if self.meetings.lock().remove(code).is_some() {
            tracing::info!(code = %code, "meeting unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.meetings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.meetings.lock().is_empty()
    }
}

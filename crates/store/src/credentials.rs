//! Credential store: hashed bearer tokens with optional scope sets.
//!
//! Tokens look like `quorum_sk_<base64url(32 random bytes)>`. Only the
//! SHA-256 digest is persisted; the plaintext is returned exactly once
//! at mint time. Verification compares digests in constant time and
//! updates `last_used_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use quorum_domain::error::{Error, Result};

/// Every scope a credential can carry. A credential with no explicit
/// scope set passes every check.
pub const ALL_SCOPES: &[&str] = &[
    "sessions:read",
    "sessions:write",
    "rooms:write",
    "wall:read",
    "wall:write",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A minted API credential. `token_hash` is the hex SHA-256 of the
/// plaintext token; the plaintext itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub name: String,
    pub token_hash: String,
    /// `None` = all scopes.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Scope check: credentials without an explicit set pass everything.
    pub fn allows(&self, scope: &str) -> bool {
        match &self.scopes {
            None => true,
            Some(set) => set.iter().any(|s| s == scope),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file backed credential store.
pub struct CredentialStore {
    path: PathBuf,
    token_prefix: String,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Load or create the store at `state_path/credentials.json`.
    pub fn new(state_path: &Path, token_prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("credentials.json");
        let credentials: HashMap<String, Credential> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            credentials = credentials.len(),
            path = %path.display(),
            "credential store loaded"
        );

        Ok(Self {
            path,
            token_prefix: token_prefix.to_owned(),
            credentials: RwLock::new(credentials),
        })
    }

    /// Mint a new credential. Returns the record and the plaintext token
    /// — the only time the plaintext is ever available.
    pub fn mint(&self, name: &str, scopes: Option<Vec<String>>) -> (Credential, String) {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = format!(
            "{}_{}",
            self.token_prefix,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
        );

        let credential = Credential {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            token_hash: hex::encode(Sha256::digest(token.as_bytes())),
            scopes,
            created_at: Utc::now(),
            last_used_at: None,
        };

        self.credentials
            .write()
            .insert(credential.id.clone(), credential.clone());
        tracing::info!(name = %name, id = %credential.id, "credential minted");

        (credential, token)
    }

    /// Verify a plaintext token. On success updates `last_used_at` and
    /// returns a snapshot of the credential.
    ///
    /// Digest comparison runs in constant time over all stored entries so
    /// the lookup does not leak which hash (if any) matched early.
    pub fn verify(&self, token: &str) -> Option<Credential> {
        if !token.starts_with(&format!("{}_", self.token_prefix)) {
            return None;
        }
        let candidate = Sha256::digest(token.as_bytes());

        let mut credentials = self.credentials.write();
        let mut matched_id: Option<String> = None;
        for cred in credentials.values() {
            let Ok(stored) = hex::decode(&cred.token_hash) else {
                continue;
            };
            if bool::from(candidate.ct_eq(stored.as_slice())) {
                matched_id = Some(cred.id.clone());
            }
        }

        let id = matched_id?;
        let entry = credentials.get_mut(&id)?;
        entry.last_used_at = Some(Utc::now());
        Some(entry.clone())
    }

    /// Look up a credential by id.
    pub fn get(&self, id: &str) -> Option<Credential> {
        self.credentials.read().get(id).cloned()
    }

    /// Revoke a credential. Returns true if it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.credentials.write().remove(id).is_some()
    }

    /// All credentials, newest first (for the public agent directory).
    pub fn list(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.credentials.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let credentials = self.credentials.read();
        let json = serde_json::to_string_pretty(&*credentials)
            .map_err(|e| Error::Other(format!("serializing credentials: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path(), "quorum_sk").unwrap();
        (dir, store)
    }

    #[test]
    fn mint_returns_prefixed_token() {
        let (_dir, store) = store();
        let (cred, token) = store.mint("Scout", None);
        assert!(token.starts_with("quorum_sk_"));
        // 32 bytes of url-safe base64 without padding = 43 chars.
        assert_eq!(token.len(), "quorum_sk_".len() + 43);
        assert_eq!(cred.name, "Scout");
        assert!(cred.last_used_at.is_none());
    }

    #[test]
    fn minted_token_verifies_and_touches_last_used() {
        let (_dir, store) = store();
        let (cred, token) = store.mint("Scout", None);

        let verified = store.verify(&token).expect("token should verify");
        assert_eq!(verified.id, cred.id);
        assert!(verified.last_used_at.is_some());

        // Verifies repeatedly until deleted.
        assert!(store.verify(&token).is_some());
        assert!(store.delete(&cred.id));
        assert!(store.verify(&token).is_none());
    }

    #[test]
    fn plaintext_is_not_stored() {
        let (_dir, store) = store();
        let (cred, token) = store.mint("Scout", None);
        assert_ne!(cred.token_hash, token);
        assert!(!cred.token_hash.contains(&token));
        store.flush().unwrap();
        let raw = std::fs::read_to_string(store.path.clone()).unwrap();
        assert!(!raw.contains(&token));
    }

    #[test]
    fn wrong_prefix_and_wrong_token_fail() {
        let (_dir, store) = store();
        let (_cred, token) = store.mint("Scout", None);
        assert!(store.verify("other_sk_abcdef").is_none());
        let mangled = format!("{}x", &token[..token.len() - 1]);
        assert!(store.verify(&mangled).is_none());
    }

    #[test]
    fn null_scopes_allow_everything() {
        let (_dir, store) = store();
        let (cred, _) = store.mint("Scout", None);
        for scope in ALL_SCOPES {
            assert!(cred.allows(scope), "expected {scope} to pass");
        }
    }

    #[test]
    fn explicit_scopes_enforced() {
        let (_dir, store) = store();
        let (cred, _) = store.mint("Reader", Some(vec!["sessions:read".into()]));
        assert!(cred.allows("sessions:read"));
        assert!(!cred.allows("wall:write"));
        assert!(!cred.allows("rooms:write"));
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let token = {
            let store = CredentialStore::new(dir.path(), "quorum_sk").unwrap();
            let (_, token) = store.mint("Scout", Some(vec!["wall:write".into()]));
            store.flush().unwrap();
            token
        };
        let store = CredentialStore::new(dir.path(), "quorum_sk").unwrap();
        let cred = store.verify(&token).expect("reloaded store should verify");
        assert_eq!(cred.name, "Scout");
        assert_eq!(cred.scopes, Some(vec!["wall:write".to_string()]));
    }
}

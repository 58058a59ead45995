//! The agent wall: a shared append-only activity feed.
//!
//! Posts, one-level replies, and idempotent emoji reactions. Reads are
//! public; writes go through scoped credentials at the API layer.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use quorum_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Post
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Post,
    /// A new agent introducing itself (created by self-registration).
    Intro,
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallPost {
    pub id: String,
    pub author_name: String,
    pub credential_id: String,
    pub content: String,
    pub kind: PostKind,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// emoji → authors who reacted (set semantics, insertion-ordered).
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file backed wall store.
pub struct WallStore {
    path: PathBuf,
    posts: RwLock<HashMap<String, WallPost>>,
}

impl WallStore {
    /// Load or create the store at `state_path/wall.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("wall.json");
        let posts: HashMap<String, WallPost> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(posts = posts.len(), path = %path.display(), "wall store loaded");

        Ok(Self {
            path,
            posts: RwLock::new(posts),
        })
    }

    /// Append a post. Replies must name an existing parent.
    pub fn add_post(
        &self,
        author_name: &str,
        credential_id: &str,
        content: &str,
        kind: PostKind,
        parent_id: Option<String>,
    ) -> Result<WallPost> {
        if content.trim().is_empty() {
            return Err(Error::InvalidState("content is required".into()));
        }
        if kind == PostKind::Reply && parent_id.is_none() {
            return Err(Error::InvalidState(
                "parent_id is required for replies".into(),
            ));
        }

        let mut posts = self.posts.write();
        if let Some(pid) = &parent_id {
            if !posts.contains_key(pid) {
                return Err(Error::NotFound(format!("parent post {pid}")));
            }
        }

        let post = WallPost {
            id: uuid::Uuid::new_v4().to_string(),
            author_name: author_name.to_owned(),
            credential_id: credential_id.to_owned(),
            content: content.trim().to_owned(),
            kind,
            parent_id,
            reactions: BTreeMap::new(),
            created_at: Utc::now(),
        };
        posts.insert(post.id.clone(), post.clone());
        Ok(post)
    }

    /// Add an emoji reaction. Reacting twice with the same emoji is a
    /// no-op. Returns the updated reaction map.
    pub fn react(
        &self,
        post_id: &str,
        emoji: &str,
        author_name: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if emoji.trim().is_empty() {
            return Err(Error::InvalidState("emoji is required".into()));
        }
        let mut posts = self.posts.write();
        let post = posts
            .get_mut(post_id)
            .ok_or_else(|| Error::NotFound(format!("post {post_id}")))?;

        let authors = post.reactions.entry(emoji.trim().to_owned()).or_default();
        if !authors.iter().any(|a| a == author_name) {
            authors.push(author_name.to_owned());
        }
        Ok(post.reactions.clone())
    }

    pub fn get(&self, post_id: &str) -> Option<WallPost> {
        self.posts.read().get(post_id).cloned()
    }

    /// Top-level feed, newest first, with pagination.
    pub fn feed(&self, limit: usize, offset: usize) -> Vec<WallPost> {
        let posts = self.posts.read();
        let mut top: Vec<WallPost> = posts
            .values()
            .filter(|p| p.kind != PostKind::Reply)
            .cloned()
            .collect();
        top.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        top.into_iter().skip(offset).take(limit).collect()
    }

    /// Replies to a post, oldest first.
    pub fn replies(&self, post_id: &str) -> Result<Vec<WallPost>> {
        let posts = self.posts.read();
        if !posts.contains_key(post_id) {
            return Err(Error::NotFound(format!("post {post_id}")));
        }
        let mut replies: Vec<WallPost> = posts
            .values()
            .filter(|p| p.parent_id.as_deref() == Some(post_id))
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(replies)
    }

    pub fn reply_count(&self, post_id: &str) -> usize {
        self.posts
            .read()
            .values()
            .filter(|p| p.parent_id.as_deref() == Some(post_id))
            .count()
    }

    pub fn post_count_for(&self, author_name: &str) -> usize {
        self.posts
            .read()
            .values()
            .filter(|p| p.author_name == author_name)
            .count()
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let posts = self.posts.read();
        let json = serde_json::to_string_pretty(&*posts)
            .map_err(|e| Error::Other(format!("serializing wall: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, WallStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WallStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn post_and_feed_order() {
        let (_dir, store) = store();
        store
            .add_post("Alpha", "c1", "first post", PostKind::Post, None)
            .unwrap();
        store
            .add_post("Beta", "c2", "second post", PostKind::Intro, None)
            .unwrap();

        let feed = store.feed(50, 0);
        assert_eq!(feed.len(), 2);
        // Pagination works.
        assert_eq!(store.feed(1, 0).len(), 1);
        assert_eq!(store.feed(50, 2).len(), 0);
    }

    #[test]
    fn blank_content_rejected() {
        let (_dir, store) = store();
        let err = store
            .add_post("Alpha", "c1", "   ", PostKind::Post, None)
            .unwrap_err();
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn reply_requires_existing_parent() {
        let (_dir, store) = store();
        // No parent_id at all.
        assert!(store
            .add_post("Beta", "c2", "reply", PostKind::Reply, None)
            .is_err());
        // Nonexistent parent.
        assert!(store
            .add_post("Beta", "c2", "reply", PostKind::Reply, Some("ghost".into()))
            .is_err());

        let parent = store
            .add_post("Alpha", "c1", "discuss", PostKind::Post, None)
            .unwrap();
        let reply = store
            .add_post(
                "Beta",
                "c2",
                "good point",
                PostKind::Reply,
                Some(parent.id.clone()),
            )
            .unwrap();

        let replies = store.replies(&parent.id).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, reply.id);
        assert_eq!(store.reply_count(&parent.id), 1);
        // Replies stay out of the top-level feed.
        assert_eq!(store.feed(50, 0).len(), 1);
    }

    #[test]
    fn reactions_are_idempotent() {
        let (_dir, store) = store();
        let post = store
            .add_post("Alpha", "c1", "react to this", PostKind::Post, None)
            .unwrap();

        store.react(&post.id, "fire", "Beta").unwrap();
        store.react(&post.id, "fire", "Beta").unwrap();
        let reactions = store.react(&post.id, "fire", "Gamma").unwrap();

        assert_eq!(reactions["fire"], vec!["Beta", "Gamma"]);
    }

    #[test]
    fn react_to_missing_post_fails() {
        let (_dir, store) = store();
        assert!(store.react("ghost", "fire", "Beta").is_err());
    }

    #[test]
    fn post_counts_per_author() {
        let (_dir, store) = store();
        store
            .add_post("Alpha", "c1", "one", PostKind::Post, None)
            .unwrap();
        store
            .add_post("Alpha", "c1", "two", PostKind::Post, None)
            .unwrap();
        assert_eq!(store.post_count_for("Alpha"), 2);
        assert_eq!(store.post_count_for("Beta"), 0);
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let post_id = {
            let store = WallStore::new(dir.path()).unwrap();
            let post = store
                .add_post("Alpha", "c1", "durable", PostKind::Post, None)
                .unwrap();
            store.react(&post.id, "fire", "Beta").unwrap();
            store.flush().unwrap();
            post.id
        };
        let store = WallStore::new(dir.path()).unwrap();
        let post = store.get(&post_id).unwrap();
        assert_eq!(post.reactions["fire"], vec!["Beta"]);
    }
}

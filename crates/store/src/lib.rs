//! File-backed stores for Quorum.
//!
//! Every store keeps its working set in memory behind a `parking_lot`
//! lock and persists to JSON (or JSONL for the meeting message log)
//! under the configured state path. The gateway flushes the JSON stores
//! periodically and on shutdown; the message log is write-through.

pub mod credentials;
pub mod messages;
pub mod sessions;
pub mod sockets;
pub mod wall;

pub use credentials::{Credential, CredentialStore, ALL_SCOPES};
pub use messages::MessageLog;
pub use sessions::{
    Interpretation, RoomRecord, SeriesRecord, SessionEvent, SessionRecord, SessionStatus,
    SessionStore,
};
pub use sockets::{SocketPersona, SocketStore};
pub use wall::{PostKind, WallPost, WallStore};

//! Topic-keyed event bus over long-lived observer connections.
//!
//! Observers subscribe to a topic (`meeting:<code>`, `room:<code>`,
//! `session:<id>`) with an mpsc sink; their socket task drains the sink
//! and writes frames. Broadcast never blocks: a full or closed sink marks
//! the connection dead, and dead connections are removed after the pass —
//! never while iterating.
//!
//! Kicked agents land in a per-topic kick set: their connections are told
//! to close with a distinct code, and subsequent subscriptions under the
//! same agent name on that topic are refused.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use quorum_protocol::ServerEvent;

/// What a subscribed connection's socket task receives.
#[derive(Debug, Clone)]
pub enum ObserverMessage {
    /// A serialized [`ServerEvent`] to forward verbatim.
    Event(String),
    /// Close the socket with the "kicked" close code.
    Kick,
}

/// A message the bus can push to a connection's writer task.
pub type ObserverSink = mpsc::Sender<ObserverMessage>;

/// One subscribed observer connection.
pub struct ObserverConn {
    pub id: String,
    pub name: String,
    pub participant_kind: String,
    pub agent_name: Option<String>,
    pub sink: ObserverSink,
}

#[derive(Default)]
struct TopicState {
    observers: Vec<ObserverConn>,
}

/// Process-wide broadcast fabric.
pub struct EventBus {
    topics: RwLock<HashMap<String, TopicState>>,
    /// topic → agent names refused on that topic.
    kicked: RwLock<HashMap<String, HashSet<String>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            kicked: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a connection to a topic. Fails when the connection's
    /// agent name is in the topic's kick set.
    pub fn subscribe(&self, topic: &str, conn: ObserverConn) -> Result<(), String> {
        if let Some(agent) = &conn.agent_name {
            if self.is_kicked(topic, agent) {
                return Err(format!("{agent} is kicked from {topic}"));
            }
        }
        self.topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .observers
            .push(conn);
        Ok(())
    }

    /// Remove one connection from a topic. Empty topics are dropped.
    pub fn unsubscribe(&self, topic: &str, conn_id: &str) {
        let mut topics = self.topics.write();
        if let Some(state) = topics.get_mut(topic) {
            state.observers.retain(|c| c.id != conn_id);
            if state.observers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Broadcast an event to every observer of a topic.
    ///
    /// The event is serialized once; sends that fail (closed or full sink)
    /// mark the connection dead, and the dead are reaped after the pass.
    pub fn broadcast(&self, topic: &str, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast event");
                return;
            }
        };

        let mut dead: Vec<String> = Vec::new();
        {
            let topics = self.topics.read();
            let Some(state) = topics.get(topic) else {
                return;
            };
            for conn in &state.observers {
                if conn
                    .sink
                    .try_send(ObserverMessage::Event(json.clone()))
                    .is_err()
                {
                    dead.push(conn.id.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut topics = self.topics.write();
            if let Some(state) = topics.get_mut(topic) {
                state.observers.retain(|c| !dead.contains(&c.id));
                if state.observers.is_empty() {
                    topics.remove(topic);
                }
            }
            tracing::debug!(topic = %topic, removed = dead.len(), "reaped dead observers");
        }
    }

    /// Kick an agent off a topic: its connections are told to close with
    /// the kicked code and its name is refused on future subscriptions.
    pub fn kick(&self, topic: &str, agent_name: &str) {
        self.kicked
            .write()
            .entry(topic.to_owned())
            .or_default()
            .insert(agent_name.to_owned());

        let mut topics = self.topics.write();
        if let Some(state) = topics.get_mut(topic) {
            state.observers.retain(|c| {
                if c.agent_name.as_deref() == Some(agent_name) {
                    let _ = c.sink.try_send(ObserverMessage::Kick);
                    false
                } else {
                    true
                }
            });
            if state.observers.is_empty() {
                topics.remove(topic);
            }
        }
        tracing::info!(topic = %topic, agent = %agent_name, "agent kicked");
    }

    pub fn is_kicked(&self, topic: &str, agent_name: &str) -> bool {
        self.kicked
            .read()
            .get(topic)
            .map(|set| set.contains(agent_name))
            .unwrap_or(false)
    }

    /// Forget a topic's kick set (called when its meeting is finalized).
    pub fn clear_kicks(&self, topic: &str) {
        self.kicked.write().remove(topic);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.observers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(name: &str, agent: Option<&str>) -> (ObserverConn, mpsc::Receiver<ObserverMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            ObserverConn {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.into(),
                participant_kind: if agent.is_some() { "agent" } else { "human" }.into(),
                agent_name: agent.map(str::to_owned),
                sink: tx,
            },
            rx,
        )
    }

    fn thinking(name: &str) -> ServerEvent {
        ServerEvent::AgentThinking {
            agent_name: name.into(),
        }
    }

    #[test]
    fn broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (c1, mut rx1) = conn("alice", None);
        let (c2, mut rx2) = conn("bob", None);
        bus.subscribe("meeting:X", c1).unwrap();
        bus.subscribe("meeting:X", c2).unwrap();

        bus.broadcast("meeting:X", &thinking("Ana"));

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                ObserverMessage::Event(json) => assert!(json.contains("agent_thinking")),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn broadcast_to_other_topic_is_isolated() {
        let bus = EventBus::new();
        let (c1, mut rx1) = conn("alice", None);
        bus.subscribe("meeting:X", c1).unwrap();
        bus.broadcast("meeting:Y", &thinking("Ana"));
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn dead_connections_are_reaped() {
        let bus = EventBus::new();
        let (c1, rx1) = conn("alice", None);
        let (c2, _rx2) = conn("bob", None);
        bus.subscribe("meeting:X", c1).unwrap();
        bus.subscribe("meeting:X", c2).unwrap();
        assert_eq!(bus.subscriber_count("meeting:X"), 2);

        drop(rx1); // alice's socket went away
        bus.broadcast("meeting:X", &thinking("Ana"));
        assert_eq!(bus.subscriber_count("meeting:X"), 1);
    }

    #[test]
    fn unsubscribe_drops_empty_topics() {
        let bus = EventBus::new();
        let (c1, _rx) = conn("alice", None);
        let id = c1.id.clone();
        bus.subscribe("meeting:X", c1).unwrap();
        bus.unsubscribe("meeting:X", &id);
        assert_eq!(bus.subscriber_count("meeting:X"), 0);
        assert!(bus.topics.read().is_empty());
    }

    #[test]
    fn kick_closes_and_refuses_reconnect() {
        let bus = EventBus::new();
        let (c1, mut rx1) = conn("scout", Some("Scout"));
        bus.subscribe("meeting:X", c1).unwrap();

        bus.kick("meeting:X", "Scout");
        assert!(matches!(rx1.try_recv().unwrap(), ObserverMessage::Kick));
        assert_eq!(bus.subscriber_count("meeting:X"), 0);

        // Reconnect under the same agent name is refused.
        let (c2, _rx2) = conn("scout", Some("Scout"));
        assert!(bus.subscribe("meeting:X", c2).is_err());

        // A different agent is unaffected.
        let (c3, _rx3) = conn("other", Some("Other"));
        assert!(bus.subscribe("meeting:X", c3).is_ok());

        // Clearing the kick set lets the name back in.
        bus.clear_kicks("meeting:X");
        let (c4, _rx4) = conn("scout", Some("Scout"));
        assert!(bus.subscribe("meeting:X", c4).is_ok());
    }

    #[test]
    fn kick_does_not_affect_other_topics() {
        let bus = EventBus::new();
        bus.kick("meeting:X", "Scout");
        assert!(bus.is_kicked("meeting:X", "Scout"));
        assert!(!bus.is_kicked("meeting:Y", "Scout"));
    }

    #[test]
    fn slow_consumer_is_dropped() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(1);
        bus.subscribe(
            "meeting:X",
            ObserverConn {
                id: "slow".into(),
                name: "slow".into(),
                participant_kind: "human".into(),
                agent_name: None,
                sink: tx,
            },
        )
        .unwrap();

        // First fills the buffer, second overflows and reaps.
        bus.broadcast("meeting:X", &thinking("Ana"));
        assert_eq!(bus.subscriber_count("meeting:X"), 1);
        bus.broadcast("meeting:X", &thinking("Ana"));
        assert_eq!(bus.subscriber_count("meeting:X"), 0);
    }
}

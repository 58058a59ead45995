//! End-to-end meeting flows against scripted providers and
//! tempdir-backed stores: lifecycle, mention priority, external turns,
//! dynamic joins, idle termination, and finalizer guarantees.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use quorum_domain::meeting::{MeetingState, MessageKind, Participant, SenderKind};
use quorum_gateway::events::{ObserverConn, ObserverMessage};
use quorum_gateway::runtime::testing::{services_with_provider, waiting_room, ScriptedProvider};
use quorum_gateway::runtime::{MeetingOrchestrator, Services};
use quorum_providers::LlmProvider;

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

fn launch(
    provider: Arc<dyn LlmProvider>,
    topic: &str,
    participants: Vec<Participant>,
    cooldown: f64,
    max_rounds: u32,
) -> (tempfile::TempDir, Services, Arc<MeetingOrchestrator>) {
    let (dir, services) = services_with_provider(provider);
    let room = waiting_room(&services, topic, participants, cooldown, max_rounds);
    let orchestrator = MeetingOrchestrator::from_room(&room, services.clone());
    (dir, services, orchestrator)
}

/// Subscribe a raw observer channel to the meeting's topic.
fn observe(
    services: &Services,
    code: &str,
) -> mpsc::Receiver<ObserverMessage> {
    let (tx, rx) = mpsc::channel(256);
    services
        .bus
        .subscribe(
            &quorum_protocol::meeting_topic(code),
            ObserverConn {
                id: uuid::Uuid::new_v4().to_string(),
                name: "test-observer".into(),
                participant_kind: "human".into(),
                agent_name: None,
                sink: tx,
            },
        )
        .expect("subscribe");
    rx
}

async fn wait_for_status(
    orchestrator: &Arc<MeetingOrchestrator>,
    status: MeetingState,
    secs: u64,
) {
    tokio::time::timeout(Duration::from_secs(secs), async {
        loop {
            if orchestrator.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "meeting never reached {status} (currently {})",
            orchestrator.status()
        )
    });
}

fn event_json(msg: ObserverMessage) -> serde_json::Value {
    match msg {
        ObserverMessage::Event(json) => serde_json::from_str(&json).expect("valid event json"),
        ObserverMessage::Kick => panic!("unexpected kick"),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────

/// Two internal agents that always pass: the meeting idles out within
/// two silent rounds, finalizes once, and leaves a complete session.
#[tokio::test(start_paused = true)]
async fn all_pass_meeting_idles_out_and_finalizes() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Roadmap",
        vec![Participant::internal("A"), Participant::internal("B")],
        0.1,
        3,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let snapshot = orchestrator.snapshot();
    assert!(snapshot.current_round <= 3);

    // Idle termination: 2 participants × multiplier 2 = 4 passes = 2 rounds.
    assert_eq!(snapshot.current_round, 2);

    let session = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap();
    assert_eq!(session.status, quorum_store::SessionStatus::Complete);
    let transcript = session.transcript.unwrap();
    assert!(transcript.contains("[System]: Meeting started. Topic: Roadmap"));
    assert!(transcript.contains("All agents have passed"));

    // Exactly one session.complete event; registry entry gone.
    let events = services.sessions.events_for(&orchestrator.session_id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "session.complete");
    assert!(services.registry.lookup(&orchestrator.code).is_none());

    // Room converged to Closed.
    let room = services.sessions.get_room(&orchestrator.code).unwrap();
    assert_eq!(room.status, MeetingState::Closed);
    assert!(room.transcript_log.unwrap().contains("Meeting started"));
}

/// Message sequence numbers are dense (1..N) in both the live log and
/// the persisted JSONL file.
#[tokio::test(start_paused = true)]
async fn sequence_numbers_are_dense() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![
            ("A", vec!["First thought.", "Second thought."]),
            ("B", vec!["A reply."]),
        ])),
        "Density",
        vec![Participant::internal("A"), Participant::internal("B")],
        0.0,
        4,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let messages = services.log.all(&orchestrator.room_id);
    let seqs: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
    let expected: Vec<u64> = (1..=messages.len() as u64).collect();
    assert_eq!(seqs, expected);

    // Resumable pagination agrees with the full log.
    let tail = services.log.read_after(&orchestrator.room_id, 2);
    assert_eq!(tail.len(), messages.len() - 2);
    assert_eq!(tail[0].sequence, 3);
}

/// Every live broadcast `meeting_message` also exists in the persisted
/// log with the same content and sequence.
#[tokio::test(start_paused = true)]
async fn broadcasts_match_persisted_log() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![(
            "A",
            vec!["Hello from A."],
        )])),
        "Broadcast",
        vec![Participant::internal("A")],
        0.0,
        1,
    );
    let mut rx = observe(&services, &orchestrator.code);

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let persisted = services.log.all(&orchestrator.room_id);
    let mut seen = 0;
    while let Ok(msg) = rx.try_recv() {
        let event = event_json(msg);
        if event["type"] == "meeting_message" {
            let seq = event["sequence"].as_u64().unwrap();
            let matching = persisted
                .iter()
                .find(|m| m.sequence == seq)
                .unwrap_or_else(|| panic!("broadcast sequence {seq} missing from log"));
            assert_eq!(event["content"], serde_json::json!(matching.content));
            seen += 1;
        }
    }
    assert!(seen > 0, "expected at least one meeting_message broadcast");
}

// ─────────────────────────────────────────────────────────────────────
// Mention priority
// ─────────────────────────────────────────────────────────────────────

/// A mention of @C in round one puts C at the front of round two.
#[tokio::test(start_paused = true)]
async fn mentions_prioritize_next_round() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![
            ("A", vec!["Let's ask @C about this."]),
            ("C", vec!["[PASS]", "My answer."]),
        ])),
        "Priorities",
        vec![
            Participant::internal("A"),
            Participant::internal("B"),
            Participant::internal("C"),
        ],
        0.0,
        2,
    );
    let mut rx = observe(&services, &orchestrator.code);

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    // Transcript order: A's mention, then C's answer; B never speaks.
    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    let a_pos = transcript.find("[A]: Let's ask @C").expect("A spoke");
    let c_pos = transcript.find("[C]: My answer.").expect("C spoke");
    assert!(a_pos < c_pos);
    assert!(!transcript.contains("[B]:"));

    // Round two's turn order starts with C (the mention), then the
    // original relative order.
    let mut thinking: Vec<String> = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        let event = event_json(msg);
        if event["type"] == "agent_thinking" {
            thinking.push(event["agent_name"].as_str().unwrap().to_owned());
        }
    }
    assert_eq!(thinking, vec!["A", "B", "C", "C", "A", "B"]);
}

// ─────────────────────────────────────────────────────────────────────
// External turns
// ─────────────────────────────────────────────────────────────────────

/// An external agent that never answers: its turn times out, a status
/// message records the skip, and the meeting closes normally.
#[tokio::test(start_paused = true)]
async fn external_timeout_skips_turn() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Quiet",
        vec![
            Participant::internal("Internal"),
            Participant::external("External"),
        ],
        0.0,
        1,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 40).await;

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("External timed out (30s). Skipping turn."));
    assert!(services.registry.lookup(&orchestrator.code).is_none());
}

/// An external agent that answers its turn request: the response lands
/// in the transcript under its name.
#[tokio::test(start_paused = true)]
async fn external_response_is_recorded() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Responsive",
        vec![
            Participant::internal("Internal"),
            Participant::external("External"),
        ],
        0.0,
        1,
    );
    let mut rx = observe(&services, &orchestrator.code);

    // Responder: answer the turn request as soon as it is broadcast.
    let responder = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let event = event_json(msg);
                if event["type"] == "turn_request" && event["agent_name"] == "External" {
                    orchestrator
                        .submit_external_response("External", "ok")
                        .expect("turn should be pending");
                    break;
                }
            }
        })
    };

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 10).await;
    responder.await.unwrap();

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("[External]: ok"));
    assert!(!transcript.contains("timed out"));
}

/// Responding when no turn is pending is rejected.
#[tokio::test(start_paused = true)]
async fn respond_without_pending_turn_is_rejected() {
    let (_dir, _services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Eager",
        vec![Participant::internal("A")],
        0.0,
        1,
    );
    let err = orchestrator
        .submit_external_response("Nobody", "too soon")
        .unwrap_err();
    assert!(err.to_string().contains("no pending turn"));
}

// ─────────────────────────────────────────────────────────────────────
// Dynamic join
// ─────────────────────────────────────────────────────────────────────

/// A participant added while the meeting runs gets a join announcement
/// and a turn in the next round.
#[tokio::test(start_paused = true)]
async fn dynamic_join_gets_scheduled() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![(
            "A",
            vec!["Opening remarks."],
        )])),
        "Open table",
        vec![Participant::internal("A")],
        // Nonzero cooldown: the loop parks after A's turn, which is when
        // the joiner gets to run.
        0.1,
        3,
    );
    let mut rx = observe(&services, &orchestrator.code);

    // Join as soon as A's first message lands (the meeting is Active).
    let joiner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut saw_turn_request_for_b = false;
            let mut joined = false;
            while let Some(msg) = rx.recv().await {
                let event = event_json(msg);
                if !joined
                    && event["type"] == "meeting_message"
                    && event["sender_name"] == "A"
                {
                    orchestrator
                        .add_participant(Participant::external("B"))
                        .expect("join while active");
                    joined = true;
                }
                if event["type"] == "turn_request" && event["agent_name"] == "B" {
                    saw_turn_request_for_b = true;
                    // Answer so the meeting does not sit out the timeout.
                    let _ = orchestrator.submit_external_response("B", "[PASS]");
                }
                if event["type"] == "meeting_ended" {
                    break;
                }
            }
            saw_turn_request_for_b
        })
    };

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 40).await;

    let saw_turn_request_for_b = joiner.await.unwrap();
    assert!(saw_turn_request_for_b, "B never got a turn request");

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("[System]: B has joined the meeting."));
}

// ─────────────────────────────────────────────────────────────────────
// Artifacts, provider failures, human messages
// ─────────────────────────────────────────────────────────────────────

/// `[ARTIFACT]`-prefixed responses become markdown artifacts with the
/// tag stripped; ordinary responses stay plain text.
#[tokio::test(start_paused = true)]
async fn artifact_tag_produces_markdown_entry() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![
            ("A", vec!["[ARTIFACT]# Plan\n- ship it"]),
            ("B", vec!["Plain reply."]),
        ])),
        "Artifacts",
        vec![Participant::internal("A"), Participant::internal("B")],
        0.0,
        1,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let messages = services.log.all(&orchestrator.room_id);
    let artifact = messages
        .iter()
        .find(|m| m.kind == MessageKind::Artifact)
        .expect("artifact entry");
    assert_eq!(artifact.sender_name, "A");
    assert_eq!(artifact.content_type, "text/markdown");
    assert_eq!(artifact.content, "# Plan\n- ship it");
    assert!(!artifact.content.contains("[ARTIFACT]"));

    let plain = messages
        .iter()
        .find(|m| m.sender_name == "B" && m.kind == MessageKind::Message)
        .expect("plain entry");
    assert_eq!(plain.content_type, "text/plain");

    // Transcript renders the artifact with its own attribution line.
    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("[A — artifact]:\n# Plan"));
}

/// A provider failure costs one turn: the error is logged as a System
/// message and the meeting keeps going to a normal close.
#[tokio::test(start_paused = true)]
async fn provider_failure_becomes_pass() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::failing("rate limited")),
        "Fragile",
        vec![Participant::internal("A")],
        0.0,
        2,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("[System]: Error getting response from A:"));
    assert!(transcript.contains("rate limited"));
    assert!(transcript.contains("Meeting ended after"));
}

/// Queued human messages drain before the next agent turn and land as
/// Human entries in the log.
#[tokio::test(start_paused = true)]
async fn human_messages_drain_before_turns() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::with_script(vec![(
            "A",
            vec!["Replying to the host."],
        )])),
        "Interjections",
        vec![Participant::internal("A")],
        0.0,
        2,
    );

    orchestrator.add_human_message("Please cover budget too.", "Host");
    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    let messages = services.log.all(&orchestrator.room_id);
    let human_seq = messages
        .iter()
        .find(|m| m.sender_kind == SenderKind::Human)
        .expect("human entry")
        .sequence;
    let reply_seq = messages
        .iter()
        .find(|m| m.sender_name == "A")
        .expect("agent reply")
        .sequence;
    assert!(human_seq < reply_seq, "human message should precede the turn");

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    assert!(transcript.contains("[Host]: Please cover budget too."));
}

// ─────────────────────────────────────────────────────────────────────
// Stop & finalizer guarantees
// ─────────────────────────────────────────────────────────────────────

/// Stop during an external wait cancels the pending turn, drains the
/// loop, and still finalizes exactly once.
#[tokio::test(start_paused = true)]
async fn stop_cancels_external_wait_and_finalizes() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Interrupted",
        vec![Participant::external("External")],
        0.0,
        10,
    );
    let mut rx = observe(&services, &orchestrator.code);

    orchestrator.start().unwrap();

    // Wait for the external turn to open, then stop the meeting.
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = rx.recv().await {
            if event_json(msg)["type"] == "turn_request" {
                return;
            }
        }
    })
    .await
    .expect("turn_request before deadline");

    orchestrator.stop().await;

    assert_eq!(orchestrator.status(), MeetingState::Closed);
    assert!(services.registry.lookup(&orchestrator.code).is_none());
    assert_eq!(
        services.sessions.events_for(&orchestrator.session_id).len(),
        1
    );
}

/// Finalize is idempotent: a second call does not emit a second
/// session.complete event or duplicate status messages.
#[tokio::test(start_paused = true)]
async fn finalize_runs_exactly_once() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Once",
        vec![Participant::internal("A")],
        0.0,
        1,
    );

    orchestrator.start().unwrap();
    wait_for_status(&orchestrator, MeetingState::Closed, 5).await;

    orchestrator.finalize().await;
    orchestrator.finalize().await;

    let events = services.sessions.events_for(&orchestrator.session_id);
    assert_eq!(events.len(), 1);

    let transcript = services
        .sessions
        .get_session(&orchestrator.session_id)
        .unwrap()
        .transcript
        .unwrap();
    let ended_count = transcript.matches("Meeting ended after").count();
    assert_eq!(ended_count, 1);
}

// ─────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn registry_rejects_duplicate_codes() {
    let (_dir, services, orchestrator) = launch(
        Arc::new(ScriptedProvider::always_pass()),
        "Unique",
        vec![Participant::internal("A")],
        0.0,
        1,
    );

    services
        .registry
        .register(&orchestrator.code, orchestrator.clone())
        .unwrap();
    let err = services
        .registry
        .register(&orchestrator.code, orchestrator.clone())
        .unwrap_err();
    assert!(err.to_string().contains("already running"));

    // Unregister is idempotent.
    services.registry.unregister(&orchestrator.code);
    services.registry.unregister(&orchestrator.code);
    assert!(services.registry.is_empty());
}

// ─────────────────────────────────────────────────────────────────────
// Scopes
// ─────────────────────────────────────────────────────────────────────

/// A read-only credential is denied wall writes but allowed reads.
#[tokio::test]
async fn scoped_credential_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let credentials =
        quorum_store::CredentialStore::new(dir.path(), "quorum_sk").unwrap();
    let (cred, token) = credentials.mint(
        "ReadOnly",
        Some(vec!["sessions:read".into()]),
    );

    assert!(cred.allows("sessions:read"));
    assert!(!cred.allows("wall:write"));

    use quorum_gateway::api::auth::require_scope;
    assert!(require_scope(&cred, "sessions:read").is_ok());
    assert!(require_scope(&cred, "wall:write").is_err());

    // The token still authenticates (401 vs 403 are distinct layers).
    assert!(credentials.verify(&token).is_some());
}

//! Prompt assembly for agent turns: system prompt, conversation window,
//! mention parsing, and turn-order prioritization.

use std::sync::OnceLock;

use regex::Regex;

use quorum_domain::config::MeetingsConfig;
use quorum_domain::meeting::{MeetingMessage, Participant};
use quorum_store::SocketPersona;

/// The literal an agent returns to skip its turn.
pub const PASS_TOKEN: &str = "[PASS]";
/// The literal prefix that marks a response as rendered markdown.
pub const ARTIFACT_TAG: &str = "[ARTIFACT]";

const NOTE_SNIPPET_CHARS: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything an internal agent's system prompt is assembled from.
pub struct PromptInputs<'a> {
    pub participant: &'a Participant,
    pub topic: &'a str,
    pub task_description: &'a str,
    pub socket: Option<&'a SocketPersona>,
    pub memory_context: &'a str,
    pub recent_notes: &'a [(String, String)],
    pub directives: &'a [String],
}

/// Build the system prompt for an internal agent's turn.
pub fn build_system_prompt(inputs: &PromptInputs<'_>, cfg: &MeetingsConfig) -> String {
    let mut parts: Vec<String> = Vec::new();

    // Base identity.
    parts.push(format!(
        "You are {}, participating in a structured discussion.",
        inputs.participant.name
    ));
    parts.push(format!("Topic: {}", inputs.topic));
    if !inputs.task_description.is_empty() {
        parts.push(format!("Task: {}", inputs.task_description));
    }

    // Socket persona.
    if let Some(socket) = inputs.socket {
        parts.push(format!("\nYour persona (from socket '{}'):", socket.name));
        parts.push(socket.system_prompt.clone());
    }

    // Custom persona prompt.
    if let Some(persona) = &inputs.participant.persona_prompt {
        parts.push(format!("\nAdditional instructions: {persona}"));
    }

    // Series memory context.
    if !inputs.memory_context.is_empty() {
        parts.push("\n--- SERIES MEMORY (prior meeting context) ---".into());
        parts.push(truncate_chars(inputs.memory_context, cfg.memory_snippet_chars));
    }

    // Recent human notes from prior sessions.
    if !inputs.recent_notes.is_empty() {
        parts.push("\n--- RECENT HUMAN NOTES ---".into());
        for (title, notes) in inputs.recent_notes.iter().take(cfg.recent_notes_limit) {
            parts.push(format!(
                "From '{title}': {}",
                truncate_chars(notes, NOTE_SNIPPET_CHARS)
            ));
        }
    }

    // Active directives.
    if !inputs.directives.is_empty() {
        parts.push("\n--- ACTIVE DIRECTIVES FROM HOST ---".into());
        for (i, d) in inputs.directives.iter().enumerate() {
            parts.push(format!("{}. {d}", i + 1));
        }
    }

    // Turn-taking rules.
    parts.push("\n--- INSTRUCTIONS ---".into());
    parts.push("Respond naturally as your character. Keep responses concise (2-4 sentences).".into());
    parts.push(format!(
        "If you have nothing meaningful to add, respond with exactly: {PASS_TOKEN}"
    ));
    parts.push("Do not repeat what others have said. Build on the conversation.".into());
    parts.push(format!(
        "To share structured content (summaries, code, research), prefix with {ARTIFACT_TAG} — it will render as markdown."
    ));

    parts.join("\n")
}

/// Format the trailing conversation window the way agents see it:
/// `[Name]: content` with `[System]:` and `[Directive from X]:` variants.
pub fn build_conversation(messages: &[MeetingMessage], max_messages: usize) -> String {
    let start = messages.len().saturating_sub(max_messages);
    messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.speaker_prefix(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mentions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([\w-]+)").expect("mention regex"))
}

/// Find `@Name` tokens matching known participants, preserving in-text
/// order. Duplicates are kept here; ordering dedupes.
pub fn parse_mentions(text: &str, participants: &[Participant]) -> Vec<String> {
    mention_regex()
        .captures_iter(text)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str();
            participants
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.name.clone())
        })
        .collect()
}

/// Mentions across the last five log entries, oldest first.
pub fn recent_mentions(messages: &[MeetingMessage], participants: &[Participant]) -> Vec<String> {
    let start = messages.len().saturating_sub(5);
    messages[start..]
        .iter()
        .flat_map(|m| parse_mentions(&m.content, participants))
        .collect()
}

/// Reorder this round's participants: mentioned names first (first
/// mention wins), everyone else in their original relative order.
pub fn prioritize(participants: &[Participant], mentioned: &[String]) -> Vec<Participant> {
    if mentioned.is_empty() {
        return participants.to_vec();
    }

    let mut seen: Vec<&str> = Vec::new();
    let mut prioritized: Vec<Participant> = Vec::new();
    for name in mentioned {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        if let Some(p) = participants.iter().find(|p| &p.name == name) {
            prioritized.push(p.clone());
        }
    }
    let rest = participants
        .iter()
        .filter(|p| !seen.contains(&p.name.as_str()))
        .cloned();
    prioritized.extend(rest);
    prioritized
}

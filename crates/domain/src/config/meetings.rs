use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Meetings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs for the meeting orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingsConfig {
    /// Seconds to sleep after a spoken (non-pass) turn.
    #[serde(default = "d_cooldown")]
    pub cooldown_seconds_default: f64,
    #[serde(default = "d_20")]
    pub max_rounds_default: u32,
    /// How long an external agent gets to answer a turn request.
    #[serde(default = "d_30")]
    pub external_turn_timeout_secs: u64,
    /// How long `stop` waits for the loop to drain before aborting it.
    #[serde(default = "d_10")]
    pub stop_grace_secs: u64,
    /// How many trailing log entries go into each agent prompt.
    #[serde(default = "d_30usize")]
    pub max_context_messages: usize,
    /// Cap on the series-memory snippet injected into prompts.
    #[serde(default = "d_3000")]
    pub memory_snippet_chars: usize,
    /// How many prior-session note blocks are injected into prompts.
    #[serde(default = "d_3usize")]
    pub recent_notes_limit: usize,
    /// Idle exit after `idle_pass_multiplier × participant_count`
    /// consecutive passes (two full silent rounds by default).
    #[serde(default = "d_2u32")]
    pub idle_pass_multiplier: u32,
    /// Run the interpretation pass automatically when a meeting ends.
    #[serde(default = "d_true")]
    pub auto_interpret: bool,
    /// Post a meeting summary to the wall when a meeting ends.
    #[serde(default)]
    pub auto_post_summaries: bool,
}

impl Default for MeetingsConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds_default: 3.0,
            max_rounds_default: 20,
            external_turn_timeout_secs: 30,
            stop_grace_secs: 10,
            max_context_messages: 30,
            memory_snippet_chars: 3000,
            recent_notes_limit: 3,
            idle_pass_multiplier: 2,
            auto_interpret: true,
            auto_post_summaries: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_cooldown() -> f64 {
    3.0
}
fn d_20() -> u32 {
    20
}
fn d_30() -> u64 {
    30
}
fn d_10() -> u64 {
    10
}
fn d_30usize() -> usize {
    30
}
fn d_3000() -> usize {
    3000
}
fn d_3usize() -> usize {
    3
}
fn d_2u32() -> u32 {
    2
}
fn d_true() -> bool {
    true
}

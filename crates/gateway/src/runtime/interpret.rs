//! The interpretation collaborator, trimmed to what the finalizer needs:
//! render the finished transcript through the default lens and store the
//! result as the session's primary interpretation.

use chrono::Utc;

use quorum_domain::error::Result;
use quorum_providers::ChatRequest;
use quorum_store::Interpretation;

use super::orchestrator::Services;

const DEFAULT_LENS_PROMPT: &str = "\
You are a meeting analyst. Given the transcript of a structured multi-agent \
discussion, produce concise markdown minutes with these sections:

## Summary
2-4 sentences on what the discussion covered and concluded.

## Decisions
Bullet list of concrete decisions. Write 'None' if there were none.

## Action Items
Bullet list with owners when identifiable.

## Open Questions
Unresolved points worth revisiting.";

/// Run the default lens over a transcript and store the interpretation.
pub async fn auto_interpret(
    services: &Services,
    session_id: &str,
    transcript: &str,
) -> Result<Interpretation> {
    let response = services
        .llm
        .chat(ChatRequest {
            system_prompt: DEFAULT_LENS_PROMPT.into(),
            user_content: format!("TRANSCRIPT:\n{transcript}"),
            temperature: Some(0.3),
            max_tokens: Some(4096),
            model: None,
        })
        .await?;

    let interpretation = Interpretation {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_owned(),
        source_name: "auto".into(),
        model: response.model,
        output_markdown: response.content,
        is_primary: true,
        created_at: Utc::now(),
    };
    services.sessions.add_interpretation(interpretation.clone());
    tracing::info!(session_id = %session_id, "auto-interpretation stored");
    Ok(interpretation)
}

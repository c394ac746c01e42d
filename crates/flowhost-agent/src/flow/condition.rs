use tracing::debug;

use flowhost_core::error::{FlowhostError, Result};
use flowhost_llm::ModelHandle;

const VERDICT_INSTRUCTION: &str = "Return only one of these options without explanation: true, false";

/// Parse a model's verdict. Fail-closed: anything that is not clearly
/// `true` or `false` is an error, never a silent `false`.
pub fn parse_verdict(raw: &str) -> Result<bool> {
    let lowered = raw.trim().to_lowercase();
    let token = lowered
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches(['"', '\'', '`'])
        .trim_end_matches(|c: char| c.is_ascii_punctuation());

    match token {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(FlowhostError::AmbiguousCondition {
            response: raw.to_string(),
        }),
    }
}

/// Ask the model to judge an already rendered condition.
pub async fn evaluate(model: &ModelHandle, persona: &str, condition: &str) -> Result<bool> {
    let prompt = format!("Evaluate the following condition: '{condition}'\n\n{VERDICT_INSTRUCTION}");
    let raw = model.complete(persona, &prompt).await?;
    let verdict = parse_verdict(&raw)?;
    debug!(verdict, raw = %raw.trim(), "Condition evaluated");
    Ok(verdict)
}

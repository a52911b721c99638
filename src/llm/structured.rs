//! Structured completions
//!
//! Models are asked to answer with JSON matching the `schemars` schema of the
//! target type. Replies are often wrapped in prose or a fenced code block, so
//! the JSON object is extracted before deserializing. A reply that still does
//! not parse gets one corrective retry.

use crate::llm::client::LLMClient;
use crate::types::{AppError, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Generate a completion and deserialize it into `T`.
pub async fn generate_structured<T>(client: &dyn LLMClient, system: &str, prompt: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(T))?;
    let system = format!(
        "{}\n\nRespond with a single JSON object that conforms to the following JSON schema. \
         Do not include any commentary.\n<schema>\n{}\n</schema>",
        system, schema
    );

    let raw = client.generate_with_system(&system, prompt).await?;
    let first_error = match parse_structured::<T>(&raw) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    warn!(model = client.model_name(), error = %first_error, "Structured output did not parse, retrying");
    let retry_prompt = format!(
        "{}\n\nYour previous reply could not be parsed ({}). Reply again with only the JSON object.",
        prompt, first_error
    );
    let raw = client.generate_with_system(&system, &retry_prompt).await?;
    parse_structured::<T>(&raw).map_err(|e| {
        AppError::LLM(format!(
            "Structured output from '{}' did not match the expected schema: {}",
            client.model_name(),
            e
        ))
    })
}

/// Deserialize the JSON object embedded in `text`.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let json = extract_json(text).ok_or_else(|| "no JSON object found in reply".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

/// Find the JSON object in a model reply: the first fenced code block that
/// holds one, otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let Some(end) = body.find("```") else {
            break;
        };
        let candidate = body[..end].trim();
        if candidate.starts_with('{') {
            return Some(candidate);
        }
        rest = &body[end + 3..];
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

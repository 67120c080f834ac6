use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use super::base::{Completion, CompletionDelta, CompletionRequest};
use crate::image_utils::split_data_url;
use crate::models::chat::ReasoningEffort;

/// Prefix identifying gemini models in provider qualified model ids
pub const GEMINI_MODEL_PREFIX: &str = "gemini/";

/// Strip the provider prefix from a model id, `gemini/gemini-2.5-flash` -> `gemini-2.5-flash`
pub fn model_name(model: &str) -> &str {
    model.strip_prefix(GEMINI_MODEL_PREFIX).unwrap_or(model)
}

/// Token budget granted to the model's thinking for each reasoning effort
pub fn thinking_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 2048,
        ReasoningEffort::High => 4096,
    }
}

/// Convert openai style messages to gemini `contents` plus an optional `systemInstruction`
///
/// Gemini has no system role, so system messages are merged into the instruction.
/// Assistant turns use gemini's `model` role, everything else is sent as `user`.
pub fn messages_to_gemini_spec(messages: &[Value]) -> Result<(Option<Value>, Vec<Value>)> {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Message is missing a role: {}", message))?;
        let parts = content_to_parts(message.get("content").unwrap_or(&Value::Null))?;

        match role {
            "system" => system_parts.extend(parts),
            "assistant" => contents.push(json!({"role": "model", "parts": parts})),
            _ => contents.push(json!({"role": "user", "parts": parts})),
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(json!({"parts": system_parts}))
    };

    Ok((system_instruction, contents))
}

fn content_to_parts(content: &Value) -> Result<Vec<Value>> {
    match content {
        Value::String(text) => Ok(vec![json!({"text": text})]),
        Value::Array(parts) => parts.iter().map(convert_part).collect(),
        other => Err(anyhow!("Unsupported message content: {}", other)),
    }
}

fn convert_part(part: &Value) -> Result<Value> {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => Ok(json!({"text": part.get("text").cloned().unwrap_or(json!(""))})),
        Some("image_url") => {
            let url = part
                .pointer("/image_url/url")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("Image part is missing a url"))?;
            Ok(convert_image_url(url))
        }
        _ => Err(anyhow!("Unsupported content part: {}", part)),
    }
}

/// Inline data urls are sent as `inlineData`, anything else is referenced as `fileData`
pub fn convert_image_url(url: &str) -> Value {
    match split_data_url(url) {
        Some((mime_type, data)) => json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": data,
            }
        }),
        None => json!({
            "fileData": {
                "fileUri": url,
            }
        }),
    }
}

/// Build the body of a `generateContent` / `streamGenerateContent` call
pub fn build_gemini_payload(request: &CompletionRequest) -> Result<Value> {
    let (system_instruction, contents) = messages_to_gemini_spec(&request.messages)?;

    let mut payload = Map::new();
    payload.insert("contents".to_string(), json!(contents));
    if let Some(instruction) = system_instruction {
        payload.insert("systemInstruction".to_string(), instruction);
    }
    if !request.tools.is_empty() {
        payload.insert("tools".to_string(), json!(request.tools));
    }

    let mut generation_config = Map::new();
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        generation_config.insert("topP".to_string(), json!(top_p));
    }
    if let Some(effort) = request.reasoning_effort {
        generation_config.insert(
            "thinkingConfig".to_string(),
            json!({
                "includeThoughts": true,
                "thinkingBudget": thinking_budget(effort),
            }),
        );
    }
    if !generation_config.is_empty() {
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }

    Ok(Value::Object(payload))
}

/// Split the first candidate's text into answer and thought text
fn collect_text(response: &Value) -> Result<(Option<String>, Option<String>)> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(anyhow!("Gemini API error: {}", message));
    }

    if let Some(reason) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(anyhow!("Prompt blocked by provider: {}", reason));
    }

    let mut content = String::new();
    let mut reasoning = String::new();

    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    for part in parts.into_iter().flatten() {
        let Some(text) = part.get("text").and_then(Value::as_str) else {
            continue;
        };
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            reasoning.push_str(text);
        } else {
            content.push_str(text);
        }
    }

    let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
    Ok((non_empty(content), non_empty(reasoning)))
}

/// Convert a `generateContent` response into a completion
pub fn gemini_response_to_completion(response: &Value) -> Result<Completion> {
    let (content, reasoning_content) = collect_text(response)?;

    let has_candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .is_some_and(|candidates| !candidates.is_empty());
    if !has_candidates {
        return Err(anyhow!("No candidates in Gemini response: {}", response));
    }

    Ok(Completion {
        content,
        reasoning_content,
    })
}

/// Convert one streamed chunk into a delta, chunks without candidates become empty deltas
pub fn gemini_chunk_to_delta(chunk: &Value) -> Result<CompletionDelta> {
    let (content, reasoning_content) = collect_text(chunk)?;
    Ok(CompletionDelta {
        content,
        reasoning_content,
    })
}

/// Parse a single line of a server-sent event stream
///
/// Only `data:` lines carry chunks, everything else (blank lines, comments, event names)
/// is ignored.
pub fn parse_sse_line(line: &str) -> Option<Result<CompletionDelta>> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    Some(
        serde_json::from_str::<Value>(data)
            .map_err(|e| anyhow!("Malformed stream chunk: {}", e))
            .and_then(|chunk| gemini_chunk_to_delta(&chunk)),
    )
}

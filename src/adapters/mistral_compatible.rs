//! Mistral-compatible chat-completions wire format, shared by the Mistral
//! and DeepSeek adapters. DeepSeek's only difference is a prepended system
//! message and a different default retry count.

use std::time::Duration;

use serde_json::json;

use super::{map_transport_error, AdapterError, NormalizedResponse};
use crate::config::Provider;

const DEEPSEEK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub(super) async fn call_once(
    client: &reqwest::Client,
    provider: &Provider,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    is_deepseek: bool,
) -> Result<NormalizedResponse, AdapterError> {
    let mut messages = Vec::with_capacity(2);
    if is_deepseek {
        messages.push(json!({"role": "system", "content": DEEPSEEK_SYSTEM_PROMPT}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let body = json!({
        "model": provider.model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "stream": false,
    });

    let response = client
        .post(&provider.endpoint)
        .bearer_auth(&provider.api_key)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(map_transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let value: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AdapterError::Parse(e.to_string()))?;

    let text = value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AdapterError::Parse("missing choices[0].message.content".to_string()))?
        .to_string();

    if text.is_empty() {
        return Err(AdapterError::Parse("empty text in response".to_string()));
    }

    let prompt_tokens = value
        .pointer("/usage/prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion_tokens = value
        .pointer("/usage/completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    // DeepSeek always derives total_tokens from the parts; only the plain
    // Mistral wire format honors an upstream-provided usage.total_tokens.
    let total_tokens = if is_deepseek {
        prompt_tokens + completion_tokens
    } else {
        value
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(prompt_tokens + completion_tokens)
    };

    Ok(NormalizedResponse {
        text,
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

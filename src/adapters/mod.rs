//! Provider adapters: one module per upstream wire protocol, selected by
//! `provider.kind` — a sum-type dispatch rather than runtime string
//! matching. Each adapter owns its own bounded retry/backoff loop; callers
//! only ever see the normalized result or the final error after retries
//! are exhausted.

mod google_gemini;
mod mistral_compatible;

use std::time::Duration;

use crate::config::{Provider, ProviderType};

/// Normalized shape every adapter returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upstream request timed out")]
    Timeout,

    #[error("malformed upstream response: {0}")]
    Parse(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

fn map_transport_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout
    } else {
        AdapterError::Transport(e)
    }
}

/// Invoke `provider`'s adapter. Applies the per-adapter default
/// `max_retries` when the provider config doesn't override it, then retries
/// the single upstream call with a fixed 1-second delay between attempts —
/// no exponential backoff.
pub async fn call(
    client: &reqwest::Client,
    provider: &Provider,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> Result<NormalizedResponse, AdapterError> {
    let timeout = Duration::from_secs(provider.timeout_secs());

    match provider.kind {
        ProviderType::Mistral => {
            let max_retries = provider.max_retries.unwrap_or(1);
            with_retries(provider, max_retries, || {
                mistral_compatible::call_once(client, provider, prompt, max_tokens, temperature, timeout, false)
            })
            .await
        }
        ProviderType::Deepseek => {
            let max_retries = provider.max_retries.unwrap_or(2);
            with_retries(provider, max_retries, || {
                mistral_compatible::call_once(client, provider, prompt, max_tokens, temperature, timeout, true)
            })
            .await
        }
        ProviderType::GoogleGemini => {
            let max_retries = provider.max_retries.unwrap_or(2);
            with_retries(provider, max_retries, || {
                google_gemini::call_once(client, provider, prompt, max_tokens, temperature, timeout)
            })
            .await
        }
    }
}

const RETRY_DELAY: Duration = Duration::from_secs(1);

async fn with_retries<F, Fut>(
    provider: &Provider,
    max_retries: u32,
    mut attempt: F,
) -> Result<NormalizedResponse, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<NormalizedResponse, AdapterError>>,
{
    let mut last_err = None;
    for attempt_no in 0..=max_retries {
        match attempt().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                tracing::warn!(
                    provider = %provider.name,
                    attempt = attempt_no + 1,
                    total = max_retries + 1,
                    error = %e,
                    "adapter attempt failed"
                );
                last_err = Some(e);
                if attempt_no < max_retries {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

//! Google Gemini adapter, built directly against the `generateContent`
//! HTTP endpoint rather than through a client SDK.

use std::time::Duration;

use serde_json::json;

use super::{map_transport_error, AdapterError, NormalizedResponse};
use crate::config::Provider;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub(super) async fn call_once(
    client: &reqwest::Client,
    provider: &Provider,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> Result<NormalizedResponse, AdapterError> {
    call_once_at(BASE_URL, client, provider, prompt, max_tokens, temperature, timeout).await
}

/// `call_once` against an explicit base URL, so tests can point at a
/// `wiremock` server instead of the real Google endpoint.
async fn call_once_at(
    base_url: &str,
    client: &reqwest::Client,
    provider: &Provider,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> Result<NormalizedResponse, AdapterError> {
    let url = format!("{}/{}:generateContent", base_url, provider.model);

    let body = json!({
        "contents": [{"parts": [{"text": prompt}]}],
        "generationConfig": {
            "maxOutputTokens": max_tokens,
            "temperature": temperature,
        },
    });

    let response = client
        .post(&url)
        .query(&[("key", provider.api_key.as_str())])
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

    let candidates = value
        .get("candidates")
        .and_then(|c| c.as_array())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AdapterError::Parse("empty candidates in response".to_string()))?;

    let text = candidates[0]
        .pointer("/content/parts/0/text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if text.is_empty() {
        return Err(AdapterError::Parse("no text output in response".to_string()));
    }

    let prompt_tokens = value
        .pointer("/usageMetadata/promptTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion_tokens = value
        .pointer("/usageMetadata/candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(NormalizedResponse {
        text,
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> Provider {
        Provider {
            name: "gemini".into(),
            kind: ProviderType::GoogleGemini,
            endpoint: String::new(),
            model: "gemini-1.5-flash".into(),
            api_key: "key123".into(),
            cost_per_1k_tokens: 0.001,
            prompt_cost_per_1k_tokens: None,
            completion_cost_per_1k_tokens: None,
            timeout: Some(5),
            max_retries: Some(0),
        }
    }

    #[tokio::test]
    async fn parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "hi there"}]}}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let provider = provider();
        let resp = call_once_at(&server.uri(), &client, &provider, "hi", 10, 0.7, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.text, "hi there");
        assert_eq!(resp.prompt_tokens, 4);
        assert_eq!(resp.completion_tokens, 2);
        assert_eq!(resp.total_tokens, 6);
    }

    #[tokio::test]
    async fn empty_candidates_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let provider = provider();
        let err = call_once_at(&server.uri(), &client, &provider, "hi", 10, 0.7, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_text_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gemini-1.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{}]}}]
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let provider = provider();
        let err = call_once_at(&server.uri(), &client, &provider, "hi", 10, 0.7, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }
}

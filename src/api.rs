//! Entry facade: validates inbound request shape, invokes the router, and
//! surfaces ledger statistics through the two HTTP endpoints this gateway
//! exposes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ledger::UsageLedger;
use crate::router::Router;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub ledger: Arc<UsageLedger>,
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub provider_used: String,
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub async fn generate(State(state): State<AppState>, Json(request): Json<GenerateRequest>) -> Response {
    match state
        .router
        .generate(&request.prompt, request.max_tokens, request.temperature)
        .await
    {
        Ok(result) => {
            let body = GenerateResponse {
                provider_used: result.provider_used,
                cost: result.cost,
                prompt_tokens: result.prompt_tokens,
                completion_tokens: result.completion_tokens,
                total_tokens: result.total_tokens,
                response: result.response,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "generate request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { detail: e.to_string() }),
            )
                .into_response()
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.ledger.stats())).into_response()
}

pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Provider, ProviderType};
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn app_with_single_provider(endpoint: String) -> axum::Router {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new(dir.path().join("usage.log")));
        let provider = Provider {
            name: "p".into(),
            kind: ProviderType::Mistral,
            endpoint,
            model: "m".into(),
            api_key: "k".into(),
            cost_per_1k_tokens: 0.001,
            prompt_cost_per_1k_tokens: None,
            completion_cost_per_1k_tokens: None,
            timeout: Some(5),
            max_retries: Some(0),
        };
        let router = Arc::new(Router::new(vec![provider], ledger.clone(), reqwest::Client::new()));
        let state = AppState { router, ledger };
        // Leak the tempdir so the log file outlives the returned router in tests.
        std::mem::forget(dir);

        axum::Router::new()
            .route("/generate", post(generate))
            .route("/stats", get(stats))
            .route("/health", get(health))
            .with_state(state)
    }

    #[tokio::test]
    async fn generate_returns_200_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hi!"}}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let app = app_with_single_provider(format!("{}/chat", server.uri())).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/generate")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"prompt": "hi"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["provider_used"], "p");
        assert_eq!(value["response"], "hi!");
    }

    #[tokio::test]
    async fn generate_returns_500_when_all_providers_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let app = app_with_single_provider(format!("{}/chat", server.uri())).await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/generate")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"prompt": "hi"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["detail"].as_str().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn stats_reports_zeroed_overall_before_any_requests() {
        let app = app_with_single_provider("http://unused".into()).await;
        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["overall"]["total_requests"], 0);
    }
}

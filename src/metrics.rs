//! Prometheus metrics: per-provider request/failure/cost/token counters
//! and a circuit-breaker state gauge, exposed on `/metrics`.

use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

lazy_static! {
    static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "router_provider_requests_total",
        "Total generate attempts per provider",
        &["provider"]
    )
    .unwrap();
    static ref FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "router_provider_failures_total",
        "Total failed attempts per provider",
        &["provider"]
    )
    .unwrap();
    static ref COST_TOTAL: CounterVec = register_counter_vec!(
        "router_provider_cost_total",
        "Total accrued cost per provider",
        &["provider"]
    )
    .unwrap();
    static ref TOKENS_TOTAL: CounterVec = register_counter_vec!(
        "router_provider_tokens_total",
        "Total tokens consumed per provider",
        &["provider"]
    )
    .unwrap();
    static ref BREAKER_STATE: GaugeVec = register_gauge_vec!(
        "router_breaker_state",
        "Circuit breaker state per provider (0=closed, 1=half_open, 2=open)",
        &["provider"]
    )
    .unwrap();
}

/// Called once per ledger `record`. Cost/token counters only advance for
/// successful attempts, mirroring the ledger's own accumulator rules.
pub fn record_attempt(provider: &str, success: bool, cost: f64, total_tokens: u64) {
    REQUESTS_TOTAL.with_label_values(&[provider]).inc();
    if success {
        if cost > 0.0 {
            COST_TOTAL.with_label_values(&[provider]).inc_by(cost);
        }
        if total_tokens > 0 {
            TOKENS_TOTAL
                .with_label_values(&[provider])
                .inc_by(total_tokens as f64);
        }
    } else {
        FAILURES_TOTAL.with_label_values(&[provider]).inc();
    }
}

pub fn set_breaker_state(provider: &str, value: f64) {
    BREAKER_STATE.with_label_values(&[provider]).set(value);
}

pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = prometheus::gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
    }
    ([("content-type", "text/plain; version=0.0.4")], buffer)
}

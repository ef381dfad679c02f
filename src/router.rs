//! Routing engine: dynamic provider ranking, the ordered failover loop,
//! and cost accounting. Ranks providers by a live price/reliability/
//! latency score backed by a per-provider circuit breaker, rather than a
//! static price-only ordering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters;
use crate::breaker::CircuitBreaker;
use crate::config::Provider;
use crate::ledger::UsageLedger;
use crate::util::round_to;

/// Recency window: a provider that failed within the last 5 minutes is
/// penalized in the dynamic score even if its breaker has since reset.
const RECENCY_WINDOW: Duration = Duration::from_secs(300);
/// Providers averaging worse than this are penalized as "slow".
const SLOW_LATENCY_THRESHOLD_SECS: f64 = 5.0;

const RECENCY_PENALTY: f64 = 1.5;
const LATENCY_PENALTY: f64 = 1.2;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no providers available")]
    NoProvidersAvailable,
    #[error("all providers failed. Errors: {0}")]
    AllProvidersFailed(String),
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub provider_used: String,
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub response: String,
}

/// Owns the per-provider circuit breakers and a shared reference to the
/// usage ledger. Provider descriptors are immutable after construction, so
/// the breaker map needs no outer lock — only each breaker's own interior
/// mutability.
pub struct Router {
    providers: Vec<Provider>,
    breakers: HashMap<String, CircuitBreaker>,
    ledger: Arc<UsageLedger>,
    http_client: reqwest::Client,
}

impl Router {
    pub fn new(providers: Vec<Provider>, ledger: Arc<UsageLedger>, http_client: reqwest::Client) -> Self {
        let breakers = providers
            .iter()
            .map(|p| (p.name.clone(), CircuitBreaker::new(p.name.clone())))
            .collect();
        Self {
            providers,
            breakers,
            ledger,
            http_client,
        }
    }

    /// `cost = round((pt/1000)*prompt_rate + (ct/1000)*completion_rate, 6)`,
    /// with per-direction rates defaulting to `cost_per_1k_tokens`.
    fn compute_cost(provider: &Provider, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let prompt_cost = (prompt_tokens as f64 / 1000.0) * provider.prompt_rate();
        let completion_cost = (completion_tokens as f64 / 1000.0) * provider.completion_rate();
        round_to(prompt_cost + completion_cost, 6)
    }

    /// Lower is preferred. A provider with no recorded history scores
    /// exactly its static `cost_per_1k_tokens`.
    fn dynamic_score(&self, provider: &Provider) -> f64 {
        let base = provider.cost_per_1k_tokens;

        let fail_ratio = match self.ledger.provider_stats(&provider.name) {
            Some(stats) if stats.total_requests > 0 => {
                stats.failed_requests as f64 / stats.total_requests as f64
            }
            _ => 0.0,
        };

        let recency = match self.breakers[&provider.name].last_failure_time() {
            Some(last) if last.elapsed() < RECENCY_WINDOW => RECENCY_PENALTY,
            _ => 1.0,
        };

        let latency = match self.ledger.provider_stats(&provider.name).and_then(|s| s.avg_latency()) {
            Some(avg) if avg > SLOW_LATENCY_THRESHOLD_SECS => LATENCY_PENALTY,
            _ => 1.0,
        };

        base * (1.0 + fail_ratio * recency) * latency
    }

    /// Admissible providers ranked by ascending dynamic score; ties keep
    /// the configured order (`sort_by` is a stable sort).
    fn ranked_admissible(&self) -> Vec<&Provider> {
        let mut admissible: Vec<&Provider> = self
            .providers
            .iter()
            .filter(|p| self.breakers[&p.name].can_attempt())
            .collect();

        admissible.sort_by(|a, b| {
            self.dynamic_score(a)
                .partial_cmp(&self.dynamic_score(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        admissible
    }

    /// Ordered failover loop: try each admissible provider in ranked order
    /// until one succeeds, recording every attempt to the ledger and
    /// reporting the outcome to that provider's breaker before moving on.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<GenerateResult, RouterError> {
        let overall_start = Instant::now();

        let ranked = self.ranked_admissible();
        if ranked.is_empty() {
            tracing::warn!("no admissible providers");
            return Err(RouterError::NoProvidersAvailable);
        }

        tracing::info!(
            order = ?ranked.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "ranked providers for this request"
        );

        let mut errors = Vec::with_capacity(ranked.len());

        for provider in ranked {
            tracing::info!(provider = %provider.name, "attempting provider");

            match adapters::call(&self.http_client, provider, prompt, max_tokens, temperature).await {
                Ok(response) => {
                    let duration = overall_start.elapsed();
                    let cost =
                        Self::compute_cost(provider, response.prompt_tokens, response.completion_tokens);

                    self.ledger.record(
                        &provider.name,
                        response.prompt_tokens,
                        response.completion_tokens,
                        cost,
                        true,
                        duration,
                    );
                    self.breakers[&provider.name].record_success();

                    tracing::info!(provider = %provider.name, cost, "generate succeeded");

                    return Ok(GenerateResult {
                        provider_used: provider.name.clone(),
                        cost,
                        prompt_tokens: response.prompt_tokens,
                        completion_tokens: response.completion_tokens,
                        total_tokens: response.total_tokens,
                        response: response.text,
                    });
                }
                Err(e) => {
                    let duration = overall_start.elapsed();
                    self.ledger.record(&provider.name, 0, 0, 0.0, false, duration);
                    self.breakers[&provider.name].record_failure();

                    tracing::warn!(provider = %provider.name, error = %e, "provider attempt failed");
                    errors.push(format!("{} failed: {}", provider.name, e));
                }
            }
        }

        tracing::error!(attempts = errors.len(), "all providers failed");
        Err(RouterError::AllProvidersFailed(errors.join("; ")))
    }
}

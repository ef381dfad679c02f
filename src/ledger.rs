//! Usage ledger: per-attempt accounting plus a bounded recent-history
//! buffer, with a durable append-only JSON-lines sidecar log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::metrics;
use crate::util::round_to;

const RECENT_HISTORY_CAPACITY: usize = 100;
const RECENT_REQUESTS_IN_STATS: usize = 10;

/// One completed attempt, successful or not. Serialized verbatim as a line
/// of the usage log and embedded in `/stats`' `recent_requests`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub success: bool,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
    pub total_latency: f64,
}

impl ProviderStats {
    /// `None` when there have been no successful attempts yet — the
    /// average is undefined, not zero.
    pub fn avg_latency(&self) -> Option<f64> {
        if self.successful_requests > 0 {
            Some(round_to(self.total_latency / self.successful_requests as f64, 4))
        } else {
            None
        }
    }

    fn to_view(&self) -> ProviderStatsView {
        ProviderStatsView {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            total_prompt_tokens: self.total_prompt_tokens,
            total_completion_tokens: self.total_completion_tokens,
            total_cost: round_to(self.total_cost, 6),
            total_latency: self.total_latency,
            avg_latency: match self.avg_latency() {
                Some(v) => serde_json::json!(v),
                None => serde_json::json!("N/A"),
            },
        }
    }
}

/// `/stats`-facing view of a provider's accumulators, with `avg_latency`
/// resolved to either a rounded number or the `"N/A"` sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatsView {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
    pub total_latency: f64,
    pub avg_latency: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct OverallStats {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub total_requests: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub overall: OverallStats,
    pub providers: HashMap<String, ProviderStatsView>,
    pub recent_requests: Vec<AttemptRecord>,
}

struct LedgerState {
    provider_stats: HashMap<String, ProviderStats>,
    recent_history: VecDeque<AttemptRecord>,
}

pub struct UsageLedger {
    state: RwLock<LedgerState>,
    log_path: PathBuf,
}

impl UsageLedger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, path = %parent.display(), "failed to create usage log directory");
                }
            }
        }
        Self {
            state: RwLock::new(LedgerState {
                provider_stats: HashMap::new(),
                recent_history: VecDeque::with_capacity(RECENT_HISTORY_CAPACITY),
            }),
            log_path,
        }
    }

    /// Record one attempt. Failed attempts contribute zero to every
    /// accumulator regardless of what the caller passed in — only the
    /// `success` flag and the attempt's own bookkeeping (counters, history,
    /// log line) carry through.
    pub fn record(
        &self,
        provider: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost: f64,
        success: bool,
        duration: Duration,
    ) {
        let (prompt_tokens, completion_tokens, cost) = if success {
            (prompt_tokens, completion_tokens, cost)
        } else {
            (0, 0, 0.0)
        };
        let total_tokens = prompt_tokens + completion_tokens;
        let duration_seconds = round_to(duration.as_secs_f64(), 4);

        let record = AttemptRecord {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost,
            success,
            duration_seconds,
        };

        {
            let mut state = self.state.write();
            state.recent_history.push_back(record.clone());
            while state.recent_history.len() > RECENT_HISTORY_CAPACITY {
                state.recent_history.pop_front();
            }

            let stats = state
                .provider_stats
                .entry(provider.to_string())
                .or_default();
            stats.total_requests += 1;
            if success {
                stats.successful_requests += 1;
                stats.total_prompt_tokens += prompt_tokens;
                stats.total_completion_tokens += completion_tokens;
                stats.total_cost += cost;
                stats.total_latency += duration.as_secs_f64();
            } else {
                stats.failed_requests += 1;
            }
        }

        metrics::record_attempt(provider, success, cost, total_tokens);
        self.append_log(&record);
    }

    fn append_log(&self, record: &AttemptRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize usage record");
                return;
            }
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| writeln!(f, "{}", line));

        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.log_path.display(), "failed to append usage log");
        }
    }

    /// Read-only snapshot of a single provider's accumulators, used by the
    /// router's dynamic scoring. Returns `None` for a provider with no
    /// recorded history yet.
    pub fn provider_stats(&self, provider: &str) -> Option<ProviderStats> {
        self.state.read().provider_stats.get(provider).cloned()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let state = self.state.read();

        let total_cost = round_to(
            state.provider_stats.values().map(|s| s.total_cost).sum(),
            6,
        );
        let total_tokens = state
            .provider_stats
            .values()
            .map(|s| s.total_prompt_tokens + s.total_completion_tokens)
            .sum();
        let total_requests = state.provider_stats.values().map(|s| s.total_requests).sum();

        let providers = state
            .provider_stats
            .iter()
            .map(|(name, stats)| (name.clone(), stats.to_view()))
            .collect();

        let len = state.recent_history.len();
        let skip = len.saturating_sub(RECENT_REQUESTS_IN_STATS);
        let recent_requests = state.recent_history.iter().skip(skip).cloned().collect();

        StatsSnapshot {
            overall: OverallStats {
                total_cost,
                total_tokens,
                total_requests,
            },
            providers,
            recent_requests,
        }
    }
}

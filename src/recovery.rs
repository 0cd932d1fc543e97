//! Error recovery orchestrator
//!
//! Wraps every remote operation in a fixed pipeline. A failure is
//! classified once, then recovery strategies run in strict priority order:
//! cache fallback, retry with per-kind exponential backoff, graceful
//! degradation, user notification. The first strategy that produces a
//! result ends the pipeline; if none does, the classified error propagates
//! to the caller unchanged.
//!
//! Per operation the pipeline moves through
//! new -> classified -> (strategy attempted)* -> resolved | exhausted,
//! with every attempt and outcome recorded for observability.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{BackoffConfig, RetryPolicies};
use crate::data::FetchError;
use crate::error::{classify, EnhancedError, ErrorKind, Severity};

/// Most recent classified errors retained for observability
const RECENT_ERRORS_CAP: usize = 32;
/// Pending user notifications retained until drained
const NOTIFICATIONS_CAP: usize = 64;

/// Recovery strategy kinds, dispatched from a fixed table.
///
/// Behavior is data-driven rather than embedded in callbacks so each
/// strategy's applicability is testable in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    CacheFallback,
    RetryWithBackoff,
    GracefulDegradation,
    UserNotification,
}

impl StrategyKind {
    /// Evaluation order, highest priority first
    pub const ORDER: [StrategyKind; 4] = [
        StrategyKind::CacheFallback,
        StrategyKind::RetryWithBackoff,
        StrategyKind::GracefulDegradation,
        StrategyKind::UserNotification,
    ];

    pub fn priority(self) -> u8 {
        match self {
            StrategyKind::CacheFallback => 100,
            StrategyKind::RetryWithBackoff => 80,
            StrategyKind::GracefulDegradation => 60,
            StrategyKind::UserNotification => 40,
        }
    }

    /// Whether this strategy can act on the given classified error
    pub fn applies(self, error: &EnhancedError, cache_populated: bool) -> bool {
        match self {
            StrategyKind::CacheFallback => {
                error.fallback_available && error.kind == ErrorKind::Network && cache_populated
            }
            StrategyKind::RetryWithBackoff => error.retryable,
            StrategyKind::GracefulDegradation => error.severity != Severity::Critical,
            StrategyKind::UserNotification => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::CacheFallback => "cache-fallback",
            StrategyKind::RetryWithBackoff => "retry-with-backoff",
            StrategyKind::GracefulDegradation => "graceful-degradation",
            StrategyKind::UserNotification => "user-notification",
        }
    }
}

/// How an operation ultimately produced its value
#[derive(Debug)]
pub enum Recovered<T> {
    /// The operation (or a retry of it) succeeded
    Fresh(T),
    /// The cached dataset was served instead; carries the user message
    Stale { message: String },
    /// A minimal placeholder stands in for the real result
    Degraded { message: String },
}

impl<T> Recovered<T> {
    /// Non-fatal warning attached to the outcome, if any
    pub fn warning(&self) -> Option<&str> {
        match self {
            Recovered::Fresh(_) => None,
            Recovered::Stale { message } | Recovered::Degraded { message } => Some(message),
        }
    }
}

/// A pre-rendered message recorded by the user-notification strategy
#[derive(Debug, Clone)]
pub struct UserNotification {
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
}

/// Per-strategy success/failure counters
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyCounters {
    pub successes: u64,
    pub failures: u64,
}

/// Observability state for the recovery pipeline
#[derive(Debug, Default)]
pub struct RecoveryTelemetry {
    strategy_counters: HashMap<StrategyKind, StrategyCounters>,
    kind_counts: HashMap<ErrorKind, u64>,
    recent: VecDeque<EnhancedError>,
}

impl RecoveryTelemetry {
    fn record_error(&mut self, error: &EnhancedError) {
        *self.kind_counts.entry(error.kind).or_default() += 1;
        if self.recent.len() == RECENT_ERRORS_CAP {
            self.recent.pop_front();
        }
        self.recent.push_back(error.clone());
    }

    fn record_strategy(&mut self, strategy: StrategyKind, success: bool) {
        let counters = self.strategy_counters.entry(strategy).or_default();
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
    }

    pub fn strategy_counters(&self, strategy: StrategyKind) -> StrategyCounters {
        self.strategy_counters
            .get(&strategy)
            .copied()
            .unwrap_or_default()
    }

    pub fn kind_count(&self, kind: ErrorKind) -> u64 {
        self.kind_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Rolling buffer of the most recent classified errors, oldest first
    pub fn recent_errors(&self) -> impl Iterator<Item = &EnhancedError> {
        self.recent.iter()
    }
}

/// Delay before the given retry (1-based): `base * factor^(retry-1)`,
/// capped, optionally randomized within [0.5, 1.0] of the computed value.
pub fn backoff_delay(policy: &BackoffConfig, retry: u32) -> Duration {
    let raw = policy.base_delay_ms as f64 * policy.factor.powi(retry.saturating_sub(1) as i32);
    let capped = raw.min(policy.max_delay_ms as f64);
    let final_ms = if policy.jitter {
        capped * (0.5 + 0.5 * rand::random::<f64>())
    } else {
        capped
    };
    Duration::from_millis(final_ms as u64)
}

fn policy_for(policies: &RetryPolicies, kind: ErrorKind) -> &BackoffConfig {
    match kind {
        ErrorKind::Network | ErrorKind::Timeout => &policies.network,
        ErrorKind::Api => &policies.api,
        // validation/unknown never reach the retry strategy
        _ => &policies.cache,
    }
}

/// Executes remote operations under the recovery pipeline
pub struct RecoveryOrchestrator {
    policies: RetryPolicies,
    telemetry: RecoveryTelemetry,
    notifications: VecDeque<UserNotification>,
}

impl RecoveryOrchestrator {
    pub fn new(policies: RetryPolicies) -> Self {
        RecoveryOrchestrator {
            policies,
            telemetry: RecoveryTelemetry::default(),
            notifications: VecDeque::new(),
        }
    }

    pub fn telemetry(&self) -> &RecoveryTelemetry {
        &self.telemetry
    }

    /// Drain pending user notifications, oldest first
    pub fn take_notifications(&mut self) -> Vec<UserNotification> {
        self.notifications.drain(..).collect()
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    /// Run `op`, classifying any failure and walking the strategy table.
    ///
    /// `cache_populated` tells the cache-fallback strategy whether the
    /// caller has a prior good dataset to serve.
    pub async fn execute<T, F, Fut>(
        &mut self,
        operation: &str,
        cache_populated: bool,
        mut op: F,
    ) -> Result<Recovered<T>, EnhancedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let first_failure = match op().await {
            Ok(value) => return Ok(Recovered::Fresh(value)),
            Err(e) => e,
        };

        let mut error = classify(operation, first_failure);
        warn!(
            "{} failed ({}, severity {:?}): {}",
            operation,
            error.kind.as_str(),
            error.severity,
            error.detail
        );
        self.telemetry.record_error(&error);

        for strategy in StrategyKind::ORDER {
            if !strategy.applies(&error, cache_populated) {
                continue;
            }
            debug!(
                "{}: attempting {} (priority {})",
                operation,
                strategy.as_str(),
                strategy.priority()
            );

            match strategy {
                StrategyKind::CacheFallback => {
                    self.telemetry.record_strategy(strategy, true);
                    debug!("{}: serving last good dataset", operation);
                    return Ok(Recovered::Stale {
                        message: error.message.clone(),
                    });
                }

                StrategyKind::RetryWithBackoff => {
                    let policy = policy_for(&self.policies, error.kind).clone();
                    let mut recovered = None;

                    for retry in 1..policy.max_attempts {
                        let delay = backoff_delay(&policy, retry);
                        debug!(
                            "{}: retry {}/{} after {}ms",
                            operation,
                            retry + 1,
                            policy.max_attempts,
                            delay.as_millis()
                        );
                        sleep(delay).await;

                        match op().await {
                            Ok(value) => {
                                recovered = Some(value);
                                break;
                            }
                            Err(e) => {
                                let reclassified = classify(operation, e);
                                self.telemetry.record_error(&reclassified);
                                error = reclassified;
                            }
                        }
                    }

                    if let Some(value) = recovered {
                        self.telemetry.record_strategy(strategy, true);
                        return Ok(Recovered::Fresh(value));
                    }
                    self.telemetry.record_strategy(strategy, false);
                }

                StrategyKind::GracefulDegradation => {
                    self.telemetry.record_strategy(strategy, true);
                    return Ok(Recovered::Degraded {
                        message: error.message.clone(),
                    });
                }

                StrategyKind::UserNotification => {
                    // records the message only; performs no data recovery,
                    // so the pipeline continues past it
                    if self.notifications.len() == NOTIFICATIONS_CAP {
                        self.notifications.pop_front();
                    }
                    self.notifications.push_back(UserNotification {
                        message: error.message.clone(),
                        severity: error.severity,
                        timestamp: Utc::now(),
                        correlation_id: error.context.correlation_id.clone(),
                    });
                    self.telemetry.record_strategy(strategy, true);
                }
            }
        }

        warn!("{}: recovery exhausted, surfacing {}", operation, error.kind.as_str());
        Err(error)
    }
}

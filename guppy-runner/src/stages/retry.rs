//! Retrying of transient stage failures.
//!
//! Retries are never implicit. A [`RetryingRunner`] is wrapped around a
//! single stage's runner when its tool definition asks for it, and it only
//! retries errors that report themselves as transient (a spawn that failed
//! for lack of resources). Tool failures, timeouts and invalid artifacts are
//! returned on the first attempt.

use super::{ExecutionResult, StageRunner};
use crate::context::RunContext;
use crate::core::{Artifact, StageKind};
use crate::errors::StageError;
use crate::pipeline::StageSpec;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied to the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }
}

/// Attempt counter and delay calculator for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: usize,
    previous_delay: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if another attempt is allowed.
    #[must_use]
    pub fn can_retry(&self, config: &RetryConfig) -> bool {
        self.attempt < config.max_attempts
    }

    /// Computes the delay before the next attempt and records the attempt.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let exponent = u32::try_from(self.attempt.saturating_sub(1)).unwrap_or(u32::MAX);

        let delay = match config.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let mut rng = rand::thread_rng();
        let jittered = match config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rng.gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rng.gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base
                } else {
                    rng.gen_range(base..=upper)
                }
            }
        };

        self.previous_delay = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// Wraps a runner and retries its transient failures.
#[derive(Debug, Clone)]
pub struct RetryingRunner {
    inner: Arc<dyn StageRunner>,
    config: RetryConfig,
}

impl RetryingRunner {
    /// Wraps a runner.
    #[must_use]
    pub fn new(inner: Arc<dyn StageRunner>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl StageRunner for RetryingRunner {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    async fn run(&self, spec: &StageSpec, input: Artifact, ctx: &RunContext) -> ExecutionResult {
        let mut state = RetryState::new();
        loop {
            state.attempt += 1;
            let err = match self.inner.run(spec, input.clone(), ctx).await {
                Err(err) if err.is_transient() && state.can_retry(&self.config) => err,
                result => return result,
            };

            let delay = state.next_delay(&self.config);
            warn!(
                stage = %spec.name,
                attempt = state.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying after transient failure"
            );

            let cancel = ctx.cancellation();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(StageError::cancelled(&spec.name, cancel.reason_or_default()));
                }
            }
        }
    }
}

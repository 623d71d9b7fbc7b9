//! Tag mapper control plane
//!
//! `TagMapper::apply` pushes a [`TagMappingConfig`] to its target and retries
//! transient failures with exponential backoff until the target converges or
//! the attempt budget runs out.

use crate::error::FederationError;
use crate::mapping::{ApplyOutcome, TagMappingConfig, TagMappingTarget, TargetError};
use federa_common::config::ReconcileConfig;
use federa_common::{IssuerId, PoolId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff schedule for control-plane calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for RetryPolicy {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Acknowledgement of a converged apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingAck {
    pub pool_id: PoolId,
    pub provider: IssuerId,
    pub version: u64,
    pub outcome: ApplyOutcome,
    /// Attempts it took, including the successful one
    pub attempts: u32,
}

/// Applies tag mappings to a target with bounded retry
pub struct TagMapper {
    target: Arc<dyn TagMappingTarget>,
    retry: RetryPolicy,
}

impl TagMapper {
    pub fn new(target: Arc<dyn TagMappingTarget>, retry: RetryPolicy) -> Self {
        Self { target, retry }
    }

    /// Apply `config`, retrying with the same payload and idempotency key
    pub async fn apply(&self, config: &TagMappingConfig) -> Result<MappingAck, FederationError> {
        config
            .validate()
            .map_err(|e| FederationError::Configuration {
                attempts: 0,
                reason: e.to_string(),
            })?;

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            let result = tokio::time::timeout(
                self.retry.attempt_timeout,
                self.target.set_principal_tag_map(config),
            )
            .await;

            match result {
                Ok(Ok(applied)) => {
                    info!(
                        target_name = self.target.name(),
                        pool_id = %applied.pool_id,
                        version = applied.version,
                        attempt,
                        "Tag mapping converged"
                    );
                    return Ok(MappingAck {
                        pool_id: applied.pool_id,
                        provider: applied.provider,
                        version: applied.version,
                        outcome: applied.outcome,
                        attempts: attempt,
                    });
                }
                Ok(Err(TargetError::Rejected(reason))) => {
                    return Err(FederationError::Configuration {
                        attempts: attempt,
                        reason,
                    });
                }
                Ok(Err(TargetError::Transient(reason))) => last_error = reason,
                Err(_) => {
                    last_error = format!(
                        "attempt timed out after {}ms",
                        self.retry.attempt_timeout.as_millis()
                    )
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.backoff(attempt);
                warn!(
                    pool_id = %config.pool_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Tag mapping apply failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        debug!(pool_id = %config.pool_id, "Tag mapping retries exhausted");
        Err(FederationError::Configuration {
            attempts: self.retry.max_attempts,
            reason: last_error,
        })
    }
}

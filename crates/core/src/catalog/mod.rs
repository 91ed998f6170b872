// Catalog delivery: transport contract and bounded retry
use crate::error::{DispatchError, TransportError};
use crate::joblog::DispatchAttempt;
use crate::response::{Payload, QiDocument};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

/// Where a payload is delivered in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    /// Series the dataset belongs to
    pub parent_identifier: String,
    /// Dataset identifier, one per product and job
    pub dataset_id: String,
}

impl DispatchTarget {
    pub fn for_document(document: &QiDocument) -> Self {
        Self {
            parent_identifier: document.use_case().parent_identifier.clone(),
            dataset_id: document.dataset_id(),
        }
    }
}

/// Receipt returned by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub id: String,
}

/// Remote metadata repository receiving composed documents
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn submit(
        &self,
        payload: &Payload,
        target: &DispatchTarget,
    ) -> Result<Acknowledgement, TransportError>;
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl DispatchPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

/// Submit a payload, retrying transport failures per the policy.
///
/// `on_attempt` sees every attempt, failed or not, before the next one
/// starts.
pub async fn dispatch_with_retry<F>(
    transport: &dyn CatalogTransport,
    payload: &Payload,
    target: &DispatchTarget,
    policy: &DispatchPolicy,
    mut on_attempt: F,
) -> Result<Acknowledgement, DispatchError>
where
    F: FnMut(&DispatchAttempt),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match transport.submit(payload, target).await {
            Ok(ack) => {
                on_attempt(&DispatchAttempt {
                    attempt,
                    succeeded: true,
                    detail: format!("acknowledged as {}", ack.id),
                    at: Utc::now(),
                });
                info!(attempt, dataset = %target.dataset_id, ack = %ack.id, "payload delivered");
                return Ok(ack);
            }
            Err(err) => {
                on_attempt(&DispatchAttempt {
                    attempt,
                    succeeded: false,
                    detail: err.to_string(),
                    at: Utc::now(),
                });
                if attempt >= max_attempts {
                    return Err(DispatchError {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "catalog delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

//! Retrying wrapper around a single research action.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scout_core::errors::ToolError;
use scout_core::events::EventType;
use scout_core::ids::{DomainId, SessionId};
use scout_core::research::{DocumentRef, ResearchRequest, ResearchTool};
use scout_settings::RetrySettings;

use crate::event_bus::EventBus;

/// Bounded retry with capped exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, then jittered by `±jitter_factor`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(exp);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped as u64);
        }
        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Where a component's events go: straight into the session queue, or into
/// an ordered per-domain buffer that a forwarder publishes later.
#[derive(Clone)]
pub enum Emitter {
    Bus {
        bus: Arc<EventBus>,
        session_id: SessionId,
    },
    Buffer(mpsc::UnboundedSender<(EventType, Value)>),
}

impl Emitter {
    pub fn bus(bus: Arc<EventBus>, session_id: SessionId) -> Self {
        Self::Bus { bus, session_id }
    }

    pub fn emit(&self, event_type: EventType, payload: Value) {
        match self {
            Self::Bus { bus, session_id } => {
                bus.publish(session_id, event_type, payload);
            }
            Self::Buffer(tx) => {
                if tx.send((event_type, payload)).is_err() {
                    debug!(event_type = %event_type, "domain buffer closed, dropping event");
                }
            }
        }
    }
}

/// Runs one research tool call under a retry policy and per-attempt timeout.
pub struct ToolExecutor {
    tool: Arc<dyn ResearchTool>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(tool: Arc<dyn ResearchTool>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            tool,
            policy,
            call_timeout,
        }
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Emit one `tool_call`, attempt the tool until it succeeds or the
    /// policy is exhausted, and emit one `tool_result` on success.
    pub async fn execute(
        &self,
        emitter: &Emitter,
        session_id: &SessionId,
        domain_id: &DomainId,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentRef, ToolError> {
        let tool = self.tool.name();
        emitter.emit(
            EventType::ToolCall,
            json!({ "tool": tool, "query": query, "domain_id": domain_id }),
        );

        let request = ResearchRequest {
            session_id: session_id.clone(),
            domain_id: domain_id.clone(),
            query: query.to_string(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ToolError::Cancelled),
                result = tokio::time::timeout(self.call_timeout, self.tool.perform(&request)) => {
                    result.unwrap_or(Err(ToolError::Timeout(self.call_timeout)))
                }
            };

            let error = match outcome {
                Ok(document) => {
                    emitter.emit(
                        EventType::ToolResult,
                        json!({
                            "tool": tool,
                            "status": "success",
                            "document_id": document.id,
                            "title": document.title,
                            "attempts": attempt,
                        }),
                    );
                    return Ok(document);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.policy.max_attempts {
                warn!(
                    session_id = %session_id,
                    domain_id = %domain_id,
                    attempt,
                    error = %error,
                    error_kind = error.error_kind(),
                    "research tool failed after all attempts"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                session_id = %session_id,
                domain_id = %domain_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                error_kind = error.error_kind(),
                "retrying research tool after error"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ToolError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

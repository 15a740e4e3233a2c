//! Retry with exponential backoff and a per-destination circuit breaker.
//!
//! [`ResilientClient::call`] wraps a [`Transport`]:
//!
//! - transient failures (see [`LeagueError::is_transient`]) are retried up to
//!   [`RetryPolicy::max_attempts`] times, waiting `base * 2^(k-2)` (capped) before attempt `k`;
//! - every other failure is returned at once;
//! - each destination has its own [`CircuitBreaker`]. After `failure_threshold` consecutive
//!   transient failures it opens and calls fail fast with [`LeagueError::CircuitOpen`] until
//!   `reset_timeout` has elapsed, then exactly one probe is let through.
//!
//! Breakers live behind a std mutex that is only ever held for a few non-async statements, so a
//! state change is never split by an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::LeagueError;
use crate::message::Message;
use crate::network::Transport;

/// How many times and how patiently a call is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before attempt number `attempt` (1-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 2)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// When a breaker opens and how long it stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Healthy, calls go through.
    Closed,
    /// Tripped, calls fail fast.
    Open,
    /// Cooldown over, a single probe is in flight.
    HalfOpen,
}

/// What a breaker let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Ordinary call on a closed circuit.
    Normal,
    /// The single probe of a half-open circuit.
    Probe,
}

/// Failure circuit for one destination.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Closed breaker.
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
        }
    }

    /// Current state, as last updated.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive transient failures recorded.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Ask to place a call at `now`. `None` means fail fast.
    pub fn try_acquire(&mut self, now: Instant) -> Option<Admission> {
        match self.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let opened_at = self.last_failure_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.policy.reset_timeout {
                    self.state = CircuitState::HalfOpen;
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
            // the probe is still in flight
            CircuitState::HalfOpen => None,
        }
    }

    /// The destination answered.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_at = None;
    }

    /// The destination failed transiently at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        match self.state {
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            CircuitState::Closed if self.failure_count >= self.policy.failure_threshold => {
                self.state = CircuitState::Open
            }
            _ => {}
        }
    }
}

type Breakers = Arc<Mutex<HashMap<String, CircuitBreaker>>>;

fn lock(breakers: &Breakers) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
    breakers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Right to place one call. A probe permit dropped without an outcome (the calling task was
/// cancelled) counts as a failed probe, so the breaker cannot stay half-open forever.
struct Permit {
    breakers: Breakers,
    destination: String,
    admission: Admission,
    resolved: bool,
}

impl Permit {
    fn success(mut self) {
        self.resolved = true;
        if let Some(breaker) = lock(&self.breakers).get_mut(&self.destination) {
            breaker.record_success();
        }
    }

    fn failure(mut self) {
        self.resolved = true;
        if let Some(breaker) = lock(&self.breakers).get_mut(&self.destination) {
            breaker.record_failure(Instant::now());
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.resolved && self.admission == Admission::Probe {
            if let Some(breaker) = lock(&self.breakers).get_mut(&self.destination) {
                breaker.record_failure(Instant::now());
            }
        }
    }
}

/// A [`Transport`] wrapped with retries and circuit breakers.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    breaker_policy: BreakerPolicy,
    breakers: Breakers,
}

impl ResilientClient {
    /// Wrap `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        breaker_policy: BreakerPolicy,
    ) -> Self {
        Self {
            transport,
            retry,
            breaker_policy,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Breaker state for `destination` (closed if never called).
    pub fn circuit_state(&self, destination: &str) -> CircuitState {
        lock(&self.breakers)
            .get(destination)
            .map_or(CircuitState::Closed, CircuitBreaker::state)
    }

    fn admit(&self, destination: &str) -> Result<Permit, LeagueError> {
        let mut breakers = lock(&self.breakers);
        let breaker = breakers
            .entry(destination.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_policy));
        match breaker.try_acquire(Instant::now()) {
            Some(admission) => {
                if admission == Admission::Probe {
                    debug!(destination, "circuit half-open, sending probe");
                }
                Ok(Permit {
                    breakers: self.breakers.clone(),
                    destination: destination.to_string(),
                    admission,
                    resolved: false,
                })
            }
            None => Err(LeagueError::CircuitOpen(destination.to_string())),
        }
    }

    /// Send `request` to `destination`, each attempt bounded by `timeout`.
    ///
    /// The reply must carry the request's conversation id. `ERROR` replies are returned as the
    /// corresponding [`LeagueError`].
    #[instrument(
        skip(self, request, timeout),
        fields(kind = %request.kind(), conversation = request.conversation_id())
    )]
    pub async fn call(
        &self,
        destination: &str,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, LeagueError> {
        let conversation = request.conversation_id().to_string();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before(attempt);
                debug!(attempt, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
            }

            let permit = self.admit(destination)?;
            let outcome = match tokio::time::timeout(
                timeout,
                self.transport.send(destination, request.clone()),
            )
            .await
            {
                Ok(reply) => reply.and_then(|reply| {
                    reply.check_conversation(&conversation)?;
                    reply.into_result()
                }),
                Err(_elapsed) => Err(LeagueError::timeout(destination)),
            };

            match outcome {
                Ok(reply) => {
                    permit.success();
                    return Ok(reply);
                }
                Err(e) if e.is_transient() => {
                    permit.failure();
                    warn!(attempt, max_attempts, "transient failure: {e}");
                    last_error = Some(e);
                }
                Err(e) => {
                    // the destination answered, the request itself is wrong
                    permit.success();
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LeagueError::unavailable(destination.to_string())))
    }
}

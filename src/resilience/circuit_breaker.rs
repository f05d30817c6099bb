//! Circuit Breaker
//!
//! Guard around one publish target. State is process-local and rebuilt as
//! closed on restart: correctness rests on the durable per-row attempt
//! counters, not on breaker memory.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for the state gauge: 0 closed, 1 open, 2 half-open.
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that trip the circuit
    pub failure_threshold: usize,
    /// Rolling window over which failures are counted
    pub failure_window: Duration,
    /// Time spent open before a half-open probe is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error wrapper returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit rejected the call without invoking the operation.
    #[error("circuit '{0}' is open, call rejected")]
    Open(String),
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Timestamps of recent failures, pruned to the rolling window
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// A half-open probe is currently executing
    probe_in_flight: bool,
}

/// One breaker per publish target; never shared across unrelated brokers.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

enum CallRole {
    Normal,
    Probe,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Run `operation` under the breaker.
    ///
    /// While open (or while a half-open probe is already in flight) the
    /// operation is not invoked and `BreakerError::Open` is returned
    /// immediately. In half-open exactly one probe call passes through;
    /// its outcome decides the next state.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let role = match self.admit() {
            Some(role) => role,
            None => return Err(BreakerError::Open(self.name.clone())),
        };

        match operation.await {
            Ok(value) => {
                self.on_success(role);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(role);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed and in what role.
    fn admit(&self) -> Option<CallRole> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.duration_since(at))
                .unwrap_or_default();
            if elapsed >= self.config.reset_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
                info!(circuit = %self.name, "Circuit transitioned to HALF_OPEN");
            } else {
                return None;
            }
        }

        match inner.state {
            CircuitState::Closed => Some(CallRole::Normal),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(CallRole::Probe)
                }
            }
            CircuitState::Open => None,
        }
    }

    fn on_success(&self, role: CallRole) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.clear();
        if let CallRole::Probe = role {
            inner.state = CircuitState::Closed;
            inner.probe_in_flight = false;
            inner.opened_at = None;
            info!(circuit = %self.name, "Probe succeeded, circuit closed");
        }
    }

    fn on_failure(&self, role: CallRole) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match role {
            CallRole::Probe => {
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.opened_at = Some(now);
                warn!(circuit = %self.name, "Probe failed, circuit reopened");
            }
            CallRole::Normal => {
                inner.failures.push_back(now);
                let window = self.config.failure_window;
                while let Some(front) = inner.failures.front() {
                    if now.duration_since(*front) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.state == CircuitState::Closed
                    && inner.failures.len() >= self.config.failure_threshold
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        circuit = %self.name,
                        failures = inner.failures.len(),
                        "Failure threshold reached, circuit opened"
                    );
                }
            }
        }
    }
}

//! Bounded retry as a pure state machine.
//!
//! The driver performs whatever the current state asks for (an attempt or a
//! wait) and feeds the outcome back through [`step`]. Nothing here sleeps or
//! touches the network, so the transitions are tested without a clock.
use std::time::Duration;

use rand::Rng;

/// Delay to wait after a failed attempt (1-based) before the next one.
pub trait Backoff {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay between every pair of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Inclusive range a per-fetch delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    min: Duration,
    max: Duration,
}

impl JitterRange {
    /// Bounds are reordered if given backwards.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Draws one delay; the result is reused for every wait of a single
    /// fetch, it is not re-rolled per attempt.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> FixedBackoff {
        if self.min == self.max {
            return FixedBackoff(self.min);
        }
        let millis = rng.gen_range(self.min.as_millis()..=self.max.as_millis());
        FixedBackoff(Duration::from_millis(millis as u64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A budget of zero is raised to one: every fetch makes at least one
    /// attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting { attempt: 1 }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(15)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt number `attempt` should be issued.
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed; wait `delay` before the next one.
    Waiting { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    ExhaustedFailed { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::ExhaustedFailed { .. }
        )
    }

    /// Attempts issued so far, including one in flight.
    pub fn attempts(&self) -> u32 {
        match *self {
            RetryState::Attempting { attempt } | RetryState::Waiting { attempt, .. } => attempt,
            RetryState::Succeeded { attempts } | RetryState::ExhaustedFailed { attempts } => {
                attempts
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    AttemptSucceeded,
    /// A non-retryable failure ends the sequence regardless of budget.
    AttemptFailed { retryable: bool },
    WaitElapsed,
}

/// Pure transition function. Events that make no sense in the current state
/// leave it unchanged.
pub fn step(
    state: RetryState,
    event: RetryEvent,
    policy: &RetryPolicy,
    backoff: &dyn Backoff,
) -> RetryState {
    match (state, event) {
        (RetryState::Attempting { attempt }, RetryEvent::AttemptSucceeded) => {
            RetryState::Succeeded { attempts: attempt }
        }
        (RetryState::Attempting { attempt }, RetryEvent::AttemptFailed { retryable }) => {
            if !retryable || attempt >= policy.max_attempts {
                RetryState::ExhaustedFailed { attempts: attempt }
            } else {
                RetryState::Waiting {
                    attempt,
                    delay: backoff.delay(attempt),
                }
            }
        }
        (RetryState::Waiting { attempt, .. }, RetryEvent::WaitElapsed) => {
            RetryState::Attempting {
                attempt: attempt + 1,
            }
        }
        (state, _) => state,
    }
}

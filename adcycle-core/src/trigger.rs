//! Ad-queue commands and the bounded retry policy for interstitial requests.
//!
//! The ad network's queue may not be initialised when we want a break, and a
//! push can fail while its interstitial API is still loading. One call to
//! [`attempt`] performs at most one readiness check and one push; the caller
//! owns the waiting between attempts.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::AdQueue;
use crate::config::RetryPolicy;
use crate::constants::INTERSTITIAL_ERROR_PATTERN;

/// Identity of one requested ad break; lifecycle events are routed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BreakId(u64);

impl BreakId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BreakId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "break-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BreakKind {
    Preroll,
    Reward { name: String },
}

impl BreakKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Preroll => "preroll",
            Self::Reward { .. } => "reward",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdBreakRequest {
    pub id: BreakId,
    pub kind: BreakKind,
}

/// Entries the engine appends to the network's command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdCommand {
    Break(AdBreakRequest),
    /// Ad configuration: sound on, preload ad breaks.
    Preload,
}

/// Error raised by the network while accepting a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PushError {
    message: String,
}

impl PushError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The network is still bringing up its interstitial API; worth retrying.
    #[must_use]
    pub fn is_interstitial_unavailable(&self) -> bool {
        self.message
            .to_ascii_lowercase()
            .contains(INTERSTITIAL_ERROR_PATTERN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    NotReady,
    InterstitialUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pushed,
    Retry { delay_ms: u64, reason: RetryReason },
    /// Attempt budget exhausted; the queue was not touched.
    Abandoned,
    /// Terminal push error.
    Failed(PushError),
}

/// Run attempt number `attempt` (0-based) of `command` against `queue`.
pub fn attempt<Q: AdQueue + ?Sized>(
    queue: &mut Q,
    command: &AdCommand,
    attempt: u32,
    policy: &RetryPolicy,
) -> AttemptOutcome {
    if attempt >= policy.max_attempts {
        return AttemptOutcome::Abandoned;
    }
    if !queue.is_ready() {
        return AttemptOutcome::Retry {
            delay_ms: policy.not_ready_delay(attempt),
            reason: RetryReason::NotReady,
        };
    }
    match queue.push(command) {
        Ok(()) => AttemptOutcome::Pushed,
        Err(err) if err.is_interstitial_unavailable() => AttemptOutcome::Retry {
            delay_ms: policy.push_error_delay(attempt),
            reason: RetryReason::InterstitialUnavailable,
        },
        Err(err) => AttemptOutcome::Failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ScriptedQueue {
        ready: bool,
        errors: Vec<PushError>,
        pushed: Vec<AdCommand>,
    }

    impl AdQueue for ScriptedQueue {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn push(&mut self, command: &AdCommand) -> Result<(), PushError> {
            if let Some(err) = self.errors.pop() {
                return Err(err);
            }
            self.pushed.push(command.clone());
            Ok(())
        }
    }

    fn preroll() -> AdCommand {
        AdCommand::Break(AdBreakRequest {
            id: BreakId::new(1),
            kind: BreakKind::Preroll,
        })
    }

    #[test]
    fn interstitial_messages_are_retryable() {
        assert!(PushError::new("adBreak: no interstitial API").is_interstitial_unavailable());
        assert!(PushError::new("Interstitial API not available").is_interstitial_unavailable());
        assert!(!PushError::new("TypeError: x is undefined").is_interstitial_unavailable());
    }

    #[test]
    fn not_ready_backs_off_short_then_long() {
        let policy = RetryPolicy::default();
        let mut queue = ScriptedQueue::default();
        let delays: Vec<_> = (0..5)
            .map(|n| attempt(&mut queue, &preroll(), n, &policy))
            .collect();
        assert_eq!(
            delays,
            vec![
                AttemptOutcome::Retry {
                    delay_ms: 500,
                    reason: RetryReason::NotReady
                },
                AttemptOutcome::Retry {
                    delay_ms: 500,
                    reason: RetryReason::NotReady
                },
                AttemptOutcome::Retry {
                    delay_ms: 1_000,
                    reason: RetryReason::NotReady
                },
                AttemptOutcome::Retry {
                    delay_ms: 1_000,
                    reason: RetryReason::NotReady
                },
                AttemptOutcome::Retry {
                    delay_ms: 1_000,
                    reason: RetryReason::NotReady
                },
            ]
        );
        assert!(queue.pushed.is_empty());
    }

    #[test]
    fn exhausted_budget_does_not_touch_queue() {
        let policy = RetryPolicy::default();
        let mut queue = ScriptedQueue {
            ready: true,
            ..ScriptedQueue::default()
        };
        assert_eq!(
            attempt(&mut queue, &preroll(), 5, &policy),
            AttemptOutcome::Abandoned
        );
        assert!(queue.pushed.is_empty());
    }

    #[test]
    fn interstitial_push_error_uses_longer_backoff() {
        let policy = RetryPolicy::default();
        let mut queue = ScriptedQueue {
            ready: true,
            errors: vec![PushError::new("no interstitial API")],
            ..ScriptedQueue::default()
        };
        assert_eq!(
            attempt(&mut queue, &preroll(), 2, &policy),
            AttemptOutcome::Retry {
                delay_ms: 2_000,
                reason: RetryReason::InterstitialUnavailable
            }
        );
        assert_eq!(
            attempt(&mut queue, &preroll(), 3, &policy),
            AttemptOutcome::Pushed
        );
        assert_eq!(queue.pushed, vec![preroll()]);
    }

    #[test]
    fn other_push_errors_are_terminal() {
        let policy = RetryPolicy::default();
        let mut queue = ScriptedQueue {
            ready: true,
            errors: vec![PushError::new("Cannot read properties of null")],
            ..ScriptedQueue::default()
        };
        assert_eq!(
            attempt(&mut queue, &preroll(), 0, &policy),
            AttemptOutcome::Failed(PushError::new("Cannot read properties of null"))
        );
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::config::RetrySettings;
use crate::model::JobStatus;

/// Bookkeeping handed from one monitor step to the next.
///
/// Nothing else survives between steps; everything about the job itself is
/// rebuilt from the stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollContext {
    /// Monitor steps completed so far.
    pub attempt: u32,
    /// Consecutive steps that ended in a transient failure.
    pub transient_failures: u32,
}

/// What the caller should do once a step returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MonitorAction {
    /// No further steps; the job rests in this status.
    Stop { status: JobStatus },
    /// Invoke the monitor step again after `after`, passing `context` back.
    Reschedule {
        #[serde(rename = "afterMs", serialize_with = "as_millis")]
        after: Duration,
        context: PollContext,
    },
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_transient_failures: u32,
    pub max_polls: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_transient_failures: settings.max_transient_failures,
            max_polls: settings.max_polls,
        }
    }
}

impl RetryPolicy {
    /// delay = base_delay * 2^(attempt - 1), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Decides when a non-terminal job is looked at again.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The first monitor step after a successful submission.
    pub fn first(&self) -> MonitorAction {
        MonitorAction::Reschedule {
            after: self.policy.base_delay,
            context: PollContext::default(),
        }
    }

    /// True once the job has used up its poll allowance.
    pub fn exhausted(&self, context: &PollContext) -> bool {
        self.policy
            .max_polls
            .is_some_and(|max| context.attempt >= max)
    }

    /// After a step that observed the job still in the scheduler.
    pub fn after_poll(&self, context: PollContext) -> MonitorAction {
        let next = PollContext {
            attempt: context.attempt.saturating_add(1),
            transient_failures: 0,
        };
        MonitorAction::Reschedule {
            after: self.policy.delay_for_attempt(next.attempt),
            context: next,
        }
    }

    /// After a step that hit a transient failure. `None` means the failure
    /// count is over the limit and the job should be marked as failed.
    pub fn after_transient_failure(&self, context: PollContext) -> Option<MonitorAction> {
        let next = PollContext {
            attempt: context.attempt.saturating_add(1),
            transient_failures: context.transient_failures.saturating_add(1),
        };
        if next.transient_failures > self.policy.max_transient_failures {
            return None;
        }
        Some(MonitorAction::Reschedule {
            after: self.policy.delay_for_attempt(next.transient_failures),
            context: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(max_polls: Option<u32>) -> RetryScheduler {
        RetryScheduler::new(RetryPolicy {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_transient_failures: 2,
            max_polls,
        })
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = scheduler(None).policy().clone();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(40));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(60));
    }

    #[test]
    fn successful_poll_resets_failures() {
        let action = scheduler(None).after_poll(PollContext {
            attempt: 3,
            transient_failures: 2,
        });
        assert_eq!(
            action,
            MonitorAction::Reschedule {
                after: Duration::from_secs(40),
                context: PollContext {
                    attempt: 4,
                    transient_failures: 0
                },
            }
        );
    }

    #[test]
    fn transient_failures_escalate_past_the_limit() {
        let scheduler = scheduler(None);
        let mut context = PollContext::default();
        for _ in 0..2 {
            match scheduler.after_transient_failure(context) {
                Some(MonitorAction::Reschedule { context: next, .. }) => context = next,
                other => panic!("expected reschedule, got {other:?}"),
            }
        }
        assert_eq!(context.transient_failures, 2);
        assert!(scheduler.after_transient_failure(context).is_none());
    }

    #[test]
    fn counters_saturate_at_the_top() {
        let context = PollContext {
            attempt: u32::MAX,
            transient_failures: 0,
        };
        match scheduler(None).after_poll(context) {
            MonitorAction::Reschedule { after, context } => {
                assert_eq!(context.attempt, u32::MAX);
                assert_eq!(after, Duration::from_secs(60));
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
        let next = scheduler(None).after_transient_failure(context);
        assert!(matches!(
            next,
            Some(MonitorAction::Reschedule { context: PollContext { attempt: u32::MAX, transient_failures: 1 }, .. })
        ));
    }

    #[test]
    fn poll_allowance() {
        let bounded = scheduler(Some(3));
        assert!(!bounded.exhausted(&PollContext { attempt: 2, transient_failures: 0 }));
        assert!(bounded.exhausted(&PollContext { attempt: 3, transient_failures: 0 }));
        assert!(!scheduler(None).exhausted(&PollContext { attempt: 10_000, transient_failures: 0 }));
    }

    #[test]
    fn action_serializes_for_callers() {
        let value = serde_json::to_value(scheduler(None).first()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "action": "reschedule",
                "afterMs": 5000,
                "context": {"attempt": 0, "transientFailures": 0}
            })
        );
        let value = serde_json::to_value(MonitorAction::Stop { status: JobStatus::Complete }).unwrap();
        assert_eq!(value, serde_json::json!({"action": "stop", "status": "complete"}));
    }
}

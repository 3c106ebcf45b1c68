//! Combining per-kind results into one pass result

use std::time::Duration;

use kube::runtime::controller::Action;

use pushgateway_common::ControllerConfig;

/// What happened to one child during a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildAction {
    /// The object did not exist and was created
    Created,
    /// The object had drifted and was updated
    Updated,
    /// Nothing to do
    InSync,
}

impl ChildAction {
    /// Outcome contributed to the pass
    pub fn outcome(self) -> ReconcileOutcome {
        match self {
            Self::Created | Self::Updated => ReconcileOutcome::requeue(),
            Self::InSync => ReconcileOutcome::default(),
        }
    }
}

/// Whether and when a pass wants to be re-evaluated
///
/// `requeue_after` of zero means "no explicit delay".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Re-evaluation requested
    pub requeue: bool,
    /// Requested delay; zero when none
    pub requeue_after: Duration,
}

impl ReconcileOutcome {
    /// Request re-evaluation without a specific delay
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: Duration::ZERO,
        }
    }

    /// Request re-evaluation after `delay`
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: delay,
        }
    }

    /// Combine two outcomes: requeue if either does, shortest non-zero delay wins
    pub fn merge(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Duration::ZERO, d) | (d, Duration::ZERO) => d,
            (a, b) => a.min(b),
        };
        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
        }
    }

    /// Map to a controller action
    pub fn into_action(self, config: &ControllerConfig) -> Action {
        if !self.requeue {
            return Action::requeue(config.resync_interval);
        }
        if self.requeue_after.is_zero() {
            Action::requeue(config.requeue_delay)
        } else {
            Action::requeue(self.requeue_after)
        }
    }
}

impl FromIterator<ReconcileOutcome> for ReconcileOutcome {
    fn from_iter<I: IntoIterator<Item = ReconcileOutcome>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::merge)
    }
}

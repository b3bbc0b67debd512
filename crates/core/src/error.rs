//! Failure taxonomy and escalation values.
//!
//! Failures travel through the kernel as values. A worker never unwinds an
//! error across a team boundary; the scheduler carries an [`Escalation`]
//! through the handler search instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a kernel failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A managed object source reported a failure.
    SourcingFailure,

    /// A managed object did not become ready within its deadline.
    DependencyNotReadyTimeout,

    /// A task body returned an error or panicked.
    TaskInvocationFailure,

    /// A duty returned an error or panicked.
    DutyInvocationFailure,

    /// A recycle unit failed during scope teardown.
    CleanupEscalation,

    /// A team refused an assignment.
    TeamRejection,
}

impl FailureKind {
    /// Stable lowercase name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourcingFailure => "sourcing_failure",
            Self::DependencyNotReadyTimeout => "dependency_not_ready_timeout",
            Self::TaskInvocationFailure => "task_invocation_failure",
            Self::DutyInvocationFailure => "duty_invocation_failure",
            Self::CleanupEscalation => "cleanup_escalation",
            Self::TeamRejection => "team_rejection",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure travelling through the escalation search.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {cause}")]
pub struct Escalation {
    /// Failure classification, matched by kind-level escalation entries.
    pub kind: FailureKind,

    /// Underlying cause; exact-type escalation entries downcast into this.
    pub cause: Arc<anyhow::Error>,

    /// Handler hops this escalation has already taken.
    pub hops: u32,
}

impl Escalation {
    /// Wrap a cause as a fresh escalation.
    pub fn new(kind: FailureKind, cause: anyhow::Error) -> Self {
        Self {
            kind,
            cause: Arc::new(cause),
            hops: 0,
        }
    }

    /// Whether the cause is exactly `E`.
    pub fn is<E>(&self) -> bool
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.cause.downcast_ref::<E>().is_some()
    }

    /// Borrow the cause as `E`, if that is its exact type.
    pub fn cause_as<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.cause.downcast_ref::<E>()
    }

    /// The same escalation, one handler hop later.
    pub fn after_hop(&self) -> Self {
        Self {
            kind: self.kind,
            cause: Arc::clone(&self.cause),
            hops: self.hops + 1,
        }
    }
}

/// Why a team refused an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The team has been shut down.
    ShutDown,

    /// The team's queue is full and no backpressure policy is configured.
    Saturated,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShutDown => "shut down",
            Self::Saturated => "saturated",
        };
        f.write_str(s)
    }
}

/// A team refused to take an assignment.
///
/// Fatal for the affected job node only; the rest of the process continues.
#[derive(Debug, Clone, Error)]
#[error("team '{team}' rejected assignment: {reason}")]
pub struct TeamRejection {
    /// Name of the refusing team.
    pub team: String,

    /// Why the assignment was refused.
    pub reason: RejectionReason,
}

impl TeamRejection {
    /// Create a rejection.
    pub fn new(team: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            team: team.into(),
            reason,
        }
    }
}

/// A cleanup failure captured during scope teardown.
///
/// Delivered to the office's recycle handler, never to the business flow
/// that used the object.
#[derive(Debug, Clone, Error)]
#[error("cleanup of '{object}' failed: {cause}")]
pub struct CleanupEscalation {
    /// Name of the object whose recycle failed.
    pub object: String,

    /// Underlying cause.
    pub cause: Arc<anyhow::Error>,
}

impl CleanupEscalation {
    /// Wrap a recycle failure.
    pub fn new(object: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            object: object.into(),
            cause: Arc::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("order rejected: {0}")]
    struct OrderRejected(String);

    #[test]
    fn escalation_exact_type() {
        let esc = Escalation::new(
            FailureKind::TaskInvocationFailure,
            anyhow::Error::new(OrderRejected("no stock".to_string())),
        );
        assert!(esc.is::<OrderRejected>());
        assert_eq!(esc.cause_as::<OrderRejected>().map(|e| e.0.as_str()), Some("no stock"));
        assert!(!esc.is::<std::io::Error>());
    }

    #[test]
    fn escalation_hop_counting() {
        let esc = Escalation::new(FailureKind::DutyInvocationFailure, anyhow::anyhow!("boom"));
        assert_eq!(esc.hops, 0);
        let hopped = esc.after_hop().after_hop();
        assert_eq!(hopped.hops, 2);
        assert_eq!(hopped.kind, FailureKind::DutyInvocationFailure);
    }

    #[test]
    fn kind_names() {
        assert_eq!(FailureKind::SourcingFailure.as_str(), "sourcing_failure");
        assert_eq!(FailureKind::TeamRejection.as_str(), "team_rejection");
    }
}

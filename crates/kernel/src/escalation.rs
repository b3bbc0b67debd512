//! Escalation tables and the handler search.
//!
//! Each scope owns an ordered table. Lookup runs two passes: exact
//! cause-type entries first, then kind-level and catch-all entries, so an
//! exact match always beats a broader one no matter how the table was
//! declared. Within a pass the first declared hit wins.

use bureau_core::{Escalation, FailureKind};

use crate::meta::TaskRef;

/// Upper bound on handler hops for one escalation.
///
/// A handler that fails hands its escalation one level further out; past
/// this bound the search is abandoned and the process handler takes over,
/// which guarantees termination even for mutually-failing handlers.
pub const MAX_ESCALATION_HOPS: u32 = 8;

/// How one table entry decides whether it handles an escalation.
#[derive(Clone)]
pub(crate) enum MatchRule {
    /// The cause is exactly the named type.
    Exact {
        name: &'static str,
        pred: fn(&anyhow::Error) -> bool,
    },

    /// The escalation carries this failure kind.
    Kind(FailureKind),

    /// Always matches.
    Any,
}

impl MatchRule {
    /// Rule matching a cause of exactly type `E`.
    pub(crate) fn exact<E>() -> Self
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Exact {
            name: std::any::type_name::<E>(),
            pred: is_exactly::<E>,
        }
    }
}

fn is_exactly<E>(cause: &anyhow::Error) -> bool
where
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    cause.downcast_ref::<E>().is_some()
}

/// One bound escalation entry.
pub(crate) struct EscalationEntry {
    pub rule: MatchRule,
    pub handler: TaskRef,
}

/// Ordered escalation table for one scope.
pub(crate) struct EscalationProcedure {
    entries: Vec<EscalationEntry>,
}

impl EscalationProcedure {
    /// Build from bound entries.
    pub fn new(entries: Vec<EscalationEntry>) -> Self {
        Self { entries }
    }

    /// Find the handler for `escalation`, if this table has one.
    pub fn search(&self, escalation: &Escalation) -> Option<TaskRef> {
        for entry in &self.entries {
            if let MatchRule::Exact { name, pred } = &entry.rule {
                if pred(&escalation.cause) {
                    tracing::debug!(matcher = *name, "escalation matched exact-type entry");
                    return Some(entry.handler);
                }
            }
        }
        for entry in &self.entries {
            match &entry.rule {
                MatchRule::Exact { .. } => {}
                MatchRule::Kind(kind) if *kind == escalation.kind => {
                    return Some(entry.handler);
                }
                MatchRule::Kind(_) => {}
                MatchRule::Any => return Some(entry.handler),
            }
        }
        None
    }
}

//! Bureau core data models.
//!
//! This crate defines the identifiers, bind-time descriptors, and failure
//! taxonomy shared by the execution kernel and the team implementations.

#![warn(missing_docs)]

// Core identities
mod id;
mod index;

// Bind-time metadata
mod descriptor;

// Failure taxonomy
mod error;

// Re-exports
pub use id::{FlowId, ProcessId};
pub use index::{DutyKey, FlowKey, ObjectRef, ObjectScope, TeamIndex};

pub use descriptor::{
    AdministratorDescriptor, ArgBinding, DutyBinding, ExtensionBinding, ObjectDescriptor,
    TaskDescriptor, TaskTarget, WorkDescriptor,
};

pub use error::{
    CleanupEscalation, Escalation, FailureKind, RejectionReason, TeamRejection,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

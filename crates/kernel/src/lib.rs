//! Bureau execution kernel.
//!
//! A continuation-passing job scheduler: business tasks grouped on work
//! objects run as job nodes over pluggable teams, with scoped managed
//! objects resolved per invocation, pre/post administration duties, and a
//! structured escalation search for failures.
//!
//! Build an [`Office`] from an [`OfficeConfig`], then [`Office::invoke`] a
//! work. The returned [`ProcessHandle`] reports how the invocation ended.

// Contracts and configuration
mod config;
mod contract;

// Bind step
mod escalation;
mod meta;

// Runtime
mod admin;
mod container;
mod flow;
mod job;
mod office;
mod state;

// Re-exports
pub use config::{
    AdministratorConfig, BuildError, EscalationConfig, ObjectConfig, OfficeConfig, RecycleHandler,
    TaskConfig, TeamConfig, WorkConfig,
};
pub use container::SourcingReceiver;
pub use contract::{
    Administrator, AdministratorFactory, ContextError, DutyContext, ExtensionExtractor, Job,
    ManagedObjectSource, ObjectHandle, RecycleUnit, SourcingContext, Task, TaskContext, Team,
    WorkFactory,
};
pub use escalation::MAX_ESCALATION_HOPS;
pub use office::{InvokeError, Office, ProcessHandle, ProcessOutcome, ProcessReport};

#[cfg(test)]
pub(crate) mod testing;

//! Contracts between the kernel and user-supplied logic.
//!
//! Tasks, administrators, work factories, managed object sources, recycle
//! units, and teams all plug in through the traits here. Everything is
//! synchronous: the kernel suspends by re-queuing job nodes, never by
//! blocking a worker.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use bureau_core::{DutyKey, Escalation, FlowKey, TeamRejection};

use crate::container::SourcingReceiver;

/// Shared handle to a business resource or work object instance.
pub type ObjectHandle = Arc<dyn Any + Send + Sync>;

/// Extracts an extension view from a managed object, for duties to operate on.
pub type ExtensionExtractor = Arc<dyn Fn(&ObjectHandle) -> Option<ObjectHandle> + Send + Sync>;

/// A unit of business logic bound to a work object.
///
/// Returning `Some(value)` passes that value as the parameter of the next
/// task in the sequence.
pub trait Task: Send + Sync {
    /// Execute the task body.
    fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<Option<Value>, anyhow::Error>;
}

impl<F> Task for F
where
    F: Fn(&mut TaskContext<'_>) -> Result<Option<Value>, anyhow::Error> + Send + Sync,
{
    fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<Option<Value>, anyhow::Error> {
        self(ctx)
    }
}

/// Creates the business object for one work invocation.
pub trait WorkFactory: Send + Sync {
    /// Create a fresh work object.
    fn create_work(&self) -> ObjectHandle;
}

impl<F> WorkFactory for F
where
    F: Fn() -> ObjectHandle + Send + Sync,
{
    fn create_work(&self) -> ObjectHandle {
        self()
    }
}

/// Supplies managed object instances, synchronously or asynchronously.
///
/// The receiver may be completed from any thread; the kernel installs the
/// result under the container's lock before reactivating dependents.
pub trait ManagedObjectSource: Send + Sync {
    /// Source one instance, reporting through `receiver`.
    fn source(&self, ctx: SourcingContext<'_>, receiver: SourcingReceiver);
}

/// Dependencies available while sourcing a managed object.
pub struct SourcingContext<'a> {
    dependencies: &'a [ObjectHandle],
}

impl<'a> SourcingContext<'a> {
    pub(crate) fn new(dependencies: &'a [ObjectHandle]) -> Self {
        Self { dependencies }
    }

    /// Declared dependencies, in descriptor order.
    pub fn dependencies(&self) -> &[ObjectHandle] {
        self.dependencies
    }

    /// Downcast dependency `index`.
    pub fn dependency_as<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ContextError> {
        let handle = self
            .dependencies
            .get(index)
            .ok_or(ContextError::NoSuchObject { index })?;
        handle
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::ObjectType { index })
    }
}

/// Cross-cutting logic run before or after administered tasks.
pub trait Administrator: Send + Sync {
    /// Perform one duty.
    fn do_duty(&self, duty: DutyKey, ctx: &mut DutyContext<'_>) -> Result<(), anyhow::Error>;
}

/// Creates an administrator; invoked lazily, once per scope.
pub trait AdministratorFactory: Send + Sync {
    /// Create the administrator instance.
    fn create_administrator(&self) -> Arc<dyn Administrator>;
}

impl<F> AdministratorFactory for F
where
    F: Fn() -> Arc<dyn Administrator> + Send + Sync,
{
    fn create_administrator(&self) -> Arc<dyn Administrator> {
        self()
    }
}

/// Cleans up a managed object at scope teardown.
pub trait RecycleUnit: Send + Sync {
    /// Recycle the object. A failure becomes a `CleanupEscalation`.
    fn recycle(&self, object: ObjectHandle) -> Result<(), anyhow::Error>;
}

impl<F> RecycleUnit for F
where
    F: Fn(ObjectHandle) -> Result<(), anyhow::Error> + Send + Sync,
{
    fn recycle(&self, object: ObjectHandle) -> Result<(), anyhow::Error> {
        self(object)
    }
}

/// A scheduled unit of execution handed to a team.
pub trait Job: Send + Sync {
    /// Run the job to a suspension point or completion.
    fn run(&self);
}

/// Worker pool abstraction job nodes are statically bound to.
///
/// The kernel holds no thread primitives of its own; implementations decide
/// how (and on which threads) assigned jobs run. Exactly one worker may run
/// a given job at a time.
pub trait Team: Send + Sync {
    /// Take responsibility for running `job`.
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection>;

    /// Stop accepting work and release workers. Queued jobs drain first.
    fn shutdown(&self) {}
}

/// A flow spawn requested by a task body.
#[derive(Debug)]
pub(crate) struct FlowSpawn {
    pub key: FlowKey,
    pub parameter: Value,
    pub join: bool,
}

/// Execution context handed to a task body.
pub struct TaskContext<'a> {
    parameter: &'a Value,
    escalation: Option<&'a Escalation>,
    work: &'a ObjectHandle,
    objects: &'a [Option<ObjectHandle>],
    flow_count: usize,
    spawns: Vec<FlowSpawn>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        parameter: &'a Value,
        escalation: Option<&'a Escalation>,
        work: &'a ObjectHandle,
        objects: &'a [Option<ObjectHandle>],
        flow_count: usize,
    ) -> Self {
        Self {
            parameter,
            escalation,
            work,
            objects,
            flow_count,
            spawns: Vec::new(),
        }
    }

    /// The parameter this invocation was activated with.
    pub fn parameter(&self) -> &Value {
        self.parameter
    }

    /// The escalation being handled, when this task is a handler.
    pub fn escalation(&self) -> Option<&Escalation> {
        self.escalation
    }

    /// The work object shared by tasks of this flow.
    pub fn work(&self) -> &ObjectHandle {
        self.work
    }

    /// Downcast the work object.
    pub fn work_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ContextError> {
        self.work
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::WorkType)
    }

    /// The managed object bound at argument position `index`.
    pub fn object(&self, index: usize) -> Result<&ObjectHandle, ContextError> {
        match self.objects.get(index) {
            Some(Some(handle)) => Ok(handle),
            Some(None) => Err(ContextError::NotAnObject { index }),
            None => Err(ContextError::NoSuchObject { index }),
        }
    }

    /// Downcast the managed object at argument position `index`.
    pub fn object_as<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ContextError> {
        self.object(index)?
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::ObjectType { index })
    }

    /// Spawn a parallel flow. Does not block this sequence's continuation.
    pub fn spawn_flow(&mut self, key: FlowKey, parameter: Value) -> Result<(), ContextError> {
        self.push_spawn(key, parameter, false)
    }

    /// Spawn a parallel flow and hold this sequence's continuation until it
    /// completes.
    pub fn spawn_joined_flow(&mut self, key: FlowKey, parameter: Value) -> Result<(), ContextError> {
        self.push_spawn(key, parameter, true)
    }

    fn push_spawn(&mut self, key: FlowKey, parameter: Value, join: bool) -> Result<(), ContextError> {
        if key.index() >= self.flow_count {
            return Err(ContextError::UnknownFlow { key });
        }
        self.spawns.push(FlowSpawn {
            key,
            parameter,
            join,
        });
        Ok(())
    }

    pub(crate) fn take_spawns(&mut self) -> Vec<FlowSpawn> {
        std::mem::take(&mut self.spawns)
    }
}

/// Execution context handed to a duty.
pub struct DutyContext<'a> {
    extensions: &'a [ObjectHandle],
    flow_count: usize,
    redirect: Option<(FlowKey, Value)>,
}

impl<'a> DutyContext<'a> {
    pub(crate) fn new(extensions: &'a [ObjectHandle], flow_count: usize) -> Self {
        Self {
            extensions,
            flow_count,
            redirect: None,
        }
    }

    /// Extension views of the administered objects, in descriptor order.
    pub fn extensions(&self) -> &[ObjectHandle] {
        self.extensions
    }

    /// Downcast the extension at `index`.
    pub fn extension_as<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ContextError> {
        let handle = self
            .extensions
            .get(index)
            .ok_or(ContextError::NoSuchObject { index })?;
        handle
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::ObjectType { index })
    }

    /// Redirect execution to one of the administrator's flows.
    ///
    /// From a pre-duty the administered task will not run; from a post-duty
    /// the task's own continuation is bypassed.
    pub fn do_flow(&mut self, key: FlowKey, parameter: Value) -> Result<(), ContextError> {
        if key.index() >= self.flow_count {
            return Err(ContextError::UnknownFlow { key });
        }
        self.redirect = Some((key, parameter));
        Ok(())
    }

    pub(crate) fn take_redirect(&mut self) -> Option<(FlowKey, Value)> {
        self.redirect.take()
    }
}

/// Misuse of a task or duty context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Argument position is bound to a parameter or flow, not an object.
    #[error("argument {index} is not a dependency binding")]
    NotAnObject {
        /// Offending argument position.
        index: usize,
    },

    /// Argument position out of range.
    #[error("no argument bound at position {index}")]
    NoSuchObject {
        /// Offending argument position.
        index: usize,
    },

    /// Object present but of a different type.
    #[error("argument {index} has a different type")]
    ObjectType {
        /// Offending argument position.
        index: usize,
    },

    /// Work object of a different type.
    #[error("work object has a different type")]
    WorkType,

    /// Flow key outside the declared flow table.
    #[error("no flow declared for key {key:?}")]
    UnknownFlow {
        /// Offending key.
        key: FlowKey,
    },
}

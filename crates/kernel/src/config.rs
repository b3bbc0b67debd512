//! Office configuration.
//!
//! An office is built from one explicit [`OfficeConfig`] value: descriptors
//! from the compile step paired with the runtime factories, sources, teams,
//! and escalation handlers they bind to. There is no global registry.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use bureau_core::{
    AdministratorDescriptor, ArgBinding, CleanupEscalation, DutyBinding, DutyKey, FailureKind,
    ObjectDescriptor, ObjectScope, TaskDescriptor, TaskTarget, WorkDescriptor,
};

use crate::contract::{
    AdministratorFactory, ExtensionExtractor, ManagedObjectSource, RecycleUnit, Task, Team,
    WorkFactory,
};
use crate::escalation::MatchRule;

/// Receives cleanup escalations captured during scope teardown.
pub type RecycleHandler = Arc<dyn Fn(&CleanupEscalation) + Send + Sync>;

/// Complete configuration for one office.
pub struct OfficeConfig {
    /// Office name, used in logs.
    pub name: String,

    /// How often parked sourcing deadlines are checked.
    pub monitor_interval: Duration,

    /// Registered teams, in [`bureau_core::TeamIndex`] order.
    pub teams: Vec<TeamConfig>,

    /// Process- and thread-scoped managed objects.
    pub objects: Vec<ObjectConfig>,

    /// Registered administrators.
    pub administrators: Vec<AdministratorConfig>,

    /// Registered works.
    pub works: Vec<WorkConfig>,

    /// Office-level escalation table, searched after the task level.
    pub escalations: Vec<EscalationConfig>,

    /// Receiver for cleanup escalations; defaults to logging.
    pub recycle_handler: Option<RecycleHandler>,
}

impl OfficeConfig {
    /// Create an empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            monitor_interval: Duration::from_millis(100),
            teams: Vec::new(),
            objects: Vec::new(),
            administrators: Vec::new(),
            works: Vec::new(),
            escalations: Vec::new(),
            recycle_handler: None,
        }
    }

    /// Register a team.
    pub fn with_team(mut self, team: TeamConfig) -> Self {
        self.teams.push(team);
        self
    }

    /// Register a process- or thread-scoped managed object.
    pub fn with_object(mut self, object: ObjectConfig) -> Self {
        self.objects.push(object);
        self
    }

    /// Register an administrator.
    pub fn with_administrator(mut self, administrator: AdministratorConfig) -> Self {
        self.administrators.push(administrator);
        self
    }

    /// Register a work.
    pub fn with_work(mut self, work: WorkConfig) -> Self {
        self.works.push(work);
        self
    }

    /// Append an office-level escalation entry.
    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalations.push(escalation);
        self
    }

    /// Set the cleanup escalation receiver.
    pub fn with_recycle_handler(mut self, handler: RecycleHandler) -> Self {
        self.recycle_handler = Some(handler);
        self
    }

    /// Set the sourcing deadline check interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }
}

/// One team registration.
pub struct TeamConfig {
    /// Team name, unique within the office.
    pub name: String,

    /// The worker pool itself.
    pub team: Arc<dyn Team>,

    /// Team whose jobs this team's workers may continue inline.
    pub continuation: Option<String>,
}

impl TeamConfig {
    /// Register a team.
    pub fn new(name: impl Into<String>, team: Arc<dyn Team>) -> Self {
        Self {
            name: name.into(),
            team,
            continuation: None,
        }
    }

    /// Let this team's workers run jobs of `team` inline after finishing.
    pub fn with_continuation(mut self, team: impl Into<String>) -> Self {
        self.continuation = Some(team.into());
        self
    }
}

/// One managed object registration.
pub struct ObjectConfig {
    /// Descriptor from the compile step.
    pub descriptor: ObjectDescriptor,

    /// Source producing instances.
    pub source: Arc<dyn ManagedObjectSource>,

    /// Named extension views duties can operate on.
    pub extensions: Vec<(String, ExtensionExtractor)>,

    /// Cleanup unit run at scope teardown.
    pub recycle: Option<Arc<dyn RecycleUnit>>,
}

impl ObjectConfig {
    /// Register an object at `scope`.
    pub fn new(
        name: impl Into<String>,
        scope: ObjectScope,
        source: Arc<dyn ManagedObjectSource>,
    ) -> Self {
        Self {
            descriptor: ObjectDescriptor::new(name, scope),
            source,
            extensions: Vec::new(),
            recycle: None,
        }
    }

    /// Declare a dependency on another object (same or broader scope).
    pub fn with_dependency(mut self, object: impl Into<String>) -> Self {
        self.descriptor.dependencies.push(object.into());
        self
    }

    /// Set the sourcing deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Register an extension view.
    pub fn with_extension(mut self, name: impl Into<String>, extractor: ExtensionExtractor) -> Self {
        self.extensions.push((name.into(), extractor));
        self
    }

    /// Set the cleanup unit.
    pub fn with_recycle(mut self, unit: Arc<dyn RecycleUnit>) -> Self {
        self.recycle = Some(unit);
        self
    }
}

/// One work registration.
pub struct WorkConfig {
    /// Descriptor from the compile step.
    pub descriptor: WorkDescriptor,

    /// Factory creating the business object per invocation.
    pub factory: Arc<dyn WorkFactory>,

    /// Function-scoped managed objects owned by this work.
    pub objects: Vec<ObjectConfig>,

    /// Tasks of this work.
    pub tasks: Vec<TaskConfig>,
}

impl WorkConfig {
    /// Register a work whose `initial` task starts each invocation.
    pub fn new(
        name: impl Into<String>,
        initial: impl Into<String>,
        factory: Arc<dyn WorkFactory>,
    ) -> Self {
        Self {
            descriptor: WorkDescriptor::new(name, initial),
            factory,
            objects: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Register a function-scoped object.
    pub fn with_object(mut self, object: ObjectConfig) -> Self {
        self.objects.push(object);
        self
    }

    /// Register a task.
    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }
}

/// One task registration.
pub struct TaskConfig {
    /// Descriptor from the compile step.
    pub descriptor: TaskDescriptor,

    /// The task body.
    pub logic: Arc<dyn Task>,

    /// Task-level escalation table, searched first.
    pub escalations: Vec<EscalationConfig>,
}

impl TaskConfig {
    /// Register a task on `team`.
    pub fn new(name: impl Into<String>, team: impl Into<String>, logic: Arc<dyn Task>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(name, team),
            logic,
            escalations: Vec::new(),
        }
    }

    /// Append an argument binding.
    pub fn with_binding(mut self, binding: ArgBinding) -> Self {
        self.descriptor.bindings.push(binding);
        self
    }

    /// Bind the next argument position to a managed object.
    pub fn with_dependency(mut self, object: impl Into<String>) -> Self {
        self.descriptor.bindings.push(ArgBinding::Dependency {
            object: object.into(),
        });
        self
    }

    /// Set the statically-next task.
    pub fn with_next(mut self, next: TaskTarget) -> Self {
        self.descriptor.next = Some(next);
        self
    }

    /// Append a flow table entry.
    pub fn with_flow(mut self, target: TaskTarget) -> Self {
        self.descriptor.flows.push(target);
        self
    }

    /// Attach a duty run before the task.
    pub fn with_pre_duty(mut self, administrator: impl Into<String>, duty: DutyKey) -> Self {
        self.descriptor.pre_duties.push(DutyBinding {
            administrator: administrator.into(),
            duty,
        });
        self
    }

    /// Attach a duty run after the task.
    pub fn with_post_duty(mut self, administrator: impl Into<String>, duty: DutyKey) -> Self {
        self.descriptor.post_duties.push(DutyBinding {
            administrator: administrator.into(),
            duty,
        });
        self
    }

    /// Append a task-level escalation entry.
    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalations.push(escalation);
        self
    }
}

/// One administrator registration.
pub struct AdministratorConfig {
    /// Descriptor from the compile step.
    pub descriptor: AdministratorDescriptor,

    /// Factory creating the administrator lazily, once per scope.
    pub factory: Arc<dyn AdministratorFactory>,
}

impl AdministratorConfig {
    /// Register an administrator.
    pub fn new(name: impl Into<String>, factory: Arc<dyn AdministratorFactory>) -> Self {
        Self {
            descriptor: AdministratorDescriptor::new(name),
            factory,
        }
    }

    /// Administer the `extension` view of `object`.
    pub fn administering(mut self, object: impl Into<String>, extension: impl Into<String>) -> Self {
        self.descriptor.administers.push(bureau_core::ExtensionBinding {
            object: object.into(),
            extension: extension.into(),
        });
        self
    }

    /// Append a flow table entry available to duties via `do_flow`.
    pub fn with_flow(mut self, target: TaskTarget) -> Self {
        self.descriptor.flows.push(target);
        self
    }
}

/// One escalation table entry: a matcher and its handler task.
pub struct EscalationConfig {
    pub(crate) rule: MatchRule,
    /// Handler flow activated when the matcher hits.
    pub handler: TaskTarget,
}

impl EscalationConfig {
    /// Match a cause of exactly type `E`.
    ///
    /// Exact entries take precedence over kind-level entries regardless of
    /// declaration order.
    pub fn exact<E>(handler: TaskTarget) -> Self
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self {
            rule: MatchRule::exact::<E>(),
            handler,
        }
    }

    /// Match any escalation of `kind`.
    pub fn kind(kind: FailureKind, handler: TaskTarget) -> Self {
        Self {
            rule: MatchRule::Kind(kind),
            handler,
        }
    }

    /// Match every escalation.
    pub fn any(handler: TaskTarget) -> Self {
        Self {
            rule: MatchRule::Any,
            handler,
        }
    }
}

/// A configuration the builder refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Two teams share a name.
    #[error("duplicate team '{0}'")]
    DuplicateTeam(String),

    /// Two objects share a name within one scope namespace.
    #[error("duplicate object '{0}'")]
    DuplicateObject(String),

    /// Two works share a name.
    #[error("duplicate work '{0}'")]
    DuplicateWork(String),

    /// Two tasks share a name within one work.
    #[error("duplicate task '{task}' in work '{work}'")]
    DuplicateTask {
        /// Owning work.
        work: String,
        /// Offending task name.
        task: String,
    },

    /// Two administrators share a name.
    #[error("duplicate administrator '{0}'")]
    DuplicateAdministrator(String),

    /// A task names a team that is not registered.
    #[error("task '{task}' is assigned to unknown team '{team}'")]
    UnknownTeam {
        /// Referring task.
        task: String,
        /// Missing team name.
        team: String,
    },

    /// A team names a continuation team that is not registered.
    #[error("team '{team}' continues unknown team '{continuation}'")]
    UnknownContinuationTeam {
        /// Referring team.
        team: String,
        /// Missing team name.
        continuation: String,
    },

    /// A binding or dependency names an object that is not visible.
    #[error("'{referrer}' depends on unknown object '{object}'")]
    UnknownObject {
        /// Referring task or object.
        referrer: String,
        /// Missing object name.
        object: String,
    },

    /// A target names a task that is not registered.
    #[error("unknown task '{task}' in work '{work}'")]
    UnknownTask {
        /// Work searched.
        work: String,
        /// Missing task name.
        task: String,
    },

    /// A target names a work that is not registered.
    #[error("unknown work '{0}'")]
    UnknownWork(String),

    /// An office-level target left its work unnamed.
    #[error("office-level target '{0}' must name a work")]
    UnqualifiedTarget(String),

    /// A duty binding names an administrator that is not registered.
    #[error("task '{task}' binds unknown administrator '{administrator}'")]
    UnknownAdministrator {
        /// Referring task.
        task: String,
        /// Missing administrator name.
        administrator: String,
    },

    /// An administrator names an extension the object does not register.
    #[error("administrator '{administrator}' uses unknown extension '{extension}' of '{object}'")]
    UnknownExtension {
        /// Referring administrator.
        administrator: String,
        /// Administered object.
        object: String,
        /// Missing extension name.
        extension: String,
    },

    /// An object depends on a narrower scope than its own.
    #[error("object '{object}' ({scope}) cannot depend on '{dependency}' ({dependency_scope})")]
    ScopeViolation {
        /// Depending object.
        object: String,
        /// Its scope.
        scope: ObjectScope,
        /// Dependency name.
        dependency: String,
        /// Dependency scope.
        dependency_scope: ObjectScope,
    },

    /// Object dependencies form a cycle.
    #[error("dependency cycle through object '{0}'")]
    DependencyCycle(String),

    /// An office-level object was declared function-scoped.
    #[error("object '{0}' must be process or thread scoped at office level")]
    FunctionScopeAtOffice(String),

    /// A work-level object was not declared function-scoped.
    #[error("object '{object}' in work '{work}' must be function scoped")]
    NonFunctionScopeInWork {
        /// Owning work.
        work: String,
        /// Offending object.
        object: String,
    },

    /// A work has no tasks.
    #[error("work '{0}' declares no tasks")]
    NoTasks(String),

    /// A work's initial task is not registered.
    #[error("work '{work}' has unknown initial task '{task}'")]
    UnknownInitialTask {
        /// Owning work.
        work: String,
        /// Missing task name.
        task: String,
    },
}

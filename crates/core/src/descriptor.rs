//! Bind-time descriptors - the declarative metadata an office is built from.
//!
//! Descriptors are plain data produced by an external compile step. The
//! builder pairs them with runtime factories and resolves every name to an
//! index, so the kernel itself performs no lookup and no reflection.

use serde::{Deserialize, Serialize};

use crate::index::{DutyKey, FlowKey, ObjectScope};

/// How one argument position of a task is filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgBinding {
    /// A managed object, looked up by name at bind time.
    Dependency {
        /// Name of the bound object.
        object: String,
    },

    /// The parameter passed into the task invocation.
    Parameter,

    /// A flow the task may spawn.
    Flow {
        /// Key into the task's flow table.
        key: FlowKey,
    },
}

/// Target of a continuation, flow, or escalation handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    /// Owning work; `None` means the same work as the referring task.
    pub work: Option<String>,

    /// Task name within that work.
    pub task: String,
}

impl TaskTarget {
    /// Target a task in the same work.
    pub fn task(name: impl Into<String>) -> Self {
        Self {
            work: None,
            task: name.into(),
        }
    }

    /// Target a task in another work.
    pub fn in_work(work: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            work: Some(work.into()),
            task: task.into(),
        }
    }
}

/// A duty attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyBinding {
    /// Name of the administrator supplying the duty.
    pub administrator: String,

    /// Which duty of that administrator.
    pub duty: DutyKey,
}

/// Descriptor of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task name, unique within its work.
    pub name: String,

    /// Team the task is assigned to.
    pub team: String,

    /// Ordered argument bindings, fixed at bind time.
    pub bindings: Vec<ArgBinding>,

    /// Statically-next task in the sequence.
    pub next: Option<TaskTarget>,

    /// Flow table; `FlowKey(i)` refers to entry `i`.
    pub flows: Vec<TaskTarget>,

    /// Duties run directly before the task.
    pub pre_duties: Vec<DutyBinding>,

    /// Duties run directly after the task.
    pub post_duties: Vec<DutyBinding>,
}

impl TaskDescriptor {
    /// Create a descriptor with no bindings, continuation, flows, or duties.
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            bindings: Vec::new(),
            next: None,
            flows: Vec::new(),
            pre_duties: Vec::new(),
            post_duties: Vec::new(),
        }
    }
}

/// Descriptor of one managed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object name, unique within its scope table.
    pub name: String,

    /// Scope the object is bound at.
    pub scope: ObjectScope,

    /// Objects this object's source depends on (same or broader scope).
    pub dependencies: Vec<String>,

    /// Sourcing deadline in milliseconds; `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl ObjectDescriptor {
    /// Create a descriptor with no dependencies and no deadline.
    pub fn new(name: impl Into<String>, scope: ObjectScope) -> Self {
        Self {
            name: name.into(),
            scope,
            dependencies: Vec::new(),
            timeout_ms: None,
        }
    }
}

/// Descriptor of one work: a named group of tasks sharing a business object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Work name, unique within the office.
    pub name: String,

    /// Task activated when the work is invoked.
    pub initial_task: String,
}

impl WorkDescriptor {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>, initial_task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_task: initial_task.into(),
        }
    }
}

/// An extension interface an administrator operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionBinding {
    /// Name of the administered object.
    pub object: String,

    /// Name of the extension registered on that object.
    pub extension: String,
}

/// Descriptor of one administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministratorDescriptor {
    /// Administrator name, unique within the office.
    pub name: String,

    /// Extension interfaces the duties operate on.
    pub administers: Vec<ExtensionBinding>,

    /// Flow table available to duties via `do_flow`.
    pub flows: Vec<TaskTarget>,
}

impl AdministratorDescriptor {
    /// Create a descriptor with no administered objects and no flows.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            administers: Vec::new(),
            flows: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_descriptor_roundtrip() {
        let mut desc = TaskDescriptor::new("process-order", "pool");
        desc.bindings.push(ArgBinding::Parameter);
        desc.bindings.push(ArgBinding::Dependency {
            object: "ledger".to_string(),
        });
        desc.next = Some(TaskTarget::task("store-order"));
        desc.flows.push(TaskTarget::in_work("audit", "record"));

        let json = serde_json::to_string(&desc).expect("serialize");
        let back: TaskDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.name, "process-order");
        assert_eq!(back.bindings, desc.bindings);
        assert_eq!(back.next, desc.next);
        assert_eq!(back.flows, desc.flows);
    }

    #[test]
    fn target_defaults_to_same_work() {
        let t = TaskTarget::task("next");
        assert!(t.work.is_none());
        let t = TaskTarget::in_work("other", "next");
        assert_eq!(t.work.as_deref(), Some("other"));
    }
}

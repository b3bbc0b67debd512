//! Bind-time indices into office metadata.
//!
//! Every index is resolved once when an office is built; the running kernel
//! never looks anything up by name.

use serde::{Deserialize, Serialize};

/// Index of a registered team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamIndex(usize);

impl TeamIndex {
    /// Wrap a raw index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TeamIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team#{}", self.0)
    }
}

/// Key into a task's (or administrator's) declared flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey(usize);

impl FlowKey {
    /// Wrap a raw key.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Key identifying one duty of an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DutyKey(usize);

impl DutyKey {
    /// Wrap a raw key.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Scope a managed object is bound at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectScope {
    /// One instance per process invocation.
    Process,
    /// One instance per thread of control.
    Thread,
    /// One instance per work invocation.
    Function,
}

impl ObjectScope {
    /// Whether an object at this scope may be depended on from `narrower`.
    ///
    /// Dependencies always point at the same or a broader scope.
    pub fn reachable_from(self, narrower: ObjectScope) -> bool {
        self.breadth() >= narrower.breadth()
    }

    fn breadth(self) -> u8 {
        match self {
            Self::Process => 2,
            Self::Thread => 1,
            Self::Function => 0,
        }
    }
}

impl std::fmt::Display for ObjectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Process => "process",
            Self::Thread => "thread",
            Self::Function => "function",
        };
        f.write_str(s)
    }
}

/// Bound reference to a managed object: which scope table, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Scope table the object lives in.
    pub scope: ObjectScope,
    /// Slot within that table.
    pub index: usize,
}

impl ObjectRef {
    /// Create a reference.
    pub fn new(scope: ObjectScope, index: usize) -> Self {
        Self { scope, index }
    }
}

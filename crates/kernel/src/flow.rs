//! Flows: ordered job sequences.
//!
//! A flow owns one work container and runs its nodes strictly in declared
//! order; the kernel only ever hands out the next node after the current
//! one completes. Parallel spawns get a fresh thread state; joins gate the
//! spawner's continuation, never a worker thread.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use bureau_core::{Escalation, FlowId};

use crate::container::ManagedObjectContainer;
use crate::contract::ObjectHandle;
use crate::job::JobNode;
use crate::meta::{TaskMeta, TaskRef};
use crate::state::ThreadState;

/// The work object and function-scoped containers of one flow.
pub(crate) struct WorkContainer {
    pub object: ObjectHandle,
    pub containers: Vec<Arc<ManagedObjectContainer>>,
}

struct FlowInner {
    last_result: Value,
    pending_joins: usize,
    tail_done: bool,
    deferred: Option<Arc<JobNode>>,
    completed: bool,
}

/// One job sequence, owned by exactly one thread state.
pub(crate) struct Flow {
    pub id: FlowId,
    pub thread: Arc<ThreadState>,
    pub work: usize,
    pub work_container: WorkContainer,
    inner: Mutex<FlowInner>,
}

impl Flow {
    /// Open a flow for `work` on `thread`, creating the work object and its
    /// function-scoped containers.
    pub fn new(thread: Arc<ThreadState>, work: usize) -> Arc<Self> {
        let meta = Arc::clone(&thread.process.meta);
        let work_meta = &meta.works[work];
        let work_container = WorkContainer {
            object: work_meta.factory.create_work(),
            containers: work_meta
                .objects
                .iter()
                .map(|m| ManagedObjectContainer::new(Arc::clone(m)))
                .collect(),
        };
        thread.flow_opened();
        Arc::new(Self {
            id: FlowId::new(),
            thread,
            work,
            work_container,
            inner: Mutex::new(FlowInner {
                last_result: Value::Null,
                pending_joins: 0,
                tail_done: false,
                deferred: None,
                completed: false,
            }),
        })
    }

    /// Build the node chain for one task invocation: pre-duties, the task,
    /// post-duties, linked in execution order. Returns the head.
    pub fn build_group(
        self: &Arc<Self>,
        task: &Arc<TaskMeta>,
        parameter: Value,
        escalation: Option<Escalation>,
    ) -> Arc<JobNode> {
        let mut after: Option<Arc<JobNode>> = None;
        for duty in task.post_duties.iter().rev() {
            after = Some(JobNode::new_duty(
                Arc::clone(self),
                Arc::clone(task),
                duty.admin,
                duty.key,
                after,
            ));
        }
        let mut head = JobNode::new_task(
            Arc::clone(self),
            Arc::clone(task),
            parameter,
            escalation,
            after,
        );
        for duty in task.pre_duties.iter().rev() {
            head = JobNode::new_duty(
                Arc::clone(self),
                Arc::clone(task),
                duty.admin,
                duty.key,
                Some(head),
            );
        }
        head
    }

    /// Stash a task's return value for the group tail to pick up.
    pub fn set_result(&self, value: Value) {
        self.inner.lock().last_result = value;
    }

    pub fn take_result(&self) -> Value {
        std::mem::take(&mut self.inner.lock().last_result)
    }

    /// Gate this flow's continuation on one more parallel child.
    pub fn add_join(&self) {
        self.inner.lock().pending_joins += 1;
    }

    /// A group tail finished; build and hand back what runs next.
    ///
    /// Crossing into another work opens a fresh flow (and completes this
    /// one); pending joins defer the hand-off instead. `None` means nothing
    /// runs now.
    pub fn advance(
        self: &Arc<Self>,
        target: Option<TaskRef>,
        parameter: Value,
        escalation: Option<Escalation>,
    ) -> Option<Arc<JobNode>> {
        let meta = Arc::clone(&self.thread.process.meta);
        let continuation = match target {
            Some(target) => Some(if target.work == self.work {
                self.build_group(meta.task(target), parameter, escalation)
            } else {
                let flow = Flow::new(Arc::clone(&self.thread), target.work);
                flow.build_group(meta.task(target), parameter, escalation)
            }),
            None => None,
        };
        let gated = {
            let mut inner = self.inner.lock();
            if inner.pending_joins > 0 {
                inner.tail_done = true;
                inner.deferred = continuation.clone();
                true
            } else {
                // The flow either continues or completes right now; a join
                // finishing later must not treat it as parked.
                inner.tail_done = false;
                false
            }
        };
        if gated {
            debug!(flow = %self.id, "continuation deferred on parallel joins");
            return None;
        }
        self.hand_off(continuation)
    }

    /// One joined child completed; release the continuation if it was the
    /// last one out.
    pub fn join_done(self: &Arc<Self>) {
        let ready = {
            let mut inner = self.inner.lock();
            inner.pending_joins = inner.pending_joins.saturating_sub(1);
            inner.pending_joins == 0 && inner.tail_done
        };
        if !ready {
            return;
        }
        let deferred = {
            let mut inner = self.inner.lock();
            inner.tail_done = false;
            inner.deferred.take()
        };
        if let Some(node) = self.hand_off(deferred) {
            node.activate();
        }
    }

    fn hand_off(self: &Arc<Self>, continuation: Option<Arc<JobNode>>) -> Option<Arc<JobNode>> {
        match continuation {
            Some(node) => {
                if !node.belongs_to(self) {
                    self.complete();
                }
                Some(node)
            }
            None => {
                self.complete();
                None
            }
        }
    }

    /// Close the flow: recycle function-scoped objects and notify the
    /// owning thread. Idempotent.
    pub fn complete(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.completed {
                return;
            }
            inner.completed = true;
        }
        debug!(flow = %self.id, "flow complete");
        crate::job::recycle_containers(
            &self.work_container.containers,
            &self.thread.process.meta.recycle_handler,
        );
        self.thread.flow_finished();
    }
}

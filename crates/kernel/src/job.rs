//! Job nodes: the scheduling atom.
//!
//! A node wraps one task, duty, or recycle invocation. Workers call
//! [`JobNode::execute`]; everything else - dependency parking, duty
//! redirects, continuation selection, the escalation search - happens in
//! here. Failures leave as [`Escalation`] values carried by the scheduler;
//! nothing unwinds across a team boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use bureau_core::{DutyKey, Escalation, FailureKind, ObjectRef, ObjectScope, TeamIndex};

use crate::admin::extract_extensions;
use crate::config::RecycleHandler;
use crate::container::{ManagedObjectContainer, Readiness};
use crate::contract::{DutyContext, FlowSpawn, Job, ObjectHandle, TaskContext};
use crate::escalation::MAX_ESCALATION_HOPS;
use crate::flow::Flow;
use crate::meta::{AdminMeta, BoundBinding, TaskMeta};
use crate::state::ThreadState;

/// What a node wraps, dispatched through one execution path.
pub(crate) enum NodeKind {
    Task {
        flow: Arc<Flow>,
        task: Arc<TaskMeta>,
    },
    Duty {
        flow: Arc<Flow>,
        task: Arc<TaskMeta>,
        admin: usize,
        key: DutyKey,
    },
    Recycle {
        container: Arc<ManagedObjectContainer>,
        handler: RecycleHandler,
    },
}

/// One scheduled invocation. Immutable once built; only the queued flag
/// changes, so nodes can be re-queued from any thread.
pub(crate) struct JobNode {
    kind: NodeKind,
    parameter: Value,
    escalation: Option<Escalation>,
    next: Option<Arc<JobNode>>,
    queued: AtomicBool,
}

/// Identity of the worker currently running a node, for the inline
/// continuation check.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerContext {
    pub team: Option<TeamIndex>,
    pub continuation: Option<TeamIndex>,
}

impl WorkerContext {
    fn detached() -> Self {
        Self {
            team: None,
            continuation: None,
        }
    }
}

struct Assignment {
    node: Arc<JobNode>,
    worker: WorkerContext,
}

impl Job for Assignment {
    fn run(&self) {
        Arc::clone(&self.node).execute(self.worker);
    }
}

enum Step {
    Next(Arc<JobNode>),
    Parked,
    Finished,
}

impl JobNode {
    pub(crate) fn new_task(
        flow: Arc<Flow>,
        task: Arc<TaskMeta>,
        parameter: Value,
        escalation: Option<Escalation>,
        next: Option<Arc<JobNode>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: NodeKind::Task { flow, task },
            parameter,
            escalation,
            next,
            queued: AtomicBool::new(false),
        })
    }

    pub(crate) fn new_duty(
        flow: Arc<Flow>,
        task: Arc<TaskMeta>,
        admin: usize,
        key: DutyKey,
        next: Option<Arc<JobNode>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: NodeKind::Duty {
                flow,
                task,
                admin,
                key,
            },
            parameter: Value::Null,
            escalation: None,
            next,
            queued: AtomicBool::new(false),
        })
    }

    pub(crate) fn new_recycle(
        container: Arc<ManagedObjectContainer>,
        handler: RecycleHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: NodeKind::Recycle { container, handler },
            parameter: Value::Null,
            escalation: None,
            next: None,
            queued: AtomicBool::new(false),
        })
    }

    fn flow(&self) -> Option<&Arc<Flow>> {
        match &self.kind {
            NodeKind::Task { flow, .. } | NodeKind::Duty { flow, .. } => Some(flow),
            NodeKind::Recycle { .. } => None,
        }
    }

    fn task_meta(&self) -> Option<&Arc<TaskMeta>> {
        match &self.kind {
            NodeKind::Task { task, .. } | NodeKind::Duty { task, .. } => Some(task),
            NodeKind::Recycle { .. } => None,
        }
    }

    pub(crate) fn team(&self) -> Option<TeamIndex> {
        self.task_meta().map(|t| t.team)
    }

    pub(crate) fn belongs_to(&self, flow: &Arc<Flow>) -> bool {
        self.flow().map(|f| Arc::ptr_eq(f, flow)).unwrap_or(false)
    }

    /// Queue this node on its bound team. Idempotent while queued.
    pub(crate) fn activate(self: &Arc<Self>) {
        let Some(flow) = self.flow() else {
            return;
        };
        let process = &flow.thread.process;
        if process.is_closed() {
            debug!("activation dropped, process closed");
            return;
        }
        if self.queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(team) = self.team() else {
            return;
        };
        let bound = &process.meta.teams[team.index()];
        let worker = WorkerContext {
            team: Some(team),
            continuation: bound.continuation,
        };
        let assignment = Box::new(Assignment {
            node: Arc::clone(self),
            worker,
        });
        if let Err(rejection) = bound.team.assign(assignment) {
            self.queued.store(false, Ordering::SeqCst);
            warn!(team = %bound.name, "assignment rejected: {rejection}");
            let escalation =
                self.reentrant(Escalation::new(FailureKind::TeamRejection, rejection.into()));
            self.escalate_detached(escalation);
        }
    }

    /// Run on the current thread, outside any team (recycle nodes).
    pub(crate) fn run_inline(self: Arc<Self>) {
        self.execute(WorkerContext::detached());
    }

    /// Worker entry point. Runs this node and keeps going inline while the
    /// next node's team matches the worker or its continuation team.
    fn execute(self: Arc<Self>, worker: WorkerContext) {
        let mut current = self;
        loop {
            match Arc::clone(&current).run_once() {
                Step::Parked | Step::Finished => return,
                Step::Next(next) => {
                    let inline = match (next.team(), worker.team) {
                        (Some(t), Some(mine)) if t == mine => true,
                        (Some(t), _) => worker.continuation == Some(t),
                        (None, _) => false,
                    };
                    let closed = next
                        .flow()
                        .map(|f| f.thread.process.is_closed())
                        .unwrap_or(true);
                    if inline && !closed {
                        current = next;
                    } else {
                        next.activate();
                        return;
                    }
                }
            }
        }
    }

    fn run_once(self: Arc<Self>) -> Step {
        self.queued.store(false, Ordering::SeqCst);
        match &self.kind {
            NodeKind::Recycle { container, handler } => {
                container.run_recycle(handler.as_ref());
                Step::Finished
            }
            NodeKind::Task { flow, task } => {
                let mut handles = Vec::with_capacity(task.required.len());
                for r in &task.required {
                    match self.ensure_ready(flow, *r) {
                        Readiness::Ready(handle) => handles.push(handle),
                        Readiness::NotReady => {
                            debug!(task = %task.name, "job parked waiting on managed object");
                            return Step::Parked;
                        }
                        Readiness::Failed(escalation) => {
                            return self.deliver(flow, task, self.reentrant(escalation));
                        }
                    }
                }
                self.run_task(flow, task, handles)
            }
            NodeKind::Duty {
                flow,
                task,
                admin,
                key,
            } => {
                let admin_meta = Arc::clone(&flow.thread.process.meta.administrators[*admin]);
                let mut handles = Vec::with_capacity(admin_meta.administers.len());
                for (r, _) in &admin_meta.administers {
                    match self.ensure_ready(flow, *r) {
                        Readiness::Ready(handle) => handles.push(handle),
                        Readiness::NotReady => {
                            debug!(
                                administrator = %admin_meta.name,
                                "duty parked waiting on managed object"
                            );
                            return Step::Parked;
                        }
                        Readiness::Failed(escalation) => {
                            return self.deliver(flow, task, self.reentrant(escalation));
                        }
                    }
                }
                self.run_duty(flow, task, &admin_meta, *admin, *key, handles)
            }
        }
    }

    /// Make `r` ready, sourcing its own dependencies first. Parks this node
    /// on the first container that is not ready.
    fn ensure_ready(self: &Arc<Self>, flow: &Arc<Flow>, r: ObjectRef) -> Readiness {
        let container = Self::container_at(flow, r);
        let meta = Arc::clone(container.meta());
        let mut dependencies = Vec::with_capacity(meta.dependencies.len());
        for dep in &meta.dependencies {
            match self.ensure_ready(flow, *dep) {
                Readiness::Ready(handle) => dependencies.push(handle),
                other => return other,
            }
        }
        container.poll(self, dependencies, &flow.thread.process.janitor)
    }

    fn container_at(flow: &Arc<Flow>, r: ObjectRef) -> Arc<ManagedObjectContainer> {
        match r.scope {
            ObjectScope::Function => Arc::clone(&flow.work_container.containers[r.index]),
            ObjectScope::Thread => Arc::clone(&flow.thread.containers[r.index]),
            ObjectScope::Process => Arc::clone(&flow.thread.process.containers[r.index]),
        }
    }

    fn run_task(
        self: &Arc<Self>,
        flow: &Arc<Flow>,
        task: &Arc<TaskMeta>,
        handles: Vec<ObjectHandle>,
    ) -> Step {
        let mut slots: Vec<Option<ObjectHandle>> = Vec::with_capacity(task.bindings.len());
        let mut handles = handles.into_iter();
        for binding in &task.bindings {
            slots.push(match binding {
                BoundBinding::Dependency(_) => handles.next(),
                BoundBinding::Parameter | BoundBinding::Flow(_) => None,
            });
        }
        let mut ctx = TaskContext::new(
            &self.parameter,
            self.escalation.as_ref(),
            &flow.work_container.object,
            &slots,
            task.flows.len(),
        );
        debug!(task = %task.name, "executing task");
        let outcome = catch_unwind(AssertUnwindSafe(|| task.logic.execute(&mut ctx)));
        let spawns = ctx.take_spawns();
        match outcome {
            Ok(Ok(result)) => {
                for spawn in spawns {
                    self.spawn_parallel(flow, task, spawn);
                }
                let value = result.unwrap_or(Value::Null);
                match &self.next {
                    Some(next) => {
                        flow.set_result(value);
                        Step::Next(Arc::clone(next))
                    }
                    None => match flow.advance(task.next, value, None) {
                        Some(node) => Step::Next(node),
                        None => Step::Finished,
                    },
                }
            }
            Ok(Err(cause)) => self.deliver(
                flow,
                task,
                self.reentrant(Escalation::new(FailureKind::TaskInvocationFailure, cause)),
            ),
            Err(payload) => self.deliver(
                flow,
                task,
                self.reentrant(Escalation::new(
                    FailureKind::TaskInvocationFailure,
                    panic_error(payload),
                )),
            ),
        }
    }

    fn spawn_parallel(&self, flow: &Arc<Flow>, task: &Arc<TaskMeta>, spawn: FlowSpawn) {
        let process = &flow.thread.process;
        if process.is_closed() {
            return;
        }
        let target = task.flows[spawn.key.index()];
        let meta = Arc::clone(&process.meta);
        debug!(task = %task.name, join = spawn.join, "spawning parallel flow");
        let child_thread = ThreadState::new(Arc::clone(process));
        if spawn.join {
            flow.add_join();
            let parent = Arc::clone(flow);
            child_thread.set_completion_hook(Box::new(move || parent.join_done()));
        }
        let child_flow = Flow::new(child_thread, target.work);
        let head = child_flow.build_group(meta.task(target), spawn.parameter, None);
        head.activate();
    }

    fn run_duty(
        self: &Arc<Self>,
        flow: &Arc<Flow>,
        task: &Arc<TaskMeta>,
        admin_meta: &Arc<AdminMeta>,
        admin: usize,
        key: DutyKey,
        handles: Vec<ObjectHandle>,
    ) -> Step {
        let meta = &flow.thread.process.meta;
        let extensions = match extract_extensions(admin_meta, &handles, meta) {
            Ok(extensions) => extensions,
            Err(cause) => {
                return self.deliver(
                    flow,
                    task,
                    self.reentrant(Escalation::new(FailureKind::DutyInvocationFailure, cause)),
                );
            }
        };
        let administrator = flow.thread.administrator(admin);
        let mut ctx = DutyContext::new(&extensions, admin_meta.flows.len());
        debug!(administrator = %admin_meta.name, task = %task.name, "performing duty");
        let outcome = catch_unwind(AssertUnwindSafe(|| administrator.do_duty(key, &mut ctx)));
        let redirect = ctx.take_redirect();
        match outcome {
            Ok(Ok(())) => {
                if let Some((flow_key, parameter)) = redirect {
                    // Redirect abandons the rest of this group: a pre-duty
                    // redirect means the administered task never runs.
                    let target = admin_meta.flows[flow_key.index()];
                    debug!(administrator = %admin_meta.name, "duty redirected the sequence");
                    match flow.advance(Some(target), parameter, None) {
                        Some(node) => Step::Next(node),
                        None => Step::Finished,
                    }
                } else {
                    match &self.next {
                        Some(next) => Step::Next(Arc::clone(next)),
                        None => {
                            let value = flow.take_result();
                            match flow.advance(task.next, value, None) {
                                Some(node) => Step::Next(node),
                                None => Step::Finished,
                            }
                        }
                    }
                }
            }
            Ok(Err(cause)) => self.deliver(
                flow,
                task,
                self.reentrant(Escalation::new(FailureKind::DutyInvocationFailure, cause)),
            ),
            Err(payload) => self.deliver(
                flow,
                task,
                self.reentrant(Escalation::new(
                    FailureKind::DutyInvocationFailure,
                    panic_error(payload),
                )),
            ),
        }
    }

    /// Bump the hop count when this node is itself an escalation handler.
    fn reentrant(&self, escalation: Escalation) -> Escalation {
        match &self.escalation {
            Some(prior) => {
                let mut escalation = escalation;
                escalation.hops = escalation.hops.max(prior.hops + 1);
                escalation
            }
            None => escalation,
        }
    }

    /// Run the escalation search from this node's scope outward and hand
    /// back the handler chain, or terminate the invocation.
    fn deliver(&self, flow: &Arc<Flow>, task: &Arc<TaskMeta>, escalation: Escalation) -> Step {
        let meta = &flow.thread.process.meta;
        warn!(
            task = %task.name,
            kind = %escalation.kind,
            hops = escalation.hops,
            "escalation: {}",
            escalation.cause
        );
        let handler = if escalation.hops >= MAX_ESCALATION_HOPS {
            warn!("escalation hop bound reached, handing to process level");
            None
        } else {
            task.escalations
                .search(&escalation)
                .or_else(|| meta.escalations.search(&escalation))
        };
        match handler {
            Some(target) => match flow.advance(Some(target), Value::Null, Some(escalation)) {
                Some(node) => Step::Next(node),
                None => Step::Finished,
            },
            None => {
                let process = &flow.thread.process;
                if process.begin_finish() {
                    error!(
                        process = %process.id,
                        task = %task.name,
                        "unhandled escalation, terminating invocation"
                    );
                    flow.complete();
                    process.finish(crate::office::ProcessOutcome::Fatal(escalation));
                } else {
                    flow.complete();
                }
                Step::Finished
            }
        }
    }

    /// Escalate outside a worker run (activation failures).
    fn escalate_detached(self: &Arc<Self>, escalation: Escalation) {
        let (flow, task) = match &self.kind {
            NodeKind::Task { flow, task } | NodeKind::Duty { flow, task, .. } => (flow, task),
            NodeKind::Recycle { .. } => return,
        };
        if let Step::Next(node) = self.deliver(flow, task, escalation) {
            node.activate();
        }
    }
}

/// Convert a panic payload into an error the escalation search can carry.
pub(crate) fn panic_error(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    if let Some(message) = payload.downcast_ref::<&str>() {
        anyhow::anyhow!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        anyhow::anyhow!("panic: {message}")
    } else {
        anyhow::anyhow!("panic in job body")
    }
}

/// Tear down a scope's containers through recycle nodes run inline.
pub(crate) fn recycle_containers(
    containers: &[Arc<ManagedObjectContainer>],
    handler: &RecycleHandler,
) {
    for container in containers {
        JobNode::new_recycle(Arc::clone(container), Arc::clone(handler)).run_inline();
    }
}

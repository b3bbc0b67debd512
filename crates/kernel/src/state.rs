//! Process and thread scope containers.
//!
//! A `ProcessState` groups everything one invocation owns; each thread of
//! control within it gets a `ThreadState`. Both count their open children
//! and tear their managed objects down when the count reaches zero. Lock
//! order is always flow, then thread, then process; the report slot and the
//! containers are leaves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use bureau_core::{ProcessId, Time};

use crate::admin::AdministratorContainer;
use crate::container::{Janitor, ManagedObjectContainer};
use crate::contract::Administrator;
use crate::job::recycle_containers;
use crate::meta::OfficeMeta;
use crate::office::{ProcessOutcome, ProcessReport};

/// Single-assignment slot the process handle waits on.
pub(crate) struct ReportSlot {
    report: Mutex<Option<ProcessReport>>,
    cond: Condvar,
}

impl ReportSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            report: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    pub fn deliver(&self, report: ProcessReport) {
        let mut slot = self.report.lock();
        if slot.is_none() {
            *slot = Some(report);
            self.cond.notify_all();
        }
    }

    pub fn wait(&self) -> ProcessReport {
        let mut slot = self.report.lock();
        loop {
            if let Some(report) = slot.as_ref() {
                return report.clone();
            }
            self.cond.wait(&mut slot);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ProcessReport> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.report.lock();
        loop {
            if let Some(report) = slot.as_ref() {
                return Some(report.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = self.cond.wait_for(&mut slot, deadline - now);
        }
    }

    pub fn try_get(&self) -> Option<ProcessReport> {
        self.report.lock().clone()
    }
}

struct ProcessInner {
    open_threads: usize,
    closed: bool,
    finishing: bool,
}

/// One process invocation: the outermost lock scope.
pub(crate) struct ProcessState {
    pub id: ProcessId,
    pub meta: Arc<OfficeMeta>,
    pub janitor: Arc<Janitor>,
    pub containers: Vec<Arc<ManagedObjectContainer>>,
    pub started_at: Time,
    slot: Arc<ReportSlot>,
    inner: Mutex<ProcessInner>,
}

impl ProcessState {
    pub fn new(meta: Arc<OfficeMeta>, janitor: Arc<Janitor>, slot: Arc<ReportSlot>) -> Arc<Self> {
        let containers = meta
            .process_objects
            .iter()
            .map(|m| ManagedObjectContainer::new(Arc::clone(m)))
            .collect();
        Arc::new(Self {
            id: ProcessId::new(),
            meta,
            janitor,
            containers,
            started_at: chrono::Utc::now(),
            slot,
            inner: Mutex::new(ProcessInner {
                open_threads: 0,
                closed: false,
                finishing: false,
            }),
        })
    }

    /// Whether further job activation should be dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn thread_opened(&self) {
        self.inner.lock().open_threads += 1;
    }

    pub fn thread_finished(self: &Arc<Self>) {
        let last = {
            let mut inner = self.inner.lock();
            inner.open_threads = inner.open_threads.saturating_sub(1);
            inner.open_threads == 0
        };
        if last && self.begin_finish() {
            self.finish(ProcessOutcome::Complete);
        }
    }

    /// Claim the right to finish this process. The winner must call
    /// [`finish`](Self::finish); everyone else backs off.
    pub fn begin_finish(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.finishing {
            return false;
        }
        inner.finishing = true;
        inner.closed = true;
        true
    }

    /// Tear down process-scoped objects and deliver the report.
    pub fn finish(&self, outcome: ProcessOutcome) {
        recycle_containers(&self.containers, &self.meta.recycle_handler);
        match &outcome {
            ProcessOutcome::Complete => {
                info!(process = %self.id, "process invocation complete");
            }
            ProcessOutcome::Fatal(escalation) => {
                error!(
                    process = %self.id,
                    kind = %escalation.kind,
                    "process invocation terminated: {}",
                    escalation.cause
                );
            }
        }
        self.slot.deliver(ProcessReport {
            id: self.id,
            started_at: self.started_at,
            finished_at: chrono::Utc::now(),
            outcome,
        });
    }
}

struct ThreadInner {
    open_flows: usize,
    completion_hook: Option<Box<dyn FnOnce() + Send>>,
}

/// One thread of control within a process.
pub(crate) struct ThreadState {
    pub process: Arc<ProcessState>,
    pub containers: Vec<Arc<ManagedObjectContainer>>,
    admins: Vec<AdministratorContainer>,
    inner: Mutex<ThreadInner>,
}

impl ThreadState {
    pub fn new(process: Arc<ProcessState>) -> Arc<Self> {
        process.thread_opened();
        let containers = process
            .meta
            .thread_objects
            .iter()
            .map(|m| ManagedObjectContainer::new(Arc::clone(m)))
            .collect();
        let admins = process
            .meta
            .administrators
            .iter()
            .map(|_| AdministratorContainer::new())
            .collect();
        Arc::new(Self {
            process,
            containers,
            admins,
            inner: Mutex::new(ThreadInner {
                open_flows: 0,
                completion_hook: None,
            }),
        })
    }

    /// The administrator at `index`, instantiated on first use.
    pub fn administrator(&self, index: usize) -> Arc<dyn Administrator> {
        self.admins[index].instance(&self.process.meta.administrators[index])
    }

    /// Run `hook` when the last flow of this thread finishes.
    pub fn set_completion_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        self.inner.lock().completion_hook = Some(hook);
    }

    pub fn flow_opened(&self) {
        self.inner.lock().open_flows += 1;
    }

    pub fn flow_finished(self: &Arc<Self>) {
        let last = {
            let mut inner = self.inner.lock();
            inner.open_flows = inner.open_flows.saturating_sub(1);
            inner.open_flows == 0
        };
        if !last {
            return;
        }
        recycle_containers(&self.containers, &self.process.meta.recycle_handler);
        let hook = self.inner.lock().completion_hook.take();
        if let Some(hook) = hook {
            hook();
        }
        self.process.thread_finished();
    }
}

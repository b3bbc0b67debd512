//! The office runtime.
//!
//! An [`Office`] is built once from an [`OfficeConfig`] and then invoked
//! any number of times; each invocation is an isolated process with its own
//! scope containers and report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use bureau_core::{Escalation, ProcessId, Time};

use crate::config::{BuildError, OfficeConfig};
use crate::container::Janitor;
use crate::flow::Flow;
use crate::meta::{bind, OfficeMeta};
use crate::state::{ProcessState, ReportSlot, ThreadState};

/// A bound office: teams, works, managed objects, and escalation tables,
/// ready to invoke.
pub struct Office {
    meta: Arc<OfficeMeta>,
    janitor: Arc<Janitor>,
    closed: AtomicBool,
}

impl Office {
    /// Validate `config` and bind it into a runnable office.
    pub fn build(config: OfficeConfig) -> Result<Self, BuildError> {
        let meta = Arc::new(bind(config)?);
        let janitor = Janitor::start(meta.monitor_interval);
        info!(
            office = %meta.name,
            works = meta.works.len(),
            teams = meta.teams.len(),
            "office open"
        );
        Ok(Self {
            meta,
            janitor,
            closed: AtomicBool::new(false),
        })
    }

    /// The office name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Start one process invocation of `work`.
    ///
    /// Returns immediately; the handle reports completion.
    pub fn invoke(&self, work: &str, parameter: Value) -> Result<ProcessHandle, InvokeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InvokeError::Closed);
        }
        let index = self
            .meta
            .work_index(work)
            .ok_or_else(|| InvokeError::UnknownWork(work.to_string()))?;
        let slot = ReportSlot::new();
        let process = ProcessState::new(
            Arc::clone(&self.meta),
            Arc::clone(&self.janitor),
            Arc::clone(&slot),
        );
        let id = process.id;
        debug!(process = %id, work, "invoking work");
        let thread = ThreadState::new(process);
        let flow = Flow::new(thread, index);
        let work_meta = &self.meta.works[index];
        let head = flow.build_group(&work_meta.tasks[work_meta.initial], parameter, None);
        head.activate();
        Ok(ProcessHandle { id, slot })
    }

    /// Stop the office: shut every team down (queued jobs drain first) and
    /// stop the deadline watcher. Further invokes are refused.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for team in &self.meta.teams {
            team.team.shutdown();
        }
        self.janitor.stop();
        info!(office = %self.meta.name, "office closed");
    }
}

impl Drop for Office {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to one process invocation.
pub struct ProcessHandle {
    id: ProcessId,
    slot: Arc<ReportSlot>,
}

impl ProcessHandle {
    /// Identifier of this invocation.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Block until the invocation finishes (cleanup included).
    pub fn wait(&self) -> ProcessReport {
        self.slot.wait()
    }

    /// Block up to `timeout` for the report.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ProcessReport> {
        self.slot.wait_timeout(timeout)
    }

    /// The report, if the invocation already finished.
    pub fn try_report(&self) -> Option<ProcessReport> {
        self.slot.try_get()
    }
}

/// Final report of one process invocation.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// Invocation identifier.
    pub id: ProcessId,
    /// When the invocation started.
    pub started_at: Time,
    /// When the report was assembled, after cleanup.
    pub finished_at: Time,
    /// How the invocation ended.
    pub outcome: ProcessOutcome,
}

impl ProcessReport {
    /// The unhandled escalation, if the invocation terminated on one.
    pub fn fatal(&self) -> Option<&Escalation> {
        match &self.outcome {
            ProcessOutcome::Fatal(escalation) => Some(escalation),
            ProcessOutcome::Complete => None,
        }
    }
}

/// How a process invocation ended.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Every flow ran to completion.
    Complete,

    /// An escalation reached the process level unhandled. Only this
    /// invocation terminated; the office and sibling processes are
    /// unaffected.
    Fatal(Escalation),
}

impl ProcessOutcome {
    /// Whether the invocation completed normally.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// An invocation the office refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// No work registered under that name.
    #[error("unknown work '{0}'")]
    UnknownWork(String),

    /// The office has been closed.
    #[error("office is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::{json, Value};

    use bureau_core::TaskTarget;

    use crate::config::{OfficeConfig, TaskConfig, TeamConfig, WorkConfig};
    use crate::contract::{ObjectHandle, TaskContext, WorkFactory};
    use crate::office::{InvokeError, Office};
    use crate::testing::{init_logs, task_fn, unit_work, InlineTeam, Recorder};

    #[test]
    fn sequence_runs_in_declared_order_with_parameter_passing() {
        init_logs();
        let rec = Recorder::new();
        let double = |label: &'static str| {
            let rec = Arc::clone(&rec);
            task_fn(move |ctx: &mut TaskContext<'_>| {
                let input = ctx.parameter().as_i64().unwrap_or(0);
                rec.push(format!("{label}:{input}"));
                Ok(Some(Value::from(input * 2)))
            })
        };
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_work(
                WorkConfig::new("math", "a", unit_work())
                    .with_task(
                        TaskConfig::new("a", "inline", double("a"))
                            .with_next(TaskTarget::task("b")),
                    )
                    .with_task(
                        TaskConfig::new("b", "inline", double("b"))
                            .with_next(TaskTarget::task("c")),
                    )
                    .with_task(TaskConfig::new("c", "inline", double("c"))),
            );
        let office = Office::build(config).expect("build office");
        let report = office.invoke("math", json!(5)).expect("invoke").wait();
        assert!(report.outcome.is_complete());
        assert_eq!(rec.entries().join(","), "a:5,b:10,c:20");
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn work_object_created_per_invocation_and_shared_by_tasks() {
        init_logs();
        let created = Arc::new(AtomicUsize::new(0));
        let factory: Arc<dyn WorkFactory> = {
            let created = Arc::clone(&created);
            Arc::new(move || {
                created.fetch_add(1, Ordering::SeqCst);
                Arc::new(Recorder::default()) as ObjectHandle
            })
        };
        let push = |label: &'static str| {
            task_fn(move |ctx: &mut TaskContext<'_>| {
                ctx.work_as::<Recorder>()?.push(label);
                Ok(None)
            })
        };
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_work(
                WorkConfig::new("journal", "a", factory)
                    .with_task(
                        TaskConfig::new("a", "inline", push("a")).with_next(TaskTarget::task("b")),
                    )
                    .with_task(TaskConfig::new("b", "inline", push("b"))),
            );
        let office = Office::build(config).expect("build office");
        assert!(office.invoke("journal", Value::Null).expect("invoke").wait().outcome.is_complete());
        assert!(office.invoke("journal", Value::Null).expect("invoke").wait().outcome.is_complete());
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refuses_unknown_work_and_closed_office() {
        init_logs();
        let noop = task_fn(|_ctx: &mut TaskContext<'_>| Ok(None));
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_work(
                WorkConfig::new("w", "a", unit_work())
                    .with_task(TaskConfig::new("a", "inline", noop)),
            );
        let office = Office::build(config).expect("build office");
        assert_eq!(
            office.invoke("missing", Value::Null).err(),
            Some(InvokeError::UnknownWork("missing".to_string()))
        );
        office.close();
        assert_eq!(office.invoke("w", Value::Null).err(), Some(InvokeError::Closed));
    }
}

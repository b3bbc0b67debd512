//! Test support: inline teams, recorders, and canned sources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use bureau_core::{RejectionReason, TeamRejection};

use crate::container::SourcingReceiver;
use crate::contract::{
    Administrator, AdministratorFactory, ExtensionExtractor, Job, ManagedObjectSource,
    ObjectHandle, SourcingContext, Task, TaskContext, Team, WorkFactory,
};

pub(crate) fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Runs every job on the caller's thread.
pub(crate) struct InlineTeam {
    closed: AtomicBool,
}

impl InlineTeam {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
        })
    }
}

impl Team for InlineTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TeamRejection::new("inline", RejectionReason::ShutDown));
        }
        job.run();
        Ok(())
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Spawns a fresh thread per job.
pub(crate) struct SpawnTeam;

impl SpawnTeam {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Team for SpawnTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        std::thread::spawn(move || job.run());
        Ok(())
    }
}

/// Collects labels in execution order.
#[derive(Default)]
pub(crate) struct Recorder {
    entries: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, label: impl Into<String>) {
        self.entries.lock().push(label.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// Coerce a closure into task logic.
pub(crate) fn task_fn<F>(f: F) -> Arc<dyn Task>
where
    F: Fn(&mut TaskContext<'_>) -> Result<Option<Value>, anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A work factory producing `()` for tasks that need no business object.
pub(crate) fn unit_work() -> Arc<dyn WorkFactory> {
    Arc::new(|| Arc::new(()) as ObjectHandle)
}

/// Coerce a closure into an administrator factory.
pub(crate) fn admin_factory<F>(f: F) -> Arc<dyn AdministratorFactory>
where
    F: Fn() -> Arc<dyn Administrator> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An extension view that is the object itself.
pub(crate) fn identity_extension() -> ExtensionExtractor {
    Arc::new(|handle: &ObjectHandle| Some(Arc::clone(handle)))
}

/// Completes synchronously from a factory closure.
pub(crate) struct ImmediateSource<F>(pub F);

impl<F> ManagedObjectSource for ImmediateSource<F>
where
    F: Fn(&SourcingContext<'_>) -> Result<ObjectHandle, anyhow::Error> + Send + Sync,
{
    fn source(&self, ctx: SourcingContext<'_>, receiver: SourcingReceiver) {
        match (self.0)(&ctx) {
            Ok(object) => receiver.complete(object),
            Err(cause) => receiver.fail(cause),
        }
    }
}

/// Coerce a closure into an immediate source.
pub(crate) fn immediate<F>(f: F) -> Arc<dyn ManagedObjectSource>
where
    F: Fn(&SourcingContext<'_>) -> Result<ObjectHandle, anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(ImmediateSource(f))
}

/// Completes from a background thread after a delay.
pub(crate) struct DelayedSource {
    pub delay: std::time::Duration,
    pub object: ObjectHandle,
}

impl ManagedObjectSource for DelayedSource {
    fn source(&self, _ctx: SourcingContext<'_>, receiver: SourcingReceiver) {
        let delay = self.delay;
        let object = Arc::clone(&self.object);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            receiver.complete(object);
        });
    }
}

/// Stashes receivers and never completes them.
#[derive(Default)]
pub(crate) struct NeverSource {
    pending: Mutex<Vec<SourcingReceiver>>,
}

impl NeverSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ManagedObjectSource for NeverSource {
    fn source(&self, _ctx: SourcingContext<'_>, receiver: SourcingReceiver) {
        self.pending.lock().push(receiver);
    }
}

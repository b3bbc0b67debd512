//! Managed object containers.
//!
//! A container owns at most one sourced instance and tracks its readiness:
//! `NotSourced -> Sourcing -> Ready | Failed`. Job nodes that touch a
//! container before it is ready park on it and give their worker back; the
//! completion path reactivates them. The container lock is a leaf: it is
//! never held while another kernel lock is taken, and waiters are drained
//! before reactivation so the install happens-before every dependent run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use bureau_core::{CleanupEscalation, Escalation, FailureKind};

use crate::contract::{ObjectHandle, SourcingContext};
use crate::job::{panic_error, JobNode};
use crate::meta::ObjectMeta;

/// Readiness of a container from a polling node's point of view.
pub(crate) enum Readiness {
    /// Sourced; the handle is ready to use.
    Ready(ObjectHandle),
    /// Still sourcing; the node has been parked on the container.
    NotReady,
    /// Sourcing failed; escalate at the polling node.
    Failed(Escalation),
}

enum ContainerState {
    NotSourced,
    Sourcing {
        waiters: Vec<Arc<JobNode>>,
        deadline: Option<Instant>,
    },
    Ready(ObjectHandle),
    Failed(Escalation),
    Recycled,
}

pub(crate) struct ManagedObjectContainer {
    meta: Arc<ObjectMeta>,
    state: Mutex<ContainerState>,
}

impl ManagedObjectContainer {
    pub fn new(meta: Arc<ObjectMeta>) -> Arc<Self> {
        Arc::new(Self {
            meta,
            state: Mutex::new(ContainerState::NotSourced),
        })
    }

    pub fn meta(&self) -> &Arc<ObjectMeta> {
        &self.meta
    }

    /// Poll readiness for `node`, kicking sourcing on first touch.
    ///
    /// `dependencies` are the already-ready handles of the objects this
    /// object's source declares, in descriptor order.
    pub fn poll(
        self: &Arc<Self>,
        node: &Arc<JobNode>,
        dependencies: Vec<ObjectHandle>,
        janitor: &Janitor,
    ) -> Readiness {
        {
            let mut state = self.state.lock();
            match &mut *state {
                ContainerState::Ready(object) => return Readiness::Ready(Arc::clone(object)),
                ContainerState::Failed(escalation) => return Readiness::Failed(escalation.clone()),
                ContainerState::Sourcing { waiters, .. } => {
                    waiters.push(Arc::clone(node));
                    return Readiness::NotReady;
                }
                ContainerState::Recycled => {
                    return Readiness::Failed(Escalation::new(
                        FailureKind::SourcingFailure,
                        anyhow::anyhow!("managed object '{}' already recycled", self.meta.name),
                    ));
                }
                ContainerState::NotSourced => {
                    *state = ContainerState::Sourcing {
                        waiters: Vec::new(),
                        deadline: self.meta.timeout.map(|t| Instant::now() + t),
                    };
                }
            }
        }

        debug!(object = %self.meta.name, "sourcing managed object");
        let receiver = SourcingReceiver {
            container: Arc::clone(self),
            fired: false,
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.meta
                .source
                .source(SourcingContext::new(&dependencies), receiver);
        }));
        if let Err(payload) = outcome {
            self.finish(Err(panic_error(payload)));
        }

        let mut state = self.state.lock();
        match &mut *state {
            ContainerState::Ready(object) => Readiness::Ready(Arc::clone(object)),
            ContainerState::Failed(escalation) => Readiness::Failed(escalation.clone()),
            ContainerState::Sourcing { waiters, deadline } => {
                waiters.push(Arc::clone(node));
                if deadline.is_some() {
                    janitor.watch(Arc::downgrade(self));
                }
                Readiness::NotReady
            }
            // A source cannot move the container back to these states.
            ContainerState::NotSourced | ContainerState::Recycled => Readiness::NotReady,
        }
    }

    /// Install a sourcing result and reactivate parked nodes.
    fn finish(&self, result: Result<ObjectHandle, anyhow::Error>) {
        let waiters = {
            let mut state = self.state.lock();
            match &mut *state {
                ContainerState::Sourcing { waiters, .. } => {
                    let drained = std::mem::take(waiters);
                    *state = match result {
                        Ok(object) => ContainerState::Ready(object),
                        Err(cause) => {
                            warn!(object = %self.meta.name, "sourcing failed: {cause}");
                            ContainerState::Failed(Escalation::new(
                                FailureKind::SourcingFailure,
                                cause,
                            ))
                        }
                    };
                    drained
                }
                _ => {
                    debug!(object = %self.meta.name, "late sourcing completion ignored");
                    return;
                }
            }
        };
        for node in waiters {
            node.activate();
        }
    }

    /// Fail the container if its sourcing deadline has passed.
    ///
    /// Returns `true` when the janitor may stop watching.
    pub fn check_deadline(&self, now: Instant) -> bool {
        let waiters = {
            let mut state = self.state.lock();
            match &mut *state {
                ContainerState::Sourcing {
                    waiters,
                    deadline: Some(deadline),
                } => {
                    if now < *deadline {
                        return false;
                    }
                    let drained = std::mem::take(waiters);
                    warn!(object = %self.meta.name, "managed object not sourced within deadline");
                    *state = ContainerState::Failed(Escalation::new(
                        FailureKind::DependencyNotReadyTimeout,
                        anyhow::anyhow!(
                            "managed object '{}' not ready within {:?}",
                            self.meta.name,
                            self.meta.timeout.unwrap_or(Duration::ZERO),
                        ),
                    ));
                    drained
                }
                _ => return true,
            }
        };
        for node in waiters {
            node.activate();
        }
        true
    }

    /// Tear the container down, running its recycle unit if one is bound.
    ///
    /// A failure becomes a `CleanupEscalation` for `handler`; it never
    /// re-enters the business flow that used the object.
    pub fn run_recycle(&self, handler: &dyn Fn(&CleanupEscalation)) {
        let object = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ContainerState::Recycled) {
                ContainerState::Ready(object) => Some(object),
                _ => None,
            }
        };
        let (Some(object), Some(unit)) = (object, self.meta.recycle.clone()) else {
            return;
        };
        debug!(object = %self.meta.name, "recycling managed object");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unit.recycle(object)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(cause)) => Some(cause),
            Err(payload) => Some(panic_error(payload)),
        };
        if let Some(cause) = failure {
            let escalation = CleanupEscalation::new(self.meta.name.clone(), cause);
            warn!(object = %self.meta.name, "recycle failed: {}", escalation.cause);
            handler(&escalation);
        }
    }
}

/// Hands a sourcing result back to the kernel.
///
/// May be completed from any thread. Dropping the receiver without
/// completing it fails the container, so a source that stashes it for an
/// async reply must keep it alive.
pub struct SourcingReceiver {
    container: Arc<ManagedObjectContainer>,
    fired: bool,
}

impl SourcingReceiver {
    /// Deliver the sourced object.
    pub fn complete(mut self, object: ObjectHandle) {
        self.fired = true;
        self.container.finish(Ok(object));
    }

    /// Report a sourcing failure.
    pub fn fail(mut self, cause: anyhow::Error) {
        self.fired = true;
        self.container.finish(Err(cause));
    }
}

impl Drop for SourcingReceiver {
    fn drop(&mut self) {
        if !self.fired {
            self.container.finish(Err(anyhow::anyhow!(
                "source dropped its receiver without completing '{}'",
                self.container.meta.name
            )));
        }
    }
}

/// Background watcher enforcing sourcing deadlines.
///
/// One janitor thread per office, woken on every new watch and otherwise
/// ticking at the configured monitor interval.
pub(crate) struct Janitor {
    shared: Arc<JanitorShared>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

struct JanitorShared {
    watched: Mutex<Vec<Weak<ManagedObjectContainer>>>,
    cond: Condvar,
    stop: AtomicBool,
}

impl Janitor {
    pub fn start(interval: Duration) -> Arc<Self> {
        let shared = Arc::new(JanitorShared {
            watched: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("bureau-janitor".to_string())
            .spawn(move || loop {
                let current = {
                    let mut watched = worker.watched.lock();
                    if worker.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = worker.cond.wait_for(&mut watched, interval);
                    if worker.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    std::mem::take(&mut *watched)
                };
                // Deadline checks may reactivate nodes, which on a passive
                // team run on this thread; the watch list stays unlocked.
                let now = Instant::now();
                let keep: Vec<_> = current
                    .into_iter()
                    .filter(|weak| match weak.upgrade() {
                        Some(container) => !container.check_deadline(now),
                        None => false,
                    })
                    .collect();
                worker.watched.lock().extend(keep);
            })
            .expect("failed to spawn janitor thread");
        Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn watch(&self, container: Weak<ManagedObjectContainer>) {
        self.shared.watched.lock().push(container);
        self.shared.cond.notify_one();
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

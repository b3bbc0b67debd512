//! A team of one dedicated worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use bureau_core::{RejectionReason, TeamRejection};
use bureau_kernel::{Job, Team};

pub(crate) struct Shared {
    pub(crate) queue: Mutex<VecDeque<Box<dyn Job>>>,
    pub(crate) cond: Condvar,
    pub(crate) closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }
}

/// One worker thread draining a FIFO queue.
///
/// Guarantees that jobs assigned to it never run concurrently with each
/// other, which makes it a natural fit for serialized resources.
pub struct OnePersonTeam {
    name: String,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OnePersonTeam {
    /// Start the worker thread.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let shared = Shared::new();
        let worker = spawn_worker(format!("{name}-0"), Arc::clone(&shared));
        Arc::new(Self {
            name,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }
}

pub(crate) fn spawn_worker(thread_name: String, shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || loop {
            let job = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(job) = queue.pop_front() {
                        break job;
                    }
                    if shared.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    shared.cond.wait(&mut queue);
                }
            };
            job.run();
        })
        .expect("failed to spawn team worker")
}

pub(crate) fn enqueue(
    team_name: &str,
    shared: &Shared,
    job: Box<dyn Job>,
) -> Result<(), TeamRejection> {
    let mut queue = shared.queue.lock();
    if shared.closed.load(Ordering::SeqCst) {
        return Err(TeamRejection::new(team_name, RejectionReason::ShutDown));
    }
    queue.push_back(job);
    shared.cond.notify_one();
    Ok(())
}

impl Team for OnePersonTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        enqueue(&self.name, &self.shared, job)
    }

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        debug!(team = %self.name, "team shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Note {
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    }

    impl Job for Note {
        fn run(&self) {
            let thread = std::thread::current();
            self.log
                .lock()
                .push(format!("{}@{}", self.label, thread.name().unwrap_or("?")));
        }
    }

    #[test]
    fn drains_jobs_in_order_on_its_worker() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let team = OnePersonTeam::new("solo");
        for label in ["a", "b", "c"] {
            team.assign(Box::new(Note {
                log: Arc::clone(&log),
                label,
            }))
            .expect("assign");
        }
        team.shutdown();
        assert_eq!(
            log.lock().join(","),
            "a@solo-0,b@solo-0,c@solo-0",
            "one worker, declared order"
        );
    }

    #[test]
    fn rejects_after_shutdown() {
        let team = OnePersonTeam::new("solo");
        team.shutdown();
        let rejection = team
            .assign(Box::new(Note {
                log: Arc::new(Mutex::new(Vec::new())),
                label: "late",
            }))
            .expect_err("rejection");
        assert_eq!(rejection.reason, RejectionReason::ShutDown);
    }
}

//! Fixed-size worker pool.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;

use bureau_core::TeamRejection;
use bureau_kernel::{Job, Team};

use crate::solo::{enqueue, spawn_worker, Shared};

/// `size` workers draining one shared FIFO queue.
pub struct FixedPoolTeam {
    name: String,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FixedPoolTeam {
    /// Start `size` workers named `{name}-{i}`.
    pub fn new(name: impl Into<String>, size: usize) -> Arc<Self> {
        let name = name.into();
        let shared = Shared::new();
        let workers = (0..size.max(1))
            .map(|i| spawn_worker(format!("{name}-{i}"), Arc::clone(&shared)))
            .collect();
        Arc::new(Self {
            name,
            shared,
            workers: Mutex::new(workers),
        })
    }
}

impl Team for FixedPoolTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        enqueue(&self.name, &self.shared, job)
    }

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        debug!(team = %self.name, "team shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bureau_core::RejectionReason;
    use std::sync::atomic::AtomicUsize;

    struct Count(Arc<AtomicUsize>);

    impl Job for Count {
        fn run(&self) {
            assert!(
                std::thread::current()
                    .name()
                    .map(|n| n.starts_with("pool-"))
                    .unwrap_or(false),
                "jobs run on pool workers"
            );
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drains_every_assigned_job() {
        let ran = Arc::new(AtomicUsize::new(0));
        let team = FixedPoolTeam::new("pool", 3);
        for _ in 0..20 {
            team.assign(Box::new(Count(Arc::clone(&ran)))).expect("assign");
        }
        team.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn rejects_after_shutdown() {
        let team = FixedPoolTeam::new("pool", 2);
        team.shutdown();
        let rejection = team
            .assign(Box::new(Count(Arc::new(AtomicUsize::new(0)))))
            .expect_err("rejection");
        assert_eq!(rejection.reason, RejectionReason::ShutDown);
    }
}

//! Tokio blocking-pool bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use bureau_core::{RejectionReason, TeamRejection};
use bureau_kernel::{Job, Team};

/// Dispatches jobs onto a Tokio runtime's blocking pool.
///
/// Lets an application that already runs Tokio use it as a worker pool
/// without the kernel knowing; job bodies stay synchronous.
pub struct TokioTeam {
    name: String,
    handle: Handle,
    closed: AtomicBool,
}

impl TokioTeam {
    /// Bridge onto `handle`'s blocking pool.
    pub fn new(name: impl Into<String>, handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handle,
            closed: AtomicBool::new(false),
        })
    }
}

impl Team for TokioTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TeamRejection::new(&self.name, RejectionReason::ShutDown));
        }
        self.handle.spawn_blocking(move || job.run());
        Ok(())
    }

    fn shutdown(&self) {
        // The runtime belongs to the application; only stop feeding it.
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Signal(parking_lot::Mutex<mpsc::Sender<()>>);

    impl Job for Signal {
        fn run(&self) {
            self.0.lock().send(()).ok();
        }
    }

    #[test]
    fn runs_jobs_on_the_blocking_pool() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("runtime");
        let (tx, rx) = mpsc::channel();
        let team = TokioTeam::new("rt", runtime.handle().clone());
        team.assign(Box::new(Signal(parking_lot::Mutex::new(tx))))
            .expect("assign");
        rx.recv_timeout(Duration::from_secs(1)).expect("job ran");
    }

    #[test]
    fn rejects_after_shutdown() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("runtime");
        let (tx, _rx) = mpsc::channel();
        let team = TokioTeam::new("rt", runtime.handle().clone());
        team.shutdown();
        let rejection = team
            .assign(Box::new(Signal(parking_lot::Mutex::new(tx))))
            .expect_err("rejection");
        assert_eq!(rejection.reason, RejectionReason::ShutDown);
    }
}

//! Caller-inline execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bureau_core::{RejectionReason, TeamRejection};
use bureau_kernel::{Job, Team};

/// Runs every assigned job on the assigning thread.
///
/// No workers, no queue; the hand-off cost is zero. Useful for short tasks
/// and for escalation handlers that must not wait behind a pool.
pub struct PassiveTeam {
    name: String,
    closed: AtomicBool,
}

impl PassiveTeam {
    /// Create a passive team.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            closed: AtomicBool::new(false),
        })
    }
}

impl Team for PassiveTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TeamRejection::new(&self.name, RejectionReason::ShutDown));
        }
        job.run();
        Ok(())
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct NoteThread(Arc<Mutex<Option<std::thread::ThreadId>>>);

    impl Job for NoteThread {
        fn run(&self) {
            *self.0.lock() = Some(std::thread::current().id());
        }
    }

    #[test]
    fn runs_on_the_assigning_thread() {
        let seen = Arc::new(Mutex::new(None));
        let team = PassiveTeam::new("passive");
        team.assign(Box::new(NoteThread(Arc::clone(&seen)))).expect("assign");
        assert_eq!(*seen.lock(), Some(std::thread::current().id()));
    }

    #[test]
    fn rejects_after_shutdown() {
        let team = PassiveTeam::new("passive");
        team.shutdown();
        let rejection = team
            .assign(Box::new(NoteThread(Arc::new(Mutex::new(None)))))
            .expect_err("rejection");
        assert_eq!(rejection.reason, RejectionReason::ShutDown);
    }
}

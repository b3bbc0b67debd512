//! Thread-per-job execution.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bureau_core::{RejectionReason, TeamRejection};
use bureau_kernel::{Job, Team};

/// Spawns a fresh named thread for every assigned job.
///
/// Suits long-blocking task bodies that would starve a fixed pool; the
/// thread ends with the job.
pub struct WorkerPerJobTeam {
    name: String,
    spawned: AtomicUsize,
    closed: AtomicBool,
}

impl WorkerPerJobTeam {
    /// Create the team.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

impl Team for WorkerPerJobTeam {
    fn assign(&self, job: Box<dyn Job>) -> Result<(), TeamRejection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TeamRejection::new(&self.name, RejectionReason::ShutDown));
        }
        let n = self.spawned.fetch_add(1, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{n}", self.name))
            .spawn(move || job.run());
        match spawned {
            Ok(_) => Ok(()),
            Err(_) => Err(TeamRejection::new(&self.name, RejectionReason::Saturated)),
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Report(parking_lot::Mutex<mpsc::Sender<String>>);

    impl Job for Report {
        fn run(&self) {
            let name = std::thread::current().name().unwrap_or("?").to_string();
            self.0.lock().send(name).ok();
        }
    }

    #[test]
    fn each_job_gets_its_own_thread() {
        let (tx, rx) = mpsc::channel();
        let team = WorkerPerJobTeam::new("burst");
        for _ in 0..2 {
            team.assign(Box::new(Report(parking_lot::Mutex::new(tx.clone()))))
                .expect("assign");
        }
        let mut names = vec![
            rx.recv_timeout(Duration::from_secs(1)).expect("first job"),
            rx.recv_timeout(Duration::from_secs(1)).expect("second job"),
        ];
        names.sort();
        assert_eq!(names, vec!["burst-0".to_string(), "burst-1".to_string()]);
    }

    #[test]
    fn rejects_after_shutdown() {
        let (tx, _rx) = mpsc::channel();
        let team = WorkerPerJobTeam::new("burst");
        team.shutdown();
        let rejection = team
            .assign(Box::new(Report(parking_lot::Mutex::new(tx))))
            .expect_err("rejection");
        assert_eq!(rejection.reason, RejectionReason::ShutDown);
    }
}

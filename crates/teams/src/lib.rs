//! Team implementations for the Bureau kernel.
//!
//! A team decides how (and on which threads) assigned jobs run; the kernel
//! only ever talks to the [`bureau_kernel::Team`] trait. This crate ships
//! the standard pools: caller-inline, dedicated worker, fixed-size pool,
//! thread-per-job, and a Tokio blocking-pool bridge.

mod passive;
mod pool;
mod solo;
mod spawning;
mod tokio_team;

pub use passive::PassiveTeam;
pub use pool::FixedPoolTeam;
pub use solo::OnePersonTeam;
pub use spawning::WorkerPerJobTeam;
pub use tokio_team::TokioTeam;

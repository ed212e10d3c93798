//! The long-running modes.
//!
//! [`StressLoop`] owns the [`Registry`](crate::Registry) and is the only
//! thing that mutates it. Workers run on a [`JoinSet`](tokio::task::JoinSet),
//! each owning one record (or a new file) for the duration of its job, and
//! hand back an outcome the loop applies when the task is joined.
//!
//! ```text
//! Idle ──run()──▶ Running ──cancel / space exhausted / failures──▶ Draining ──workers joined──▶ Stopped
//! ```

mod run;
mod worker;

pub use self::run::{MAX_CONSECUTIVE_FAILURES, Mode, StressLoop, StressSummary};

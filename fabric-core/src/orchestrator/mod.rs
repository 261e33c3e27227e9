//! Worker threads executing invocations.
//!
//! A [`WorkerPool`] owns a fixed set of named worker threads, each running its own monoio
//! runtime ([`RuntimeWrapper`]) and its own [`AffinityCache`](crate::affinity::AffinityCache).
//! Jobs are taken from one bounded queue and run to completion on the worker that took them,
//! so a logical request owns exactly one thread for its whole duration and the thread's
//! cached [`WorkContext`](crate::context::WorkContext) is never observed by two requests at
//! once.
//!
//! # Saturation
//!
//! When the queue is full the configured [`RejectionPolicy`](crate::config::RejectionPolicy)
//! decides what happens to the submitted job:
//!
//! - `caller_runs`: the submitting thread runs the job itself, on a temporary runtime and with
//!   the thread-local cache strategy.
//! - `abort`: submission fails with [`ExecuteError::Rejected`](crate::ExecuteError::Rejected).
//! - `discard`: the job is dropped; its handle resolves to
//!   [`ExecuteError::Discarded`](crate::ExecuteError::Discarded).
//! - `discard_oldest`: the oldest queued job is dropped in favour of the new one.
pub use self::{
    pool::{JobHandle, WorkerPool},
    runtime::RuntimeWrapper,
};

mod pool;
mod runtime;

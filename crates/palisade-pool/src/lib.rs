//! # Palisade Pool - Bounded Detector Execution
//!
//! Fixed-size pool of execution slots that runs detector units in parallel
//! and gives every request a consistent response-time ceiling regardless of
//! how many detectors are enabled.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       WorkerPool                         │
//! │                                                          │
//! │   admission ──► round-robin ──► ┌────────┐ ┌────────┐    │
//! │   semaphore      counter        │ slot 0 │ │ slot 1 │ …  │
//! │                                 └───┬────┘ └───┬────┘    │
//! │                                     ▼          ▼         │
//! │                               per-job task, per-job      │
//! │                               deadline, panic contained  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Guarantees:
//!
//! - **Bounded concurrency**: at most `slots` detector tasks in flight.
//! - **Backpressure**: saturated admission either blocks up to a timeout or
//!   rejects immediately, per configuration.
//! - **Failure isolation**: a panicking detector is contained to its own
//!   task; the slot self-heals and siblings are unaffected.
//! - **Deadline-bounded collection**: the fan-out returns at the request
//!   deadline with whatever results are available, marked partial.
//! - **Graceful degradation**: with no runtime to host workers, callers use
//!   [`WorkerPool::run_sequential`] on their own task instead of failing
//!   the request.

mod error;
mod pool;

pub use error::{DetectorFailure, FailureKind, PoolError, Result};
pub use pool::{Backpressure, FanOutReport, PoolConfig, WorkerPool};

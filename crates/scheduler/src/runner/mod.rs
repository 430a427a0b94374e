//! Deferred-task scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, shared state, start/stop and accessors
//! - `submit`: caller-facing submission, cancellation and result lookup
//! - `execution`: the scheduler loop, intake draining and dispatch

mod core;
mod execution;
mod submit;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;

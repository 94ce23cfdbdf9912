//! # Timeout Coalescer
//!
//! Schedules any number of keyed, logically independent delayed callbacks
//! while keeping exactly one real timer armed at a time.
//!
//! # Architecture
//!
//! The scheduler owns:
//! 1. A keyed job store (the authoritative map of what will run)
//! 2. A pending index of (key, deadline) snapshots that determines firing
//!    order and is reconciled lazily
//! 3. One alarm, always aimed at the nearest valid deadline
//!
//! Cancellation and replacement never scan the pending index: an entry whose
//! (key, deadline) no longer matches the store is stale and is dropped
//! unfired the next time it is examined.
//!
//! # Key Types
//!
//! - [`Scheduler`]: the public API (`schedule`, `cancel`, `run_next`,
//!   `flush`)
//! - [`SchedulerConfig`]: tuning for the alarm re-check ceiling
//! - [`JobInfo`]: read-only diagnostics for a stored job

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod alarm;
mod scheduler;

pub use scheduler::{JobInfo, Scheduler, SchedulerConfig};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_default_scheduler_is_empty() {
        let scheduler = Scheduler::default();
        assert!(scheduler.is_empty().await);
        assert_eq!(scheduler.len().await, 0);
        assert!(scheduler.armed_deadline().await.is_none());
    }

    #[tokio::test]
    async fn test_flush_on_empty_scheduler_is_noop() {
        let scheduler = Scheduler::new();
        scheduler.flush().await;
        scheduler.run_next().await;
        assert!(scheduler.is_empty().await);
    }
}

//! Keyed delayed-callback scheduling coalesced onto a single timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::alarm::Alarm;

/// Zero-argument callback invoked once when its job fires.
type Action = Box<dyn FnOnce() + Send + 'static>;

/// Shared scheduler state behind the lock.
type SharedState = Arc<Mutex<Inner>>;

/// One scheduled unit of work.
struct Job {
    deadline: Instant,
    delay: Duration,
    action: Action,
}

/// Read-only view of a stored job, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    /// Absolute monotonic time at which the job becomes due.
    pub deadline: Instant,
    /// Originally requested delay, retained for diagnostics.
    pub delay: Duration,
}

/// Lightweight (key, deadline) snapshot used to determine firing order.
///
/// An entry is valid only while the job store still holds its key with an
/// identical deadline. A cancelled or replaced job leaves its old entry in
/// place; the mismatch check drops it unfired whenever it is next examined,
/// which is what makes cancellation O(1).
#[derive(Debug, Clone)]
struct PendingEntry {
    key: String,
    deadline: Instant,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ceiling on how long a single armed wait may last.
    ///
    /// Deadlines further out are reached through intermediate wakes. This
    /// bounds how stale one sleep can get on hosts whose timers are not
    /// reliable across very long real-world durations.
    pub max_alarm_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_alarm_wait: Duration::from_millis(1000),
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    /// Authoritative key -> job store.
    jobs: HashMap<String, Job>,
    /// Candidate firing order; may hold stale entries between reconciliations.
    pending: Vec<PendingEntry>,
    alarm: Alarm,
    /// Collapses a burst of same-turn `schedule` calls into one deferred
    /// reconciliation pass.
    reconcile_queued: bool,
}

/// Schedules keyed delayed callbacks while keeping exactly one real timer
/// armed, always for the nearest pending deadline.
///
/// Re-scheduling a key replaces its previous job entirely; cancellation is
/// lazy (the pending index is never scanned). All state lives behind one
/// async lock, so handles are cheap to clone and share between tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: SharedState,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with an explicit configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                jobs: HashMap::new(),
                pending: Vec::new(),
                alarm: Alarm::default(),
                reconcile_queued: false,
            })),
        }
    }

    /// Schedule `action` to run once, `delay` after now.
    ///
    /// Re-using a key cancels the previous job: its action never runs and
    /// only the new deadline is honored. A zero delay makes the job due
    /// immediately; it fires on the next pass rather than synchronously.
    ///
    /// The pending index is reconciled on the next runtime turn, so a burst
    /// of calls is reconciled once.
    pub async fn schedule(
        &self,
        key: impl Into<String>,
        action: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) {
        let key = key.into();
        let deadline = Instant::now() + delay;
        let mut inner = self.inner.lock().await;
        debug!(
            key = %key,
            delay = ?delay,
            replaced = inner.jobs.contains_key(&key),
            "job scheduled"
        );
        inner.jobs.insert(
            key.clone(),
            Job {
                deadline,
                delay,
                action: Box::new(action),
            },
        );
        inner.pending.push(PendingEntry { key, deadline });
        if !inner.reconcile_queued {
            inner.reconcile_queued = true;
            let state = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let mut inner = state.lock().await;
                inner.reconcile_queued = false;
                inner.reconcile(&state);
            });
        }
    }

    /// Cancel the job stored under `key`, returning whether one was present.
    ///
    /// Cancelling an absent key is not an error. The pending index is not
    /// searched; the old entry goes stale and is dropped unfired the next
    /// time it is examined. Removing the last job disarms the timer.
    pub async fn cancel(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.jobs.remove(key).is_some();
        if removed {
            debug!(key = %key, "job cancelled");
        }
        if inner.jobs.is_empty() {
            inner.pending.clear();
            inner.alarm.reset();
        } else {
            inner.reconcile(&self.inner);
        }
        removed
    }

    /// Fire the single nearest-deadline job now, whether or not it is due.
    ///
    /// With nothing pending this is a no-op; with exactly one job pending it
    /// behaves as a full [`flush`](Self::flush). Otherwise the earliest job
    /// fires and the timer re-arms for the next remaining deadline.
    pub async fn run_next(&self) {
        let mut inner = self.inner.lock().await;
        inner.reconcile(&self.inner);
        match inner.pending.len() {
            0 => {}
            1 => inner.flush_all(),
            _ => {
                let entry = inner.pending.remove(0);
                inner.fire_entry(entry);
                if let Some(next) = inner.pending.first().map(|e| e.deadline) {
                    inner.arm_for(&self.inner, next);
                }
            }
        }
    }

    /// Treat every pending job as due right now and process them all.
    ///
    /// Entries are popped in insertion order without re-sorting; stale ones
    /// are discarded. Afterwards the store is empty and no timer is armed.
    /// This is the deterministic teardown path.
    pub async fn flush(&self) {
        let mut inner = self.inner.lock().await;
        inner.flush_all();
    }

    /// Number of live jobs.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Whether no jobs are live.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }

    /// Deadline and original delay of the job under `key`, if present.
    pub async fn get(&self, key: &str) -> Option<JobInfo> {
        let inner = self.inner.lock().await;
        inner.jobs.get(key).map(|job| JobInfo {
            deadline: job.deadline,
            delay: job.delay,
        })
    }

    /// Earliest deadline among live jobs, if any.
    ///
    /// Reads the job store directly, so it is accurate even while a
    /// just-scheduled job is still waiting for its reconciliation turn.
    pub async fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().await;
        inner.jobs.values().map(|job| job.deadline).min()
    }

    /// Deadline the armed timer is currently aimed at, if any.
    ///
    /// `None` either means nothing is pending or that a just-scheduled job
    /// has not been reconciled yet; [`next_deadline`](Self::next_deadline)
    /// is the store's view.
    pub async fn armed_deadline(&self) -> Option<Instant> {
        self.inner.lock().await.alarm.target()
    }

    /// Whether a real timer is currently armed.
    pub async fn is_armed(&self) -> bool {
        self.inner.lock().await.alarm.is_armed()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Prune stale entries, restore deadline order, and keep the alarm aimed
    /// at the earliest valid deadline.
    ///
    /// Re-arming is skipped when the alarm already targets that deadline;
    /// any other target (earlier or later) is re-armed so the armed deadline
    /// always equals the minimum valid one.
    fn reconcile(&mut self, state: &SharedState) {
        if self.pending.is_empty() {
            return;
        }
        let Self { jobs, pending, .. } = self;
        pending.retain(|entry| {
            jobs.get(&entry.key)
                .is_some_and(|job| job.deadline == entry.deadline)
        });
        pending.sort_by_key(|entry| entry.deadline);
        match self.pending.first().map(|entry| entry.deadline) {
            None => self.alarm.reset(),
            Some(earliest) => {
                if self.alarm.target() != Some(earliest) {
                    self.arm_for(state, earliest);
                }
            }
        }
    }

    /// Arm the one real timer for `deadline`, cancelling any previous wake.
    ///
    /// The wait is clamped to `config.max_alarm_wait`; a wake landing before
    /// the target finds nothing due and simply re-arms.
    fn arm_for(&mut self, state: &SharedState, deadline: Instant) {
        let wait = deadline
            .saturating_duration_since(Instant::now())
            .min(self.config.max_alarm_wait);
        trace!(wait = ?wait, "arming alarm");
        let state = Arc::clone(state);
        let handle = tokio::spawn(async move {
            sleep(wait).await;
            let mut inner = state.lock().await;
            inner.alarm.clear_handle();
            inner.process_due(&state);
        });
        self.alarm.replace(handle, deadline);
    }

    /// Drain every due entry, then re-arm for whatever remains.
    ///
    /// The real timer is coarser than logical deadlines, so several jobs may
    /// be due at once; all of them fire in this pass, ascending by deadline.
    fn process_due(&mut self, state: &SharedState) {
        let now = Instant::now();
        while self
            .pending
            .first()
            .is_some_and(|entry| entry.deadline <= now)
        {
            let entry = self.pending.remove(0);
            self.fire_entry(entry);
        }
        match self.pending.first().map(|entry| entry.deadline) {
            Some(next) => self.arm_for(state, next),
            None => self.alarm.reset(),
        }
    }

    /// Validate `entry` against the job store and dispatch its action.
    ///
    /// A missing or mismatched job means the entry went stale through
    /// cancellation or replacement; it is dropped without firing. Dispatch
    /// happens on a fresh task so one job's work cannot delay the rest of
    /// the pass.
    fn fire_entry(&mut self, entry: PendingEntry) {
        let valid = self
            .jobs
            .get(&entry.key)
            .is_some_and(|job| job.deadline == entry.deadline);
        if !valid {
            trace!(key = %entry.key, "dropping stale entry");
            return;
        }
        if let Some(job) = self.jobs.remove(&entry.key) {
            debug!(key = %entry.key, "job fired");
            tokio::spawn(async move {
                (job.action)();
            });
        }
    }

    /// Process every pending entry in FIFO pop order and disarm the timer.
    fn flush_all(&mut self) {
        for entry in std::mem::take(&mut self.pending) {
            self.fire_entry(entry);
        }
        self.alarm.reset();
    }
}

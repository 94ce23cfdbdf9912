//! Bookkeeping for the single real timer the scheduler keeps armed.

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// State of the one outstanding wake-up.
///
/// At most one wake task is live at any instant. `target` records the
/// deadline the task was armed for, so reconciliation can skip re-arming
/// when the alarm is already aimed at the right deadline.
#[derive(Debug, Default)]
pub(crate) struct Alarm {
    handle: Option<JoinHandle<()>>,
    target: Option<Instant>,
}

impl Alarm {
    /// Deadline the live timer is aimed at, if any.
    pub(crate) fn target(&self) -> Option<Instant> {
        self.target
    }

    /// Whether a wake task is currently live.
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Record a freshly armed wake task, cancelling any previous one.
    pub(crate) fn replace(&mut self, handle: JoinHandle<()>, target: Instant) {
        if let Some(old) = self.handle.take() {
            old.abort();
        }
        self.handle = Some(handle);
        self.target = Some(target);
    }

    /// Forget the live handle without cancelling it.
    ///
    /// Called by the wake task itself as soon as it holds the state lock,
    /// so a handler that re-enters `schedule` observes no stale handle.
    pub(crate) fn clear_handle(&mut self) {
        self.handle = None;
    }

    /// Cancel the live timer and zero all bookkeeping.
    pub(crate) fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.target = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_alarm_starts_disarmed() {
        let alarm = Alarm::default();
        assert!(!alarm.is_armed());
        assert!(alarm.target().is_none());
    }

    #[tokio::test]
    async fn test_replace_records_target_and_cancels_previous() {
        let mut alarm = Alarm::default();
        let target = Instant::now() + Duration::from_millis(100);

        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        alarm.replace(first, target);
        assert!(alarm.is_armed());
        assert_eq!(alarm.target(), Some(target));

        let later = target + Duration::from_millis(50);
        let second = tokio::spawn(async {});
        alarm.replace(second, later);
        assert_eq!(alarm.target(), Some(later));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut alarm = Alarm::default();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        alarm.replace(handle, Instant::now());

        alarm.reset();
        assert!(!alarm.is_armed());
        assert!(alarm.target().is_none());
    }

    #[tokio::test]
    async fn test_clear_handle_keeps_target() {
        let mut alarm = Alarm::default();
        let target = Instant::now();
        alarm.replace(tokio::spawn(async {}), target);

        alarm.clear_handle();
        assert!(!alarm.is_armed());
        assert_eq!(alarm.target(), Some(target));
    }
}

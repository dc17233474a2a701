use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// How long a test waits for a backfill to reach an expected state before failing.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// One-shot notification that fails the test instead of hanging it when it never fires.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout: Duration,
}

impl TimedNotify {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(notify: Arc<Notify>, timeout: Duration) -> Self {
        Self { notify, timeout }
    }

    /// Waits for the notification, consuming a permit stored before the call.
    ///
    /// # Panics
    ///
    /// Panics once the timeout elapsed.
    pub async fn notified(&self) {
        let waited = tokio::time::timeout(self.timeout, self.notify.notified()).await;
        assert!(
            waited.is_ok(),
            "expected backfill state not reached within {:?}",
            self.timeout
        );
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout", &self.timeout)
            .finish()
    }
}

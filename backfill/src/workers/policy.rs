use crate::error::{BackfillError, ErrorKind};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The whole chunk is retried automatically with exponential backoff.
    Timed,
    /// The table's backfill is aborted.
    NoRetry,
}

/// Policy describing how a [`BackfillError`] should be handled by table workers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    /// Creates a new policy with all directives.
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    /// Returns the retry directive for this policy.
    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from a [`BackfillError`] to determine in a unified way how
/// errors should be handled.
///
/// Retries always cover a whole chunk, never single rows, since a window is only meaningful as a
/// unit.
pub fn build_error_handling_policy(error: &BackfillError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient failures: nothing destructive happened, replaying the chunk is idempotent.
        ErrorKind::SourceUnavailable
        | ErrorKind::SnapshotReadFailed
        | ErrorKind::MarkerWriteFailed
        | ErrorKind::MarkerLost
        | ErrorKind::TailerStopped => ErrorHandlingPolicy::new(RetryDirective::Timed, None),

        ErrorKind::StorageCorrupt => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Verify that the source storage returns keys and rows in ascending key order."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the backfill configuration and restart."),
        ),
        ErrorKind::DestinationPushFailed => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Check the destination's health; the table resumes from its stored progress."),
        ),

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithTimedRetry => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Will automatically retry after the configured delay."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some(
                "There is no single prescribed solution for this error. Restarting resumes the table from its stored progress.",
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> BackfillError {
        BackfillError::from((kind, "test error"))
    }

    #[test]
    fn classifies_transient_errors_as_timed_retry() {
        for kind in [
            ErrorKind::SourceUnavailable,
            ErrorKind::SnapshotReadFailed,
            ErrorKind::MarkerWriteFailed,
            ErrorKind::MarkerLost,
            ErrorKind::TailerStopped,
        ] {
            let policy = build_error_handling_policy(&err(kind));
            assert_eq!(policy.retry_directive(), RetryDirective::Timed);
            assert_eq!(policy.solution(), None);
        }
    }

    #[test]
    fn classifies_storage_corruption_as_fatal() {
        let policy = build_error_handling_policy(&err(ErrorKind::StorageCorrupt));
        assert_eq!(policy.retry_directive(), RetryDirective::NoRetry);
        assert!(policy.solution().is_some());
    }

    #[test]
    fn classifies_unknown_kind_as_fatal() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvalidState));
        assert_eq!(policy.retry_directive(), RetryDirective::NoRetry);
        assert!(policy.solution().is_some());
    }
}

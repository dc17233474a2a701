//! Error types and result definitions for backfill operations.
//!
//! [`BackfillError`] carries an [`ErrorKind`] used by the retry policy, a static description, an
//! optional dynamic detail, an optional source and the call site where it was created. Errors of
//! several table workers can be aggregated into a single value.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for backfill operations using [`BackfillError`] as the error type.
pub type BackfillResult<T> = Result<T, BackfillError>;

/// Detailed payload stored for single [`BackfillError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type for backfill operations.
#[derive(Debug, Clone)]
pub struct BackfillError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, typically one per failed table worker.
    Many {
        errors: Vec<BackfillError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while backfilling a table.
///
/// The kind alone decides whether a chunk is retried, see
/// [`crate::workers::policy::build_error_handling_policy`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceUnavailable,
    SnapshotReadFailed,
    MarkerWriteFailed,

    // Window errors
    MarkerLost,
    TailerStopped,

    // Storage invariants
    StorageCorrupt,

    // Destination errors
    DestinationPushFailed,

    // Configuration & state errors
    ConfigError,
    InvalidState,

    // Worker errors
    TableWorkerPanic,

    Unknown,

    // Error kinds used by fault injection tests to trigger specific retry behaviors.
    #[cfg(feature = "failpoints")]
    WithNoRetry,
    #[cfg(feature = "failpoints")]
    WithTimedRetry,
}

impl BackfillError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns `true` if any aggregated error has `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        BackfillError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for BackfillError {
    fn eq(&self, other: &BackfillError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for BackfillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for BackfillError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`BackfillError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for BackfillError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> BackfillError {
        BackfillError::from_components(kind, Cow::Borrowed(desc), None)
    }
}

/// Creates a [`BackfillError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for BackfillError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> BackfillError {
        BackfillError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

/// Aggregates errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for BackfillError
where
    E: Into<BackfillError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> BackfillError {
        let location = Location::caller();

        let mut errors: Vec<BackfillError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        BackfillError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts configuration validation failures into [`ErrorKind::ConfigError`].
impl From<config::shared::ValidationError> for BackfillError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> BackfillError {
        let detail = err.to_string();
        BackfillError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid backfill configuration"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

/// Converts JSON encoding failures, only produced while rendering deliveries.
impl From<serde_json::Error> for BackfillError {
    #[track_caller]
    fn from(err: serde_json::Error) -> BackfillError {
        let detail = err.to_string();
        BackfillError::from_components(
            ErrorKind::DestinationPushFailed,
            Cow::Borrowed("JSON encoding failed"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

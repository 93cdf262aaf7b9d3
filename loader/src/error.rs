use std::error;
use std::fmt;

use loader_config::shared::ValidationError;

/// Convenient result type for loader operations using [`LoadError`] as the error type.
pub type LoadResult<T> = Result<T, LoadError>;

/// Main error type for loader operations.
///
/// Carries an [`ErrorKind`] for programmatic handling, a static description and
/// optionally a dynamic detail. Failures of the destination's bulk command also
/// record how far the command got, see [`BulkPhase`].
#[derive(Debug, Clone)]
pub struct LoadError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    BulkCommand(BulkPhase, &'static str, String),
    Many(Vec<LoadError>),
}

/// Categories of loader failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Construction
    UnknownBackend,
    DuplicateBackend,
    InvalidConfig,

    // Lifecycle
    ConnectionError,
    InvalidState,
    AlreadyClosed,

    // Loading
    InvalidSource,
    StagingError,
    BulkCommandError,
    CleanupError,

    // Auxiliary
    Unsupported,
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

/// How far a failed bulk command progressed.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum BulkPhase {
    /// The destination rejected the command before any data was transferred.
    NotStarted,
    /// The command started and failed partway. The target table may hold part
    /// of the rows.
    Interrupted,
}

impl LoadError {
    /// Creates a [`ErrorKind::BulkCommandError`] recording the phase it failed in.
    pub fn bulk(phase: BulkPhase, desc: &'static str, detail: impl ToString) -> LoadError {
        LoadError {
            repr: ErrorRepr::BulkCommand(phase, desc, detail.to_string()),
        }
    }

    /// Creates an error aggregating several failures.
    pub fn many(errors: Vec<LoadError>) -> LoadError {
        LoadError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error, the first one for aggregates.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::BulkCommand(..) => ErrorKind::BulkCommandError,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
            _ => vec![self.kind()],
        }
    }

    /// Returns the phase a bulk command failed in, for [`ErrorKind::BulkCommandError`].
    pub fn bulk_phase(&self) -> Option<BulkPhase> {
        match self.repr {
            ErrorRepr::BulkCommand(phase, _, _) => Some(phase),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.bulk_phase()),
            _ => None,
        }
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail)
            | ErrorRepr::BulkCommand(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            ErrorRepr::WithDescription(..) => None,
        }
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &LoadError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            (ErrorRepr::Many(_), _) | (_, ErrorRepr::Many(_)) => false,
            _ => self.kind() == other.kind() && self.bulk_phase() == other.bulk_phase(),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::BulkCommand(phase, desc, ref detail) => {
                write!(f, "BulkCommandError ({phase:?}): {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")
                } else if errors.len() == 1 {
                    errors[0].fmt(f)
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

impl error::Error for LoadError {}

impl From<(ErrorKind, &'static str)> for LoadError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for LoadError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for LoadError
where
    E: Into<LoadError>,
{
    fn from(errors: Vec<E>) -> LoadError {
        LoadError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> LoadError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Descriptor validation failures become [`ErrorKind::InvalidConfig`], except
/// for unrecognized kinds which are [`ErrorKind::UnknownBackend`].
impl From<ValidationError> for LoadError {
    fn from(err: ValidationError) -> LoadError {
        let (kind, description) = match err {
            ValidationError::UnknownKind(_) => {
                (ErrorKind::UnknownBackend, "Unknown destination kind")
            }
            _ => (ErrorKind::InvalidConfig, "Invalid destination descriptor"),
        };

        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<csv::Error> for LoadError {
    fn from(err: csv::Error) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SerializationError,
                "CSV encoding failed",
                err.to_string(),
            ),
        }
    }
}

impl From<arrow::error::ArrowError> for LoadError {
    fn from(err: arrow::error::ArrowError) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SerializationError,
                "Arrow conversion failed",
                err.to_string(),
            ),
        }
    }
}

impl From<parquet::errors::ParquetError> for LoadError {
    fn from(err: parquet::errors::ParquetError) -> LoadError {
        LoadError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SerializationError,
                "Parquet encoding failed",
                err.to_string(),
            ),
        }
    }
}

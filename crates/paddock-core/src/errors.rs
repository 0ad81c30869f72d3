use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by [`crate::providers::http::HttpFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed with a retryable outcome (network error, 5xx, 429).
    #[error("fetch exhausted after {attempts} attempt(s) against {endpoint}: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        last: String,
    },
    /// The remote answered with a non-retryable 4xx.
    #[error("client error {status} from {endpoint}: {body}")]
    Client {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request for {endpoint}: {message}")]
    Request { endpoint: String, message: String },
}

impl FetchError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. })
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, FetchError::Client { .. })
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// The store could not be reached at all (poisoned handle, unreadable file).
#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Validation,
    Fatal,
}

/// Failure of a task handler, classified for the runner's retry policy.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Worth another attempt: network trouble, 5xx/429, busy store, timeout.
    #[error("transient: {0:#}")]
    Transient(anyhow::Error),
    /// Retrying cannot help: 4xx, malformed payload, constraint violation.
    #[error("permanent: {0:#}")]
    Permanent(anyhow::Error),
    /// One or more validation rules exceeded their threshold.
    #[error("validation failed: {}", .failed_rules.join(", "))]
    Validation { failed_rules: Vec<String> },
    /// The whole run must stop (store unreachable).
    #[error("fatal: {0:#}")]
    Fatal(anyhow::Error),
}

impl TaskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskError::Transient(_) => ErrorClass::Transient,
            TaskError::Permanent(_) => ErrorClass::Permanent,
            TaskError::Validation { .. } => ErrorClass::Validation,
            TaskError::Fatal(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn transient(msg: impl std::fmt::Display) -> Self {
        TaskError::Transient(anyhow::anyhow!("{}", msg))
    }

    pub fn permanent(msg: impl std::fmt::Display) -> Self {
        TaskError::Permanent(anyhow::anyhow!("{}", msg))
    }

    /// Wraps a store error, classifying it by the underlying SQLite failure.
    pub fn store(err: anyhow::Error) -> Self {
        match classify_store_error(&err) {
            ErrorClass::Transient => TaskError::Transient(err),
            ErrorClass::Fatal => TaskError::Fatal(err),
            _ => TaskError::Permanent(err),
        }
    }
}

impl From<FetchError> for TaskError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Exhausted { .. } => TaskError::Transient(e.into()),
            FetchError::Client { .. } | FetchError::Request { .. } => {
                TaskError::Permanent(e.into())
            }
        }
    }
}

/// Maps a store error onto the task taxonomy.
///
/// Busy/locked databases are transient; a database that cannot be opened,
/// read, or recognised is fatal; anything else (constraint, SQL error) is
/// permanent.
pub fn classify_store_error(err: &anyhow::Error) -> ErrorClass {
    for cause in err.chain() {
        if cause.downcast_ref::<StoreUnavailable>().is_some() {
            return ErrorClass::Fatal;
        }
        if let Some(rusqlite::Error::SqliteFailure(ffi, _)) = cause.downcast_ref::<rusqlite::Error>()
        {
            use rusqlite::ErrorCode;
            return match ffi.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorClass::Transient,
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase => ErrorClass::Fatal,
                _ => ErrorClass::Permanent,
            };
        }
    }
    ErrorClass::Permanent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> anyhow::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None).into()
    }

    #[test]
    fn fetch_errors_map_to_task_classes() {
        let exhausted = FetchError::Exhausted {
            endpoint: "races".into(),
            attempts: 3,
            last: "HTTP 500".into(),
        };
        assert!(TaskError::from(exhausted).is_retryable());

        let client = FetchError::Client {
            endpoint: "races".into(),
            status: 404,
            body: String::new(),
        };
        assert_eq!(TaskError::from(client).class(), ErrorClass::Permanent);
    }

    #[test]
    fn store_errors_are_classified_by_sqlite_code() {
        let busy = sqlite_failure(rusqlite::ffi::SQLITE_BUSY);
        assert_eq!(classify_store_error(&busy), ErrorClass::Transient);

        let cant_open = sqlite_failure(rusqlite::ffi::SQLITE_CANTOPEN).context("open store");
        assert_eq!(classify_store_error(&cant_open), ErrorClass::Fatal);

        let constraint = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT);
        assert_eq!(classify_store_error(&constraint), ErrorClass::Permanent);

        let poisoned = anyhow::Error::new(StoreUnavailable("mutex poisoned".into()));
        assert!(matches!(TaskError::store(poisoned), TaskError::Fatal(_)));
    }

    #[test]
    fn validation_error_lists_rules() {
        let e = TaskError::Validation {
            failed_rules: vec!["a".into(), "b".into()],
        };
        assert_eq!(e.to_string(), "validation failed: a, b");
        assert!(!e.is_retryable());
    }
}

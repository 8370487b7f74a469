//! Error types for hikiyama.
//!
//! This module defines all error types used throughout the hikiyama crate,
//! providing detailed context for debugging and user-facing messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for hikiyama operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Store Errors ===
    /// Failed to open or create the local document database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The document store rejected or failed an operation.
    #[error("document store error on '{document}': {message}")]
    Store {
        /// The document the operation targeted.
        document: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Tracker Errors ===
    /// A tracker start precondition was not met.
    #[error("{0}")]
    Precondition(Precondition),

    /// The location sensor reported a failure.
    #[error("location sensing failed: {0}")]
    Sensing(String),

    /// The tracker is already publishing.
    #[error("tracker is already publishing for '{float_id}'")]
    AlreadyPublishing {
        /// The float the running session publishes for.
        float_id: String,
    },

    /// The identifier is not part of the float registry.
    #[error("unknown float identifier: {0}")]
    UnknownFloat(String),

    // === I/O Errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// A background database task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a tracker refused to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The shared passcode did not match.
    WrongPasscode,
    /// No device name was given.
    MissingDeviceName,
    /// The chosen float is not registered.
    UnknownFloat(String),
    /// The device has no usable location sensor.
    SensorUnavailable,
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongPasscode => write!(f, "passcode is incorrect"),
            Self::MissingDeviceName => write!(f, "device name is required"),
            Self::UnknownFloat(id) => write!(f, "unknown float identifier: {id}"),
            Self::SensorUnavailable => write!(f, "location sensing is not available"),
        }
    }
}

/// A specialized Result type for hikiyama operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new store error for a document.
    #[must_use]
    pub fn store(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            document: document.into(),
            message: message.into(),
        }
    }

    /// Create a new sensing error.
    #[must_use]
    pub fn sensing(message: impl Into<String>) -> Self {
        Self::Sensing(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a failed start precondition.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Get the failed precondition, if this is one.
    #[must_use]
    pub fn precondition(&self) -> Option<&Precondition> {
        match self {
            Self::Precondition(p) => Some(p),
            _ => None,
        }
    }
}

impl From<Precondition> for Error {
    fn from(p: Precondition) -> Self {
        Self::Precondition(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::sensing("timeout");
        assert_eq!(err.to_string(), "location sensing failed: timeout");

        let err = Error::store("yama01", "permission denied");
        assert_eq!(
            err.to_string(),
            "document store error on 'yama01': permission denied"
        );
    }

    #[test]
    fn test_precondition_display() {
        assert_eq!(
            Error::from(Precondition::WrongPasscode).to_string(),
            "passcode is incorrect"
        );
        assert_eq!(
            Precondition::MissingDeviceName.to_string(),
            "device name is required"
        );
        assert!(Precondition::UnknownFloat("yama99".to_string())
            .to_string()
            .contains("yama99"));
        assert!(Precondition::SensorUnavailable
            .to_string()
            .contains("not available"));
    }

    #[test]
    fn test_is_precondition() {
        let err: Error = Precondition::MissingDeviceName.into();
        assert!(err.is_precondition());
        assert_eq!(err.precondition(), Some(&Precondition::MissingDeviceName));
        assert!(!Error::internal("x").is_precondition());
        assert!(Error::internal("x").precondition().is_none());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_already_publishing_display() {
        let err = Error::AlreadyPublishing {
            float_id: "yama05".to_string(),
        };
        assert!(err.to_string().contains("yama05"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "focus_zoom out of range".to_string(),
        };
        assert!(err.to_string().contains("focus_zoom"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}

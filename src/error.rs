use std::{io, path::StripPrefixError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;

/// Fatal errors. Anything wrong with document *content* is reported as a
/// [`Diagnostic`](crate::codec::Diagnostic) instead and never surfaces here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum VeraError {
    #[error("Build aborted before resolution: {0}")]
    Aborted(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Document {path} is not valid UTF-8")]
    Untokenizable { path: String },
}

impl From<StripPrefixError> for VeraError {
    fn from(src: StripPrefixError) -> VeraError {
        VeraError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for VeraError {
    fn from(src: toml::de::Error) -> VeraError {
        VeraError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for VeraError {
    fn from(src: toml::ser::Error) -> VeraError {
        VeraError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<serde_json::Error> for VeraError {
    fn from(src: serde_json::Error) -> VeraError {
        VeraError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for VeraError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => VeraError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => VeraError::PermissionDenied,
            _ => VeraError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<walkdir::Error> for VeraError {
    fn from(x: walkdir::Error) -> Self {
        match x.io_error() {
            Some(io_error) if io_error.kind() == io::ErrorKind::PermissionDenied => {
                VeraError::PermissionDenied
            }
            _ => VeraError::Io(format!("Directory walk failed: {x}")),
        }
    }
}

impl From<JoinError> for VeraError {
    fn from(x: JoinError) -> Self {
        if x.is_panic() {
            VeraError::Aborted(format!("document task panicked: {x}"))
        } else {
            VeraError::Aborted(format!("document task cancelled: {x}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "missing.md");
        assert!(matches!(VeraError::from(not_found), VeraError::NotFound(_)));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(VeraError::from(denied), VeraError::PermissionDenied);

        let other = io::Error::new(io::ErrorKind::Interrupted, "eintr");
        assert!(matches!(VeraError::from(other), VeraError::Io(_)));
    }

    #[test]
    fn test_toml_error_is_config() {
        let err = toml::from_str::<toml::Table>("max_nesting_depth = [").unwrap_err();
        assert!(matches!(VeraError::from(err), VeraError::Config(_)));
    }
}

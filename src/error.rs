use std::{fmt, io, string::FromUtf8Error};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;
use url::ParseError as UrlParseError;

use crate::event::EventBatch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ResourceError {
    #[error("Resource {0} is already loaded")]
    AlreadyLoaded(String),
    #[error("Resource is busy: {0}")]
    Busy(String),
    #[error("Text resource codec error: {0}")]
    Codec(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Text encoding error: {0}")]
    Encoding(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Resource {0} is not loaded")]
    NotLoaded(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Operation was cancelled by a newer request")]
    OperationCancelled,
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("Reference resolution error: {0}")]
    Resolution(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("No syntax registered for '{0}'")]
    UnknownSyntax(String),
}

impl From<toml::de::Error> for ResourceError {
    fn from(src: toml::de::Error) -> ResourceError {
        ResourceError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for ResourceError {
    fn from(src: toml::ser::Error) -> ResourceError {
        ResourceError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for ResourceError {
    fn from(src: JsonError) -> ResourceError {
        ResourceError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<UrlParseError> for ResourceError {
    fn from(src: UrlParseError) -> ResourceError {
        ResourceError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<FromUtf8Error> for ResourceError {
    fn from(src: FromUtf8Error) -> ResourceError {
        ResourceError::Encoding(format!("Invalid UTF-8 input: {src}"))
    }
}

impl From<io::Error> for ResourceError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => ResourceError::PermissionDenied,
            _ => ResourceError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for ResourceError {
    fn from(x: fmt::Error) -> Self {
        ResourceError::Codec(format!("{x}"))
    }
}

impl From<RegexError> for ResourceError {
    fn from(x: RegexError) -> Self {
        ResourceError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<TokioSendError<EventBatch>> for ResourceError {
    fn from(x: TokioSendError<EventBatch>) -> Self {
        ResourceError::Io(format!(
            "Channel send error, could not transmit a batch of {} resource events",
            x.0.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_by_kind() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(ResourceError::from(missing), ResourceError::NotFound(_)));
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert_eq!(ResourceError::from(denied), ResourceError::PermissionDenied);
    }

    #[test]
    fn toml_errors_are_serialization_errors() {
        let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        assert!(matches!(
            ResourceError::from(err),
            ResourceError::Serialization(_)
        ));
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("format error at offset {offset}: {message}")]
    Format { offset: u64, message: String },

    #[error("invalid region [{start}, {end}): {reason}")]
    InvalidRegion {
        start: i64,
        end: i64,
        reason: &'static str,
    },

    #[error("region [{start}, {end}) spans {width} bases, raw queries are capped at {max}")]
    RegionTooLarge {
        start: u64,
        end: u64,
        width: u64,
        max: u64,
    },

    #[error("missing index for {}", .0.display())]
    MissingIndex(PathBuf),

    #[error("truncated record at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedRecord {
        offset: u64,
        needed: usize,
        available: usize,
    },

    #[error("archive handle is closed")]
    HandleClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    pub fn format(offset: u64, message: impl Into<String>) -> Self {
        Error::Format {
            offset,
            message: message.into(),
        }
    }

    pub fn invalid_region(start: i64, end: i64, reason: &'static str) -> Self {
        Error::InvalidRegion { start, end, reason }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IOError",
            Error::Format { .. } => "FormatError",
            Error::InvalidRegion { .. } => "InvalidRegionError",
            Error::RegionTooLarge { .. } => "RegionTooLargeError",
            Error::MissingIndex(_) => "MissingIndexError",
            Error::TruncatedRecord { .. } => "TruncatedRecordError",
            Error::HandleClosed => "HandleClosedError",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRegion { .. } | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::MissingIndex(_) => StatusCode::NOT_FOUND,
            Error::RegionTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::HandleClosed => StatusCode::GONE,
            Error::Format { .. } | Error::TruncatedRecord { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("query failed: {}", self);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::invalid_region(10, 5, "start > end").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::RegionTooLarge {
                start: 0,
                end: 50_000_000,
                width: 50_000_000,
                max: 10_000_000,
            }
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(Error::HandleClosed.status_code(), StatusCode::GONE);
        assert_eq!(
            Error::MissingIndex(PathBuf::from("a.bam")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::format(12, "bad magic").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_io_errors_are_shareable() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read").into();
        let copy = err.clone();
        assert_eq!(copy.kind(), "IOError");
        assert!(copy.to_string().contains("short read"));
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::TruncatedRecord {
            offset: 4096,
            needed: 36,
            available: 12,
        };
        assert_eq!(
            err.to_string(),
            "truncated record at offset 4096: need 36 bytes, 12 available"
        );
        assert_eq!(err.kind(), "TruncatedRecordError");
    }
}

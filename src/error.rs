//! Stable error taxonomy for callers that expose these operations over HTTP.

use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;
use crate::db::tasks::TaskStoreError;
use crate::remote::RemoteError;
use crate::storage::StorageError;
use crate::tasks::schedule::WaitError;
use crate::tasks::TaskError;
use crate::upload::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Infra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub status: StatusCode,
}

impl ErrorClass {
    const fn new(kind: ErrorKind, code: &'static str, status: StatusCode) -> Self {
        Self { kind, code, status }
    }

    const fn validation(code: &'static str) -> Self {
        Self::new(ErrorKind::Validation, code, StatusCode::BAD_REQUEST)
    }

    const fn infra(code: &'static str) -> Self {
        Self::new(ErrorKind::Infra, code, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for RemoteError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest(_) => ErrorClass::validation("invalid_request"),
            Self::InvalidTaskId => ErrorClass::validation("invalid_task_id"),
            Self::TransportFailure { .. } => {
                ErrorClass::new(ErrorKind::Provider, "transport_failure", StatusCode::BAD_GATEWAY)
            }
            Self::RemoteRejected { .. } => {
                ErrorClass::new(ErrorKind::Provider, "remote_rejected", StatusCode::BAD_GATEWAY)
            }
            Self::MalformedResponse(_) => ErrorClass::new(
                ErrorKind::Provider,
                "malformed_response",
                StatusCode::BAD_GATEWAY,
            ),
        }
    }
}

impl Classify for TaskError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Remote(inner) => inner.class(),
            Self::UnknownTask(_) => {
                ErrorClass::new(ErrorKind::Validation, "unknown_task", StatusCode::NOT_FOUND)
            }
            Self::Sink { .. } => ErrorClass::infra("task_sink_failed"),
        }
    }
}

impl Classify for WaitError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Task(inner) => inner.class(),
            Self::TimedOut { .. } => {
                ErrorClass::new(ErrorKind::Provider, "task_timed_out", StatusCode::GATEWAY_TIMEOUT)
            }
        }
    }
}

impl Classify for ValidationError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyInput => ErrorClass::validation("empty_input"),
            Self::UnsupportedType(_) => ErrorClass::validation("unsupported_type"),
            Self::TooLarge { .. } => ErrorClass::new(
                ErrorKind::Validation,
                "too_large",
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            Self::InvalidUrl(_) => ErrorClass::validation("invalid_url"),
            Self::IoFailure(_) => ErrorClass::infra("upload_io_failure"),
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(inner) => inner.class(),
            Self::VariantMismatch { .. } => ErrorClass::validation("variant_mismatch"),
            Self::Io { .. } => ErrorClass::infra("storage_io_failure"),
        }
    }
}

impl Classify for TaskStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound => {
                ErrorClass::new(ErrorKind::Validation, "not_found", StatusCode::NOT_FOUND)
            }
            Self::InvalidRow(_) | Self::Sqlite(_) | Self::Serde(_) => {
                ErrorClass::infra("task_store_failure")
            }
        }
    }
}

impl Classify for ConfigError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::MissingApiKey => ErrorClass::infra("missing_api_key"),
            _ => ErrorClass::infra("config_error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub ok: bool,
    pub error: String,
    pub error_kind: ErrorKind,
    pub error_code: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    /// Infra details are logged and replaced with a generic message.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: Classify + fmt::Display,
    {
        let class = error.class();
        let message = match class.kind {
            ErrorKind::Infra => {
                error!(code = class.code, detail = %error, "internal error");
                String::from("Internal server error")
            }
            ErrorKind::Validation | ErrorKind::Provider => error.to_string(),
        };
        Self {
            ok: false,
            error: message,
            error_kind: class.kind,
            error_code: String::from(class.code),
            status: class.status,
        }
    }
}

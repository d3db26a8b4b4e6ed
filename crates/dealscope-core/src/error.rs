use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single call to the inference backend.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Request to {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Transport failure talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication rejected by {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("Quota exhausted at {provider}: {reason}")]
    Quota { provider: String, reason: String },

    #[error("Request rejected by {provider} (HTTP {status}): {reason}")]
    Rejected {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl InferenceError {
    /// Timeouts, transport failures and rate limits may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout { .. }
                | InferenceError::Transport { .. }
                | InferenceError::RateLimited { .. }
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            InferenceError::Timeout { .. } => FailureKind::Timeout,
            InferenceError::Transport { .. } => FailureKind::Transport,
            InferenceError::RateLimited { .. } => FailureKind::RateLimited,
            InferenceError::Authentication { .. } => FailureKind::Authentication,
            InferenceError::Quota { .. } => FailureKind::Quota,
            InferenceError::Rejected { .. } => FailureKind::Rejected,
            InferenceError::InvalidResponse { .. } => FailureKind::InvalidResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// The response could not be read as structured data, even after repair.
    Parse,
    /// Structured, but a mandatory field is missing or holds an invalid value.
    Schema,
}

/// Reason a raw model response could not become an `AnalysisRecord`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Response is not structured data: {reason}")]
    Unparseable { reason: String },

    #[error("Missing mandatory field `{field}`")]
    MissingField { field: String },

    #[error("Field `{field}` has invalid type: expected {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    #[error("Field `{field}` has unrecognized value {value:?} (allowed: {allowed})")]
    InvalidEnum {
        field: String,
        value: String,
        allowed: String,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::Unparseable { .. } => ValidationErrorKind::Parse,
            ValidationError::MissingField { .. }
            | ValidationError::InvalidType { .. }
            | ValidationError::InvalidEnum { .. } => ValidationErrorKind::Schema,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored record at {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcript directory not found: {path}")]
    MissingDirectory { path: PathBuf },

    #[error("Transcript {path} is empty")]
    EmptyTranscript { path: PathBuf },

    #[error("Invalid client id {id:?}: {reason}")]
    InvalidClientId { id: String, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum RubricError {
    #[error("Invalid rubric: {reason}")]
    Invalid { reason: String },

    #[error("Failed to read rubric {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rubric {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RubricError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RubricError::Invalid {
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DealscopeError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rubric(#[from] RubricError),
}

impl DealscopeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DealscopeError::Input(_) => FailureKind::Input,
            DealscopeError::Inference(e) => e.kind(),
            DealscopeError::Validation(e) => match e.kind() {
                ValidationErrorKind::Parse => FailureKind::Parse,
                ValidationErrorKind::Schema => FailureKind::Schema,
            },
            DealscopeError::Store(_) => FailureKind::Store,
            DealscopeError::Rubric(_) => FailureKind::Configuration,
        }
    }
}

/// Why a single transcript failed, as reported by the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Input,
    Timeout,
    Transport,
    RateLimited,
    Authentication,
    Quota,
    Rejected,
    InvalidResponse,
    Parse,
    Schema,
    Store,
    Configuration,
    /// The worker processing the transcript panicked.
    Internal,
}

impl FailureKind {
    /// Failures that say nothing about the transcript and everything about the backend.
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Transport
                | FailureKind::RateLimited
                | FailureKind::Authentication
                | FailureKind::Quota
                | FailureKind::Rejected
        )
    }

    /// Failures that no retry can fix; the batch stops calling the backend after one.
    pub fn is_credential_failure(self) -> bool {
        matches!(self, FailureKind::Authentication | FailureKind::Quota)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Input => "input error",
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport error",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Authentication => "authentication error",
            FailureKind::Quota => "quota exhausted",
            FailureKind::Rejected => "request rejected",
            FailureKind::InvalidResponse => "invalid backend response",
            FailureKind::Parse => "parse error",
            FailureKind::Schema => "schema error",
            FailureKind::Store => "store error",
            FailureKind::Configuration => "configuration error",
            FailureKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, DealscopeError>;

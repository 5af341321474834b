use thiserror::Error;

use crate::job::TransitionError;
use crate::models::{AssetId, MediaKind};

/// Reasons an upload is rejected before any job exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file is empty")]
    Empty,

    #[error("asset name must not be empty")]
    MissingName,

    #[error("content type '{content_type}' is not accepted for {kind} assets")]
    UnsupportedContentType {
        kind: MediaKind,
        content_type: String,
    },

    #[error("{kind} asset is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge {
        kind: MediaKind,
        size: u64,
        limit: u64,
    },
}

/// Failure reported by a fingerprint collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fingerprint failed: {message}")]
pub struct FingerprintError {
    pub message: String,
    /// Transient failures (rate limits, 5xx, network) may be retried.
    pub retryable: bool,
}

impl FingerprintError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Failure reported by a match search collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("search failed: {message}")]
pub struct SearchError {
    pub message: String,
    pub retryable: bool,
}

impl SearchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ShieldError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("asset {0} has a scan in progress")]
    AssetBusy(AssetId),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ShieldError {
    /// Machine-readable code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ShieldError::Validation(_) => "validation",
            ShieldError::Conflict(_) => "conflict",
            ShieldError::AssetBusy(_) => "asset_busy",
            ShieldError::NotFound(_) => "not_found",
            ShieldError::Fingerprint(_) => "fingerprint_error",
            ShieldError::Search(_) => "search_error",
            ShieldError::Transition(_) => "invalid_transition",
            ShieldError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ShieldError>;

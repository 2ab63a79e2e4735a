//! The error taxonomy every handler returns and every response shaper maps
//! from. Kinds are load-bearing (they drive HTTP status and retry
//! semantics); the specific type name is not.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Request shape/constraint violation. 400. Never retried by the caller.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    /// Missing, expired, or revoked credentials. 401. Clients may refresh
    /// and retry.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Scope, permission, org-access, or ownership check failed. 403. Never
    /// reveals whether the resource exists across tenants.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Includes "exists but not yours", to prevent ID enumeration. 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent update or unique-constraint violation. 409. Callers may
    /// reload and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Per-identity or per-route budget exceeded. 429.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Downstream provider (IdP, Cloudflare, email/SMS) errored or timed
    /// out. 502/504. Retried internally where idempotent.
    #[error("external failure: {0}")]
    ExternalFailure(String),

    /// Store connection or deadlock; retried in-band with capped backoff.
    /// Surfaces as 500 only once retries are exhausted.
    #[error("transient store failure: {0}")]
    TransientStoreFailure(String),

    /// Precondition collapse: schema drift, corrupt state. 500, logged with
    /// high severity.
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation { .. } => 400,
            ApiError::Unauthenticated(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::RateLimited { .. } => 429,
            ApiError::ExternalFailure(_) => 502,
            ApiError::TransientStoreFailure(_) => 500,
            ApiError::Fatal(_) => 500,
        }
    }

    /// Poison-pill conditions: a worker encountering one of these must move
    /// the job to the dead-letter table instead of retrying.
    pub fn is_poison_pill(&self) -> bool {
        matches!(self, ApiError::Validation { .. } | ApiError::Forbidden(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::TransientStoreFailure(_) | ApiError::ExternalFailure(_)
        )
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        ApiError::Forbidden(reason.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        let (error, details) = match err {
            ApiError::Validation { details, .. } => {
                ("validation_error".to_string(), Some(details.clone()))
            }
            ApiError::Unauthenticated(_) => ("unauthenticated".to_string(), None),
            ApiError::Forbidden(_) => ("forbidden".to_string(), None),
            ApiError::NotFound(_) => ("not_found".to_string(), None),
            ApiError::Conflict(_) => ("conflict".to_string(), None),
            ApiError::RateLimited { .. } => ("rate_limited".to_string(), None),
            ApiError::ExternalFailure(_) => ("external_failure".to_string(), None),
            ApiError::TransientStoreFailure(_) => ("store_failure".to_string(), None),
            ApiError::Fatal(_) => ("fatal".to_string(), None),
        };
        ErrorBody {
            error,
            message: err.to_string(),
            details,
        }
    }
}

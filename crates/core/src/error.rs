use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed")]
    Validation(serde_json::Value),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation_failed",
            Self::BadGateway(_) => "bad_gateway",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Validation(_) => 422,
            Self::BadGateway(_) => 502,
            Self::Internal(_) => 500,
        }
    }
}

/// JSON error envelope: `{ "error": { "code": "…", "message": "…", "details": {} } }`
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        let details = match e {
            ApiError::Validation(fields) => serde_json::json!({ "fields": fields }),
            _ => serde_json::Value::Object(serde_json::Map::new()),
        };
        Self {
            error: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                details,
            },
        }
    }
}

/// Failure classes surfaced in job reports.
///
/// Title-level kinds are recorded per title and never abort a run; the
/// remaining kinds abort the pipeline for the affected job only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    SourceFormatChanged,
    MetadataNotConfigured,
    MetadataAuthFailed,
    MetadataFailed,
    TargetNotConfigured,
    TargetAuthFailed,
    TargetConnectivityFailed,
    TargetValidationFailed,
    ConfigPersistenceFailed,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::SourceFormatChanged => "source_format_changed",
            Self::MetadataNotConfigured => "metadata_not_configured",
            Self::MetadataAuthFailed => "metadata_auth_failed",
            Self::MetadataFailed => "metadata_failed",
            Self::TargetNotConfigured => "target_not_configured",
            Self::TargetAuthFailed => "target_auth_failed",
            Self::TargetConnectivityFailed => "target_connectivity_failed",
            Self::TargetValidationFailed => "target_validation_failed",
            Self::ConfigPersistenceFailed => "config_persistence_failed",
            Self::Internal => "internal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "source_unavailable" => Some(Self::SourceUnavailable),
            "source_format_changed" => Some(Self::SourceFormatChanged),
            "metadata_not_configured" => Some(Self::MetadataNotConfigured),
            "metadata_auth_failed" => Some(Self::MetadataAuthFailed),
            "metadata_failed" => Some(Self::MetadataFailed),
            "target_not_configured" => Some(Self::TargetNotConfigured),
            "target_auth_failed" => Some(Self::TargetAuthFailed),
            "target_connectivity_failed" => Some(Self::TargetConnectivityFailed),
            "target_validation_failed" => Some(Self::TargetValidationFailed),
            "config_persistence_failed" => Some(Self::ConfigPersistenceFailed),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether this failure ends the whole run rather than a single title.
    pub fn is_job_level(self) -> bool {
        !matches!(
            self,
            Self::MetadataFailed
                | Self::TargetConnectivityFailed
                | Self::TargetValidationFailed
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_field_details() {
        let err = ApiError::Validation(serde_json::json!({ "top_count": ["must be 3, 5 or 10"] }));
        let env = ErrorEnvelope::from(&err);
        assert_eq!(err.status_code(), 422);
        assert_eq!(env.error.code, "validation_failed");
        assert_eq!(env.error.details["fields"]["top_count"][0], "must be 3, 5 or 10");
    }

    #[test]
    fn failure_kind_codes_roundtrip() {
        for kind in [
            FailureKind::SourceUnavailable,
            FailureKind::SourceFormatChanged,
            FailureKind::MetadataAuthFailed,
            FailureKind::TargetAuthFailed,
            FailureKind::TargetValidationFailed,
        ] {
            assert_eq!(FailureKind::from_str(kind.as_str()), Some(kind));
        }
        assert!(FailureKind::SourceFormatChanged.is_job_level());
        assert!(FailureKind::MetadataAuthFailed.is_job_level());
        assert!(!FailureKind::TargetValidationFailed.is_job_level());
    }
}

//! エラー型定義
//!
//! 統一エラー型（thiserror使用）

use thiserror::Error;
use uuid::Uuid;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// UUID parse error
    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Platform error type
#[derive(Debug, Error)]
pub enum TenantdError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Tenant not found
    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Conflict error (e.g., duplicate resource)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Audit trail integrity violation
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Log signature error
    #[error("Signature error: {0}")]
    Signature(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TenantdError {
    /// Returns a safe error message for external callers.
    ///
    /// Internal detail (SQL text, file paths, key material) stays in the
    /// `Display` output for server logs only.
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::Common(CommonError::Validation(_)) => "Invalid request",
            Self::Common(_) => "Request error",
            Self::TenantNotFound(_) => "Tenant not found",
            Self::NotFound(_) => "Not found",
            Self::Database(_) => "Database error",
            Self::Conflict(_) => "Resource conflict",
            Self::Integrity(_) => "Audit trail integrity violation",
            Self::Signature(_) => "Log signature error",
            Self::Internal(_) => "Internal error",
        }
    }
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (Platform)
pub type TenantdResult<T> = Result<T, TenantdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_display() {
        let error = CommonError::Config("test config error".to_string());
        assert_eq!(error.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_tenant_not_found_display() {
        let tenant_id = Uuid::new_v4();
        let error = TenantdError::TenantNotFound(tenant_id);
        assert!(error.to_string().contains(&tenant_id.to_string()));
    }

    #[test]
    fn test_error_from_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let common_error: CommonError = json_error.into();
        assert!(matches!(common_error, CommonError::Serialization(_)));
    }

    #[test]
    fn test_common_error_transparent() {
        let error: TenantdError = CommonError::Validation("bad slug".to_string()).into();
        assert_eq!(error.to_string(), "Validation error: bad slug");
    }

    #[test]
    fn test_external_message_hides_detail() {
        let error = TenantdError::Database("UNIQUE constraint failed: tenants.slug".to_string());
        assert_eq!(error.external_message(), "Database error");

        let error = TenantdError::Integrity("checksum mismatch at entry 42".to_string());
        assert_eq!(error.external_message(), "Audit trail integrity violation");
    }
}

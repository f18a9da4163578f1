//! The module contains the error the engine can throw.
//!
//! The errors are:
//!
//! - [`Validation`] thrown when a sale snapshot or an input field is malformed.
//! - [`DuplicateInvoice`] thrown when a sale already has an electronic invoice.
//! - [`KeyNotFound`] thrown when an item are not found.
//! - [`InvalidTransition`] thrown when the invoice state forbids the operation.
//! - [`Storage`] thrown when a sequential could not be committed after retries.
//! - [`AuthorityRejected`] and [`AuthorityUnavailable`] describe the SRI outcome.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`DuplicateInvoice`]: EngineError::DuplicateInvoice
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`InvalidTransition`]: EngineError::InvalidTransition
//!  [`Storage`]: EngineError::Storage
//!  [`AuthorityRejected`]: EngineError::AuthorityRejected
//!  [`AuthorityUnavailable`]: EngineError::AuthorityUnavailable
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Sale {0} already has an electronic invoice")]
    DuplicateInvoice(i64),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Storage conflict: {0}")]
    Storage(String),
    #[error("Rejected by the authority: {}", .0.join("; "))]
    AuthorityRejected(Vec<String>),
    #[error("Authority unavailable: {0}")]
    AuthorityUnavailable(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// `true` when the same call may succeed later without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::AuthorityUnavailable(_))
    }

    /// Stable machine-readable discriminator.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateInvoice(_) => "duplicate_invoice",
            Self::KeyNotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Storage(_) => "storage",
            Self::AuthorityRejected(_) => "authority_rejected",
            Self::AuthorityUnavailable(_) => "authority_unavailable",
            Self::Signing(_) => "signing",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Database(_) => "database",
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::DuplicateInvoice(a), Self::DuplicateInvoice(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InvalidTransition(a), Self::InvalidTransition(b)) => a == b,
            (Self::Storage(a), Self::Storage(b)) => a == b,
            (Self::AuthorityRejected(a), Self::AuthorityRejected(b)) => a == b,
            (Self::AuthorityUnavailable(a), Self::AuthorityUnavailable(b)) => a == b,
            (Self::Signing(a), Self::Signing(b)) => a == b,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_joins_messages() {
        let err = EngineError::AuthorityRejected(vec![
            "RUC inválido".to_string(),
            "Fecha fuera de rango".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Rejected by the authority: RUC inválido; Fecha fuera de rango"
        );
    }

    #[test]
    fn only_storage_and_unavailable_are_retryable() {
        assert!(EngineError::Storage("x".into()).is_retryable());
        assert!(EngineError::AuthorityUnavailable("x".into()).is_retryable());
        assert!(!EngineError::AuthorityRejected(vec![]).is_retryable());
        assert!(!EngineError::Validation("x".into()).is_retryable());
        assert!(!EngineError::DuplicateInvoice(1).is_retryable());
    }
}

use serde::Serialize;

use super::bureau::LookupError;
use super::credentials::HashError;
use super::domain::Role;
use super::intake::ValidationError;
use super::lifecycle::LifecycleConflict;
use super::policy::Denial;
use super::report::ReportError;
use super::repository::RepositoryError;
use super::tokens::TokenError;

/// Error raised by the credit desk service.
#[derive(Debug, thiserror::Error)]
pub enum CreditDeskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Denied(#[from] Denial),
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("invalid username or secret")]
    InvalidCredentials,
    #[error("account is deactivated")]
    Deactivated,
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
    #[error("audit write failed: {0}")]
    AuditWrite(RepositoryError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Hashing(#[from] HashError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<LifecycleConflict> for CreditDeskError {
    fn from(conflict: LifecycleConflict) -> Self {
        CreditDeskError::Conflict(conflict.to_string())
    }
}

/// Stable, machine readable classification of [`CreditDeskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    RoleDenied,
    OwnershipDenied,
    SelfTargetDenied,
    Unauthenticated,
    InvalidCredentials,
    Deactivated,
    LookupUnavailable,
    LookupRejected,
    LookupMalformed,
    StorageFailure,
    AuditWriteFailure,
    ReportFailure,
    CredentialFailure,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RoleDenied => "role_denied",
            ErrorKind::OwnershipDenied => "ownership_denied",
            ErrorKind::SelfTargetDenied => "self_target_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::Deactivated => "deactivated",
            ErrorKind::LookupUnavailable => "lookup_unavailable",
            ErrorKind::LookupRejected => "lookup_rejected",
            ErrorKind::LookupMalformed => "lookup_malformed",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::AuditWriteFailure => "audit_write_failure",
            ErrorKind::ReportFailure => "report_failure",
            ErrorKind::CredentialFailure => "credential_failure",
        }
    }
}

impl CreditDeskError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CreditDeskError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CreditDeskError::Validation(_) => ErrorKind::Validation,
            CreditDeskError::NotFound { .. } => ErrorKind::NotFound,
            CreditDeskError::Conflict(_) => ErrorKind::Conflict,
            CreditDeskError::Denied(Denial::RoleDenied { .. }) => ErrorKind::RoleDenied,
            CreditDeskError::Denied(Denial::OwnershipDenied { .. }) => ErrorKind::OwnershipDenied,
            CreditDeskError::Denied(Denial::SelfTargetDenied) => ErrorKind::SelfTargetDenied,
            CreditDeskError::Unauthenticated => ErrorKind::Unauthenticated,
            CreditDeskError::InvalidCredentials => ErrorKind::InvalidCredentials,
            CreditDeskError::Deactivated => ErrorKind::Deactivated,
            CreditDeskError::Lookup(LookupError::Unavailable(_)) => ErrorKind::LookupUnavailable,
            CreditDeskError::Lookup(LookupError::Rejected { .. }) => ErrorKind::LookupRejected,
            CreditDeskError::Lookup(LookupError::Malformed(_)) => ErrorKind::LookupMalformed,
            CreditDeskError::Storage(_) => ErrorKind::StorageFailure,
            CreditDeskError::AuditWrite(_) => ErrorKind::AuditWriteFailure,
            CreditDeskError::Report(_) => ErrorKind::ReportFailure,
            CreditDeskError::Hashing(_) | CreditDeskError::Token(TokenError::Signing(_)) => {
                ErrorKind::CredentialFailure
            }
            CreditDeskError::Token(_) => ErrorKind::Unauthenticated,
        }
    }

    /// Message safe to show the caller. Storage and credential internals are reserved for admins.
    pub fn public_message(&self, viewer: Option<Role>) -> String {
        let admin = viewer == Some(Role::Admin);
        match self {
            CreditDeskError::Storage(_) | CreditDeskError::AuditWrite(_) if !admin => {
                "internal storage error".to_string()
            }
            CreditDeskError::Hashing(_) | CreditDeskError::Token(TokenError::Signing(_))
                if !admin =>
            {
                "internal credential error".to_string()
            }
            CreditDeskError::Token(_) => CreditDeskError::Unauthenticated.to_string(),
            other => other.to_string(),
        }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            CreditDeskError::Validation(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::credit::policy::Capability;

    #[test]
    fn denials_keep_distinct_kinds() {
        let role = CreditDeskError::from(Denial::RoleDenied {
            role: Role::Commercial,
            capability: Capability::PerformLookup,
        });
        let own = CreditDeskError::from(Denial::OwnershipDenied {
            capability: Capability::ViewOwnRequests,
        });
        assert_eq!(role.kind(), ErrorKind::RoleDenied);
        assert_eq!(own.kind(), ErrorKind::OwnershipDenied);
        assert_eq!(
            CreditDeskError::from(Denial::SelfTargetDenied).kind().as_str(),
            "self_target_denied"
        );
    }

    #[test]
    fn storage_text_hidden_from_non_admins() {
        let error = CreditDeskError::Storage(RepositoryError::Unavailable(
            "database is locked".into(),
        ));
        assert_eq!(
            error.public_message(Some(Role::Risk)),
            "internal storage error"
        );
        assert!(error
            .public_message(Some(Role::Admin))
            .contains("database is locked"));
    }
}

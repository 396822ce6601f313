//! Credit evaluation desk for business clients.
//!
//! Commercial staff open requests, the credit area attaches bureau lookups and records a
//! single risk verdict per request, and every mutation lands in an append-only audit log.
//! Storage and the bureau are injected through [`CreditStore`] and [`CreditBureau`].

pub mod audit;
pub mod bureau;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod policy;
pub mod report;
pub mod repository;
pub mod router;
pub mod service;
pub mod settings;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod tests;

pub use audit::{AuditDiagnostics, AuditDiagnosticsSnapshot, AuditFailure, AuditPolicy};
pub use bureau::{CreditBureau, CreditProfile, FixtureBureau, LookupError};
pub use credentials::{BcryptHasher, HashError, SecretHasher};
pub use domain::{
    AccountDraft, AffectedTable, AuditEntryId, AuditLogEntry, Caller, ClientStatus,
    CreditLookupRecord, CreditRequest, HistoricalClient, HistoricalClientDraft,
    HistoricalClientEdit, HistoricalClientId, LookupId, ManualAuditDraft, RequestDraft,
    RequestEdit, RequestId, RequestState, Role, TaxId, User, UserId, VerdictDraft, VerdictEdit,
    VerdictId, VerdictOutcome, VerdictRecord,
};
pub use error::{CreditDeskError, ErrorKind};
pub use intake::{FieldViolation, ValidationError};
pub use lifecycle::{project_state, LifecycleConflict};
pub use policy::{Capability, Denial};
pub use report::LookupReport;
pub use repository::{
    AuditFilter, ClientFilter, CreditStore, Page, PageRequest, RepositoryError, RequestFilter,
    TimeRange, UserFilter, VerdictFilter,
};
pub use router::credit_router;
pub use service::{ActivityStats, ActorTotal, CreditDeskService, RequestDashboard};
pub use settings::DeskSettings;
pub use store::{MemoryStore, SqliteStore};
pub use tokens::{Session, TokenError, TokenIssuer};

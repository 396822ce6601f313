use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{
    AffectedTable, AuditLogEntry, ClientStatus, CreditLookupRecord, CreditRequest,
    HistoricalClient, HistoricalClientId, LookupId, RequestId, RequestState, Role, TaxId, User,
    UserId, VerdictId, VerdictOutcome, VerdictRecord,
};

/// Storage abstraction so the service can run against memory or SQLite unchanged.
///
/// `write` runs the closure inside one transaction: an `Err` from the closure discards
/// every change it made. `read` sees only committed data.
pub trait CreditStore: Send + Sync {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, E>,
        E: From<RepositoryError>;

    fn write<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Queries available inside any transaction.
pub trait LedgerRead {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    fn secret_digest(&self, id: UserId) -> Result<Option<String>, RepositoryError>;
    fn user_count(&self) -> Result<u64, RepositoryError>;
    fn users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, RepositoryError>;

    fn request(&self, id: RequestId) -> Result<Option<CreditRequest>, RepositoryError>;
    fn requests(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<Page<CreditRequest>, RepositoryError>;
    fn state_counts(
        &self,
        owner: Option<UserId>,
    ) -> Result<Vec<(RequestState, u64)>, RepositoryError>;

    fn lookup(&self, id: LookupId) -> Result<Option<CreditLookupRecord>, RepositoryError>;
    /// Most recent lookup by `(queried_at, id)`.
    fn latest_lookup(
        &self,
        request_id: RequestId,
    ) -> Result<Option<CreditLookupRecord>, RepositoryError>;
    /// Every lookup for the request, newest first.
    fn lookups_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<CreditLookupRecord>, RepositoryError>;

    fn verdict(&self, id: VerdictId) -> Result<Option<VerdictRecord>, RepositoryError>;
    fn verdict_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<VerdictRecord>, RepositoryError>;
    fn verdicts(
        &self,
        filter: &VerdictFilter,
        page: PageRequest,
    ) -> Result<Page<VerdictRecord>, RepositoryError>;

    fn audit_entries(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, RepositoryError>;
    /// Entries on the request itself, its lookups, and its verdict. Newest first.
    fn request_trail(&self, request_id: RequestId) -> Result<Vec<AuditLogEntry>, RepositoryError>;
    /// Entry counts grouped by actor and the role recorded on each entry.
    fn activity(&self, range: &TimeRange) -> Result<Vec<ActorActivity>, RepositoryError>;

    fn historical_client(
        &self,
        id: HistoricalClientId,
    ) -> Result<Option<HistoricalClient>, RepositoryError>;
    fn historical_client_by_tax_id(
        &self,
        tax_id: &TaxId,
    ) -> Result<Option<HistoricalClient>, RepositoryError>;
    /// Most recently registered first.
    fn historical_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> Result<Page<HistoricalClient>, RepositoryError>;
}

/// Mutations. Only reachable through [`CreditStore::write`].
pub trait Ledger: LedgerRead {
    /// Fails with [`RepositoryError::Conflict`] when the username is taken.
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError>;
    /// Persists role, active flag and display name.
    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError>;
    fn set_secret_digest(&mut self, id: UserId, digest: &str) -> Result<(), RepositoryError>;

    fn insert_request(&mut self, request: NewRequest) -> Result<CreditRequest, RepositoryError>;
    fn save_request(&mut self, request: &CreditRequest) -> Result<(), RepositoryError>;

    fn insert_lookup(&mut self, lookup: NewLookup) -> Result<CreditLookupRecord, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the request already has a verdict.
    fn insert_verdict(&mut self, verdict: NewVerdict) -> Result<VerdictRecord, RepositoryError>;
    fn save_verdict(&mut self, verdict: &VerdictRecord) -> Result<(), RepositoryError>;

    fn append_audit(&mut self, entry: AuditDraft) -> Result<AuditLogEntry, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the tax id is already registered.
    fn insert_historical_client(
        &mut self,
        client: NewHistoricalClient,
    ) -> Result<HistoricalClient, RepositoryError>;
    fn save_historical_client(&mut self, client: &HistoricalClient) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub secret_digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub tax_id: TaxId,
    pub company_name: String,
    pub requested_amount: Decimal,
    pub requested_units: u32,
    pub comment: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLookup {
    pub request_id: RequestId,
    pub tax_id: TaxId,
    pub raw_result: serde_json::Value,
    pub queried_by: UserId,
    pub queried_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVerdict {
    pub request_id: RequestId,
    pub lookup_id: Option<LookupId>,
    pub outcome: VerdictOutcome,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
    pub analyst_id: UserId,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHistoricalClient {
    pub tax_id: TaxId,
    pub company_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub sector: Option<String>,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
    pub status: ClientStatus,
    pub registered_at: DateTime<Utc>,
}

/// Audit row before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub actor_id: UserId,
    pub actor_role: Role,
    pub action: String,
    pub affected_table: Option<AffectedTable>,
    pub affected_id: Option<i64>,
    pub comment: Option<String>,
    pub details: Option<serde_json::Value>,
    pub source_address: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserFilter {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |role| user.role == role)
            && self.active.map_or(true, |active| user.active == active)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestFilter {
    #[serde(default)]
    pub state: Option<RequestState>,
    #[serde(default)]
    pub owner: Option<UserId>,
    /// Case-insensitive match on tax id or company name.
    #[serde(default)]
    pub search: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, request: &CreditRequest) -> bool {
        if self.state.is_some_and(|state| request.state != state) {
            return false;
        }
        if self.owner.is_some_and(|owner| request.owner_id != owner) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                request.tax_id.as_str().contains(&term)
                    || request.company_name.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFilter {
    #[serde(default)]
    pub status: Option<ClientStatus>,
    /// Case-insensitive match on tax id or company name.
    #[serde(default)]
    pub search: Option<String>,
}

impl ClientFilter {
    pub fn matches(&self, client: &HistoricalClient) -> bool {
        if self.status.is_some_and(|status| client.status != status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                client.tax_id.as_str().contains(&term)
                    || client.company_name.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerdictFilter {
    #[serde(default)]
    pub outcome: Option<VerdictOutcome>,
    #[serde(default)]
    pub analyst: Option<UserId>,
}

impl VerdictFilter {
    pub fn matches(&self, verdict: &VerdictRecord) -> bool {
        self.outcome.map_or(true, |outcome| verdict.outcome == outcome)
            && self
                .analyst
                .map_or(true, |analyst| verdict.analyst_id == analyst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor: Option<UserId>,
    pub role: Option<Role>,
    pub table: Option<AffectedTable>,
    pub affected_id: Option<i64>,
    pub range: TimeRange,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor.map_or(true, |actor| entry.actor_id == actor)
            && self.role.map_or(true, |role| entry.actor_role == role)
            && self
                .table
                .map_or(true, |table| entry.affected_table == Some(table))
            && self
                .affected_id
                .map_or(true, |id| entry.affected_id == Some(id))
            && self.range.contains(entry.recorded_at)
    }
}

/// One-based page number plus a clamped page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_AUDIT_LIMIT: u32 = 50;
pub const MAX_AUDIT_LIMIT: u32 = 200;

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self::bounded(page, limit, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT)
    }

    pub fn audit(page: Option<u32>, limit: Option<u32>) -> Self {
        Self::bounded(page, limit, DEFAULT_AUDIT_LIMIT, MAX_AUDIT_LIMIT)
    }

    fn bounded(page: Option<u32>, limit: Option<u32>, default: u32, max: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default).clamp(1, max),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Slice an already ordered collection.
    pub fn slice<T>(&self, ordered: Vec<T>) -> Page<T> {
        let total = ordered.len() as u64;
        let items = ordered
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(items, *self, total)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let limit = u64::from(request.limit);
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorActivity {
    pub actor_id: UserId,
    pub actor_role: Role,
    pub entries: u64,
}

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a desk user account.
    UserId
);
entity_id!(
    /// Identifier of a credit evaluation request.
    RequestId
);
entity_id!(
    /// Identifier of a stored credit-bureau lookup.
    LookupId
);
entity_id!(
    /// Identifier of a risk verdict.
    VerdictId
);
entity_id!(AuditEntryId);
entity_id!(
    /// Identifier of a historical client record.
    HistoricalClientId
);

/// Desk roles. Every capability check is resolved from this value by the policy module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Commercial,
    Risk,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Commercial => "commercial",
            Role::Risk => "risk",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "commercial" => Some(Role::Commercial),
            "risk" => Some(Role::Risk),
            _ => None,
        }
    }
}

/// Account as exposed to the rest of the workflow. The secret digest is kept by the store only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Authenticated actor plus the network origin of the call, as attributed in the audit log.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub source_address: Option<String>,
}

impl Caller {
    pub fn new(user: User, source_address: Option<String>) -> Self {
        Self {
            user,
            source_address,
        }
    }

    pub fn id(&self) -> UserId {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

/// Fixed-length numeric taxpayer identifier of the client company.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

pub const TAX_ID_LENGTH: usize = 11;

impl TaxId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == TAX_ID_LENGTH && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxId::parse(&value)
            .ok_or_else(|| format!("tax id must be exactly {TAX_ID_LENGTH} digits"))
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a request. Approved, Rejected and Returned are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Evaluating,
    Approved,
    Rejected,
    Returned,
}

impl RequestState {
    pub const ALL: [RequestState; 5] = [
        RequestState::Pending,
        RequestState::Evaluating,
        RequestState::Approved,
        RequestState::Rejected,
        RequestState::Returned,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Evaluating => "evaluating",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Returned => "returned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        RequestState::ALL
            .into_iter()
            .find(|state| state.label().eq_ignore_ascii_case(raw.trim()))
    }
}

/// Evaluation case submitted by a commercial user for a business client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub id: RequestId,
    pub tax_id: TaxId,
    pub company_name: String,
    pub requested_amount: Decimal,
    pub requested_units: u32,
    pub comment: Option<String>,
    pub owner_id: UserId,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of one credit-bureau answer for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLookupRecord {
    pub id: LookupId,
    pub request_id: RequestId,
    pub tax_id: TaxId,
    pub raw_result: serde_json::Value,
    pub queried_by: UserId,
    pub queried_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOutcome {
    Approved,
    Rejected,
    Returned,
}

impl VerdictOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            VerdictOutcome::Approved => "approved",
            VerdictOutcome::Rejected => "rejected",
            VerdictOutcome::Returned => "returned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(VerdictOutcome::Approved),
            "rejected" => Some(VerdictOutcome::Rejected),
            "returned" => Some(VerdictOutcome::Returned),
            _ => None,
        }
    }
}

/// The single risk decision for a request. Approved amount and units are set iff approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub id: VerdictId,
    pub request_id: RequestId,
    pub lookup_id: Option<LookupId>,
    pub outcome: VerdictOutcome,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
    pub analyst_id: UserId,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Standing of a client carried over from earlier credit approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    #[default]
    Active,
    Inactive,
}

impl ClientStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(ClientStatus::Active),
            "inactive" => Some(ClientStatus::Inactive),
            _ => None,
        }
    }
}

/// Client approved before the desk kept requests, looked up by tax id when a new
/// request for the same company arrives. One record per tax id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalClient {
    pub id: HistoricalClientId,
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
    pub updated_at: DateTime<Utc>,
}

/// Collections an audit entry may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedTable {
    Users,
    Requests,
    CreditLookupRecords,
    VerdictRecords,
    HistoricalClients,
}

impl AffectedTable {
    pub const fn as_str(self) -> &'static str {
        match self {
            AffectedTable::Users => "users",
            AffectedTable::Requests => "requests",
            AffectedTable::CreditLookupRecords => "credit_lookup_records",
            AffectedTable::VerdictRecords => "verdict_records",
            AffectedTable::HistoricalClients => "historical_clients",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "users" => Some(AffectedTable::Users),
            "requests" => Some(AffectedTable::Requests),
            "credit_lookup_records" => Some(AffectedTable::CreditLookupRecords),
            "verdict_records" => Some(AffectedTable::VerdictRecords),
            "historical_clients" => Some(AffectedTable::HistoricalClients),
            _ => None,
        }
    }
}

/// Append-only audit row. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub actor_id: UserId,
    pub actor_role: Role,
    pub action: String,
    pub affected_table: Option<AffectedTable>,
    pub affected_id: Option<i64>,
    pub comment: Option<String>,
    pub details: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
    pub source_address: Option<String>,
}

/// Payload for a new request. Numbers stay signed so bad values surface as field violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDraft {
    pub tax_id: String,
    pub company_name: String,
    pub requested_amount: Decimal,
    pub requested_units: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// The only fields an owner may change on a pending request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestEdit {
    #[serde(default)]
    pub requested_amount: Option<Decimal>,
    #[serde(default)]
    pub requested_units: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerdictDraft {
    pub outcome: VerdictOutcome,
    #[serde(default)]
    pub approved_amount: Option<Decimal>,
    #[serde(default)]
    pub approved_units: Option<i64>,
    #[serde(default)]
    pub lookup_id: Option<LookupId>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerdictEdit {
    pub outcome: VerdictOutcome,
    #[serde(default)]
    pub approved_amount: Option<Decimal>,
    #[serde(default)]
    pub approved_units: Option<i64>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountDraft {
    pub username: String,
    pub display_name: String,
    pub secret: String,
    pub role: Role,
}

/// Caller-supplied audit row for actions the workflow does not record on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualAuditDraft {
    pub action: String,
    #[serde(default)]
    pub affected_table: Option<AffectedTable>,
    #[serde(default)]
    pub affected_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalClientDraft {
    pub tax_id: String,
    pub company_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub approved_amount: Option<Decimal>,
    #[serde(default)]
    pub approved_units: Option<i64>,
    #[serde(default)]
    pub status: Option<ClientStatus>,
}

/// Changes to a historical client. The tax id is the record's key and cannot change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalClientEdit {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub approved_amount: Option<Decimal>,
    #[serde(default)]
    pub approved_units: Option<i64>,
    #[serde(default)]
    pub status: Option<ClientStatus>,
}

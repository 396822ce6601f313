//! Role/capability matrix for the credit desk.
//!
//! This is the only place that compares roles. Services ask [`authorize`] for a
//! [`Decision`] and convert a denial into an error before touching storage.

use serde::{Deserialize, Serialize};

use super::domain::{CreditRequest, Role, User, VerdictRecord};

/// Named permission checked before every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateRequest,
    ViewOwnRequests,
    ViewAllRequests,
    EditOwnPendingRequest,
    PerformLookup,
    ViewLookup,
    ExportLookupReport,
    CreateVerdict,
    EditVerdict,
    ManageUsers,
    ViewAuditAll,
    ViewAuditForRequest,
    WriteAuditManual,
    ViewHistoricalClients,
    ManageHistoricalClients,
}

impl Capability {
    pub const fn label(self) -> &'static str {
        match self {
            Capability::CreateRequest => "create_request",
            Capability::ViewOwnRequests => "view_own_requests",
            Capability::ViewAllRequests => "view_all_requests",
            Capability::EditOwnPendingRequest => "edit_own_pending_request",
            Capability::PerformLookup => "perform_lookup",
            Capability::ViewLookup => "view_lookup",
            Capability::ExportLookupReport => "export_lookup_report",
            Capability::CreateVerdict => "create_verdict",
            Capability::EditVerdict => "edit_verdict",
            Capability::ManageUsers => "manage_users",
            Capability::ViewAuditAll => "view_audit_all",
            Capability::ViewAuditForRequest => "view_audit_for_request",
            Capability::WriteAuditManual => "write_audit_manual",
            Capability::ViewHistoricalClients => "view_historical_clients",
            Capability::ManageHistoricalClients => "manage_historical_clients",
        }
    }
}

const COMMERCIAL_CAPABILITIES: &[Capability] = &[
    Capability::CreateRequest,
    Capability::ViewOwnRequests,
    Capability::EditOwnPendingRequest,
    Capability::ViewAuditForRequest,
    Capability::ViewHistoricalClients,
];

const RISK_CAPABILITIES: &[Capability] = &[
    Capability::ViewOwnRequests,
    Capability::ViewAllRequests,
    Capability::PerformLookup,
    Capability::ViewLookup,
    Capability::ExportLookupReport,
    Capability::CreateVerdict,
    Capability::EditVerdict,
    Capability::ViewAuditForRequest,
    Capability::ViewHistoricalClients,
    Capability::ManageHistoricalClients,
];

/// Whether the role alone carries the capability, before any resource scoping.
pub fn role_grants(role: Role, capability: Capability) -> bool {
    match role {
        Role::Admin => true,
        Role::Commercial => COMMERCIAL_CAPABILITIES.contains(&capability),
        Role::Risk => RISK_CAPABILITIES.contains(&capability),
    }
}

/// Resource a capability is exercised against.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    None,
    Request(&'a CreditRequest),
    Verdict(&'a VerdictRecord),
    DeactivationTarget(&'a User),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("role {role:?} lacks the {} capability", .capability.label())]
    RoleDenied { role: Role, capability: Capability },
    #[error("{} is limited to records the caller owns", .capability.label())]
    OwnershipDenied { capability: Capability },
    #[error("users cannot deactivate their own account")]
    SelfTargetDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(denial) => Err(denial),
        }
    }
}

/// Evaluate the role matrix first, then the resource-scoped rule for the capability.
pub fn authorize(actor: &User, capability: Capability, resource: Resource<'_>) -> Decision {
    if !role_grants(actor.role, capability) {
        return Decision::Deny(Denial::RoleDenied {
            role: actor.role,
            capability,
        });
    }

    let owned = match (capability, resource) {
        (Capability::ViewOwnRequests, Resource::Request(request)) => {
            request.owner_id == actor.id || role_grants(actor.role, Capability::ViewAllRequests)
        }
        (Capability::EditOwnPendingRequest, Resource::Request(request)) => {
            request.owner_id == actor.id
        }
        (Capability::ViewAuditForRequest, Resource::Request(request)) => {
            actor.role != Role::Commercial || request.owner_id == actor.id
        }
        (Capability::EditVerdict, Resource::Verdict(verdict)) => {
            actor.role == Role::Admin || verdict.analyst_id == actor.id
        }
        (Capability::ManageUsers, Resource::DeactivationTarget(target)) => {
            if target.id == actor.id {
                return Decision::Deny(Denial::SelfTargetDenied);
            }
            true
        }
        _ => true,
    };

    if owned {
        Decision::Allow
    } else {
        Decision::Deny(Denial::OwnershipDenied { capability })
    }
}

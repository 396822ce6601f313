//! Credit desk service: authorization, validation, and transactional persistence for
//! every workflow operation.
//!
//! Operations are split across submodules by the record they revolve around. All of
//! them authorize before writing and route their mutation through [`CreditDeskService::commit`],
//! which applies the configured [`AuditPolicy`].

mod audit;
mod clients;
mod identity;
mod lookups;
mod requests;
mod verdicts;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::audit::{AuditDiagnostics, AuditPolicy};
use super::bureau::CreditBureau;
use super::credentials::{BcryptHasher, SecretHasher};
use super::domain::{AffectedTable, Caller, CreditRequest, RequestId};
use super::error::CreditDeskError;
use super::policy::{authorize, Capability, Decision, Resource};
use super::repository::{AuditDraft, CreditStore, Ledger, LedgerRead};
use super::settings::DeskSettings;
use super::tokens::TokenIssuer;

pub use audit::{ActivityStats, ActorTotal};
pub use requests::RequestDashboard;

/// Service composing storage, the bureau client, credentials, and audit policy.
pub struct CreditDeskService<S, B> {
    store: Arc<S>,
    bureau: Arc<B>,
    hasher: Arc<dyn SecretHasher>,
    tokens: TokenIssuer,
    settings: DeskSettings,
    diagnostics: Arc<AuditDiagnostics>,
}

/// Audit payload produced by a mutation, completed with caller details on commit.
#[derive(Debug, Clone)]
pub(crate) struct AuditEvent {
    action: &'static str,
    table: Option<AffectedTable>,
    affected_id: Option<i64>,
    comment: Option<String>,
    details: Option<Value>,
}

impl AuditEvent {
    pub(crate) fn new(action: &'static str, table: AffectedTable, affected_id: i64) -> Self {
        Self {
            action,
            table: Some(table),
            affected_id: Some(affected_id),
            comment: None,
            details: None,
        }
    }

    pub(crate) fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub(crate) fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    pub fn new(store: Arc<S>, bureau: Arc<B>, settings: DeskSettings) -> Self {
        Self {
            store,
            bureau,
            hasher: Arc::new(BcryptHasher::default()),
            tokens: TokenIssuer::development(),
            settings,
            diagnostics: Arc::new(AuditDiagnostics::new()),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn SecretHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenIssuer) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn settings(&self) -> DeskSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn diagnostics(&self) -> &Arc<AuditDiagnostics> {
        &self.diagnostics
    }

    fn authorize(
        &self,
        caller: &Caller,
        capability: Capability,
        resource: Resource<'_>,
    ) -> Result<(), CreditDeskError> {
        match authorize(&caller.user, capability, resource) {
            Decision::Allow => Ok(()),
            Decision::Deny(denial) => {
                tracing::warn!(
                    actor_id = %caller.id(),
                    role = caller.role().label(),
                    capability = capability.label(),
                    reason = %denial,
                    "authorization denied"
                );
                Err(denial.into())
            }
        }
    }

    fn audit_draft(&self, caller: &Caller, event: AuditEvent) -> AuditDraft {
        AuditDraft {
            actor_id: caller.id(),
            actor_role: caller.role(),
            action: event.action.to_string(),
            affected_table: event.table,
            affected_id: event.affected_id,
            comment: event.comment,
            details: event.details,
            source_address: caller.source_address.clone(),
            recorded_at: Utc::now(),
        }
    }

    /// Run a mutation and record its audit entry according to the audit policy.
    ///
    /// Strict: one transaction, an append failure rolls the mutation back.
    /// Lenient: the mutation commits first; an append failure goes to diagnostics.
    fn commit<T, F>(&self, caller: &Caller, work: F) -> Result<T, CreditDeskError>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<(T, AuditEvent), CreditDeskError>,
    {
        match self.settings.audit_policy {
            AuditPolicy::Strict => self.store.write(|ledger| {
                let (value, event) = work(&mut *ledger)?;
                ledger
                    .append_audit(self.audit_draft(caller, event))
                    .map_err(CreditDeskError::AuditWrite)?;
                Ok(value)
            }),
            AuditPolicy::Lenient => {
                let (value, draft) = self.store.write(|ledger| {
                    let (value, event) = work(&mut *ledger)?;
                    Ok::<_, CreditDeskError>((value, self.audit_draft(caller, event)))
                })?;
                if let Err(err) = self
                    .store
                    .write(|ledger| ledger.append_audit(draft.clone()))
                {
                    self.diagnostics.record(&draft, &err);
                }
                Ok(value)
            }
        }
    }
}

pub(crate) fn require_request<L>(ledger: &L, id: RequestId) -> Result<CreditRequest, CreditDeskError>
where
    L: LedgerRead + ?Sized,
{
    ledger
        .request(id)?
        .ok_or_else(|| CreditDeskError::not_found("request", id.0))
}

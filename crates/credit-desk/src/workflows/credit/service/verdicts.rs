use chrono::Utc;
use serde_json::json;

use super::{require_request, AuditEvent, CreditDeskService};
use crate::workflows::credit::audit::actions;
use crate::workflows::credit::bureau::CreditBureau;
use crate::workflows::credit::domain::{
    AffectedTable, Caller, LookupId, RequestId, VerdictDraft, VerdictEdit, VerdictId,
    VerdictRecord,
};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::intake::{normalize_comments, validate_verdict_terms, ValidationError};
use crate::workflows::credit::lifecycle::{project_state, transition, LifecycleConflict, LifecycleEvent};
use crate::workflows::credit::policy::{Capability, Resource};
use crate::workflows::credit::repository::{
    CreditStore, Ledger, NewVerdict, Page, PageRequest, RepositoryError, VerdictFilter,
};

fn verdict_conflict(request_id: RequestId) -> impl FnOnce(RepositoryError) -> CreditDeskError {
    move |err| match err {
        RepositoryError::Conflict(_) => LifecycleConflict::VerdictExists(request_id).into(),
        other => CreditDeskError::Storage(other),
    }
}

/// Explicit lookup must belong to the request; otherwise fall back to the latest one.
fn resolve_lookup(
    ledger: &dyn Ledger,
    request_id: RequestId,
    requested: Option<LookupId>,
) -> Result<Option<LookupId>, CreditDeskError> {
    match requested {
        Some(id) => match ledger.lookup(id)? {
            Some(lookup) if lookup.request_id == request_id => Ok(Some(id)),
            _ => Err(ValidationError::single(
                "lookup_id",
                format!("lookup {id} does not belong to request {request_id}"),
            )
            .into()),
        },
        None => Ok(ledger.latest_lookup(request_id)?.map(|lookup| lookup.id)),
    }
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    /// Record the single verdict for a request and project its outcome onto the request
    /// state in the same transaction.
    pub fn record_verdict(
        &self,
        caller: &Caller,
        request_id: RequestId,
        draft: VerdictDraft,
    ) -> Result<VerdictRecord, CreditDeskError> {
        self.authorize(caller, Capability::CreateVerdict, Resource::None)?;
        let terms =
            validate_verdict_terms(draft.outcome, draft.approved_amount, draft.approved_units)?;
        let comments = normalize_comments(draft.comments)?;

        let verdict = self.commit(caller, |ledger| {
            let mut request = require_request(&*ledger, request_id)?;
            if ledger.verdict_for_request(request_id)?.is_some() {
                return Err(LifecycleConflict::VerdictExists(request_id).into());
            }
            transition(request.state, LifecycleEvent::VerdictRecorded(terms.outcome))?;
            let lookup_id = resolve_lookup(&*ledger, request_id, draft.lookup_id)?;

            let now = Utc::now();
            let verdict = ledger
                .insert_verdict(NewVerdict {
                    request_id,
                    lookup_id,
                    outcome: terms.outcome,
                    approved_amount: terms.approved_amount,
                    approved_units: terms.approved_units,
                    analyst_id: caller.id(),
                    comments,
                    decided_at: now,
                })
                .map_err(verdict_conflict(request_id))?;

            request.state = project_state(&verdict);
            request.updated_at = now;
            ledger.save_request(&request)?;

            let event = AuditEvent::new(
                actions::RECORD_VERDICT,
                AffectedTable::VerdictRecords,
                verdict.id.0,
            )
            .details(json!({
                "request_id": request_id.0,
                "outcome": verdict.outcome.label(),
                "approved_amount": verdict.approved_amount.map(|amount| amount.to_string()),
                "approved_units": verdict.approved_units,
            }));
            Ok((verdict, event))
        })?;

        tracing::info!(
            request_id = %request_id,
            verdict_id = %verdict.id,
            outcome = verdict.outcome.label(),
            "verdict recorded"
        );
        Ok(verdict)
    }

    /// Amend a verdict. Only its author or an admin may do so; the request state follows.
    pub fn update_verdict(
        &self,
        caller: &Caller,
        verdict_id: VerdictId,
        edit: VerdictEdit,
    ) -> Result<VerdictRecord, CreditDeskError> {
        self.authorize(caller, Capability::EditVerdict, Resource::None)?;
        let terms = validate_verdict_terms(edit.outcome, edit.approved_amount, edit.approved_units)?;
        let comments = normalize_comments(edit.comments)?;

        let verdict = self.commit(caller, |ledger| {
            let mut verdict = ledger
                .verdict(verdict_id)?
                .ok_or_else(|| CreditDeskError::not_found("verdict", verdict_id.0))?;
            self.authorize(caller, Capability::EditVerdict, Resource::Verdict(&verdict))?;

            let previous = verdict.outcome;
            let now = Utc::now();
            verdict.outcome = terms.outcome;
            verdict.approved_amount = terms.approved_amount;
            verdict.approved_units = terms.approved_units;
            if comments.is_some() {
                verdict.comments = comments;
            }
            verdict.updated_at = now;
            ledger.save_verdict(&verdict)?;

            let mut request = require_request(&*ledger, verdict.request_id)?;
            request.state = project_state(&verdict);
            request.updated_at = now;
            ledger.save_request(&request)?;

            let event = AuditEvent::new(
                actions::UPDATE_VERDICT,
                AffectedTable::VerdictRecords,
                verdict.id.0,
            )
            .details(json!({
                "request_id": verdict.request_id.0,
                "from": previous.label(),
                "to": verdict.outcome.label(),
            }));
            Ok((verdict, event))
        })?;

        tracing::info!(
            verdict_id = %verdict_id,
            outcome = verdict.outcome.label(),
            "verdict updated"
        );
        Ok(verdict)
    }

    /// Verdict of a request, visible to whoever may view the request.
    pub fn verdict_for_request(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<VerdictRecord, CreditDeskError> {
        self.authorize(caller, Capability::ViewOwnRequests, Resource::None)?;
        let (request, verdict) = self.store.read(|ledger| {
            let request = require_request(ledger, request_id)?;
            let verdict = ledger.verdict_for_request(request_id)?;
            Ok::<_, CreditDeskError>((request, verdict))
        })?;
        self.authorize(caller, Capability::ViewOwnRequests, Resource::Request(&request))?;
        verdict.ok_or_else(|| CreditDeskError::not_found("verdict for request", request_id.0))
    }

    pub fn get_verdict(
        &self,
        caller: &Caller,
        verdict_id: VerdictId,
    ) -> Result<VerdictRecord, CreditDeskError> {
        self.authorize(caller, Capability::ViewOwnRequests, Resource::None)?;
        let (verdict, request) = self.store.read(|ledger| {
            let verdict = ledger
                .verdict(verdict_id)?
                .ok_or_else(|| CreditDeskError::not_found("verdict", verdict_id.0))?;
            let request = require_request(ledger, verdict.request_id)?;
            Ok::<_, CreditDeskError>((verdict, request))
        })?;
        self.authorize(caller, Capability::ViewOwnRequests, Resource::Request(&request))?;
        Ok(verdict)
    }

    pub fn list_verdicts(
        &self,
        caller: &Caller,
        filter: &VerdictFilter,
        page: PageRequest,
    ) -> Result<Page<VerdictRecord>, CreditDeskError> {
        self.authorize(caller, Capability::ViewAllRequests, Resource::None)?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.verdicts(filter, page)?))
    }
}

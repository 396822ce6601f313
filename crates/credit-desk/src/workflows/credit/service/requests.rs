use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::{require_request, AuditEvent, CreditDeskService};
use crate::workflows::credit::audit::actions;
use crate::workflows::credit::bureau::CreditBureau;
use crate::workflows::credit::domain::{
    AffectedTable, Caller, CreditRequest, RequestDraft, RequestEdit, RequestId, RequestState,
};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::intake::{validate_edit, validate_request};
use crate::workflows::credit::lifecycle::ensure_editable;
use crate::workflows::credit::policy::{role_grants, Capability, Resource};
use crate::workflows::credit::repository::{
    CreditStore, NewRequest, Page, PageRequest, RequestFilter,
};

/// Request counts per state, scoped to what the caller may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDashboard {
    pub total: u64,
    pub by_state: BTreeMap<&'static str, u64>,
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    pub fn create_request(
        &self,
        caller: &Caller,
        draft: RequestDraft,
    ) -> Result<CreditRequest, CreditDeskError> {
        self.authorize(caller, Capability::CreateRequest, Resource::None)?;
        let validated = validate_request(draft)?;

        let request = self.commit(caller, |ledger| {
            let request = ledger.insert_request(NewRequest {
                tax_id: validated.tax_id,
                company_name: validated.company_name,
                requested_amount: validated.requested_amount,
                requested_units: validated.requested_units,
                comment: validated.comment,
                owner_id: caller.id(),
                created_at: Utc::now(),
            })?;
            let event = AuditEvent::new(actions::CREATE_REQUEST, AffectedTable::Requests, request.id.0)
                .details(json!({
                    "tax_id": request.tax_id.as_str(),
                    "requested_amount": request.requested_amount.to_string(),
                    "requested_units": request.requested_units,
                }));
            Ok((request, event))
        })?;

        tracing::info!(
            request_id = %request.id,
            owner_id = %request.owner_id,
            "credit request created"
        );
        Ok(request)
    }

    pub fn get_request(
        &self,
        caller: &Caller,
        id: RequestId,
    ) -> Result<CreditRequest, CreditDeskError> {
        self.authorize(caller, Capability::ViewOwnRequests, Resource::None)?;
        let request = self.store.read(|ledger| require_request(ledger, id))?;
        self.authorize(caller, Capability::ViewOwnRequests, Resource::Request(&request))?;
        Ok(request)
    }

    /// Newest first. Callers without the view-all capability only see their own requests.
    pub fn list_requests(
        &self,
        caller: &Caller,
        filter: RequestFilter,
        page: PageRequest,
    ) -> Result<Page<CreditRequest>, CreditDeskError> {
        self.authorize(caller, Capability::ViewOwnRequests, Resource::None)?;
        let filter = self.scope_to_caller(caller, filter);
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.requests(&filter, page)?))
    }

    /// Change amount, units, or comment while the request is still pending.
    pub fn edit_request(
        &self,
        caller: &Caller,
        id: RequestId,
        edit: RequestEdit,
    ) -> Result<CreditRequest, CreditDeskError> {
        self.authorize(caller, Capability::EditOwnPendingRequest, Resource::None)?;
        let changes = validate_edit(edit)?;

        let request = self.commit(caller, |ledger| {
            let mut request = require_request(&*ledger, id)?;
            ensure_editable(request.state)?;
            self.authorize(
                caller,
                Capability::EditOwnPendingRequest,
                Resource::Request(&request),
            )?;

            let mut changed = serde_json::Map::new();
            if let Some(amount) = changes.requested_amount {
                changed.insert(
                    "requested_amount".into(),
                    json!({ "from": request.requested_amount.to_string(), "to": amount.to_string() }),
                );
                request.requested_amount = amount;
            }
            if let Some(units) = changes.requested_units {
                changed.insert(
                    "requested_units".into(),
                    json!({ "from": request.requested_units, "to": units }),
                );
                request.requested_units = units;
            }
            if let Some(comment) = changes.comment.clone() {
                changed.insert("comment".into(), json!({ "to": comment }));
                request.comment = Some(comment);
            }
            request.updated_at = Utc::now();
            ledger.save_request(&request)?;

            let event = AuditEvent::new(actions::EDIT_REQUEST, AffectedTable::Requests, id.0)
                .details(serde_json::Value::Object(changed));
            Ok((request, event))
        })?;

        tracing::info!(request_id = %id, "credit request edited");
        Ok(request)
    }

    pub fn request_dashboard(&self, caller: &Caller) -> Result<RequestDashboard, CreditDeskError> {
        self.authorize(caller, Capability::ViewOwnRequests, Resource::None)?;
        let owner = self.scope_to_caller(caller, RequestFilter::default()).owner;
        let counts = self
            .store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.state_counts(owner)?))?;

        let mut by_state: BTreeMap<&'static str, u64> = RequestState::ALL
            .iter()
            .map(|state| (state.label(), 0))
            .collect();
        let mut total = 0;
        for (state, count) in counts {
            by_state.insert(state.label(), count);
            total += count;
        }
        Ok(RequestDashboard { total, by_state })
    }

    fn scope_to_caller(&self, caller: &Caller, mut filter: RequestFilter) -> RequestFilter {
        if !role_grants(caller.role(), Capability::ViewAllRequests) {
            filter.owner = Some(caller.id());
        }
        filter
    }
}

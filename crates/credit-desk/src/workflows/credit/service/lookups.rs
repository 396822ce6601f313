use chrono::Utc;
use serde_json::json;

use super::{require_request, AuditEvent, CreditDeskService};
use crate::workflows::credit::audit::actions;
use crate::workflows::credit::bureau::{CreditBureau, LookupError};
use crate::workflows::credit::domain::{
    AffectedTable, Caller, CreditLookupRecord, CreditRequest, RequestId,
};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::lifecycle::{transition, LifecycleConflict, LifecycleEvent};
use crate::workflows::credit::policy::{Capability, Resource};
use crate::workflows::credit::report::{render_lookup_report, LookupReport};
use crate::workflows::credit::repository::{CreditStore, NewLookup};

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    /// Query the bureau for the request's tax id and attach the answer.
    ///
    /// Nothing is written when the bureau fails or times out. The request state is
    /// re-checked inside the write, since a verdict may land while the bureau call is
    /// in flight.
    pub async fn perform_lookup(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<CreditLookupRecord, CreditDeskError> {
        self.authorize(caller, Capability::PerformLookup, Resource::None)?;
        let request = self
            .store
            .read(|ledger| require_request(ledger, request_id))?;
        if !request.state.accepts_lookup() {
            return Err(LifecycleConflict::AlreadyDecided(request.state).into());
        }

        let timeout = self.settings.lookup_timeout;
        let profile = match tokio::time::timeout(timeout, self.bureau.lookup(&request.tax_id)).await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(err)) => {
                tracing::warn!(request_id = %request_id, error = %err, "credit bureau lookup failed");
                return Err(err.into());
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "credit bureau lookup timed out"
                );
                return Err(LookupError::Unavailable(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ))
                .into());
            }
        };

        let lookup = self.commit(caller, |ledger| {
            let mut current = require_request(&*ledger, request_id)?;
            let next = transition(current.state, LifecycleEvent::LookupAttached)?;

            let now = Utc::now();
            let lookup = ledger.insert_lookup(NewLookup {
                request_id,
                tax_id: current.tax_id.clone(),
                raw_result: profile.into_value(),
                queried_by: caller.id(),
                queried_at: now,
            })?;
            if current.state != next {
                current.state = next;
                current.updated_at = now;
                ledger.save_request(&current)?;
            }

            let event = AuditEvent::new(
                actions::PERFORM_LOOKUP,
                AffectedTable::CreditLookupRecords,
                lookup.id.0,
            )
            .details(json!({ "request_id": request_id.0, "tax_id": current.tax_id.as_str() }));
            Ok((lookup, event))
        })?;

        tracing::info!(
            request_id = %request_id,
            lookup_id = %lookup.id,
            "credit lookup attached"
        );
        Ok(lookup)
    }

    pub fn latest_lookup(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<CreditLookupRecord, CreditDeskError> {
        self.authorize(caller, Capability::ViewLookup, Resource::None)?;
        let (_, lookup) = self.request_with_latest_lookup(request_id)?;
        Ok(lookup)
    }

    pub fn list_lookups(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<Vec<CreditLookupRecord>, CreditDeskError> {
        self.authorize(caller, Capability::ViewLookup, Resource::None)?;
        self.store.read(|ledger| {
            require_request(ledger, request_id)?;
            Ok(ledger.lookups_for_request(request_id)?)
        })
    }

    /// Render the latest lookup as a CSV report and audit the export.
    pub fn export_lookup_report(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<LookupReport, CreditDeskError> {
        self.authorize(caller, Capability::ExportLookupReport, Resource::None)?;
        let (request, lookup) = self.request_with_latest_lookup(request_id)?;
        let report = render_lookup_report(&request, &lookup)?;

        self.commit(caller, |_ledger| {
            let event = AuditEvent::new(
                actions::EXPORT_LOOKUP_REPORT,
                AffectedTable::CreditLookupRecords,
                lookup.id.0,
            )
            .comment(format!("report generated for request {request_id}"));
            Ok(((), event))
        })?;

        tracing::info!(request_id = %request_id, file = %report.file_name, "lookup report exported");
        Ok(report)
    }

    fn request_with_latest_lookup(
        &self,
        request_id: RequestId,
    ) -> Result<(CreditRequest, CreditLookupRecord), CreditDeskError> {
        self.store.read(|ledger| {
            let request = require_request(ledger, request_id)?;
            let lookup = ledger
                .latest_lookup(request_id)?
                .ok_or_else(|| CreditDeskError::not_found("lookup for request", request_id.0))?;
            Ok((request, lookup))
        })
    }
}

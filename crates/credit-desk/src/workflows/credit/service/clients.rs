use chrono::Utc;
use serde_json::{json, Map, Value};

use super::{AuditEvent, CreditDeskService};
use crate::workflows::credit::audit::actions;
use crate::workflows::credit::bureau::CreditBureau;
use crate::workflows::credit::domain::{
    AffectedTable, Caller, HistoricalClient, HistoricalClientDraft, HistoricalClientEdit,
    HistoricalClientId, TaxId, TAX_ID_LENGTH,
};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::intake::{
    validate_client_edit, validate_historical_client, ValidationError,
};
use crate::workflows::credit::policy::{Capability, Resource};
use crate::workflows::credit::repository::{
    ClientFilter, CreditStore, NewHistoricalClient, Page, PageRequest, RepositoryError,
};

fn tax_id_conflict(err: RepositoryError) -> CreditDeskError {
    match err {
        RepositoryError::Conflict(reason) => CreditDeskError::Conflict(reason),
        other => CreditDeskError::Storage(other),
    }
}

fn change<T: Into<Value>>(changed: &mut Map<String, Value>, field: &str, from: T, to: T) {
    let (from, to) = (from.into(), to.into());
    if from != to {
        changed.insert(field.to_string(), json!({ "from": from, "to": to }));
    }
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    pub fn list_historical_clients(
        &self,
        caller: &Caller,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> Result<Page<HistoricalClient>, CreditDeskError> {
        self.authorize(caller, Capability::ViewHistoricalClients, Resource::None)?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.historical_clients(filter, page)?))
    }

    pub fn historical_client_by_tax_id(
        &self,
        caller: &Caller,
        tax_id: &str,
    ) -> Result<HistoricalClient, CreditDeskError> {
        self.authorize(caller, Capability::ViewHistoricalClients, Resource::None)?;
        let tax_id = TaxId::parse(tax_id).ok_or_else(|| {
            ValidationError::single("tax_id", format!("must be exactly {TAX_ID_LENGTH} digits"))
        })?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.historical_client_by_tax_id(&tax_id)?))?
            .ok_or_else(|| CreditDeskError::not_found("historical client", &tax_id))
    }

    pub fn create_historical_client(
        &self,
        caller: &Caller,
        draft: HistoricalClientDraft,
    ) -> Result<HistoricalClient, CreditDeskError> {
        self.authorize(caller, Capability::ManageHistoricalClients, Resource::None)?;
        let client = validate_historical_client(draft)?;

        let created = self.commit(caller, |ledger| {
            let created = ledger
                .insert_historical_client(NewHistoricalClient {
                    tax_id: client.tax_id,
                    company_name: client.company_name,
                    address: client.address,
                    phone: client.phone,
                    email: client.email,
                    sector: client.sector,
                    approved_amount: client.approved_amount,
                    approved_units: client.approved_units,
                    status: client.status,
                    registered_at: Utc::now(),
                })
                .map_err(tax_id_conflict)?;
            let event = AuditEvent::new(
                actions::CREATE_HISTORICAL_CLIENT,
                AffectedTable::HistoricalClients,
                created.id.0,
            )
            .comment(format!("client {} registered", created.tax_id));
            Ok((created, event))
        })?;

        tracing::info!(client_id = %created.id, tax_id = %created.tax_id, "historical client created");
        Ok(created)
    }

    /// Apply a sparse edit. The audit entry records each field that actually changed.
    pub fn update_historical_client(
        &self,
        caller: &Caller,
        id: HistoricalClientId,
        edit: HistoricalClientEdit,
    ) -> Result<HistoricalClient, CreditDeskError> {
        self.authorize(caller, Capability::ManageHistoricalClients, Resource::None)?;
        let changes = validate_client_edit(edit)?;

        let updated = self.commit(caller, |ledger| {
            let mut client = ledger
                .historical_client(id)?
                .ok_or_else(|| CreditDeskError::not_found("historical client", id))?;

            let mut changed = Map::new();
            if let Some(name) = changes.company_name {
                change(&mut changed, "company_name", client.company_name.clone(), name.clone());
                client.company_name = name;
            }
            for (field, slot, value) in [
                ("address", &mut client.address, changes.address),
                ("phone", &mut client.phone, changes.phone),
                ("email", &mut client.email, changes.email),
                ("sector", &mut client.sector, changes.sector),
            ] {
                if let Some(value) = value {
                    change(&mut changed, field, slot.clone(), value.clone());
                    *slot = value;
                }
            }
            if let Some(amount) = changes.approved_amount {
                change(
                    &mut changed,
                    "approved_amount",
                    client.approved_amount.map(|a| a.to_string()),
                    Some(amount.to_string()),
                );
                client.approved_amount = Some(amount);
            }
            if let Some(units) = changes.approved_units {
                change(&mut changed, "approved_units", client.approved_units, Some(units));
                client.approved_units = Some(units);
            }
            if let Some(status) = changes.status {
                change(&mut changed, "status", client.status.label(), status.label());
                client.status = status;
            }
            client.updated_at = Utc::now();
            ledger.save_historical_client(&client)?;

            let event = AuditEvent::new(
                actions::UPDATE_HISTORICAL_CLIENT,
                AffectedTable::HistoricalClients,
                id.0,
            )
            .details(Value::Object(changed));
            Ok((client, event))
        })?;

        tracing::info!(client_id = %id, "historical client updated");
        Ok(updated)
    }
}

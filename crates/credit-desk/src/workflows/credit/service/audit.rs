use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::Serialize;

use super::{require_request, CreditDeskService};
use crate::workflows::credit::audit::AuditDiagnosticsSnapshot;
use crate::workflows::credit::bureau::CreditBureau;
use crate::workflows::credit::domain::{AuditLogEntry, Caller, ManualAuditDraft, RequestId, UserId};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::intake::validate_manual_audit;
use crate::workflows::credit::policy::{Capability, Resource};
use crate::workflows::credit::repository::{
    AuditDraft, AuditFilter, CreditStore, Page, PageRequest, TimeRange,
};

const TOP_ACTORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorTotal {
    pub actor_id: UserId,
    pub username: Option<String>,
    pub entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub total_entries: u64,
    pub distinct_actors: u64,
    pub by_role: BTreeMap<&'static str, u64>,
    pub top_actors: Vec<ActorTotal>,
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    /// Append a caller-authored entry. The entry is the mutation, so any failure propagates
    /// regardless of the audit policy.
    pub fn record_manual_audit(
        &self,
        caller: &Caller,
        draft: ManualAuditDraft,
    ) -> Result<AuditLogEntry, CreditDeskError> {
        self.authorize(caller, Capability::WriteAuditManual, Resource::None)?;
        let draft = validate_manual_audit(draft)?;
        let entry = AuditDraft {
            actor_id: caller.id(),
            actor_role: caller.role(),
            action: draft.action,
            affected_table: draft.affected_table,
            affected_id: draft.affected_id,
            comment: draft.comment,
            details: draft.details,
            source_address: caller.source_address.clone(),
            recorded_at: Utc::now(),
        };

        let recorded = self
            .store
            .write(|ledger| ledger.append_audit(entry))
            .map_err(CreditDeskError::AuditWrite)?;
        tracing::info!(audit_id = %recorded.id, action = %recorded.action, "manual audit entry recorded");
        Ok(recorded)
    }

    /// Newest first, filtered by actor, role, affected record, and time range.
    pub fn audit_log(
        &self,
        caller: &Caller,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, CreditDeskError> {
        self.authorize(caller, Capability::ViewAuditAll, Resource::None)?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.audit_entries(filter, page)?))
    }

    /// Entries touching the request, its lookups, or its verdict. Newest first.
    pub fn request_trail(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> Result<Vec<AuditLogEntry>, CreditDeskError> {
        self.authorize(caller, Capability::ViewAuditForRequest, Resource::None)?;
        let request = self.store.read(|ledger| require_request(ledger, request_id))?;
        self.authorize(
            caller,
            Capability::ViewAuditForRequest,
            Resource::Request(&request),
        )?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.request_trail(request_id)?))
    }

    pub fn activity_stats(
        &self,
        caller: &Caller,
        range: &TimeRange,
    ) -> Result<ActivityStats, CreditDeskError> {
        self.authorize(caller, Capability::ViewAuditAll, Resource::None)?;
        let (activity, usernames) = self.store.read(|ledger| {
            let activity = ledger.activity(range)?;
            let mut usernames = HashMap::new();
            for row in &activity {
                if let Some(user) = ledger.user(row.actor_id)? {
                    usernames.insert(row.actor_id, user.username);
                }
            }
            Ok::<_, CreditDeskError>((activity, usernames))
        })?;

        let mut by_role: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut per_actor: HashMap<UserId, u64> = HashMap::new();
        let mut total_entries = 0;
        for row in &activity {
            total_entries += row.entries;
            *by_role.entry(row.actor_role.label()).or_default() += row.entries;
            *per_actor.entry(row.actor_id).or_default() += row.entries;
        }

        let distinct_actors = per_actor.len() as u64;
        let mut top_actors: Vec<ActorTotal> = per_actor
            .into_iter()
            .map(|(actor_id, entries)| ActorTotal {
                actor_id,
                username: usernames.get(&actor_id).cloned(),
                entries,
            })
            .collect();
        top_actors.sort_by(|a, b| b.entries.cmp(&a.entries).then(a.actor_id.cmp(&b.actor_id)));
        top_actors.truncate(TOP_ACTORS);

        Ok(ActivityStats {
            total_entries,
            distinct_actors,
            by_role,
            top_actors,
        })
    }

    pub fn audit_diagnostics(
        &self,
        caller: &Caller,
    ) -> Result<AuditDiagnosticsSnapshot, CreditDeskError> {
        self.authorize(caller, Capability::ViewAuditAll, Resource::None)?;
        Ok(self.diagnostics.snapshot(self.settings.audit_policy))
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::workflows::credit::domain::{
    AuditEntryId, AuditLogEntry, CreditLookupRecord, CreditRequest, HistoricalClient,
    HistoricalClientId, LookupId, RequestId, RequestState, TaxId, User, UserId, VerdictId,
    VerdictRecord,
};
use crate::workflows::credit::repository::{
    ActorActivity, AuditDraft, AuditFilter, ClientFilter, CreditStore, Ledger, LedgerRead,
    NewHistoricalClient, NewLookup, NewRequest, NewUser, NewVerdict, Page, PageRequest,
    RepositoryError, RequestFilter, TimeRange, UserFilter, VerdictFilter,
};

use super::trail_matches;

/// In-process store used for fixtures, tests, and development.
///
/// A write works on a copy of the tables and swaps it in only when the closure
/// succeeds, so a failed closure leaves no trace.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CreditStore for MemoryStore {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let tables = self
            .tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".into()))?;
        work(&*tables)
    }

    fn write<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".into()))?;
        let mut staged = tables.clone();
        let value = work(&mut staged)?;
        *tables = staged;
        Ok(value)
    }
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    secret_digest: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryTables {
    users: BTreeMap<UserId, StoredUser>,
    usernames: HashMap<String, UserId>,
    requests: BTreeMap<RequestId, CreditRequest>,
    lookups: BTreeMap<LookupId, CreditLookupRecord>,
    verdicts: BTreeMap<VerdictId, VerdictRecord>,
    verdict_by_request: HashMap<RequestId, VerdictId>,
    audit: Vec<AuditLogEntry>,
    clients: BTreeMap<HistoricalClientId, HistoricalClient>,
    client_by_tax_id: HashMap<String, HistoricalClientId>,
    sequence: Sequences,
}

#[derive(Debug, Clone, Default)]
struct Sequences {
    user: i64,
    request: i64,
    lookup: i64,
    verdict: i64,
    audit: i64,
    client: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn newest_first<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

impl LedgerRead for MemoryTables {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).map(|stored| stored.user.clone()))
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let id = self.usernames.get(&username.to_ascii_lowercase()).copied();
        Ok(id
            .and_then(|id| self.users.get(&id))
            .map(|stored| stored.user.clone()))
    }

    fn secret_digest(&self, id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .users
            .get(&id)
            .map(|stored| stored.secret_digest.clone()))
    }

    fn user_count(&self) -> Result<u64, RepositoryError> {
        Ok(self.users.len() as u64)
    }

    fn users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        let rows = self
            .users
            .values()
            .map(|stored| &stored.user)
            .filter(|user| filter.matches(user))
            .cloned()
            .collect();
        Ok(page.slice(rows))
    }

    fn request(&self, id: RequestId) -> Result<Option<CreditRequest>, RepositoryError> {
        Ok(self.requests.get(&id).cloned())
    }

    fn requests(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<Page<CreditRequest>, RepositoryError> {
        let rows = self
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        Ok(page.slice(newest_first(rows, |r: &CreditRequest| {
            (r.created_at, r.id)
        })))
    }

    fn state_counts(
        &self,
        owner: Option<UserId>,
    ) -> Result<Vec<(RequestState, u64)>, RepositoryError> {
        let mut counts: HashMap<RequestState, u64> = HashMap::new();
        for request in self.requests.values() {
            if owner.is_some_and(|owner| request.owner_id != owner) {
                continue;
            }
            *counts.entry(request.state).or_default() += 1;
        }
        Ok(RequestState::ALL
            .into_iter()
            .filter_map(|state| counts.get(&state).map(|count| (state, *count)))
            .collect())
    }

    fn lookup(&self, id: LookupId) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        Ok(self.lookups.get(&id).cloned())
    }

    fn latest_lookup(
        &self,
        request_id: RequestId,
    ) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        Ok(self
            .lookups
            .values()
            .filter(|lookup| lookup.request_id == request_id)
            .max_by_key(|lookup| (lookup.queried_at, lookup.id))
            .cloned())
    }

    fn lookups_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<CreditLookupRecord>, RepositoryError> {
        let rows = self
            .lookups
            .values()
            .filter(|lookup| lookup.request_id == request_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |l: &CreditLookupRecord| {
            (l.queried_at, l.id)
        }))
    }

    fn verdict(&self, id: VerdictId) -> Result<Option<VerdictRecord>, RepositoryError> {
        Ok(self.verdicts.get(&id).cloned())
    }

    fn verdict_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<VerdictRecord>, RepositoryError> {
        Ok(self
            .verdict_by_request
            .get(&request_id)
            .and_then(|id| self.verdicts.get(id))
            .cloned())
    }

    fn verdicts(
        &self,
        filter: &VerdictFilter,
        page: PageRequest,
    ) -> Result<Page<VerdictRecord>, RepositoryError> {
        let rows = self
            .verdicts
            .values()
            .filter(|verdict| filter.matches(verdict))
            .cloned()
            .collect();
        Ok(page.slice(newest_first(rows, |v: &VerdictRecord| {
            (v.decided_at, v.id)
        })))
    }

    fn audit_entries(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, RepositoryError> {
        let rows = self
            .audit
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        Ok(page.slice(newest_first(rows, |e: &AuditLogEntry| {
            (e.recorded_at, e.id)
        })))
    }

    fn request_trail(&self, request_id: RequestId) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let lookup_ids: Vec<i64> = self
            .lookups
            .values()
            .filter(|lookup| lookup.request_id == request_id)
            .map(|lookup| lookup.id.0)
            .collect();
        let verdict_id = self.verdict_by_request.get(&request_id).map(|id| id.0);

        let rows = self
            .audit
            .iter()
            .filter(|entry| trail_matches(entry, request_id, &lookup_ids, verdict_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, |e: &AuditLogEntry| (e.recorded_at, e.id)))
    }

    fn activity(&self, range: &TimeRange) -> Result<Vec<ActorActivity>, RepositoryError> {
        let mut counts: BTreeMap<(UserId, &'static str), ActorActivity> = BTreeMap::new();
        for entry in self.audit.iter().filter(|entry| range.contains(entry.recorded_at)) {
            counts
                .entry((entry.actor_id, entry.actor_role.label()))
                .or_insert_with(|| ActorActivity {
                    actor_id: entry.actor_id,
                    actor_role: entry.actor_role,
                    entries: 0,
                })
                .entries += 1;
        }
        Ok(counts.into_values().collect())
    }

    fn historical_client(
        &self,
        id: HistoricalClientId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        Ok(self.clients.get(&id).cloned())
    }

    fn historical_client_by_tax_id(
        &self,
        tax_id: &TaxId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        Ok(self
            .client_by_tax_id
            .get(tax_id.as_str())
            .and_then(|id| self.clients.get(id))
            .cloned())
    }

    fn historical_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> Result<Page<HistoricalClient>, RepositoryError> {
        let rows = self
            .clients
            .values()
            .filter(|client| filter.matches(client))
            .cloned()
            .collect();
        Ok(page.slice(newest_first(rows, |c: &HistoricalClient| {
            (c.registered_at, c.id)
        })))
    }
}

impl Ledger for MemoryTables {
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        let key = user.username.to_ascii_lowercase();
        if self.usernames.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "username {} is taken",
                user.username
            )));
        }

        let id = UserId(next(&mut self.sequence.user));
        let record = User {
            id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
            active: true,
            created_at: user.created_at,
        };
        self.usernames.insert(key, id);
        self.users.insert(
            id,
            StoredUser {
                user: record.clone(),
                secret_digest: user.secret_digest,
            },
        );
        Ok(record)
    }

    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        let stored = self
            .users
            .get_mut(&user.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.user.display_name = user.display_name.clone();
        stored.user.role = user.role;
        stored.user.active = user.active;
        Ok(())
    }

    fn set_secret_digest(&mut self, id: UserId, digest: &str) -> Result<(), RepositoryError> {
        let stored = self.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        stored.secret_digest = digest.to_string();
        Ok(())
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<CreditRequest, RepositoryError> {
        let id = RequestId(next(&mut self.sequence.request));
        let record = CreditRequest {
            id,
            tax_id: request.tax_id,
            company_name: request.company_name,
            requested_amount: request.requested_amount,
            requested_units: request.requested_units,
            comment: request.comment,
            owner_id: request.owner_id,
            state: RequestState::Pending,
            created_at: request.created_at,
            updated_at: request.created_at,
        };
        self.requests.insert(id, record.clone());
        Ok(record)
    }

    fn save_request(&mut self, request: &CreditRequest) -> Result<(), RepositoryError> {
        let slot = self
            .requests
            .get_mut(&request.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = request.clone();
        Ok(())
    }

    fn insert_lookup(&mut self, lookup: NewLookup) -> Result<CreditLookupRecord, RepositoryError> {
        if !self.requests.contains_key(&lookup.request_id) {
            return Err(RepositoryError::NotFound);
        }
        let id = LookupId(next(&mut self.sequence.lookup));
        let record = CreditLookupRecord {
            id,
            request_id: lookup.request_id,
            tax_id: lookup.tax_id,
            raw_result: lookup.raw_result,
            queried_by: lookup.queried_by,
            queried_at: lookup.queried_at,
        };
        self.lookups.insert(id, record.clone());
        Ok(record)
    }

    fn insert_verdict(&mut self, verdict: NewVerdict) -> Result<VerdictRecord, RepositoryError> {
        if self.verdict_by_request.contains_key(&verdict.request_id) {
            return Err(RepositoryError::Conflict(format!(
                "request {} already has a verdict",
                verdict.request_id
            )));
        }
        if !self.requests.contains_key(&verdict.request_id) {
            return Err(RepositoryError::NotFound);
        }

        let id = VerdictId(next(&mut self.sequence.verdict));
        let record = VerdictRecord {
            id,
            request_id: verdict.request_id,
            lookup_id: verdict.lookup_id,
            outcome: verdict.outcome,
            approved_amount: verdict.approved_amount,
            approved_units: verdict.approved_units,
            analyst_id: verdict.analyst_id,
            comments: verdict.comments,
            decided_at: verdict.decided_at,
            updated_at: verdict.decided_at,
        };
        self.verdict_by_request.insert(record.request_id, id);
        self.verdicts.insert(id, record.clone());
        Ok(record)
    }

    fn save_verdict(&mut self, verdict: &VerdictRecord) -> Result<(), RepositoryError> {
        let slot = self
            .verdicts
            .get_mut(&verdict.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = verdict.clone();
        Ok(())
    }

    fn append_audit(&mut self, entry: AuditDraft) -> Result<AuditLogEntry, RepositoryError> {
        let record = AuditLogEntry {
            id: AuditEntryId(next(&mut self.sequence.audit)),
            actor_id: entry.actor_id,
            actor_role: entry.actor_role,
            action: entry.action,
            affected_table: entry.affected_table,
            affected_id: entry.affected_id,
            comment: entry.comment,
            details: entry.details,
            recorded_at: entry.recorded_at,
            source_address: entry.source_address,
        };
        self.audit.push(record.clone());
        Ok(record)
    }

    fn insert_historical_client(
        &mut self,
        client: NewHistoricalClient,
    ) -> Result<HistoricalClient, RepositoryError> {
        if self.client_by_tax_id.contains_key(client.tax_id.as_str()) {
            return Err(RepositoryError::Conflict(format!(
                "tax id {} is already registered",
                client.tax_id
            )));
        }
        let id = HistoricalClientId(next(&mut self.sequence.client));
        let record = HistoricalClient {
            id,
            tax_id: client.tax_id,
            company_name: client.company_name,
            address: client.address,
            phone: client.phone,
            email: client.email,
            sector: client.sector,
            approved_amount: client.approved_amount,
            approved_units: client.approved_units,
            status: client.status,
            registered_at: client.registered_at,
            updated_at: client.registered_at,
        };
        self.client_by_tax_id
            .insert(record.tax_id.as_str().to_string(), id);
        self.clients.insert(id, record.clone());
        Ok(record)
    }

    fn save_historical_client(&mut self, client: &HistoricalClient) -> Result<(), RepositoryError> {
        let slot = self
            .clients
            .get_mut(&client.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = client.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::credit::domain::{AffectedTable, Role, TaxId, VerdictOutcome};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn seed_request(ledger: &mut dyn Ledger) -> CreditRequest {
        ledger
            .insert_request(NewRequest {
                tax_id: TaxId::parse("20123456789").expect("tax id"),
                company_name: "Acme".into(),
                requested_amount: dec!(100),
                requested_units: 1,
                comment: None,
                owner_id: UserId(1),
                created_at: Utc::now(),
            })
            .expect("insert request")
    }

    fn verdict_for(request_id: RequestId) -> NewVerdict {
        NewVerdict {
            request_id,
            lookup_id: None,
            outcome: VerdictOutcome::Rejected,
            approved_amount: None,
            approved_units: None,
            analyst_id: UserId(2),
            comments: None,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn failed_write_leaves_no_trace() {
        let store = MemoryStore::new();
        let outcome: Result<(), RepositoryError> = store.write(|ledger| {
            seed_request(ledger);
            Err(RepositoryError::Unavailable("forced".into()))
        });
        assert!(outcome.is_err());

        let page = store
            .read(|ledger| ledger.requests(&RequestFilter::default(), PageRequest::default()))
            .expect("read");
        assert_eq!(page.total, 0);
    }

    #[test]
    fn second_verdict_for_request_conflicts() {
        let store = MemoryStore::new();
        let request = store
            .write(|ledger| Ok::<_, RepositoryError>(seed_request(ledger)))
            .expect("seed");

        store
            .write(|ledger| ledger.insert_verdict(verdict_for(request.id)))
            .expect("first verdict");
        let second = store.write(|ledger| ledger.insert_verdict(verdict_for(request.id)));
        assert!(matches!(second, Err(RepositoryError::Conflict(_))));
    }

    #[test]
    fn usernames_are_unique_ignoring_case() {
        let store = MemoryStore::new();
        let new_user = |name: &str| NewUser {
            username: name.into(),
            display_name: name.into(),
            role: Role::Risk,
            secret_digest: "digest".into(),
            created_at: Utc::now(),
        };
        store
            .write(|ledger| ledger.insert_user(new_user("analyst")))
            .expect("first user");
        let duplicate = store.write(|ledger| ledger.insert_user(new_user("Analyst")));
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
    }

    #[test]
    fn trail_includes_lookup_entries() {
        let store = MemoryStore::new();
        let request = store
            .write(|ledger| Ok::<_, RepositoryError>(seed_request(ledger)))
            .expect("seed");
        let lookup = store
            .write(|ledger| {
                ledger.insert_lookup(NewLookup {
                    request_id: request.id,
                    tax_id: request.tax_id.clone(),
                    raw_result: serde_json::json!({"status": "ACTIVE"}),
                    queried_by: UserId(2),
                    queried_at: Utc::now(),
                })
            })
            .expect("lookup");

        store
            .write(|ledger| {
                for (table, id) in [
                    (AffectedTable::Requests, request.id.0),
                    (AffectedTable::CreditLookupRecords, lookup.id.0),
                    (AffectedTable::Requests, request.id.0 + 40),
                ] {
                    ledger.append_audit(AuditDraft {
                        actor_id: UserId(2),
                        actor_role: Role::Risk,
                        action: "touch".into(),
                        affected_table: Some(table),
                        affected_id: Some(id),
                        comment: None,
                        details: None,
                        source_address: None,
                        recorded_at: Utc::now(),
                    })?;
                }
                Ok::<_, RepositoryError>(())
            })
            .expect("audit");

        let trail = store
            .read(|ledger| ledger.request_trail(request.id))
            .expect("trail");
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].affected_table, Some(AffectedTable::CreditLookupRecords));
    }

    #[test]
    fn historical_tax_ids_are_unique() {
        let store = MemoryStore::new();
        let client = || NewHistoricalClient {
            tax_id: TaxId::parse("20512345678").expect("tax id"),
            company_name: "Pacifico Motors".into(),
            address: None,
            phone: None,
            email: None,
            sector: Some("transport".into()),
            approved_amount: Some(dec!(50000)),
            approved_units: Some(3),
            status: Default::default(),
            registered_at: Utc::now(),
        };
        let first = store
            .write(|ledger| ledger.insert_historical_client(client()))
            .expect("first client");
        let duplicate = store.write(|ledger| ledger.insert_historical_client(client()));
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

        let found = store
            .read(|ledger| ledger.historical_client_by_tax_id(&first.tax_id))
            .expect("read");
        assert_eq!(found.map(|client| client.id), Some(first.id));
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::workflows::credit::bureau::{CreditBureau, CreditProfile, FixtureBureau, LookupError};
use crate::workflows::credit::credentials::BcryptHasher;
use crate::workflows::credit::domain::{
    AccountDraft, AuditLogEntry, Caller, CreditLookupRecord, CreditRequest, HistoricalClient,
    HistoricalClientId, LookupId, RequestDraft, RequestId, RequestState, Role, TaxId, User,
    UserId, VerdictId, VerdictRecord,
};
use crate::workflows::credit::repository::{
    ActorActivity, AuditDraft, AuditFilter, ClientFilter, CreditStore, Ledger, LedgerRead,
    NewHistoricalClient, NewLookup, NewRequest, NewUser, NewVerdict, Page, PageRequest,
    RepositoryError, RequestFilter, TimeRange, UserFilter, VerdictFilter,
};
use crate::workflows::credit::tokens::TokenIssuer;
use crate::workflows::credit::{CreditDeskService, DeskSettings, MemoryStore};

pub(super) const SECRET: &str = "Ledger2024";
pub(super) const TAX_ID: &str = "20601234567";
pub(super) const SOURCE: &str = "10.20.0.7";
pub(super) const SIGNING_KEY: &[u8] = b"desk-test-signing-key";

pub(super) fn test_tokens() -> TokenIssuer {
    TokenIssuer::new(SIGNING_KEY, Duration::from_secs(600))
}

/// A service plus one caller per seeded account.
pub(super) struct Desk<S = MemoryStore, B = FixtureBureau> {
    pub service: Arc<CreditDeskService<S, B>>,
    pub admin: Caller,
    pub commercial: Caller,
    pub other_commercial: Caller,
    pub risk: Caller,
}

pub(super) fn accounts() -> Vec<AccountDraft> {
    [
        ("admin", "Desk Admin", Role::Admin),
        ("cmartin", "Carla Martin", Role::Commercial),
        ("jrojas", "Jorge Rojas", Role::Commercial),
        ("lvega", "Lucia Vega", Role::Risk),
    ]
    .into_iter()
    .map(|(username, display_name, role)| AccountDraft {
        username: username.to_string(),
        display_name: display_name.to_string(),
        secret: SECRET.to_string(),
        role,
    })
    .collect()
}

pub(super) fn build_desk() -> Desk {
    build_desk_with(MemoryStore::new(), FixtureBureau::new(), DeskSettings::default())
}

pub(super) fn build_desk_with<S, B>(store: S, bureau: B, settings: DeskSettings) -> Desk<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let service = Arc::new(
        CreditDeskService::new(Arc::new(store), Arc::new(bureau), settings)
            .with_hasher(Arc::new(BcryptHasher::with_cost(4)))
            .with_tokens(test_tokens()),
    );
    let users = service.bootstrap(accounts()).expect("bootstrap seeds accounts");
    let caller = |index: usize| Caller::new(users[index].clone(), Some(SOURCE.to_string()));

    Desk {
        admin: caller(0),
        commercial: caller(1),
        other_commercial: caller(2),
        risk: caller(3),
        service,
    }
}

pub(super) fn request_draft() -> RequestDraft {
    RequestDraft {
        tax_id: TAX_ID.to_string(),
        company_name: "Andes Logistics SAC".to_string(),
        requested_amount: dec!(25000.50),
        requested_units: 12,
        comment: Some("fleet renewal".to_string()),
    }
}

pub(super) fn open_request<S, B>(desk: &Desk<S, B>) -> CreditRequest
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    desk.service
        .create_request(&desk.commercial, request_draft())
        .expect("commercial opens request")
}

pub(super) fn all_audit<S, B>(desk: &Desk<S, B>) -> Vec<AuditLogEntry>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    desk.service
        .audit_log(&desk.admin, &AuditFilter::default(), PageRequest::audit(None, Some(200)))
        .expect("admin reads audit log")
        .items
}

/// Bureau that answers every lookup with a fixed result.
pub(super) struct ScriptedBureau {
    answer: Result<Value, LookupError>,
}

impl ScriptedBureau {
    pub(super) fn answering(payload: Value) -> Self {
        Self { answer: Ok(payload) }
    }

    pub(super) fn failing(error: LookupError) -> Self {
        Self { answer: Err(error) }
    }
}

#[async_trait]
impl CreditBureau for ScriptedBureau {
    async fn lookup(&self, _tax_id: &TaxId) -> Result<CreditProfile, LookupError> {
        match &self.answer {
            Ok(payload) => CreditProfile::from_value(payload.clone()),
            Err(error) => Err(error.clone()),
        }
    }
}

/// Bureau that never answers in time.
pub(super) struct StalledBureau;

#[async_trait]
impl CreditBureau for StalledBureau {
    async fn lookup(&self, _tax_id: &TaxId) -> Result<CreditProfile, LookupError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(LookupError::Unavailable("stalled".into()))
    }
}

pub(super) fn short_timeout(settings: DeskSettings) -> DeskSettings {
    settings.with_lookup_timeout(Duration::from_millis(50))
}

/// Memory store whose audit appends can be switched to fail after setup.
#[derive(Default)]
pub(super) struct FlakyAuditStore {
    inner: MemoryStore,
    fail_audit: AtomicBool,
}

impl FlakyAuditStore {
    pub(super) fn break_audit(&self) {
        self.fail_audit.store(true, Ordering::SeqCst);
    }
}

impl CreditStore for FlakyAuditStore {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.read(work)
    }

    fn write<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let failing = self.fail_audit.load(Ordering::SeqCst);
        self.inner
            .write(|ledger| work(&mut FailingAudit { inner: ledger, failing }))
    }
}

/// Records which thread touched the store.
#[derive(Default)]
pub(super) struct ThreadTrackingStore {
    inner: MemoryStore,
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadTrackingStore {
    fn note(&self) {
        if let Ok(mut threads) = self.threads.lock() {
            threads.push(thread::current().id());
        }
    }

    pub(super) fn take_threads(&self) -> Vec<ThreadId> {
        self.threads
            .lock()
            .map(|mut threads| std::mem::take(&mut *threads))
            .unwrap_or_default()
    }
}

impl CreditStore for ThreadTrackingStore {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.note();
        self.inner.read(work)
    }

    fn write<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.note();
        self.inner.write(work)
    }
}

struct FailingAudit<'a> {
    inner: &'a mut dyn Ledger,
    failing: bool,
}

impl LedgerRead for FailingAudit<'_> {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.user(id)
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        self.inner.user_by_username(username)
    }

    fn secret_digest(&self, id: UserId) -> Result<Option<String>, RepositoryError> {
        self.inner.secret_digest(id)
    }

    fn user_count(&self) -> Result<u64, RepositoryError> {
        self.inner.user_count()
    }

    fn users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        self.inner.users(filter, page)
    }

    fn request(&self, id: RequestId) -> Result<Option<CreditRequest>, RepositoryError> {
        self.inner.request(id)
    }

    fn requests(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<Page<CreditRequest>, RepositoryError> {
        self.inner.requests(filter, page)
    }

    fn state_counts(
        &self,
        owner: Option<UserId>,
    ) -> Result<Vec<(RequestState, u64)>, RepositoryError> {
        self.inner.state_counts(owner)
    }

    fn lookup(&self, id: LookupId) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        self.inner.lookup(id)
    }

    fn latest_lookup(
        &self,
        request_id: RequestId,
    ) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        self.inner.latest_lookup(request_id)
    }

    fn lookups_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<CreditLookupRecord>, RepositoryError> {
        self.inner.lookups_for_request(request_id)
    }

    fn verdict(&self, id: VerdictId) -> Result<Option<VerdictRecord>, RepositoryError> {
        self.inner.verdict(id)
    }

    fn verdict_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<VerdictRecord>, RepositoryError> {
        self.inner.verdict_for_request(request_id)
    }

    fn verdicts(
        &self,
        filter: &VerdictFilter,
        page: PageRequest,
    ) -> Result<Page<VerdictRecord>, RepositoryError> {
        self.inner.verdicts(filter, page)
    }

    fn audit_entries(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, RepositoryError> {
        self.inner.audit_entries(filter, page)
    }

    fn request_trail(&self, request_id: RequestId) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.inner.request_trail(request_id)
    }

    fn activity(&self, range: &TimeRange) -> Result<Vec<ActorActivity>, RepositoryError> {
        self.inner.activity(range)
    }

    fn historical_client(
        &self,
        id: HistoricalClientId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        self.inner.historical_client(id)
    }

    fn historical_client_by_tax_id(
        &self,
        tax_id: &TaxId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        self.inner.historical_client_by_tax_id(tax_id)
    }

    fn historical_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> Result<Page<HistoricalClient>, RepositoryError> {
        self.inner.historical_clients(filter, page)
    }
}

impl Ledger for FailingAudit<'_> {
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        self.inner.insert_user(user)
    }

    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        self.inner.save_user(user)
    }

    fn set_secret_digest(&mut self, id: UserId, digest: &str) -> Result<(), RepositoryError> {
        self.inner.set_secret_digest(id, digest)
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<CreditRequest, RepositoryError> {
        self.inner.insert_request(request)
    }

    fn save_request(&mut self, request: &CreditRequest) -> Result<(), RepositoryError> {
        self.inner.save_request(request)
    }

    fn insert_lookup(&mut self, lookup: NewLookup) -> Result<CreditLookupRecord, RepositoryError> {
        self.inner.insert_lookup(lookup)
    }

    fn insert_verdict(&mut self, verdict: NewVerdict) -> Result<VerdictRecord, RepositoryError> {
        self.inner.insert_verdict(verdict)
    }

    fn save_verdict(&mut self, verdict: &VerdictRecord) -> Result<(), RepositoryError> {
        self.inner.save_verdict(verdict)
    }

    fn append_audit(&mut self, entry: AuditDraft) -> Result<AuditLogEntry, RepositoryError> {
        if self.failing {
            return Err(RepositoryError::Unavailable("audit table is read-only".into()));
        }
        self.inner.append_audit(entry)
    }

    fn insert_historical_client(
        &mut self,
        client: NewHistoricalClient,
    ) -> Result<HistoricalClient, RepositoryError> {
        self.inner.insert_historical_client(client)
    }

    fn save_historical_client(&mut self, client: &HistoricalClient) -> Result<(), RepositoryError> {
        self.inner.save_historical_client(client)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

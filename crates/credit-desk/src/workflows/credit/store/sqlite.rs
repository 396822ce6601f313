//! SQLite storage for the credit desk collections.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use rusqlite::TransactionBehavior;
use rust_decimal::Decimal;

use crate::workflows::credit::domain::{
    AffectedTable, AuditEntryId, AuditLogEntry, ClientStatus, CreditLookupRecord, CreditRequest,
    HistoricalClient, HistoricalClientId, LookupId, RequestId, RequestState, Role, TaxId, User,
    UserId, VerdictId, VerdictOutcome, VerdictRecord,
};
use crate::workflows::credit::repository::{
    ActorActivity, AuditDraft, AuditFilter, ClientFilter, CreditStore, Ledger, LedgerRead,
    NewHistoricalClient, NewLookup, NewRequest, NewUser, NewVerdict, Page, PageRequest,
    RepositoryError, RequestFilter, TimeRange, UserFilter, VerdictFilter,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name TEXT NOT NULL,
    role TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    secret_digest TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tax_id TEXT NOT NULL,
    company_name TEXT NOT NULL,
    requested_amount TEXT NOT NULL,
    requested_units INTEGER NOT NULL,
    comment TEXT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_requests_owner ON requests(owner_id);
CREATE INDEX IF NOT EXISTS idx_requests_state ON requests(state);

CREATE TABLE IF NOT EXISTS credit_lookup_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL REFERENCES requests(id),
    tax_id TEXT NOT NULL,
    raw_result TEXT NOT NULL,
    queried_by INTEGER NOT NULL REFERENCES users(id),
    queried_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lookups_request ON credit_lookup_records(request_id);

CREATE TABLE IF NOT EXISTS verdict_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL UNIQUE REFERENCES requests(id),
    lookup_id INTEGER REFERENCES credit_lookup_records(id),
    outcome TEXT NOT NULL,
    approved_amount TEXT,
    approved_units INTEGER,
    analyst_id INTEGER NOT NULL REFERENCES users(id),
    comments TEXT,
    decided_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id INTEGER NOT NULL,
    actor_role TEXT NOT NULL,
    action TEXT NOT NULL,
    affected_table TEXT,
    affected_id INTEGER,
    comment TEXT,
    details TEXT,
    recorded_at TEXT NOT NULL,
    source_address TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_affected ON audit_log(affected_table, affected_id);
CREATE INDEX IF NOT EXISTS idx_audit_recorded ON audit_log(recorded_at);

CREATE TABLE IF NOT EXISTS historical_clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tax_id TEXT NOT NULL UNIQUE,
    company_name TEXT NOT NULL,
    address TEXT,
    phone TEXT,
    email TEXT,
    sector TEXT,
    approved_amount TEXT,
    approved_units INTEGER,
    status TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const USER_COLUMNS: &str = "id, username, display_name, role, active, created_at";
const REQUEST_COLUMNS: &str = "id, tax_id, company_name, requested_amount, requested_units, \
     comment, owner_id, state, created_at, updated_at";
const LOOKUP_COLUMNS: &str = "id, request_id, tax_id, raw_result, queried_by, queried_at";
const VERDICT_COLUMNS: &str = "id, request_id, lookup_id, outcome, approved_amount, \
     approved_units, analyst_id, comments, decided_at, updated_at";
const CLIENT_COLUMNS: &str = "id, tax_id, company_name, address, phone, email, sector, \
     approved_amount, approved_units, status, registered_at, updated_at";
const AUDIT_COLUMNS: &str = "id, actor_id, actor_role, action, affected_table, affected_id, \
     comment, details, recorded_at, source_address";

/// Durable store. One connection behind a mutex; writes use immediate transactions.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::initialise(conn)
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialise(conn)
    }

    fn initialise(conn: Connection) -> Result<Self, RepositoryError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CreditStore for SqliteStore {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection lock poisoned".into()))?;
        work(&SqliteLedger { conn: &*conn })
    }

    fn write<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection lock poisoned".into()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RepositoryError::from)?;
        // Dropping `tx` without commit rolls back.
        let value = work(&mut SqliteLedger { conn: &tx })?;
        tx.commit().map_err(RepositoryError::from)?;
        Ok(value)
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, detail)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                RepositoryError::Conflict(detail.unwrap_or_else(|| code.to_string()))
            }
            rusqlite::Error::FromSqlConversionFailure(column, _, source) => {
                RepositoryError::Corrupt(format!("column {column}: {source}"))
            }
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

struct SqliteLedger<'c> {
    conn: &'c Connection,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_failure(
    column: usize,
    source: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(source))
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised value {0:?}")]
struct UnknownLabel(String);

fn time_at(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| conversion_failure(column, err))
}

fn decimal_at(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| Decimal::from_str(&value).map_err(|err| conversion_failure(column, err)))
        .transpose()
}

fn label_at<T>(
    row: &Row<'_>,
    column: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    parse(&raw).ok_or_else(|| conversion_failure(column, UnknownLabel(raw)))
}

fn json_at(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| serde_json::from_str(&value).map_err(|err| conversion_failure(column, err)))
        .transpose()
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        display_name: row.get(2)?,
        role: label_at(row, 3, Role::parse)?,
        active: row.get(4)?,
        created_at: time_at(row, 5)?,
    })
}

fn request_row(row: &Row<'_>) -> rusqlite::Result<CreditRequest> {
    Ok(CreditRequest {
        id: RequestId(row.get(0)?),
        tax_id: label_at(row, 1, TaxId::parse)?,
        company_name: row.get(2)?,
        requested_amount: decimal_at(row, 3)?.unwrap_or_default(),
        requested_units: row.get(4)?,
        comment: row.get(5)?,
        owner_id: UserId(row.get(6)?),
        state: label_at(row, 7, RequestState::parse)?,
        created_at: time_at(row, 8)?,
        updated_at: time_at(row, 9)?,
    })
}

fn lookup_row(row: &Row<'_>) -> rusqlite::Result<CreditLookupRecord> {
    Ok(CreditLookupRecord {
        id: LookupId(row.get(0)?),
        request_id: RequestId(row.get(1)?),
        tax_id: label_at(row, 2, TaxId::parse)?,
        raw_result: json_at(row, 3)?.unwrap_or_default(),
        queried_by: UserId(row.get(4)?),
        queried_at: time_at(row, 5)?,
    })
}

fn verdict_row(row: &Row<'_>) -> rusqlite::Result<VerdictRecord> {
    Ok(VerdictRecord {
        id: VerdictId(row.get(0)?),
        request_id: RequestId(row.get(1)?),
        lookup_id: row.get::<_, Option<i64>>(2)?.map(LookupId),
        outcome: label_at(row, 3, VerdictOutcome::parse)?,
        approved_amount: decimal_at(row, 4)?,
        approved_units: row.get(5)?,
        analyst_id: UserId(row.get(6)?),
        comments: row.get(7)?,
        decided_at: time_at(row, 8)?,
        updated_at: time_at(row, 9)?,
    })
}

fn audit_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let table: Option<String> = row.get(4)?;
    let affected_table = table
        .map(|raw| AffectedTable::parse(&raw).ok_or_else(|| conversion_failure(4, UnknownLabel(raw))))
        .transpose()?;
    Ok(AuditLogEntry {
        id: AuditEntryId(row.get(0)?),
        actor_id: UserId(row.get(1)?),
        actor_role: label_at(row, 2, Role::parse)?,
        action: row.get(3)?,
        affected_table,
        affected_id: row.get(5)?,
        comment: row.get(6)?,
        details: json_at(row, 7)?,
        recorded_at: time_at(row, 8)?,
        source_address: row.get(9)?,
    })
}

fn client_row(row: &Row<'_>) -> rusqlite::Result<HistoricalClient> {
    Ok(HistoricalClient {
        id: HistoricalClientId(row.get(0)?),
        tax_id: label_at(row, 1, TaxId::parse)?,
        company_name: row.get(2)?,
        address: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        sector: row.get(6)?,
        approved_amount: decimal_at(row, 7)?,
        approved_units: row.get(8)?,
        status: label_at(row, 9, ClientStatus::parse)?,
        registered_at: time_at(row, 10)?,
        updated_at: time_at(row, 11)?,
    })
}

/// LIKE pattern matching `term` anywhere, with its wildcards taken literally.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// WHERE clause assembled from optional filters, bound positionally.
#[derive(Default)]
struct Clauses {
    conditions: Vec<&'static str>,
    values: Vec<Value>,
}

impl Clauses {
    fn push(&mut self, condition: &'static str, values: impl IntoIterator<Item = Value>) {
        self.conditions.push(condition);
        self.values.extend(values);
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Substring match on tax id or company name.
    fn search(&mut self, term: Option<&str>) {
        let Some(term) = term.map(str::trim).filter(|term| !term.is_empty()) else {
            return;
        };
        let pattern = contains_pattern(term);
        self.push(
            "(tax_id LIKE ? ESCAPE '\\' OR company_name LIKE ? ESCAPE '\\')",
            [Value::Text(pattern.clone()), Value::Text(pattern)],
        );
    }

    fn range(&mut self, column_from: &'static str, column_to: &'static str, range: &TimeRange) {
        if let Some(from) = range.from {
            self.push(column_from, [Value::Text(timestamp(&from))]);
        }
        if let Some(to) = range.to {
            self.push(column_to, [Value::Text(timestamp(&to))]);
        }
    }
}

impl SqliteLedger<'_> {
    fn page<T>(
        &self,
        table: &str,
        columns: &str,
        clauses: Clauses,
        order: &str,
        page: PageRequest,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Page<T>, RepositoryError> {
        let where_sql = clauses.sql();
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
            params_from_iter(clauses.values.iter()),
            |row| row.get(0),
        )?;

        let mut values = clauses.values;
        values.push(Value::Integer(i64::from(page.limit)));
        values.push(Value::Integer(page.offset() as i64));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns} FROM {table}{where_sql} ORDER BY {order} LIMIT ? OFFSET ?"
        ))?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total.max(0) as u64))
    }

    fn one<T>(
        &self,
        sql: &str,
        id: i64,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, RepositoryError> {
        Ok(self.conn.query_row(sql, params![id], map).optional()?)
    }

    fn exists(&self, table: &str, id: i64) -> Result<bool, RepositoryError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl LedgerRead for SqliteLedger<'_> {
    fn user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.one(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            id.0,
            user_row,
        )
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_row,
            )
            .optional()?)
    }

    fn secret_digest(&self, id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .conn
            .query_row(
                "SELECT secret_digest FROM users WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn user_count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(role) = filter.role {
            clauses.push("role = ?", [Value::Text(role.label().into())]);
        }
        if let Some(active) = filter.active {
            clauses.push("active = ?", [Value::Integer(i64::from(active))]);
        }
        self.page("users", USER_COLUMNS, clauses, "id ASC", page, user_row)
    }

    fn request(&self, id: RequestId) -> Result<Option<CreditRequest>, RepositoryError> {
        self.one(
            &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
            id.0,
            request_row,
        )
    }

    fn requests(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<Page<CreditRequest>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(state) = filter.state {
            clauses.push("state = ?", [Value::Text(state.label().into())]);
        }
        if let Some(owner) = filter.owner {
            clauses.push("owner_id = ?", [Value::Integer(owner.0)]);
        }
        clauses.search(filter.search.as_deref());
        self.page(
            "requests",
            REQUEST_COLUMNS,
            clauses,
            "created_at DESC, id DESC",
            page,
            request_row,
        )
    }

    fn state_counts(
        &self,
        owner: Option<UserId>,
    ) -> Result<Vec<(RequestState, u64)>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(owner) = owner {
            clauses.push("owner_id = ?", [Value::Integer(owner.0)]);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT state, COUNT(*) FROM requests{} GROUP BY state",
            clauses.sql()
        ))?;
        let mut counts = stmt
            .query_map(params_from_iter(clauses.values.iter()), |row| {
                Ok((
                    label_at(row, 0, RequestState::parse)?,
                    row.get::<_, i64>(1)?.max(0) as u64,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        counts.sort_by_key(|(state, _)| RequestState::ALL.iter().position(|s| s == state));
        Ok(counts)
    }

    fn lookup(&self, id: LookupId) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        self.one(
            &format!("SELECT {LOOKUP_COLUMNS} FROM credit_lookup_records WHERE id = ?1"),
            id.0,
            lookup_row,
        )
    }

    fn latest_lookup(
        &self,
        request_id: RequestId,
    ) -> Result<Option<CreditLookupRecord>, RepositoryError> {
        self.one(
            &format!(
                "SELECT {LOOKUP_COLUMNS} FROM credit_lookup_records WHERE request_id = ?1 \
                 ORDER BY queried_at DESC, id DESC LIMIT 1"
            ),
            request_id.0,
            lookup_row,
        )
    }

    fn lookups_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<CreditLookupRecord>, RepositoryError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOOKUP_COLUMNS} FROM credit_lookup_records WHERE request_id = ?1 \
             ORDER BY queried_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![request_id.0], lookup_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn verdict(&self, id: VerdictId) -> Result<Option<VerdictRecord>, RepositoryError> {
        self.one(
            &format!("SELECT {VERDICT_COLUMNS} FROM verdict_records WHERE id = ?1"),
            id.0,
            verdict_row,
        )
    }

    fn verdict_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<VerdictRecord>, RepositoryError> {
        self.one(
            &format!("SELECT {VERDICT_COLUMNS} FROM verdict_records WHERE request_id = ?1"),
            request_id.0,
            verdict_row,
        )
    }

    fn verdicts(
        &self,
        filter: &VerdictFilter,
        page: PageRequest,
    ) -> Result<Page<VerdictRecord>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(outcome) = filter.outcome {
            clauses.push("outcome = ?", [Value::Text(outcome.label().into())]);
        }
        if let Some(analyst) = filter.analyst {
            clauses.push("analyst_id = ?", [Value::Integer(analyst.0)]);
        }
        self.page(
            "verdict_records",
            VERDICT_COLUMNS,
            clauses,
            "decided_at DESC, id DESC",
            page,
            verdict_row,
        )
    }

    fn audit_entries(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(actor) = filter.actor {
            clauses.push("actor_id = ?", [Value::Integer(actor.0)]);
        }
        if let Some(role) = filter.role {
            clauses.push("actor_role = ?", [Value::Text(role.label().into())]);
        }
        if let Some(table) = filter.table {
            clauses.push("affected_table = ?", [Value::Text(table.as_str().into())]);
        }
        if let Some(affected_id) = filter.affected_id {
            clauses.push("affected_id = ?", [Value::Integer(affected_id)]);
        }
        clauses.range("recorded_at >= ?", "recorded_at <= ?", &filter.range);
        self.page(
            "audit_log",
            AUDIT_COLUMNS,
            clauses,
            "recorded_at DESC, id DESC",
            page,
            audit_row,
        )
    }

    fn request_trail(&self, request_id: RequestId) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log
             WHERE (affected_table = 'requests' AND affected_id = ?1)
                OR (affected_table = 'credit_lookup_records' AND affected_id IN
                    (SELECT id FROM credit_lookup_records WHERE request_id = ?1))
                OR (affected_table = 'verdict_records' AND affected_id IN
                    (SELECT id FROM verdict_records WHERE request_id = ?1))
             ORDER BY recorded_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![request_id.0], audit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn activity(&self, range: &TimeRange) -> Result<Vec<ActorActivity>, RepositoryError> {
        let mut clauses = Clauses::default();
        clauses.range("recorded_at >= ?", "recorded_at <= ?", range);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT actor_id, actor_role, COUNT(*) FROM audit_log{}
             GROUP BY actor_id, actor_role ORDER BY actor_id",
            clauses.sql()
        ))?;
        let rows = stmt
            .query_map(params_from_iter(clauses.values.iter()), |row| {
                Ok(ActorActivity {
                    actor_id: UserId(row.get(0)?),
                    actor_role: label_at(row, 1, Role::parse)?,
                    entries: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn historical_client(
        &self,
        id: HistoricalClientId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        self.one(
            &format!("SELECT {CLIENT_COLUMNS} FROM historical_clients WHERE id = ?1"),
            id.0,
            client_row,
        )
    }

    fn historical_client_by_tax_id(
        &self,
        tax_id: &TaxId,
    ) -> Result<Option<HistoricalClient>, RepositoryError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM historical_clients WHERE tax_id = ?1"),
                params![tax_id.as_str()],
                client_row,
            )
            .optional()?)
    }

    fn historical_clients(
        &self,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> Result<Page<HistoricalClient>, RepositoryError> {
        let mut clauses = Clauses::default();
        if let Some(status) = filter.status {
            clauses.push("status = ?", [Value::Text(status.label().into())]);
        }
        clauses.search(filter.search.as_deref());
        self.page(
            "historical_clients",
            CLIENT_COLUMNS,
            clauses,
            "registered_at DESC, id DESC",
            page,
            client_row,
        )
    }
}

impl Ledger for SqliteLedger<'_> {
    fn insert_user(&mut self, user: NewUser) -> Result<User, RepositoryError> {
        self.conn.execute(
            "INSERT INTO users (username, display_name, role, active, secret_digest, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![
                user.username,
                user.display_name,
                user.role.label(),
                user.secret_digest,
                timestamp(&user.created_at),
            ],
        )?;
        Ok(User {
            id: UserId(self.conn.last_insert_rowid()),
            username: user.username,
            display_name: user.display_name,
            role: user.role,
            active: true,
            created_at: user.created_at,
        })
    }

    fn save_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        let rows = self.conn.execute(
            "UPDATE users SET display_name = ?1, role = ?2, active = ?3 WHERE id = ?4",
            params![user.display_name, user.role.label(), user.active, user.id.0],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn set_secret_digest(&mut self, id: UserId, digest: &str) -> Result<(), RepositoryError> {
        let rows = self.conn.execute(
            "UPDATE users SET secret_digest = ?1 WHERE id = ?2",
            params![digest, id.0],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn insert_request(&mut self, request: NewRequest) -> Result<CreditRequest, RepositoryError> {
        let created_at = timestamp(&request.created_at);
        self.conn.execute(
            "INSERT INTO requests (tax_id, company_name, requested_amount, requested_units,
                                   comment, owner_id, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                request.tax_id.as_str(),
                request.company_name,
                request.requested_amount.to_string(),
                request.requested_units,
                request.comment,
                request.owner_id.0,
                RequestState::Pending.label(),
                created_at,
            ],
        )?;
        Ok(CreditRequest {
            id: RequestId(self.conn.last_insert_rowid()),
            tax_id: request.tax_id,
            company_name: request.company_name,
            requested_amount: request.requested_amount,
            requested_units: request.requested_units,
            comment: request.comment,
            owner_id: request.owner_id,
            state: RequestState::Pending,
            created_at: request.created_at,
            updated_at: request.created_at,
        })
    }

    fn save_request(&mut self, request: &CreditRequest) -> Result<(), RepositoryError> {
        let rows = self.conn.execute(
            "UPDATE requests SET requested_amount = ?1, requested_units = ?2, comment = ?3,
                                 state = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                request.requested_amount.to_string(),
                request.requested_units,
                request.comment,
                request.state.label(),
                timestamp(&request.updated_at),
                request.id.0,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn insert_lookup(&mut self, lookup: NewLookup) -> Result<CreditLookupRecord, RepositoryError> {
        if !self.exists("requests", lookup.request_id.0)? {
            return Err(RepositoryError::NotFound);
        }
        let raw = serde_json::to_string(&lookup.raw_result)
            .map_err(|err| RepositoryError::Corrupt(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO credit_lookup_records (request_id, tax_id, raw_result, queried_by, queried_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lookup.request_id.0,
                lookup.tax_id.as_str(),
                raw,
                lookup.queried_by.0,
                timestamp(&lookup.queried_at),
            ],
        )?;
        Ok(CreditLookupRecord {
            id: LookupId(self.conn.last_insert_rowid()),
            request_id: lookup.request_id,
            tax_id: lookup.tax_id,
            raw_result: lookup.raw_result,
            queried_by: lookup.queried_by,
            queried_at: lookup.queried_at,
        })
    }

    fn insert_verdict(&mut self, verdict: NewVerdict) -> Result<VerdictRecord, RepositoryError> {
        if !self.exists("requests", verdict.request_id.0)? {
            return Err(RepositoryError::NotFound);
        }
        let decided_at = timestamp(&verdict.decided_at);
        // UNIQUE(request_id) turns a concurrent second insert into a constraint violation.
        self.conn.execute(
            "INSERT INTO verdict_records (request_id, lookup_id, outcome, approved_amount,
                                          approved_units, analyst_id, comments, decided_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                verdict.request_id.0,
                verdict.lookup_id.map(|id| id.0),
                verdict.outcome.label(),
                verdict.approved_amount.map(|amount| amount.to_string()),
                verdict.approved_units,
                verdict.analyst_id.0,
                verdict.comments,
                decided_at,
            ],
        )?;
        Ok(VerdictRecord {
            id: VerdictId(self.conn.last_insert_rowid()),
            request_id: verdict.request_id,
            lookup_id: verdict.lookup_id,
            outcome: verdict.outcome,
            approved_amount: verdict.approved_amount,
            approved_units: verdict.approved_units,
            analyst_id: verdict.analyst_id,
            comments: verdict.comments,
            decided_at: verdict.decided_at,
            updated_at: verdict.decided_at,
        })
    }

    fn save_verdict(&mut self, verdict: &VerdictRecord) -> Result<(), RepositoryError> {
        let rows = self.conn.execute(
            "UPDATE verdict_records SET outcome = ?1, approved_amount = ?2, approved_units = ?3,
                                        comments = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                verdict.outcome.label(),
                verdict.approved_amount.map(|amount| amount.to_string()),
                verdict.approved_units,
                verdict.comments,
                timestamp(&verdict.updated_at),
                verdict.id.0,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn append_audit(&mut self, entry: AuditDraft) -> Result<AuditLogEntry, RepositoryError> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RepositoryError::Corrupt(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO audit_log (actor_id, actor_role, action, affected_table, affected_id,
                                    comment, details, recorded_at, source_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.actor_id.0,
                entry.actor_role.label(),
                entry.action,
                entry.affected_table.map(AffectedTable::as_str),
                entry.affected_id,
                entry.comment,
                details,
                timestamp(&entry.recorded_at),
                entry.source_address,
            ],
        )?;
        Ok(AuditLogEntry {
            id: AuditEntryId(self.conn.last_insert_rowid()),
            actor_id: entry.actor_id,
            actor_role: entry.actor_role,
            action: entry.action,
            affected_table: entry.affected_table,
            affected_id: entry.affected_id,
            comment: entry.comment,
            details: entry.details,
            recorded_at: entry.recorded_at,
            source_address: entry.source_address,
        })
    }

    fn insert_historical_client(
        &mut self,
        client: NewHistoricalClient,
    ) -> Result<HistoricalClient, RepositoryError> {
        let registered_at = timestamp(&client.registered_at);
        self.conn.execute(
            "INSERT INTO historical_clients (tax_id, company_name, address, phone, email, sector,
                                             approved_amount, approved_units, status,
                                             registered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                client.tax_id.as_str(),
                client.company_name,
                client.address,
                client.phone,
                client.email,
                client.sector,
                client.approved_amount.map(|amount| amount.to_string()),
                client.approved_units,
                client.status.label(),
                registered_at,
            ],
        )?;
        Ok(HistoricalClient {
            id: HistoricalClientId(self.conn.last_insert_rowid()),
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
        })
    }

    fn save_historical_client(&mut self, client: &HistoricalClient) -> Result<(), RepositoryError> {
        let rows = self.conn.execute(
            "UPDATE historical_clients SET company_name = ?1, address = ?2, phone = ?3, email = ?4,
                                           sector = ?5, approved_amount = ?6, approved_units = ?7,
                                           status = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                client.company_name,
                client.address,
                client.phone,
                client.email,
                client.sector,
                client.approved_amount.map(|amount| amount.to_string()),
                client.approved_units,
                client.status.label(),
                timestamp(&client.updated_at),
                client.id.0,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

//! `CreditStore` implementations: an in-process store and a SQLite-backed one.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use super::domain::{AffectedTable, AuditLogEntry, RequestId};

/// Whether an audit entry belongs to the trail of a request.
pub(crate) fn trail_matches(
    entry: &AuditLogEntry,
    request_id: RequestId,
    lookup_ids: &[i64],
    verdict_id: Option<i64>,
) -> bool {
    let Some(affected) = entry.affected_id else {
        return false;
    };
    match entry.affected_table {
        Some(AffectedTable::Requests) => affected == request_id.0,
        Some(AffectedTable::CreditLookupRecords) => lookup_ids.contains(&affected),
        Some(AffectedTable::VerdictRecords) => verdict_id == Some(affected),
        _ => false,
    }
}

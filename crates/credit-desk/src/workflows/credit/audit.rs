//! Audit policy and the diagnostics sink for audit appends that failed after commit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AffectedTable, UserId};
use super::repository::{AuditDraft, RepositoryError};

/// Action labels written by the workflow itself.
pub mod actions {
    pub const LOGIN: &str = "login";
    pub const CHANGE_SECRET: &str = "change_secret";
    pub const CREATE_USER: &str = "create_user";
    pub const SET_ROLE: &str = "set_role";
    pub const ACTIVATE_USER: &str = "activate_user";
    pub const DEACTIVATE_USER: &str = "deactivate_user";
    pub const BOOTSTRAP_USER: &str = "bootstrap_user";
    pub const CREATE_REQUEST: &str = "create_request";
    pub const EDIT_REQUEST: &str = "edit_request";
    pub const PERFORM_LOOKUP: &str = "perform_lookup";
    pub const EXPORT_LOOKUP_REPORT: &str = "export_lookup_report";
    pub const RECORD_VERDICT: &str = "record_verdict";
    pub const UPDATE_VERDICT: &str = "update_verdict";
    pub const CREATE_HISTORICAL_CLIENT: &str = "create_historical_client";
    pub const UPDATE_HISTORICAL_CLIENT: &str = "update_historical_client";
}

/// How a mutation and its audit entry are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPolicy {
    /// Audit append shares the mutation's transaction; a failed append undoes the mutation.
    Strict,
    /// Mutation commits first; a failed append is reported to [`AuditDiagnostics`].
    #[default]
    Lenient,
}

impl AuditPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(AuditPolicy::Strict),
            "lenient" => Some(AuditPolicy::Lenient),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            AuditPolicy::Strict => "strict",
            AuditPolicy::Lenient => "lenient",
        }
    }
}

const RECENT_FAILURES: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditFailure {
    pub action: String,
    pub actor_id: UserId,
    pub affected_table: Option<AffectedTable>,
    pub affected_id: Option<i64>,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditDiagnosticsSnapshot {
    pub policy: AuditPolicy,
    pub failures: u64,
    pub recent: Vec<AuditFailure>,
}

/// Counts lenient-mode audit failures and keeps the most recent ones for inspection.
#[derive(Debug, Default)]
pub struct AuditDiagnostics {
    failures: AtomicU64,
    recent: Mutex<VecDeque<AuditFailure>>,
}

impl AuditDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, draft: &AuditDraft, error: &RepositoryError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            action = %draft.action,
            actor_id = %draft.actor_id,
            affected_table = draft.affected_table.map(AffectedTable::as_str),
            affected_id = draft.affected_id,
            error = %error,
            "audit entry lost after committed mutation"
        );

        let failure = AuditFailure {
            action: draft.action.clone(),
            actor_id: draft.actor_id,
            affected_table: draft.affected_table,
            affected_id: draft.affected_id,
            error: error.to_string(),
            occurred_at: Utc::now(),
        };
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == RECENT_FAILURES {
                recent.pop_front();
            }
            recent.push_back(failure);
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, policy: AuditPolicy) -> AuditDiagnosticsSnapshot {
        let recent = self
            .recent
            .lock()
            .map(|recent| recent.iter().rev().cloned().collect())
            .unwrap_or_default();
        AuditDiagnosticsSnapshot {
            policy,
            failures: self.failures(),
            recent,
        }
    }
}

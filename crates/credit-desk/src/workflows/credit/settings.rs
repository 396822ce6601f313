use std::time::Duration;

use super::audit::AuditPolicy;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables the service reads on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeskSettings {
    pub audit_policy: AuditPolicy,
    pub lookup_timeout: Duration,
}

impl DeskSettings {
    pub fn strict() -> Self {
        Self {
            audit_policy: AuditPolicy::Strict,
            ..Self::default()
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            audit_policy: AuditPolicy::default(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

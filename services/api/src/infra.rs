use credit_desk::config::DeskConfig;
use credit_desk::error::AppError;
use credit_desk::workflows::credit::{
    AccountDraft, CreditBureau, CreditDeskService, CreditStore, Role,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// One account per role, all sharing the configured seed secret.
pub(crate) fn fixture_accounts(secret: &str) -> Vec<AccountDraft> {
    [
        ("admin", "Desk Administrator", Role::Admin),
        ("cmartin", "Carla Martin", Role::Commercial),
        ("lvega", "Luis Vega", Role::Risk),
    ]
    .into_iter()
    .map(|(username, display_name, role)| AccountDraft {
        username: username.to_string(),
        display_name: display_name.to_string(),
        secret: secret.to_string(),
        role,
    })
    .collect()
}

/// Seed fixture accounts when enabled. Returns how many accounts were created.
pub(crate) fn seed_fixture_accounts<S, B>(
    service: &CreditDeskService<S, B>,
    desk: &DeskConfig,
) -> Result<usize, AppError>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    if !desk.seed_fixtures {
        return Ok(0);
    }
    let Some(secret) = desk.seed_secret.as_deref() else {
        warn!("fixture seeding enabled but APP_SEED_SECRET is unset; skipping");
        return Ok(0);
    };

    let seeded = service.bootstrap(fixture_accounts(secret))?;
    if seeded.is_empty() {
        info!("store already holds accounts; fixture seeding skipped");
    } else {
        info!(accounts = seeded.len(), "fixture accounts seeded");
    }
    Ok(seeded.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_desk::config::{SigningSecret, StoreBackend};
    use credit_desk::workflows::credit::{AuditPolicy, FixtureBureau, MemoryStore};
    use std::time::Duration;

    fn desk_config(seed_fixtures: bool, seed_secret: Option<&str>) -> DeskConfig {
        DeskConfig {
            store: StoreBackend::Memory,
            audit_policy: AuditPolicy::Lenient,
            lookup_timeout: Duration::from_secs(5),
            seed_fixtures,
            seed_secret: seed_secret.map(str::to_string),
            token_secret: SigningSecret::from("infra-test-key"),
            token_ttl: Duration::from_secs(600),
            hash_cost: 4,
        }
    }

    fn service(config: &DeskConfig) -> CreditDeskService<MemoryStore, FixtureBureau> {
        CreditDeskService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixtureBureau::new()),
            config.settings(),
        )
        .with_hasher(Arc::new(config.hasher()))
    }

    #[test]
    fn seeds_one_account_per_role_once() {
        let config = desk_config(true, Some("Seeded2024"));
        let service = service(&config);

        let seeded = seed_fixture_accounts(&service, &config).expect("seeding runs");
        assert_eq!(seeded, 3);
        assert!(service.authenticate("lvega", "Seeded2024", None).is_ok());

        let again = seed_fixture_accounts(&service, &config).expect("second run");
        assert_eq!(again, 0);
    }

    #[test]
    fn skips_seeding_without_secret_or_flag() {
        for config in [desk_config(true, None), desk_config(false, Some("Seeded2024"))] {
            let service = service(&config);
            assert_eq!(
                seed_fixture_accounts(&service, &config).expect("seeding runs"),
                0
            );
        }
    }
}

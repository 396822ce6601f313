use crate::cli::{BootstrapArgs, ServeArgs};
use crate::infra::{seed_fixture_accounts, AppState};
use crate::routes::with_credit_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use credit_desk::config::{AppConfig, StoreBackend};
use credit_desk::error::AppError;
use credit_desk::telemetry;
use credit_desk::workflows::credit::{
    AccountDraft, CreditDeskService, CreditStore, FixtureBureau, MemoryStore, Role, SqliteStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    match config.desk.store.clone() {
        StoreBackend::Memory => {
            warn!("serving from the in-memory store; records are lost on shutdown");
            serve(config, MemoryStore::new()).await
        }
        StoreBackend::Sqlite { path } => {
            let store = SqliteStore::open(&path)?;
            info!(path = %path.display(), "sqlite store opened");
            serve(config, store).await
        }
    }
}

async fn serve<S>(config: AppConfig, store: S) -> Result<(), AppError>
where
    S: CreditStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = Arc::new(
        CreditDeskService::new(
            Arc::new(store),
            Arc::new(FixtureBureau::new()),
            config.desk.settings(),
        )
        .with_hasher(Arc::new(config.desk.hasher()))
        .with_tokens(config.desk.token_issuer()),
    );
    seed_fixture_accounts(&service, &config.desk)?;

    let app = with_credit_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        audit_policy = config.desk.audit_policy.label(),
        "credit desk ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) fn bootstrap(args: BootstrapArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let path = match &config.desk.store {
        StoreBackend::Sqlite { path } => path.clone(),
        StoreBackend::Memory => {
            println!("APP_STORE=memory keeps nothing between runs; set APP_STORE=sqlite to bootstrap");
            return Ok(());
        }
    };

    let service = CreditDeskService::new(
        Arc::new(SqliteStore::open(&path)?),
        Arc::new(FixtureBureau::new()),
        config.desk.settings(),
    )
    .with_hasher(Arc::new(config.desk.hasher()));
    let created = service.bootstrap(vec![AccountDraft {
        username: args.username,
        display_name: args.display_name,
        secret: args.secret,
        role: Role::Admin,
    }])?;

    match created.first() {
        Some(admin) => println!(
            "Administrator '{}' created with id {} in {}",
            admin.username,
            admin.id,
            path.display()
        ),
        None => println!("{} already holds accounts; nothing to do", path.display()),
    }
    Ok(())
}

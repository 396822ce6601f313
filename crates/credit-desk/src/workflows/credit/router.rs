use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::bureau::CreditBureau;
use super::domain::{
    AccountDraft, AffectedTable, Caller, ClientStatus, HistoricalClientDraft,
    HistoricalClientEdit, HistoricalClientId, ManualAuditDraft, RequestDraft, RequestEdit,
    RequestId, RequestState, Role, UserId, VerdictDraft, VerdictEdit, VerdictId, VerdictOutcome,
};
use super::error::{CreditDeskError, ErrorKind};
use super::repository::{
    AuditFilter, ClientFilter, CreditStore, PageRequest, RepositoryError, RequestFilter,
    TimeRange, UserFilter, VerdictFilter,
};
use super::service::CreditDeskService;
use super::tokens::bearer_token;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

type SharedService<S, B> = Arc<CreditDeskService<S, B>>;

/// Router exposing the credit desk under `/api/v1`.
pub fn credit_router<S, B>(service: SharedService<S, B>) -> Router
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    Router::new()
        .route("/api/v1/auth/login", post(login_handler::<S, B>))
        .route("/api/v1/auth/change-secret", post(change_secret_handler::<S, B>))
        .route(
            "/api/v1/users",
            get(list_users_handler::<S, B>).post(create_user_handler::<S, B>),
        )
        .route("/api/v1/users/:user_id", get(get_user_handler::<S, B>))
        .route(
            "/api/v1/users/:user_id/role",
            put(set_role_handler::<S, B>),
        )
        .route(
            "/api/v1/users/:user_id/deactivate",
            post(deactivate_user_handler::<S, B>),
        )
        .route(
            "/api/v1/users/:user_id/activate",
            post(activate_user_handler::<S, B>),
        )
        .route(
            "/api/v1/requests",
            get(list_requests_handler::<S, B>).post(create_request_handler::<S, B>),
        )
        .route("/api/v1/requests/dashboard", get(dashboard_handler::<S, B>))
        .route(
            "/api/v1/requests/:request_id",
            get(get_request_handler::<S, B>).patch(edit_request_handler::<S, B>),
        )
        .route(
            "/api/v1/requests/:request_id/audit",
            get(request_trail_handler::<S, B>),
        )
        .route(
            "/api/v1/requests/:request_id/lookups",
            get(list_lookups_handler::<S, B>).post(perform_lookup_handler::<S, B>),
        )
        .route(
            "/api/v1/requests/:request_id/lookups/latest",
            get(latest_lookup_handler::<S, B>),
        )
        .route(
            "/api/v1/requests/:request_id/lookups/report",
            get(lookup_report_handler::<S, B>),
        )
        .route(
            "/api/v1/requests/:request_id/verdict",
            get(request_verdict_handler::<S, B>).post(record_verdict_handler::<S, B>),
        )
        .route("/api/v1/verdicts", get(list_verdicts_handler::<S, B>))
        .route(
            "/api/v1/verdicts/:verdict_id",
            get(get_verdict_handler::<S, B>).put(update_verdict_handler::<S, B>),
        )
        .route(
            "/api/v1/audit",
            get(audit_log_handler::<S, B>).post(manual_audit_handler::<S, B>),
        )
        .route("/api/v1/audit/stats", get(activity_stats_handler::<S, B>))
        .route(
            "/api/v1/diagnostics/audit",
            get(audit_diagnostics_handler::<S, B>),
        )
        .route(
            "/api/v1/historical-clients",
            get(list_clients_handler::<S, B>).post(create_client_handler::<S, B>),
        )
        .route(
            "/api/v1/historical-clients/tax-id/:tax_id",
            get(client_by_tax_id_handler::<S, B>),
        )
        .route(
            "/api/v1/historical-clients/:client_id",
            put(update_client_handler::<S, B>),
        )
        .with_state(service)
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated | ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ErrorKind::RoleDenied
        | ErrorKind::OwnershipDenied
        | ErrorKind::SelfTargetDenied
        | ErrorKind::Deactivated => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::LookupRejected | ErrorKind::LookupMalformed => StatusCode::BAD_GATEWAY,
        ErrorKind::LookupUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::StorageFailure
        | ErrorKind::AuditWriteFailure
        | ErrorKind::ReportFailure
        | ErrorKind::CredentialFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &CreditDeskError, viewer: Option<Role>) -> Response {
    let kind = error.kind();
    let status = status_for(kind);
    if status.is_server_error() {
        tracing::error!(kind = kind.as_str(), error = %error, "credit desk request failed");
    }

    let mut payload = json!({
        "error": error.public_message(viewer),
        "kind": kind.as_str(),
    });
    if let Some(validation) = error.validation() {
        payload["violations"] = json!(validation.violations);
    }
    (status, axum::Json(payload)).into_response()
}

fn respond<T: Serialize>(
    status: StatusCode,
    result: Result<T, CreditDeskError>,
    viewer: Option<Role>,
) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(&error, viewer),
    }
}

/// Run a synchronous service call on the blocking thread pool.
async fn blocking<S, B, T, F>(service: &SharedService<S, B>, work: F) -> Result<T, CreditDeskError>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
    T: Send + 'static,
    F: FnOnce(&CreditDeskService<S, B>) -> Result<T, CreditDeskError> + Send + 'static,
{
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || work(service.as_ref()))
        .await
        .map_err(|err| {
            CreditDeskError::Storage(RepositoryError::Unavailable(format!(
                "blocking task failed: {err}"
            )))
        })?
}

/// [`blocking`] on behalf of an authenticated caller, rendered as JSON.
async fn run_as<S, B, T, F>(
    service: SharedService<S, B>,
    caller: Caller,
    status: StatusCode,
    work: F,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
    T: Serialize + Send + 'static,
    F: FnOnce(&CreditDeskService<S, B>, &Caller) -> Result<T, CreditDeskError> + Send + 'static,
{
    let viewer = caller.role();
    let result = blocking(&service, move |desk| work(desk, &caller)).await;
    respond(status, result, Some(viewer))
}

fn source_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Active caller resolved from the `Authorization: Bearer` token issued at login.
pub struct Actor(pub Caller);

#[async_trait]
impl<S, B> FromRequestParts<SharedService<S, B>> for Actor
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &SharedService<S, B>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .ok_or_else(|| error_response(&CreditDeskError::Unauthenticated, None))?;
        let source = source_address(&parts.headers);

        blocking(service, move |desk| desk.resolve_token(&token, source))
            .await
            .map(Actor)
            .map_err(|error| error_response(&error, None))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginBody {
    username: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangeSecretBody {
    current_secret: String,
    new_secret: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleBody {
    role: Role,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserListQuery {
    role: Option<Role>,
    active: Option<bool>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestListQuery {
    state: Option<RequestState>,
    owner: Option<i64>,
    search: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerdictListQuery {
    outcome: Option<VerdictOutcome>,
    analyst: Option<i64>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuditQuery {
    actor: Option<i64>,
    role: Option<Role>,
    table: Option<AffectedTable>,
    affected_id: Option<i64>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ClientListQuery {
    status: Option<ClientStatus>,
    search: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

impl AuditQuery {
    fn into_parts(self) -> (AuditFilter, PageRequest) {
        let filter = AuditFilter {
            actor: self.actor.map(UserId),
            role: self.role,
            table: self.table,
            affected_id: self.affected_id,
            range: TimeRange {
                from: self.from,
                to: self.to,
            },
        };
        (filter, PageRequest::audit(self.page, self.limit))
    }
}

pub(crate) async fn login_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<LoginBody>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let source = source_address(&headers);
    let result = blocking(&service, move |desk| {
        desk.login(&body.username, &body.secret, source)
    })
    .await;
    respond(StatusCode::OK, result, None)
}

pub(crate) async fn change_secret_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    axum::Json(body): axum::Json<ChangeSecretBody>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let viewer = caller.role();
    let result = blocking(&service, move |desk| {
        desk.change_secret(&caller, &body.current_secret, &body.new_secret)
    })
    .await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error, Some(viewer)),
    }
}

pub(crate) async fn list_users_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(query): Query<UserListQuery>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let filter = UserFilter {
        role: query.role,
        active: query.active,
    };
    let page = PageRequest::new(query.page, query.limit);
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.list_users(caller, &filter, page)
    })
    .await
}

pub(crate) async fn create_user_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    axum::Json(draft): axum::Json<AccountDraft>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::CREATED, move |desk, caller| {
        desk.create_user(caller, draft)
    })
    .await
}

pub(crate) async fn get_user_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(user_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.get_user(caller, UserId(user_id))
    })
    .await
}

pub(crate) async fn set_role_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(user_id): Path<i64>,
    axum::Json(body): axum::Json<RoleBody>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.set_role(caller, UserId(user_id), body.role)
    })
    .await
}

pub(crate) async fn deactivate_user_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(user_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.deactivate_user(caller, UserId(user_id))
    })
    .await
}

pub(crate) async fn activate_user_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(user_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.activate_user(caller, UserId(user_id))
    })
    .await
}

pub(crate) async fn list_requests_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(query): Query<RequestListQuery>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let filter = RequestFilter {
        state: query.state,
        owner: query.owner.map(UserId),
        search: query.search,
    };
    let page = PageRequest::new(query.page, query.limit);
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.list_requests(caller, filter, page)
    })
    .await
}

pub(crate) async fn create_request_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    axum::Json(draft): axum::Json<RequestDraft>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::CREATED, move |desk, caller| {
        desk.create_request(caller, draft)
    })
    .await
}

pub(crate) async fn dashboard_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.request_dashboard(caller)
    })
    .await
}

pub(crate) async fn get_request_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.get_request(caller, RequestId(request_id))
    })
    .await
}

pub(crate) async fn edit_request_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
    axum::Json(edit): axum::Json<RequestEdit>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.edit_request(caller, RequestId(request_id), edit)
    })
    .await
}

pub(crate) async fn request_trail_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.request_trail(caller, RequestId(request_id))
    })
    .await
}

pub(crate) async fn perform_lookup_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let result = service
        .perform_lookup(&caller, RequestId(request_id))
        .await;
    respond(StatusCode::CREATED, result, Some(caller.role()))
}

pub(crate) async fn list_lookups_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.list_lookups(caller, RequestId(request_id))
    })
    .await
}

pub(crate) async fn latest_lookup_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.latest_lookup(caller, RequestId(request_id))
    })
    .await
}

pub(crate) async fn lookup_report_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let viewer = caller.role();
    let result = blocking(&service, move |desk| {
        desk.export_lookup_report(&caller, RequestId(request_id))
    })
    .await;
    match result {
        Ok(report) => {
            let disposition = format!("attachment; filename=\"{}\"", report.file_name);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, report.content_type.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                report.body,
            )
                .into_response()
        }
        Err(error) => error_response(&error, Some(viewer)),
    }
}

pub(crate) async fn record_verdict_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
    axum::Json(draft): axum::Json<VerdictDraft>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::CREATED, move |desk, caller| {
        desk.record_verdict(caller, RequestId(request_id), draft)
    })
    .await
}

pub(crate) async fn request_verdict_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(request_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.verdict_for_request(caller, RequestId(request_id))
    })
    .await
}

pub(crate) async fn list_verdicts_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(query): Query<VerdictListQuery>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let filter = VerdictFilter {
        outcome: query.outcome,
        analyst: query.analyst.map(UserId),
    };
    let page = PageRequest::new(query.page, query.limit);
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.list_verdicts(caller, &filter, page)
    })
    .await
}

pub(crate) async fn get_verdict_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(verdict_id): Path<i64>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.get_verdict(caller, VerdictId(verdict_id))
    })
    .await
}

pub(crate) async fn update_verdict_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(verdict_id): Path<i64>,
    axum::Json(edit): axum::Json<VerdictEdit>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.update_verdict(caller, VerdictId(verdict_id), edit)
    })
    .await
}

pub(crate) async fn audit_log_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(query): Query<AuditQuery>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let (filter, page) = query.into_parts();
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.audit_log(caller, &filter, page)
    })
    .await
}

pub(crate) async fn manual_audit_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    axum::Json(draft): axum::Json<ManualAuditDraft>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::CREATED, move |desk, caller| {
        desk.record_manual_audit(caller, draft)
    })
    .await
}

pub(crate) async fn activity_stats_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(range): Query<TimeRange>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.activity_stats(caller, &range)
    })
    .await
}

pub(crate) async fn audit_diagnostics_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.audit_diagnostics(caller)
    })
    .await
}

pub(crate) async fn list_clients_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Query(query): Query<ClientListQuery>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    let filter = ClientFilter {
        status: query.status,
        search: query.search,
    };
    let page = PageRequest::new(query.page, query.limit);
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.list_historical_clients(caller, &filter, page)
    })
    .await
}

pub(crate) async fn client_by_tax_id_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(tax_id): Path<String>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.historical_client_by_tax_id(caller, &tax_id)
    })
    .await
}

pub(crate) async fn create_client_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    axum::Json(draft): axum::Json<HistoricalClientDraft>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::CREATED, move |desk, caller| {
        desk.create_historical_client(caller, draft)
    })
    .await
}

pub(crate) async fn update_client_handler<S, B>(
    State(service): State<SharedService<S, B>>,
    Actor(caller): Actor,
    Path(client_id): Path<i64>,
    axum::Json(edit): axum::Json<HistoricalClientEdit>,
) -> Response
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    run_as(service, caller, StatusCode::OK, move |desk, caller| {
        desk.update_historical_client(caller, HistoricalClientId(client_id), edit)
    })
    .await
}

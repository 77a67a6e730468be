use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{PassDraft, PassId, StaffId, StudentId};
use super::listing::PassQuery;
use super::repository::{
    AuditLog, CampusDirectory, NotificationDispatcher, PassRepository, QuotaRepository,
};
use super::service::{ExitPassService, PassServiceError};

type SharedService<R, N, L> = State<Arc<ExitPassService<R, N, L>>>;

/// Router exposing submission, staff decisions, gate movement, and read views.
pub fn exit_pass_router<R, N, L>(service: Arc<ExitPassService<R, N, L>>) -> Router
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    Router::new()
        .route(
            "/api/v1/passes",
            post(submit_handler::<R, N, L>).get(list_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id",
            get(fetch_handler::<R, N, L>).delete(withdraw_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id/dsa-approval",
            post(dsa_approval_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id/cso-approval",
            post(cso_approval_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id/rejection",
            post(rejection_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id/check-out",
            post(check_out_handler::<R, N, L>),
        )
        .route(
            "/api/v1/passes/:pass_id/check-in",
            post(check_in_handler::<R, N, L>),
        )
        .route(
            "/api/v1/review-queue",
            get(review_queue_handler::<R, N, L>),
        )
        .route(
            "/api/v1/students/:student_id/quota",
            get(quota_handler::<R, N, L>),
        )
        .route(
            "/api/v1/students/:student_id/passes",
            get(history_handler::<R, N, L>),
        )
        .with_state(service)
}

/// `Json` whose rejections use the `{"error": ...}` body of every other failure.
pub(crate) struct JsonBody<T>(pub(crate) T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejection_response(rejection.status(), rejection.body_text())),
        }
    }
}

/// `Query` counterpart of [`JsonBody`].
pub(crate) struct QueryParams<T>(pub(crate) T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(rejection_response(rejection.status(), rejection.body_text())),
        }
    }
}

fn rejection_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitBody {
    student_id: String,
    #[serde(flatten)]
    draft: PassDraft,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApprovalBody {
    actor_id: String,
    #[serde(default)]
    comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectionBody {
    actor_id: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MovementBody {
    actor_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwnerParams {
    student_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewParams {
    actor_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub(crate) async fn submit_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    JsonBody(body): JsonBody<SubmitBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .student(&StudentId(body.student_id))
        .and_then(|student| service.submit(body.draft, &student));
    match outcome {
        Ok(pass) => (StatusCode::CREATED, Json(pass)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    QueryParams(query): QueryParams<PassQuery>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    match service.list(&query) {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn fetch_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    match service.get(&PassId(pass_id)) {
        Ok(pass) => {
            let payload = json!({
                "status_label": pass.status().label(),
                "pass": pass,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn withdraw_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    QueryParams(owner): QueryParams<OwnerParams>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    match service.withdraw(&PassId(pass_id), &StudentId(owner.student_id)) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn dsa_approval_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    JsonBody(body): JsonBody<ApprovalBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(body.actor_id))
        .and_then(|actor| service.approve_as_dsa(&PassId(pass_id), &actor, body.comments));
    transition_response(outcome)
}

pub(crate) async fn cso_approval_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    JsonBody(body): JsonBody<ApprovalBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(body.actor_id))
        .and_then(|actor| service.approve_as_cso(&PassId(pass_id), &actor, body.comments));
    transition_response(outcome)
}

pub(crate) async fn rejection_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    JsonBody(body): JsonBody<RejectionBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(body.actor_id))
        .and_then(|actor| service.reject(&PassId(pass_id), &actor, &body.reason));
    transition_response(outcome)
}

pub(crate) async fn check_out_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    JsonBody(body): JsonBody<MovementBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(body.actor_id))
        .and_then(|actor| service.check_out(&PassId(pass_id), &actor));
    transition_response(outcome)
}

pub(crate) async fn check_in_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(pass_id): Path<String>,
    JsonBody(body): JsonBody<MovementBody>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(body.actor_id))
        .and_then(|actor| service.check_in(&PassId(pass_id), &actor));
    transition_response(outcome)
}

pub(crate) async fn review_queue_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    QueryParams(params): QueryParams<ReviewParams>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    let outcome = service
        .staff(&StaffId(params.actor_id))
        .and_then(|actor| service.review_queue(&actor, params.limit));
    match outcome {
        Ok(items) => (StatusCode::OK, Json(json!({ "items": items }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn quota_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(student_id): Path<String>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    match service.quota_summary(&StudentId(student_id)) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn history_handler<R, N, L>(
    State(service): SharedService<R, N, L>,
    Path(student_id): Path<String>,
) -> Response
where
    R: PassRepository + QuotaRepository + CampusDirectory + 'static,
    N: NotificationDispatcher + 'static,
    L: AuditLog + 'static,
{
    match service.history(&StudentId(student_id)) {
        Ok(passes) => (StatusCode::OK, Json(json!({ "items": passes }))).into_response(),
        Err(err) => err.into_response(),
    }
}

fn transition_response(
    outcome: Result<super::domain::PassRequest, PassServiceError>,
) -> Response {
    match outcome {
        Ok(pass) => {
            let payload = json!({
                "status_label": pass.status().label(),
                "pass": pass,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

impl IntoResponse for PassServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            PassServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PassServiceError::Unauthorized(_) => StatusCode::FORBIDDEN,
            PassServiceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PassServiceError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            PassServiceError::PassNotFound(_) | PassServiceError::StudentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PassServiceError::GrantNotRecorded { .. } | PassServiceError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let payload = match &self {
            PassServiceError::QuotaExceeded(refusal) => json!({
                "error": refusal.reason,
                "category": refusal.category,
                "month": refusal.month,
                "limit": refusal.limit,
                "used": refusal.used,
                "remaining": refusal.remaining,
            }),
            PassServiceError::InvalidTransition { status, .. } => json!({
                "error": self.to_string(),
                "current_status": status,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(payload)).into_response()
    }
}

use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    models::{
        dead_letter::DeadLetter,
        health::HealthStatus,
        notification::{Notification, NotificationStats},
        response::{ApiResponse, MAX_PAGE_LIMIT, Page, PaginationMeta, Paged},
    },
    scheduler::RetryPolicy,
    store::{NotificationStore, StoreError},
};

pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub health_checker: HealthChecker,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = ApiResponse::<()>::error(self.to_string(), "Request failed".to_string());
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_dead_letter_limit")]
    pub limit: u64,
}

fn default_dead_letter_limit() -> u64 {
    50
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/notifications/stats", get(notification_stats))
        .route("/api/notifications/abandoned", get(abandoned_notifications))
        .route("/api/notifications/user/{user_id}", get(notifications_by_user))
        .route(
            "/api/notifications/delivery/{delivery_id}",
            get(notifications_by_delivery),
        )
        .route("/api/notifications/{id}", get(notification_by_id))
        .route("/api/dead-letters", get(dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Query API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Query API server stopped");

    Ok(())
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

pub async fn notification_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Notification> {
    let notification = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))?;

    Ok(Json(ApiResponse::success(
        notification,
        "Notification retrieved".to_string(),
    )))
}

pub async fn notifications_by_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<Notification>> {
    let page = page.normalized();
    let paged = state.store.list_by_user(user_id, page).await?;

    Ok(paginated(paged, page, "Notifications for user retrieved"))
}

pub async fn notifications_by_delivery(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<i64>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<Notification>> {
    let page = page.normalized();
    let paged = state.store.list_by_delivery(delivery_id, page).await?;

    Ok(paginated(paged, page, "Notifications for delivery retrieved"))
}

pub async fn notification_stats(State(state): State<Arc<AppState>>) -> ApiResult<NotificationStats> {
    let stats = state.store.stats().await?;

    Ok(Json(ApiResponse::success(
        stats,
        "Notification statistics retrieved".to_string(),
    )))
}

/// Failed rows the scheduler will not touch again; they need a human.
pub async fn abandoned_notifications(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Page>,
) -> ApiResult<Vec<Notification>> {
    let page = page.normalized();
    let paged = state
        .store
        .list_abandoned(&state.retry_policy.window(), page)
        .await?;

    Ok(paginated(paged, page, "Abandoned notifications retrieved"))
}

pub async fn dead_letters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeadLetterQuery>,
) -> ApiResult<Vec<DeadLetter>> {
    let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
    let entries = state.store.list_dead_letters(limit).await?;

    Ok(Json(ApiResponse::success(
        entries,
        "Dead letters retrieved".to_string(),
    )))
}

fn paginated(paged: Paged<Notification>, page: Page, message: &str) -> Json<ApiResponse<Vec<Notification>>> {
    let meta = PaginationMeta::new(paged.total, page);
    Json(ApiResponse::paginated(paged.items, meta, message.to_string()))
}

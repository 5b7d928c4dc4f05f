use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(feature = "slowdown")]
use super::slowdown_request;
use super::websocket::{ws_handler, ConnectionManager, PushCallback};
use super::{log_requests, metrics, state::*, ServerConfig};
use crate::export::{ExportFormat, ExportOptions, ImportOptions};
use crate::manager::{ManagerStats, NotificationManager};
use crate::notifications::{
    now_millis, Notification, NotificationError, NotificationFilter, NotificationPreferences,
    NotificationType, NotifyOptions,
};
use crate::scheduler::{ScheduleConfig, Scheduler};

/// A `NotificationError` on its way out, tagged with the endpoint it came from.
struct ApiError {
    error: NotificationError,
    endpoint: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        metrics::record_error(code, self.endpoint);
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code,
            message: self.error.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn at(endpoint: &'static str) -> impl Fn(NotificationError) -> ApiError {
    move |error| ApiError { error, endpoint }
}

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub connections: usize,
    pub notifications: ManagerStats,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct CreateNotificationBody {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(flatten)]
    pub options: NotifyOptions,
}

#[derive(Deserialize, Debug)]
struct TemplateNotificationBody {
    pub template: String,
    #[serde(default)]
    pub vars: std::collections::BTreeMap<String, String>,
    #[serde(flatten)]
    pub options: NotifyOptions,
}

#[derive(Deserialize, Debug)]
struct ScheduleBody {
    #[serde(flatten)]
    pub notification: CreateNotificationBody,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Either a bare JSON array of ids or `{"ids": [...]}`.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum IdsBody {
    List(Vec<String>),
    Wrapped { ids: Vec<String> },
}

impl IdsBody {
    fn into_ids(self) -> Vec<String> {
        match self {
            IdsBody::List(ids) | IdsBody::Wrapped { ids } => ids,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct UserQueryParams {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub unread_only: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ExportParams {
    pub format: ExportFormat,
    pub user: Option<String>,
    pub metadata: bool,
    pub compress: bool,
    pub encrypt: bool,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        connections: state.ws_connection_manager.total_connections().await,
        notifications: state.manager.stats(),
    };
    Json(stats)
}

async fn create_notification(
    State(manager): State<GuardedManager>,
    Json(body): Json<CreateNotificationBody>,
) -> Result<Response, ApiError> {
    let CreateNotificationBody {
        notification_type,
        title,
        message,
        options,
    } = body;
    let created = match options.user_id.clone() {
        Some(user_id) => manager
            .notify_for_user(&user_id, notification_type, &title, &message, options)
            .map_err(at("/notifications"))?,
        None => Some(
            manager
                .notify(notification_type, &title, &message, options)
                .map_err(at("/notifications"))?,
        ),
    };
    Ok(match created {
        Some(notification) => (StatusCode::CREATED, Json(notification)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn create_from_template(
    State(manager): State<GuardedManager>,
    Json(body): Json<TemplateNotificationBody>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let notification = manager
        .notify_from_template(&body.template, &body.vars, body.options)
        .map_err(at("/notifications/template"))?;
    Ok((StatusCode::CREATED, Json(notification)))
}

async fn schedule_notification(
    State(scheduler): State<OptionalScheduler>,
    Json(body): Json<ScheduleBody>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let CreateNotificationBody {
        notification_type,
        title,
        message,
        options,
    } = body.notification;
    let mut notification = Notification::new(
        notification_type,
        options.priority.unwrap_or_default(),
        title,
        message,
    );
    notification.group = options.group;
    notification.expires_at = options.expires_at;
    notification.data = options.data;
    notification.actions = options.actions;
    notification.user_id = options.user_id;

    match scheduler.schedule_notification(notification, body.schedule) {
        Ok(scheduled) => (StatusCode::CREATED, Json(scheduled)).into_response(),
        Err(err) => at("/notifications/schedule")(err).into_response(),
    }
}

async fn cancel_schedule(
    State(scheduler): State<OptionalScheduler>,
    Path(id): Path<String>,
) -> Response {
    let Some(scheduler) = scheduler else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    match scheduler.cancel_scheduled_notification(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => at("/notifications/schedule/{id}")(err).into_response(),
    }
}

async fn get_user_notifications(
    State(manager): State<GuardedManager>,
    State(config): State<ServerConfig>,
    Path(user_id): Path<String>,
    Query(params): Query<UserQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let context = config.access.context_for(&user_id, now_millis());
    let mut filter = NotificationFilter {
        user_id: Some(user_id),
        offset: params.offset.unwrap_or(0),
        limit: params.limit,
        ..Default::default()
    };
    if let Some(raw) = &params.notification_type {
        let notification_type = NotificationType::from_str(raw).ok_or_else(|| {
            at("/notifications/{user}")(NotificationError::Validation(format!(
                "unknown notification type {}",
                raw
            )))
        })?;
        filter.types = vec![notification_type];
    }
    if params.unread_only.unwrap_or(false) {
        filter.read = Some(false);
    }
    let page = manager
        .query_for(&filter, &context)
        .map_err(at("/notifications/{user}"))?;
    Ok(Json(page))
}

async fn mark_read(
    State(manager): State<GuardedManager>,
    State(config): State<ServerConfig>,
    Path(user_id): Path<String>,
    Json(body): Json<IdsBody>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let context = config.access.context_for(&user_id, now_millis());
    let updated = manager
        .mark_as_read_for(&body.into_ids(), &context)
        .map_err(at("/notifications/{user}/read"))?;
    Ok(Json(updated))
}

async fn mark_all_read(
    State(manager): State<GuardedManager>,
    Path(user_id): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let updated = manager
        .mark_all_read(Some(&user_id))
        .map_err(at("/notifications/{user}/read-all"))?;
    Ok(Json(CountResponse {
        count: updated.len(),
    }))
}

async fn unread_count(
    State(manager): State<GuardedManager>,
    Path(user_id): Path<String>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: manager.unread_count(Some(&user_id)),
    })
}

async fn delete_notifications(
    State(manager): State<GuardedManager>,
    Path(user_id): Path<String>,
    Json(body): Json<IdsBody>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = manager
        .delete(&body.into_ids(), Some(&user_id))
        .map_err(at("/notifications/{user}"))?;
    Ok(Json(CountResponse { count }))
}

async fn get_preferences(
    State(manager): State<GuardedManager>,
    Path(user_id): Path<String>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    let preferences = manager
        .preferences(&user_id)
        .map_err(at("/notifications/preferences/{user}"))?;
    Ok(Json(preferences))
}

async fn put_preferences(
    State(manager): State<GuardedManager>,
    Path(user_id): Path<String>,
    Json(preferences): Json<NotificationPreferences>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    manager
        .set_preferences(&user_id, &preferences)
        .map_err(at("/notifications/preferences/{user}"))?;
    debug!("Updated preferences of {}", user_id);
    Ok(Json(preferences))
}

async fn export_notifications(
    State(manager): State<GuardedManager>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let options = ExportOptions {
        format: params.format,
        filter: NotificationFilter {
            user_id: params.user,
            ..Default::default()
        },
        include_metadata: params.metadata,
        compress: params.compress,
        encrypt: params.encrypt,
    };
    let bytes = manager.export(&options).map_err(at("/export"))?;
    let content_type = if options.encrypt {
        "application/json"
    } else if options.compress {
        "application/gzip"
    } else {
        options.format.content_type()
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn import_notifications(
    State(manager): State<GuardedManager>,
    Query(options): Query<ImportOptions>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let report = manager.import(&body, &options).map_err(at("/import"))?;
    Ok(Json(report).into_response())
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        manager: Arc<NotificationManager>,
        scheduler: Option<Arc<Scheduler>>,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            manager,
            ws_connection_manager: Arc::new(ConnectionManager::new()),
            scheduler,
        }
    }
}

/// Build the router. Also subscribes the push channel to the manager's
/// deliveries.
pub fn make_app(state: ServerState) -> Router {
    state.manager.subscribe(
        Arc::new(PushCallback::new(state.ws_connection_manager.clone())),
        None,
    );

    let notification_routes: Router = Router::new()
        .route("/", post(create_notification))
        .route("/template", post(create_from_template))
        .route("/schedule", post(schedule_notification))
        .route("/schedule/{id}", delete(cancel_schedule))
        .route("/preferences/{user}", get(get_preferences).put(put_preferences))
        .route(
            "/{user}",
            get(get_user_notifications).delete(delete_notifications),
        )
        .route("/{user}/read", post(mark_read))
        .route("/{user}/read-all", post(mark_all_read))
        .route("/{user}/unread-count", get(unread_count))
        .with_state(state.clone());

    #[allow(unused_mut)]
    let mut app: Router = Router::new()
        .route("/", get(home))
        .route("/export", get(export_notifications))
        .route("/import", post(import_notifications))
        .route("/ws/{user}", get(ws_handler))
        .with_state(state.clone())
        .nest("/notifications", notification_routes)
        .route("/metrics", get(metrics::metrics_handler));

    #[cfg(feature = "slowdown")]
    {
        app = app.layer(middleware::from_fn(slowdown_request));
    }
    app.layer(middleware::from_fn_with_state(state.clone(), log_requests))
}

/// Serve until `shutdown_token` is cancelled.
pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await?;
    Ok(())
}

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use nimbus_shared::errors::{AppError, AppResult, ErrorCode};
use nimbus_shared::middleware::AdminUser;
use nimbus_shared::types::api::ApiResponse;
use nimbus_shared::types::auth::AuthUser;
use nimbus_shared::types::event::{payloads, routing_keys, Event};
use nimbus_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{Notification, NotificationType};
use crate::services::dispatch::{self, SendNotification};
use crate::services::notification_service;
use crate::services::store::DieselStore;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SendNotificationRequest {
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(min = 1, message = "body must not be empty"))]
    pub body: String,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub user_emails: Vec<String>,
    pub data: Option<serde_json::Value>,
    #[validate(url(message = "invalid image url"))]
    pub image: Option<String>,
    /// When true, publish the request to the queue instead of dispatching
    /// inline.
    #[serde(default)]
    pub queued: bool,
}

fn default_notification_type() -> String { "NORMAL".to_string() }

#[derive(Debug, Serialize)]
pub struct SendOutcome {
    pub outcome: String,
}

/// POST /notifications/send
/// Admin-only dispatch of a push notification to a set of users (or everyone
/// when no filters are given).
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<SendNotificationRequest>,
) -> AppResult<Json<ApiResponse<SendOutcome>>> {
    req.validate().map_err(|e| {
        AppError::with_details(ErrorCode::ValidationError, "invalid send request", serde_json::json!(e))
    })?;

    let notification_type: NotificationType = req.notification_type.parse()
        .map_err(|e: String| AppError::new(ErrorCode::ValidationError, e))?;

    if req.queued {
        let event = Event::new(
            "nimbus-notification",
            "notification.send.requested",
            payloads::SendNotificationRequested {
                notification_type: req.notification_type.clone(),
                title: req.title,
                body: req.body,
                user_ids: req.user_ids,
                user_emails: req.user_emails,
                data: req.data,
                image: req.image,
            },
        );

        state.rabbitmq
            .publish(routing_keys::NOTIFICATION_SEND_REQUESTED, &event)
            .await
            .map_err(|e| AppError::internal(format!("failed to publish send request: {e}")))?;

        return Ok(Json(ApiResponse::ok(SendOutcome {
            outcome: "Notification queued".to_string(),
        })));
    }

    let request = SendNotification {
        notification_type,
        title: req.title,
        body: req.body,
        user_ids: req.user_ids,
        user_emails: req.user_emails,
        data: req.data,
        image: req.image,
    };

    let mut conn = state.db.get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))?;
    let mut store = DieselStore::new(&mut conn);

    let outcome = dispatch::dispatch(&mut store, state.push.as_ref(), &request).await?;

    Ok(Json(ApiResponse::ok(SendOutcome {
        outcome: outcome.to_string(),
    })))
}

/// GET /notifications
/// List notifications for the authenticated user with pagination.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Notification>>>> {
    let limit = params.limit() as i64;
    let offset = params.offset() as i64;

    let (items, total) = notification_service::list_notifications(
        &state.db,
        auth_user.id,
        limit,
        offset,
    )?;

    let paginated = Paginated::new(items, total as u64, &params);
    Ok(Json(ApiResponse::ok(paginated)))
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::credit::{ApplyOutcome, CreditService, HistoryFilter};
use crate::app::notifications::{NotificationService, RecordEvent};
use crate::domain::credit::{
    CreditSummary, CreditTransaction, TransactionCategory, TransactionType,
};
use crate::domain::notification::{EntityRef, Notification, NotificationKind};
use crate::http::{AppError, InternalToken, UserId};
use crate::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;
const MAX_TITLE_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 2000;
const MAX_AGGREGATION_KEY_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_AMOUNT: i64 = 1_000_000;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn parse_page(page: Option<i64>, limit: Option<i64>) -> Result<(i64, i64), AppError> {
    let page = page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::bad_request("page must be at least 1"));
    }
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    Ok((page, limit))
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<OffsetDateTime>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    OffsetDateTime::parse(value, &Rfc3339)
        .map(Some)
        .map_err(|_| AppError::bad_request(format!("{} must be an RFC 3339 timestamp", field)))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

pub async fn metrics() -> Result<StatusCode, AppError> {
    Err(AppError::not_implemented("metrics not yet available"))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecordNotificationRequest {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub entity: Option<EntityRef>,
    pub aggregation_key: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Serialize)]
pub struct RecordNotificationResponse {
    pub notification: Notification,
    pub created: bool,
}

pub async fn record_notification(
    _token: InternalToken,
    State(state): State<AppState>,
    Json(payload): Json<RecordNotificationRequest>,
) -> Result<(StatusCode, Json<RecordNotificationResponse>), AppError> {
    if payload.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    if payload.title.len() > MAX_TITLE_LEN {
        return Err(AppError::bad_request("title must be at most 200 characters"));
    }
    if payload.message.trim().is_empty() {
        return Err(AppError::bad_request("message is required"));
    }
    if payload.message.len() > MAX_MESSAGE_LEN {
        return Err(AppError::bad_request(
            "message must be at most 2000 characters",
        ));
    }
    if let Some(key) = &payload.aggregation_key {
        if key.trim().is_empty() {
            return Err(AppError::bad_request("aggregation_key must not be empty"));
        }
        if key.len() > MAX_AGGREGATION_KEY_LEN {
            return Err(AppError::bad_request(
                "aggregation_key must be at most 255 characters",
            ));
        }
    }
    if let Some(entity) = &payload.entity {
        if entity.kind.trim().is_empty() || entity.id.trim().is_empty() {
            return Err(AppError::bad_request("entity type and id are required"));
        }
    }
    let metadata = payload.metadata.unwrap_or_else(|| Value::Object(Default::default()));
    if !metadata.is_object() {
        return Err(AppError::bad_request("metadata must be a JSON object"));
    }

    let user_id = payload.user_id;
    let service = NotificationService::new(
        state.db.clone(),
        state.cache.clone(),
        state.unread_count_ttl_seconds,
    );
    let (notification, created) = service
        .record_event(RecordEvent {
            user_id,
            kind: payload.kind,
            title: payload.title,
            message: payload.message,
            entity: payload.entity,
            aggregation_key: payload.aggregation_key,
            metadata,
        })
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user_id, "failed to record notification");
            AppError::internal("failed to record notification")
        })?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RecordNotificationResponse {
            notification,
            created,
        }),
    ))
}

#[derive(Deserialize)]
pub struct NotificationListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub unread_only: Option<bool>,
}

pub async fn list_notifications(
    user: UserId,
    State(state): State<AppState>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<PageResponse<Notification>>, AppError> {
    let (page, limit) = parse_page(query.page, query.limit)?;
    let unread_only = query.unread_only.unwrap_or(false);

    let service = NotificationService::new(
        state.db.clone(),
        state.cache.clone(),
        state.unread_count_ttl_seconds,
    );
    let (items, total) = service
        .list(user.0, page, limit, unread_only)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user.0, "failed to list notifications");
            AppError::internal("failed to list notifications")
        })?;

    Ok(Json(PageResponse {
        items,
        total,
        page,
        limit,
    }))
}

pub async fn mark_notification_read(
    user: UserId,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = NotificationService::new(
        state.db.clone(),
        state.cache.clone(),
        state.unread_count_ttl_seconds,
    );
    let updated = service.mark_read(id, user.0).await.map_err(|err| {
        tracing::error!(error = ?err, notification_id = %id, user_id = %user.0, "failed to mark notification read");
        AppError::internal("failed to mark notification read")
    })?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("notification not found"))
    }
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

pub async fn mark_all_notifications_read(
    user: UserId,
    State(state): State<AppState>,
) -> Result<Json<MarkAllReadResponse>, AppError> {
    let service = NotificationService::new(
        state.db.clone(),
        state.cache.clone(),
        state.unread_count_ttl_seconds,
    );
    let updated = service.mark_all_read(user.0).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %user.0, "failed to mark notifications read");
        AppError::internal("failed to mark notifications read")
    })?;

    Ok(Json(MarkAllReadResponse { updated }))
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

pub async fn unread_count(
    user: UserId,
    State(state): State<AppState>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let service = NotificationService::new(
        state.db.clone(),
        state.cache.clone(),
        state.unread_count_ttl_seconds,
    );
    let count = service.unread_count(user.0).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %user.0, "failed to fetch unread count");
        AppError::internal("failed to fetch unread count")
    })?;

    Ok(Json(UnreadCountResponse { count }))
}

// ---------------------------------------------------------------------------
// Credit ledger
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApplyTransactionRequest {
    pub actor_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct ApplyTransactionResponse {
    pub transaction: CreditTransaction,
    pub balance: i64,
}

pub async fn apply_credit_transaction(
    _token: InternalToken,
    State(state): State<AppState>,
    Json(payload): Json<ApplyTransactionRequest>,
) -> Result<(StatusCode, Json<ApplyTransactionResponse>), AppError> {
    if payload.amount == 0 {
        return Err(AppError::bad_request("amount must not be zero"));
    }
    if payload.amount.abs() > MAX_AMOUNT {
        return Err(AppError::bad_request("amount exceeds the allowed maximum"));
    }
    match payload.transaction_type {
        TransactionType::Deposit if payload.amount < 0 => {
            return Err(AppError::bad_request("deposit amount must be positive"));
        }
        TransactionType::Usage if payload.amount > 0 => {
            return Err(AppError::bad_request("usage amount must be negative"));
        }
        _ => {}
    }
    let description = payload.description.unwrap_or_default();
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(AppError::bad_request(
            "description must be at most 500 characters",
        ));
    }

    let actor_id = payload.actor_id;
    let service = CreditService::new(state.db.clone());
    let outcome = service
        .apply_transaction(
            actor_id,
            payload.transaction_type,
            payload.category,
            payload.amount,
            description,
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, actor_id = %actor_id, "failed to apply credit transaction");
            AppError::internal("failed to apply credit transaction")
        })?;

    match outcome {
        ApplyOutcome::Applied {
            transaction,
            balance,
        } => Ok((
            StatusCode::CREATED,
            Json(ApplyTransactionResponse {
                transaction,
                balance,
            }),
        )),
        ApplyOutcome::InsufficientBalance { .. } => {
            Err(AppError::payment_required("insufficient balance"))
        }
    }
}

#[derive(Deserialize)]
pub struct CreditHistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub category: Option<TransactionCategory>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn credit_history(
    user: UserId,
    State(state): State<AppState>,
    Query(query): Query<CreditHistoryQuery>,
) -> Result<Json<PageResponse<CreditTransaction>>, AppError> {
    let (page, limit) = parse_page(query.page, query.limit)?;
    let start = parse_date(query.start_date.as_deref(), "start_date")?;
    let end = parse_date(query.end_date.as_deref(), "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::bad_request("start_date must not be after end_date"));
        }
    }

    let filter = HistoryFilter {
        transaction_type: query.transaction_type,
        category: query.category,
        start,
        end,
    };

    let service = CreditService::new(state.db.clone());
    let (items, total) = service
        .history(user.0, &filter, page, limit)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, actor_id = %user.0, "failed to fetch credit history");
            AppError::internal("failed to fetch credit history")
        })?;

    Ok(Json(PageResponse {
        items,
        total,
        page,
        limit,
    }))
}

#[derive(Deserialize)]
pub struct CreditSummaryQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn credit_summary(
    user: UserId,
    State(state): State<AppState>,
    Query(query): Query<CreditSummaryQuery>,
) -> Result<Json<CreditSummary>, AppError> {
    let start = parse_date(query.start_date.as_deref(), "start_date")?;
    let end = parse_date(query.end_date.as_deref(), "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::bad_request("start_date must not be after end_date"));
        }
    }

    let service = CreditService::new(state.db.clone());
    let summary = service.summary(user.0, start, end).await.map_err(|err| {
        tracing::error!(error = ?err, actor_id = %user.0, "failed to fetch credit summary");
        AppError::internal("failed to fetch credit summary")
    })?;

    Ok(Json(summary))
}

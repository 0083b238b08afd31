use axum::{routing::get, routing::patch, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(handlers::record_notification))
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/read-all",
            patch(handlers::mark_all_notifications_read),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::unread_count),
        )
        .route(
            "/notifications/:id/read",
            patch(handlers::mark_notification_read),
        )
}

pub fn credit() -> Router<AppState> {
    Router::new()
        .route(
            "/credit/transactions",
            post(handlers::apply_credit_transaction),
        )
        .route("/credit/history", get(handlers::credit_history))
        .route("/credit/summary", get(handlers::credit_summary))
}

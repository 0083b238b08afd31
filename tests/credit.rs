//! Credit Ledger Tests
//!
//! Covers the balance invariants, insufficient-balance rejection, history
//! filtering, summaries, and concurrent writers.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use careerzone::app::credit::ApplyOutcome;
use careerzone::domain::credit::{TransactionCategory, TransactionType};

fn usage_body(actor: Uuid, amount: i64, category: &str) -> serde_json::Value {
    json!({
        "actor_id": actor.to_string(),
        "type": "usage",
        "category": category,
        "amount": amount,
    })
}

// ===========================================================================
// Applying transactions
// ===========================================================================

#[tokio::test]
async fn deposit_then_usage() {
    let app = app().await;
    let actor = Uuid::new_v4();

    let resp = app
        .post_internal(
            "/credit/transactions",
            json!({
                "actor_id": actor.to_string(),
                "type": "deposit",
                "category": "recharge",
                "amount": 500,
                "description": "card recharge",
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let body = resp.json();
    assert_eq!(body["balance"].as_i64(), Some(500));
    assert_eq!(body["transaction"]["balance_after"].as_i64(), Some(500));
    assert_eq!(body["transaction"]["type"].as_str().unwrap(), "deposit");

    let resp = app
        .post_internal("/credit/transactions", usage_body(actor, -50, "job_view"))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["balance"].as_i64(), Some(450));

    // History: two transactions, newest first.
    let resp = app.get_as("/credit/history", actor).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["total"].as_i64(), Some(2));
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["amount"].as_i64(), Some(-50));
    assert_eq!(items[0]["balance_after"].as_i64(), Some(450));
    assert_eq!(items[1]["amount"].as_i64(), Some(500));
    assert_eq!(items[1]["balance_after"].as_i64(), Some(500));

    // Summary totals and per-category breakdown.
    let resp = app.get_as("/credit/summary", actor).await;
    let body = resp.json();
    assert_eq!(body["current_balance"].as_i64(), Some(450));
    assert_eq!(body["total_deposits"].as_i64(), Some(500));
    assert_eq!(body["total_usage"].as_i64(), Some(50));
    let by_category = body["by_category"].as_array().unwrap();
    assert_eq!(by_category.len(), 2);
    let job_view = by_category
        .iter()
        .find(|entry| entry["category"] == "job_view")
        .expect("job_view missing");
    assert_eq!(job_view["count"].as_i64(), Some(1));
    assert_eq!(job_view["total_amount"].as_i64(), Some(-50));
}

#[tokio::test]
async fn insufficient_balance_is_rejected_without_side_effects() {
    let app = app().await;
    let actor = Uuid::new_v4();
    app.deposit(actor, 100).await;

    let resp = app
        .post_internal("/credit/transactions", usage_body(actor, -150, "cv_unlock"))
        .await;
    assert_eq!(resp.status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(resp.error_message(), "insufficient balance");

    // Balance untouched, nothing recorded.
    let resp = app.get_as("/credit/summary", actor).await;
    assert_eq!(resp.json()["current_balance"].as_i64(), Some(100));
    let resp = app.get_as("/credit/history", actor).await;
    assert_eq!(resp.json()["total"].as_i64(), Some(1));
}

#[tokio::test]
async fn usage_from_empty_account_is_rejected() {
    let app = app().await;
    let actor = Uuid::new_v4();

    let resp = app
        .post_internal("/credit/transactions", usage_body(actor, -1, "job_view"))
        .await;
    assert_eq!(resp.status, StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn rejects_mismatched_amounts() {
    let app = app().await;
    let actor = Uuid::new_v4();

    let resp = app
        .post_internal(
            "/credit/transactions",
            json!({
                "actor_id": actor.to_string(),
                "type": "deposit",
                "category": "recharge",
                "amount": -500,
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "deposit amount must be positive");

    let resp = app
        .post_internal("/credit/transactions", usage_body(actor, 50, "job_view"))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "usage amount must be negative");

    let resp = app
        .post_internal(
            "/credit/transactions",
            json!({
                "actor_id": actor.to_string(),
                "type": "deposit",
                "category": "recharge",
                "amount": 0,
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .post_internal(
            "/credit/transactions",
            json!({
                "actor_id": actor.to_string(),
                "type": "deposit",
                "category": "recharge",
                "amount": 2_000_000,
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    // Unknown category is rejected at deserialization.
    let resp = app
        .post_internal(
            "/credit/transactions",
            json!({
                "actor_id": actor.to_string(),
                "type": "deposit",
                "category": "lottery",
                "amount": 10,
            }),
        )
        .await;
    assert!(resp.status.is_client_error());

    // None of the rejected requests touched the ledger.
    let resp = app.get_as("/credit/history", actor).await;
    assert_eq!(resp.json()["total"].as_i64(), Some(0));
}

#[tokio::test]
async fn apply_requires_internal_token() {
    let app = app().await;
    let body = usage_body(Uuid::new_v4(), -10, "job_view");

    let resp = app
        .post_internal_with("/credit/transactions", body.clone(), None)
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app
        .post_internal_with("/credit/transactions", body, Some("wrong-token"))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

// ===========================================================================
// History & summary
// ===========================================================================

#[tokio::test]
async fn history_filters_by_type_category_and_date() {
    let app = app().await;
    let actor = Uuid::new_v4();
    app.deposit(actor, 500).await;
    app.post_internal("/credit/transactions", usage_body(actor, -50, "job_view"))
        .await;
    app.post_internal("/credit/transactions", usage_body(actor, -100, "cv_unlock"))
        .await;

    let resp = app.get_as("/credit/history?type=usage", actor).await;
    assert_eq!(resp.json()["total"].as_i64(), Some(2));

    let resp = app.get_as("/credit/history?type=deposit", actor).await;
    assert_eq!(resp.json()["total"].as_i64(), Some(1));

    let resp = app
        .get_as("/credit/history?category=cv_unlock", actor)
        .await;
    let body = resp.json();
    assert_eq!(body["total"].as_i64(), Some(1));
    assert_eq!(body["items"][0]["amount"].as_i64(), Some(-100));

    // Everything happened after 2000; nothing before it.
    let resp = app
        .get_as("/credit/history?start_date=2000-01-01T00:00:00Z", actor)
        .await;
    assert_eq!(resp.json()["total"].as_i64(), Some(3));

    let resp = app
        .get_as("/credit/history?end_date=2000-01-01T00:00:00Z", actor)
        .await;
    assert_eq!(resp.json()["total"].as_i64(), Some(0));

    let resp = app
        .get_as("/credit/history?start_date=yesterday", actor)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app
        .get_as(
            "/credit/history?start_date=2024-01-02T00:00:00Z&end_date=2024-01-01T00:00:00Z",
            actor,
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_paginates() {
    let app = app().await;
    let actor = Uuid::new_v4();
    app.deposit(actor, 300).await;
    app.post_internal("/credit/transactions", usage_body(actor, -10, "job_view"))
        .await;
    app.post_internal("/credit/transactions", usage_body(actor, -20, "job_view"))
        .await;

    let resp = app.get_as("/credit/history?page=1&limit=2", actor).await;
    let body = resp.json();
    assert_eq!(body["total"].as_i64(), Some(3));
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let resp = app.get_as("/credit/history?page=2&limit=2", actor).await;
    assert_eq!(resp.json()["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn summary_for_unknown_actor_is_empty() {
    let app = app().await;
    let actor = Uuid::new_v4();

    let resp = app.get_as("/credit/summary", actor).await;
    let body = resp.json();
    assert_eq!(body["current_balance"].as_i64(), Some(0));
    assert_eq!(body["total_deposits"].as_i64(), Some(0));
    assert_eq!(body["total_usage"].as_i64(), Some(0));
    assert_eq!(body["by_category"].as_array().unwrap().len(), 0);
}

// ===========================================================================
// Ledger invariants
// ===========================================================================

#[tokio::test]
async fn balance_chain_is_consistent() {
    let app = app().await;
    let actor = Uuid::new_v4();

    app.deposit(actor, 200).await;
    app.post_internal("/credit/transactions", usage_body(actor, -30, "job_view"))
        .await;
    app.deposit(actor, 50).await;
    app.post_internal("/credit/transactions", usage_body(actor, -120, "job_post"))
        .await;

    let resp = app.get_as("/credit/history?limit=100", actor).await;
    let body = resp.json();
    let mut items = body["items"].as_array().unwrap().clone();
    items.reverse(); // oldest first

    let mut running = 0i64;
    for item in &items {
        running += item["amount"].as_i64().unwrap();
        assert_eq!(item["balance_after"].as_i64().unwrap(), running);
        assert!(running >= 0);
    }

    let resp = app.get_as("/credit/summary", actor).await;
    assert_eq!(resp.json()["current_balance"].as_i64(), Some(running));
}

#[tokio::test]
async fn concurrent_usage_has_no_lost_updates() {
    let app = app().await;
    let actor = Uuid::new_v4();
    app.deposit(actor, 100).await;

    let service = app.credit_service();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .apply_transaction(
                    actor,
                    TransactionType::Usage,
                    TransactionCategory::JobView,
                    -10,
                    String::new(),
                )
                .await
        }));
    }

    let mut balances = HashSet::new();
    for result in futures::future::join_all(handles).await {
        match result.expect("task panicked").expect("apply failed") {
            ApplyOutcome::Applied { transaction, .. } => {
                balances.insert(transaction.balance_after);
            }
            ApplyOutcome::InsufficientBalance { .. } => {
                panic!("balance covered all ten usages");
            }
        }
    }

    // Every writer saw a distinct prior balance: 90, 80, ..., 0.
    assert_eq!(balances.len(), 10);
    assert!(balances.contains(&0));

    let resp = app.get_as("/credit/summary", actor).await;
    assert_eq!(resp.json()["current_balance"].as_i64(), Some(0));
}

#[tokio::test]
async fn concurrent_overspend_cannot_double_charge() {
    let app = app().await;
    let actor = Uuid::new_v4();
    app.deposit(actor, 10).await;

    let service = app.credit_service();
    let spend = |service: careerzone::app::credit::CreditService| async move {
        service
            .apply_transaction(
                actor,
                TransactionType::Usage,
                TransactionCategory::CvUnlock,
                -10,
                String::new(),
            )
            .await
    };

    let (a, b) = tokio::join!(spend(service.clone()), spend(service.clone()));
    let outcomes = [a.expect("apply failed"), b.expect("apply failed")];

    let applied = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, ApplyOutcome::Applied { .. }))
        .count();
    assert_eq!(applied, 1, "only one of two overlapping spends may win");

    let resp = app.get_as("/credit/summary", actor).await;
    assert_eq!(resp.json()["current_balance"].as_i64(), Some(0));
    let resp = app.get_as("/credit/history", actor).await;
    assert_eq!(resp.json()["total"].as_i64(), Some(2));
}

use anyhow::{anyhow, Result};
use rand::Rng;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::credit::{
    CategoryBreakdown, CreditSummary, CreditTransaction, TransactionCategory, TransactionType,
};
use crate::infra::db::Db;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_BACKOFF_MS: u64 = 20;

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied {
        transaction: CreditTransaction,
        balance: i64,
    },
    /// The usage would have taken the balance below zero. Nothing was
    /// recorded; `balance` is the untouched current balance.
    InsufficientBalance { balance: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub transaction_type: Option<TransactionType>,
    pub category: Option<TransactionCategory>,
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct CreditService {
    db: Db,
}

impl CreditService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append one transaction to the actor's ledger and move the cached
    /// balance, as a single all-or-nothing unit. The account row is locked
    /// for the duration, so two writers for the same actor serialize and can
    /// never derive the same balance_after from the same prior balance.
    /// Writers for different actors do not contend.
    ///
    /// Callers must pass an amount whose sign matches the type (deposit > 0,
    /// usage < 0); violations are programmer errors and fail the request.
    pub async fn apply_transaction(
        &self,
        actor_id: Uuid,
        transaction_type: TransactionType,
        category: TransactionCategory,
        amount: i64,
        description: String,
    ) -> Result<ApplyOutcome> {
        match transaction_type {
            TransactionType::Deposit if amount <= 0 => {
                return Err(anyhow!("deposit amount must be positive"));
            }
            TransactionType::Usage if amount >= 0 => {
                return Err(anyhow!("usage amount must be negative"));
            }
            _ => {}
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_apply(actor_id, transaction_type, category, amount, &description)
                .await
            {
                Err(err) if attempt < MAX_ATTEMPTS && is_retryable(&err) => {
                    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_BACKOFF_MS);
                    let backoff = RETRY_BASE_BACKOFF_MS * u64::from(attempt) + jitter;
                    tracing::warn!(
                        error = ?err,
                        actor_id = %actor_id,
                        attempt,
                        "transaction conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_apply(
        &self,
        actor_id: Uuid,
        transaction_type: TransactionType,
        category: TransactionCategory,
        amount: i64,
        description: &str,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "INSERT INTO credit_accounts (actor_id) VALUES ($1) \
             ON CONFLICT (actor_id) DO NOTHING",
        )
        .bind(actor_id)
        .execute(&mut *tx)
        .await?;

        let balance: i64 =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE actor_id = $1 FOR UPDATE")
                .bind(actor_id)
                .fetch_one(&mut *tx)
                .await?;

        let new_balance = balance + amount;
        if new_balance < 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::InsufficientBalance { balance });
        }

        let row = sqlx::query(
            "INSERT INTO credit_transactions \
               (actor_id, transaction_type, category, amount, balance_after, description) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, created_at",
        )
        .bind(actor_id)
        .bind(transaction_type.as_str())
        .bind(category.as_str())
        .bind(amount)
        .bind(new_balance)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE credit_accounts SET balance = $1, updated_at = now() WHERE actor_id = $2")
            .bind(new_balance)
            .bind(actor_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let transaction = CreditTransaction {
            id: row.get("id"),
            actor_id,
            transaction_type,
            category,
            amount,
            balance_after: new_balance,
            description: description.to_string(),
            created_at: row.get("created_at"),
        };

        tracing::info!(
            actor_id = %actor_id,
            transaction_id = %transaction.id,
            transaction_type = transaction_type.as_str(),
            category = category.as_str(),
            amount,
            balance = new_balance,
            "credit transaction applied"
        );

        Ok(ApplyOutcome::Applied {
            transaction,
            balance: new_balance,
        })
    }

    pub async fn history(
        &self,
        actor_id: Uuid,
        filter: &HistoryFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<CreditTransaction>, i64)> {
        let offset = (page - 1) * limit;
        let transaction_type = filter.transaction_type.map(TransactionType::as_str);
        let category = filter.category.map(TransactionCategory::as_str);

        let rows = sqlx::query(
            "SELECT id, actor_id, transaction_type, category, amount, balance_after, \
                    description, created_at \
             FROM credit_transactions \
             WHERE actor_id = $1 \
               AND ($2::text IS NULL OR transaction_type = $2) \
               AND ($3::text IS NULL OR category = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $6 OFFSET $7",
        )
        .bind(actor_id)
        .bind(transaction_type)
        .bind(category)
        .bind(filter.start)
        .bind(filter.end)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credit_transactions \
             WHERE actor_id = $1 \
               AND ($2::text IS NULL OR transaction_type = $2) \
               AND ($3::text IS NULL OR category = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5)",
        )
        .bind(actor_id)
        .bind(transaction_type)
        .bind(category)
        .bind(filter.start)
        .bind(filter.end)
        .fetch_one(self.db.pool())
        .await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            transactions.push(transaction_from_row(&row)?);
        }

        Ok((transactions, total))
    }

    /// Aggregate totals and per-category breakdown, optionally date-scoped.
    /// current_balance is the live account balance and ignores the range.
    pub async fn summary(
        &self,
        actor_id: Uuid,
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Result<CreditSummary> {
        let current_balance: i64 =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE actor_id = $1")
                .bind(actor_id)
                .fetch_optional(self.db.pool())
                .await?
                .unwrap_or(0);

        let totals = sqlx::query(
            "SELECT \
               COALESCE(SUM(amount) FILTER (WHERE transaction_type = 'deposit'), 0)::bigint \
                 AS total_deposits, \
               COALESCE(-SUM(amount) FILTER (WHERE transaction_type = 'usage'), 0)::bigint \
                 AS total_usage \
             FROM credit_transactions \
             WHERE actor_id = $1 \
               AND ($2::timestamptz IS NULL OR created_at >= $2) \
               AND ($3::timestamptz IS NULL OR created_at <= $3)",
        )
        .bind(actor_id)
        .bind(start)
        .bind(end)
        .fetch_one(self.db.pool())
        .await?;

        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS count, SUM(amount)::bigint AS total_amount \
             FROM credit_transactions \
             WHERE actor_id = $1 \
               AND ($2::timestamptz IS NULL OR created_at >= $2) \
               AND ($3::timestamptz IS NULL OR created_at <= $3) \
             GROUP BY category \
             ORDER BY category",
        )
        .bind(actor_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.db.pool())
        .await?;

        let mut by_category = Vec::with_capacity(rows.len());
        for row in rows {
            let category: String = row.get("category");
            by_category.push(CategoryBreakdown {
                category: category.parse()?,
                count: row.get("count"),
                total_amount: row.get("total_amount"),
            });
        }

        Ok(CreditSummary {
            current_balance,
            total_deposits: totals.get("total_deposits"),
            total_usage: totals.get("total_usage"),
            by_category,
        })
    }
}

/// Serialization failures and deadlocks are safe to retry: the transaction
/// rolled back without applying.
fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(sqlx::Error::Database(db_err)) = err.downcast_ref::<sqlx::Error>() {
        if let Some(code) = db_err.code() {
            return code == "40001" || code == "40P01";
        }
    }
    false
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let transaction_type: String = row.get("transaction_type");
    let category: String = row.get("category");

    Ok(CreditTransaction {
        id: row.get("id"),
        actor_id: row.get("actor_id"),
        transaction_type: transaction_type.parse()?,
        category: category.parse()?,
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

use anyhow::Result;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::notification::{EntityRef, Notification, NotificationKind};
use crate::infra::{cache::RedisCache, db::Db};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, message, entity_type, entity_id, \
     aggregation_key, metadata, is_read, read_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub entity: Option<EntityRef>,
    pub aggregation_key: Option<String>,
    pub metadata: Value,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
    cache: RedisCache,
    unread_ttl_seconds: u64,
}

impl NotificationService {
    pub fn new(db: Db, cache: RedisCache, unread_ttl_seconds: u64) -> Self {
        Self {
            db,
            cache,
            unread_ttl_seconds,
        }
    }

    /// Record an application event as a notification. Returns the stored
    /// notification and whether a new row was created (`false` means an
    /// existing rollup was updated in place).
    ///
    /// With an aggregation key, the insert lands on the partial unique index
    /// over (user_id, notification_type, aggregation_key); a concurrent
    /// writer for the same key loses the insert and takes the update arm of
    /// the same statement, so callers never see a duplicate-key error.
    /// The rollup update overwrites title/message/entity, merges the incoming
    /// metadata bag, and sets metadata.count to the previous count plus one.
    pub async fn record_event(&self, params: RecordEvent) -> Result<(Notification, bool)> {
        let mut metadata = params.metadata;
        if params.aggregation_key.is_some() {
            // First insert of a rollup starts the counter unless the caller
            // already supplied one.
            if let Value::Object(map) = &mut metadata {
                map.entry("count").or_insert_with(|| Value::from(1));
            }
        }

        let (entity_type, entity_id) = match &params.entity {
            Some(entity) => (Some(entity.kind.clone()), Some(entity.id.clone())),
            None => (None, None),
        };

        let (row, created) = match &params.aggregation_key {
            Some(aggregation_key) => {
                // xmax = 0 is true only for a fresh INSERT (not an ON CONFLICT UPDATE).
                let row = sqlx::query(&format!(
                    "INSERT INTO notifications \
                       (user_id, notification_type, title, message, entity_type, entity_id, \
                        aggregation_key, metadata) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (user_id, notification_type, aggregation_key) \
                       WHERE aggregation_key IS NOT NULL \
                     DO UPDATE SET \
                       title = EXCLUDED.title, \
                       message = EXCLUDED.message, \
                       entity_type = EXCLUDED.entity_type, \
                       entity_id = EXCLUDED.entity_id, \
                       metadata = notifications.metadata || EXCLUDED.metadata \
                         || jsonb_build_object('count', \
                              COALESCE((notifications.metadata->>'count')::bigint, 1) + 1), \
                       updated_at = now() \
                     RETURNING {NOTIFICATION_COLUMNS}, (xmax = 0) AS created",
                ))
                .bind(params.user_id)
                .bind(params.kind.as_str())
                .bind(&params.title)
                .bind(&params.message)
                .bind(&entity_type)
                .bind(&entity_id)
                .bind(aggregation_key)
                .bind(&metadata)
                .fetch_one(self.db.pool())
                .await?;

                let created: bool = row.get("created");
                (row, created)
            }
            None => {
                let row = sqlx::query(&format!(
                    "INSERT INTO notifications \
                       (user_id, notification_type, title, message, entity_type, entity_id, metadata) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING {NOTIFICATION_COLUMNS}",
                ))
                .bind(params.user_id)
                .bind(params.kind.as_str())
                .bind(&params.title)
                .bind(&params.message)
                .bind(&entity_type)
                .bind(&entity_id)
                .bind(&metadata)
                .fetch_one(self.db.pool())
                .await?;

                (row, true)
            }
        };

        if created {
            self.invalidate_unread_count(params.user_id).await;
        }

        Ok((notification_from_row(&row)?, created))
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<(Vec<Notification>, i64)> {
        let offset = (page - 1) * limit;

        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} \
             FROM notifications \
             WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4",
        ))
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications \
             WHERE user_id = $1 AND (NOT $2 OR is_read = FALSE)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(self.db.pool())
        .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            notifications.push(notification_from_row(&row)?);
        }

        Ok((notifications, total))
    }

    /// Mark one notification read. Idempotent: re-marking an already-read
    /// notification succeeds and keeps the original read_at. Returns false
    /// when the notification does not exist or belongs to another user.
    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET is_read = TRUE, read_at = COALESCE(read_at, now()) \
             WHERE id = $1 AND user_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            self.invalidate_unread_count(user_id).await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Mark every unread notification read. Returns the number affected.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET is_read = TRUE, read_at = now() \
             WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        self.invalidate_unread_count(user_id).await;
        Ok(result.rows_affected())
    }

    /// Unread count, served from Redis when fresh. The cache is best-effort:
    /// failures fall back to the database and are only logged.
    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let key = unread_key(user_id);

        match self.cache.get_counter(&key).await {
            Ok(Some(count)) => return Ok(count),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = ?err, user_id = %user_id, "unread count cache read failed");
            }
        }

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        if let Err(err) = self
            .cache
            .put_counter(&key, count, self.unread_ttl_seconds)
            .await
        {
            tracing::warn!(error = ?err, user_id = %user_id, "unread count cache write failed");
        }

        Ok(count)
    }

    async fn invalidate_unread_count(&self, user_id: Uuid) {
        if let Err(err) = self.cache.delete(&unread_key(user_id)).await {
            tracing::warn!(error = ?err, user_id = %user_id, "unread count cache invalidation failed");
        }
    }
}

fn unread_key(user_id: Uuid) -> String {
    format!("notifications:unread:{}", user_id)
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let notification_type: String = row.get("notification_type");
    let entity_type: Option<String> = row.get("entity_type");
    let entity_id: Option<String> = row.get("entity_id");
    let entity = match (entity_type, entity_id) {
        (Some(entity_kind), Some(id)) => Some(EntityRef {
            kind: entity_kind,
            id,
        }),
        _ => None,
    };

    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: notification_type.parse()?,
        title: row.get("title"),
        message: row.get("message"),
        entity,
        aggregation_key: row.get("aggregation_key"),
        metadata: row.get("metadata"),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

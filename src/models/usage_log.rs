// src/models/usage_log.rs

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, prelude::FromRow};

use crate::error::AppError;

/// Activity types tracked by the quota ledger.
pub const ACTIVITY_TEST: &str = "test";
pub const ACTIVITY_AGENT: &str = "agent";

/// Represents the 'usage_logs' table: one row per (user, activity, month),
/// created lazily on first use and incremented atomically thereafter.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub activity: String,
    /// Calendar-month key, 'YYYY-MM'.
    pub month: String,
    pub count: i64,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Calendar-month key for the quota ledger.
pub fn month_key(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Current usage count for a (user, activity, month); 0 if no row exists yet.
pub async fn current_count(
    pool: &PgPool,
    user_id: i64,
    activity: &str,
    month: &str,
) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT count FROM usage_logs WHERE user_id = $1 AND type = $2 AND month = $3",
    )
    .bind(user_id)
    .bind(activity)
    .bind(month)
    .fetch_optional(pool)
    .await?;

    Ok(count.unwrap_or(0))
}

/// Atomically increments the ledger, but only while under `limit`.
///
/// A single upsert closes the check-then-increment race: the fresh-insert arm
/// records the first use of the month, the conflict arm increments only while
/// the stored count is still below the limit. Returns false when the limit
/// would be exceeded. `limit = None` means unbounded.
///
/// Increments by exactly 1 per call; callers run it inside the transaction
/// for the event being charged so a rollback releases the charge.
pub async fn try_increment(
    conn: &mut PgConnection,
    user_id: i64,
    activity: &str,
    month: &str,
    limit: Option<i64>,
) -> Result<bool, AppError> {
    let Some(limit) = limit else {
        sqlx::query(
            r#"
            INSERT INTO usage_logs (user_id, type, month, count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (user_id, type, month)
            DO UPDATE SET count = usage_logs.count + 1
            "#,
        )
        .bind(user_id)
        .bind(activity)
        .bind(month)
        .execute(conn)
        .await?;
        return Ok(true);
    };

    if limit <= 0 {
        return Ok(false);
    }

    let updated = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO usage_logs (user_id, type, month, count)
        VALUES ($1, $2, $3, 1)
        ON CONFLICT (user_id, type, month)
        DO UPDATE SET count = usage_logs.count + 1
        WHERE usage_logs.count < $4
        RETURNING count
        "#,
    )
    .bind(user_id)
    .bind(activity)
    .bind(month)
    .bind(limit)
    .fetch_optional(conn)
    .await?;

    Ok(updated.is_some())
}

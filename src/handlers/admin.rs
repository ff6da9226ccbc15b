// src/handlers/admin.rs

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::AppError,
    models::{test::TagStat, user::User},
};

/// Lists all users in the system.
/// Admin only.
pub async fn list_users(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id DESC")
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list users: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(users))
}

/// DTO for admin user updates. All fields optional.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(length(min = 3, max = 100))]
    pub full_name: Option<String>,
    #[validate(length(min = 3, max = 50))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub role: Option<String>,
    pub subscription_plan: Option<String>,
    pub is_active: Option<bool>,
}

/// Updates any user's profile fields.
/// Admin only.
pub async fn update_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET full_name = COALESCE($2, full_name),
            username = COALESCE($3, username),
            email = COALESCE($4, email),
            role = COALESCE($5, role),
            subscription_plan = COALESCE($6, subscription_plan),
            is_active = COALESCE($7, is_active),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&payload.full_name)
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&payload.role)
    .bind(&payload.subscription_plan)
    .bind(payload.is_active)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

/// Deletes a user.
/// Admin only.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = sqlx::query_scalar::<_, i64>("DELETE FROM users WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(&pool)
        .await?;

    if deleted.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": "User deleted" })))
}

/// Deletes any question regardless of owner.
/// Admin only.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = sqlx::query_scalar::<_, i64>("DELETE FROM questions WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(&pool)
        .await?;

    if deleted.is_none() {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": "Question deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: String,
}

/// Changes a user's subscription plan.
/// Admin only.
pub async fn update_user_plan(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !matches!(payload.plan.as_str(), "free" | "pro" | "premium") {
        return Err(AppError::BadRequest("Invalid plan".to_string()));
    }

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET subscription_plan = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&payload.plan)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

/// Activates or deactivates a user account.
/// Admin only.
pub async fn set_user_active(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(payload.is_active)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

/// Per-tag tally in the global analytics rollup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GlobalStat {
    pub correct: i64,
    pub total: i64,
}

/// Platform-wide analytics: entity counts, summed test scalars, and the merge
/// of every test's per-tag breakdowns.
/// Admin only.
pub async fn get_analytics(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let total_users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await?;
    let total_questions = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM questions")
        .fetch_one(&pool)
        .await?;
    let total_tests = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tests")
        .fetch_one(&pool)
        .await?;

    let (correct, incorrect, flagged) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT COALESCE(SUM(correct), 0)::BIGINT,
               COALESCE(SUM(incorrect), 0)::BIGINT,
               COALESCE(SUM(flagged), 0)::BIGINT
        FROM tests
        "#,
    )
    .fetch_one(&pool)
    .await?;

    type BreakdownRow = (SqlJson<Vec<TagStat>>, SqlJson<Vec<TagStat>>, SqlJson<Vec<TagStat>>);
    let breakdowns = sqlx::query_as::<_, BreakdownRow>(
        "SELECT by_category, by_subject, by_topic FROM tests",
    )
    .fetch_all(&pool)
    .await?;

    let mut by_category: BTreeMap<String, GlobalStat> = BTreeMap::new();
    let mut by_subject: BTreeMap<String, GlobalStat> = BTreeMap::new();
    let mut by_topic: BTreeMap<String, GlobalStat> = BTreeMap::new();

    for (categories, subjects, topics) in &breakdowns {
        merge_tag_stats(&mut by_category, &categories.0);
        merge_tag_stats(&mut by_subject, &subjects.0);
        merge_tag_stats(&mut by_topic, &topics.0);
    }

    Ok(Json(serde_json::json!({
        "total_users": total_users,
        "total_questions": total_questions,
        "total_tests": total_tests,
        "test_stats": {
            "correct": correct,
            "incorrect": incorrect,
            "flagged": flagged,
        },
        "by_category": by_category,
        "by_subject": by_subject,
        "by_topic": by_topic,
    })))
}

fn merge_tag_stats(acc: &mut BTreeMap<String, GlobalStat>, stats: &[TagStat]) {
    for stat in stats {
        let entry = acc.entry(stat.name.clone()).or_default();
        entry.correct += stat.correct;
        entry.total += stat.total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, correct: i64, total: i64) -> TagStat {
        TagStat {
            name: name.to_string(),
            correct,
            total,
        }
    }

    #[test]
    fn merge_accumulates_across_tests() {
        let mut acc = BTreeMap::new();
        merge_tag_stats(&mut acc, &[stat("cardio", 2, 3), stat("neuro", 0, 1)]);
        merge_tag_stats(&mut acc, &[stat("cardio", 1, 2)]);

        assert_eq!(acc["cardio"].correct, 3);
        assert_eq!(acc["cardio"].total, 5);
        assert_eq!(acc["neuro"].correct, 0);
        assert_eq!(acc["neuro"].total, 1);
    }
}

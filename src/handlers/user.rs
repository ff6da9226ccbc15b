// src/handlers/user.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        usage_log,
        user::{UpdateProfileRequest, User},
    },
    utils::jwt::Claims,
};

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: User,
    /// Tests assembled in the current calendar month, against the plan quota.
    pub monthly_test_count: i64,
}

/// Returns the caller's own profile with their current-month usage.
pub async fn get_profile(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    let month = usage_log::month_key(Utc::now());
    let monthly_test_count =
        usage_log::current_count(&pool, user_id, usage_log::ACTIVITY_TEST, &month).await?;

    Ok(Json(ProfileResponse {
        user,
        monthly_test_count,
    }))
}

/// Partially updates the caller's profile.
///
/// Role and subscription plan changes are stripped unless the caller is an
/// admin; those are managed through the admin surface.
pub async fn update_profile(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(mut payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let user_id = claims.user_id()?;

    if claims.role != "admin" {
        payload.role = None;
        payload.subscription_plan = None;
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET full_name = COALESCE($2, full_name),
            username = COALESCE($3, username),
            email = COALESCE($4, email),
            role = COALESCE($5, role),
            subscription_plan = COALESCE($6, subscription_plan),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&payload.full_name)
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&payload.role)
    .bind(&payload.subscription_plan)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict("Username or email already taken".to_string())
        } else {
            AppError::from(e)
        }
    })?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

/// Deletes the caller's account. Questions, tests, interactions and usage
/// rows go with it via cascading deletes.
pub async fn delete_profile(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Profile deleted" })))
}

// src/handlers/auth.rs

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::user::{LoginRequest, ResendOtpRequest, SignupRequest, User, VerifyOtpRequest},
    utils::{
        email::Mailer,
        hash::{hash_password, verify_password},
        jwt::sign_jwt,
    },
};

/// Generates a 6-digit one-time password.
fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Registers a new user and emails them a verification OTP.
///
/// Hashes the password using Argon2 before storing it. The account stays
/// unverified (and unable to log in) until the OTP is confirmed.
pub async fn signup(
    State(pool): State<PgPool>,
    State(mailer): State<Arc<dyn Mailer>>,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;
    let otp = generate_otp();
    let otp_expires = Utc::now() + Duration::minutes(10);

    let email = sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO users (full_name, username, email, password, otp, otp_expires)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING email
        "#,
    )
    .bind(&payload.full_name)
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&hashed_password)
    .bind(&otp)
    .bind(otp_expires)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        // Postgres error code for unique violation is 23505
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict("User already exists".to_string())
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    mailer.send_otp(&email, &otp).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created, OTP sent to email" })),
    ))
}

/// Confirms the signup OTP, marks the account verified and issues a JWT.
pub async fn verify_otp(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    // Conditional update so only a matching, unexpired OTP flips the flag.
    let verified = sqlx::query_as::<_, (i64, String, String)>(
        r#"
        UPDATE users
        SET is_verified = TRUE, otp = NULL, otp_expires = NULL, updated_at = now()
        WHERE email = $1 AND otp = $2 AND otp_expires > now()
        RETURNING id, username, role
        "#,
    )
    .bind(&payload.email)
    .bind(&payload.otp)
    .fetch_optional(&pool)
    .await?;

    let (id, username, role) =
        verified.ok_or(AppError::BadRequest("Invalid or expired OTP".to_string()))?;

    let token = sign_jwt(id, &role, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "user": { "id": id, "username": username, "role": role }
    })))
}

/// Replaces any pending OTP and emails the new one.
pub async fn resend_otp(
    State(pool): State<PgPool>,
    State(mailer): State<Arc<dyn Mailer>>,
    Json(payload): Json<ResendOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let otp = generate_otp();
    let otp_expires = Utc::now() + Duration::minutes(10);

    let updated = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE users
        SET otp = $2, otp_expires = $3, updated_at = now()
        WHERE email = $1
        RETURNING id
        "#,
    )
    .bind(&payload.email)
    .bind(&otp)
    .bind(otp_expires)
    .fetch_optional(&pool)
    .await?;

    if updated.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    mailer.send_otp(&payload.email, &otp).await?;

    Ok(Json(json!({ "message": "OTP resent to email" })))
}

/// Authenticates a user and returns a JWT token.
///
/// Only verified, active accounts may log in.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Login DB error: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let user = user.ok_or(AppError::AuthError(
        "Invalid credentials or unverified email".to_string(),
    ))?;

    if !user.is_verified || !user.is_active {
        return Err(AppError::AuthError(
            "Invalid credentials or unverified email".to_string(),
        ));
    }

    let is_valid = verify_password(&payload.password, &user.password)?;

    if !is_valid {
        return Err(AppError::AuthError("Invalid credentials".to_string()));
    }

    let token = sign_jwt(user.id, &user.role, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "user": { "id": user.id, "username": user.username, "role": user.role }
    })))
}

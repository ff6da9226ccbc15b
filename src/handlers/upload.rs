// src/handlers/upload.rs

use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::{config::Config, error::AppError};

/// Issues a signed upload ticket for the external asset host.
///
/// Binary media never passes through this backend: the client uploads
/// directly to the host using this signature, then stores the returned URLs
/// on questions.
pub async fn get_upload_signature(
    State(config): State<Config>,
) -> Result<impl IntoResponse, AppError> {
    let asset_host = &config.asset_host;
    let timestamp = Utc::now().timestamp();
    let signature = sign_upload_request(
        timestamp,
        &asset_host.upload_preset,
        &asset_host.api_secret,
    );

    Ok(Json(serde_json::json!({
        "signature": signature,
        "timestamp": timestamp,
        "upload_preset": asset_host.upload_preset,
        "cloud_name": asset_host.cloud_name,
        "api_key": asset_host.api_key,
    })))
}

/// SHA-256 over the alphabetically-ordered request params with the API secret
/// appended, hex-encoded — the asset host's request-signing scheme.
fn sign_upload_request(timestamp: i64, upload_preset: &str, api_secret: &str) -> String {
    let to_sign = format!(
        "timestamp={}&upload_preset={}{}",
        timestamp, upload_preset, api_secret
    );
    let digest = Sha256::digest(to_sign.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Monthly test-creation limits per subscription plan.
///
/// Injected into the test assembler through `Config` so tier changes are an
/// environment tweak, not a redeploy. `None` means unbounded.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free: Option<i64>,
    pub pro: Option<i64>,
    pub premium: Option<i64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: Some(10),
            pro: Some(200),
            premium: None,
        }
    }
}

impl QuotaConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            free: env_limit("QUOTA_FREE_TESTS").unwrap_or(defaults.free),
            pro: env_limit("QUOTA_PRO_TESTS").unwrap_or(defaults.pro),
            premium: env_limit("QUOTA_PREMIUM_TESTS").unwrap_or(defaults.premium),
        }
    }

    /// Resolves a plan name to its monthly test limit.
    /// Unknown plans fall back to the free tier.
    pub fn monthly_test_limit(&self, plan: &str) -> Option<i64> {
        match plan {
            "pro" => self.pro,
            "premium" => self.premium,
            _ => self.free,
        }
    }
}

/// Reads an optional numeric limit from the environment.
/// Outer `None` = variable unset; inner `None` = explicitly unbounded ("none").
fn env_limit(key: &str) -> Option<Option<i64>> {
    let raw = env::var(key).ok()?;
    if raw.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    raw.parse::<i64>().ok().map(Some)
}

/// Credentials for the external asset host that question media is uploaded
/// to. The backend only signs upload requests; binaries go client-direct.
#[derive(Debug, Clone)]
pub struct AssetHostConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub upload_preset: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub quota: QuotaConfig,
    pub asset_host: AssetHostConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let asset_host = AssetHostConfig {
            cloud_name: env::var("ASSET_HOST_CLOUD_NAME").unwrap_or_default(),
            api_key: env::var("ASSET_HOST_API_KEY").unwrap_or_default(),
            api_secret: env::var("ASSET_HOST_API_SECRET").unwrap_or_default(),
            upload_preset: env::var("ASSET_HOST_UPLOAD_PRESET").unwrap_or_default(),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            quota: QuotaConfig::from_env(),
            asset_host,
        }
    }
}

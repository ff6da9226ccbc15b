// src/utils/email.rs

use async_trait::async_trait;

use crate::error::AppError;

/// Outbound email collaborator.
///
/// Actual delivery (SMTP, transactional API) lives behind this trait; the
/// core only needs "send this OTP to this address".
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, email: &str, otp: &str) -> Result<(), AppError>;
}

/// Mailer that logs instead of sending. Used in development and tests,
/// where the OTP is read back from the store.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp(&self, email: &str, otp: &str) -> Result<(), AppError> {
        tracing::info!("OTP for {}: {}", email, otp);
        Ok(())
    }
}

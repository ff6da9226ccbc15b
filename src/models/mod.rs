// src/models/mod.rs

pub mod question;
pub mod usage_log;
pub mod user;

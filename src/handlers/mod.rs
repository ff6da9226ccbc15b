// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod question;
pub mod test;
pub mod upload;
pub mod user;

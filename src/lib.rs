//! shelf-rs: a personal library tracker REST API.
//!
//! Users keep a private collection of books with reading status, progress,
//! ratings and cover images, and get per-user statistics over it.
//!
//! # Features
//!
//! - Bearer-token accounts with profiles and an admin role
//! - Per-user book records with status-driven reading dates
//! - Cover uploads normalized to a fixed JPEG box
//! - Local search, statistics, distinct genres and authors
//! - External lookup against the Google Books catalog

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// External catalog search.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book records and the per-user store.
pub mod library;
/// HTTP server.
pub mod server;
/// Cover uploads.
pub mod uploads;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;

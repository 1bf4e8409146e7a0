//! Moderation backend for proof-of-task submissions.
mod auth;
mod blob;
mod config;
mod db;
mod endpoints;
pub mod error;
mod metrics;
mod models;
mod moderation;
mod ratelimit;
mod serve;
mod signing;
mod webhook;


pub use error::Error;
pub use serve::{run, AppState, Result};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
                       ___    __        __
   ___  _______  ___  / _/___/ /__ ___ / /__
  / _ \/ __/ _ \/ _ \/ _/ _  / -_|_-</  '_/
 / .__/_/  \___/\___/_/ \_,_/\__/___/_/\_\
/_/

This is the proofdesk moderation backend.

Integration routes are under /api/app/ (signed requests only).
Dashboard routes are under /api/admin/
    "
}

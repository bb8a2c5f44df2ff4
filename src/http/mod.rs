//! HTTP surface for moderators and reporters
//!
//! A thin Axum layer over [`crate::core::ModerationService`]. The caller's
//! identity comes from the upstream gateway; see [`auth`].

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod server;

pub use errors::{HttpError, HttpResult};
pub use models::{ApiResponse, ErrorResponse};
/// Re-export commonly used types
pub use server::{build_router, ModerationServer};

//! HTTP request handlers

pub mod moderation;
pub mod status;
pub mod users;

// Re-export AppState (used by all handlers)
pub use status::AppState;

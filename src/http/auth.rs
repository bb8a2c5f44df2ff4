//! Actor identity for moderation requests
//!
//! Authentication happens at the upstream gateway, which forwards the
//! authenticated user id in [`ACTOR_HEADER`]. Role checks are done by the
//! service against the stored user, never trusted from the request.

use crate::core::model::UserId;
use crate::http::errors::HttpError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the authenticated user id
pub const ACTOR_HEADER: &str = "x-fastskill-user";

/// The user on whose behalf a request is made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

impl Actor {
    /// Extract the actor id from request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Result<Self, HttpError> {
        let value = headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| HttpError::Unauthorized(format!("Missing {} header", ACTOR_HEADER)))?;
        let value = value
            .to_str()
            .map_err(|_| HttpError::Unauthorized(format!("Invalid {} header", ACTOR_HEADER)))?;
        Uuid::parse_str(value.trim())
            .map(Actor)
            .map_err(|_| HttpError::Unauthorized(format!("{} is not a user id", ACTOR_HEADER)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

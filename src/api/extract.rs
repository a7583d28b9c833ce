//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::domain::MemberId;
use crate::error::BrokerError;

/// Header carrying the authenticated member id, set by the upstream auth layer.
pub const MEMBER_ID_HEADER: &str = "x-member-id";

/// The member performing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub MemberId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = BrokerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(MEMBER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(BrokerError::Unauthenticated)?;
        let id: i64 = raw
            .trim()
            .parse()
            .map_err(|_| BrokerError::Unauthenticated)?;
        if id <= 0 {
            return Err(BrokerError::Unauthenticated);
        }
        Ok(Self(MemberId::new(id)))
    }
}

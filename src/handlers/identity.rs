//! Caller identity from the `x-member-id` header.
//!
//! The upstream gateway authenticates members and forwards their id;
//! requests without the header are guests. The core never reads
//! ambient identity, so this is the single place transport meets it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::core::Identity;
use crate::utils::error::AppError;

const MEMBER_ID_HEADER: &str = "x-member-id";

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(MEMBER_ID_HEADER) {
            None => Ok(Identity::Guest),
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| AppError::Validation("invalid x-member-id header".into()))?;
                let member_id = Uuid::parse_str(raw)
                    .map_err(|_| AppError::Validation("invalid x-member-id header".into()))?;
                Ok(Identity::Member(member_id))
            }
        }
    }
}

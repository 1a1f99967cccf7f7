//! Caller identity. Authentication happens upstream; this service trusts
//! the identity headers the proxy forwards.

use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";

const DEFAULT_USER_ID: i64 = 1;
const DEFAULT_USERNAME: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub user_id: i64,
    pub username: String,
}

impl Default for RequestIdentity {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID,
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

impl RequestIdentity {
    fn from_parts(parts: &Parts) -> Self {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_USER_ID);
        let username = header(USERNAME_HEADER)
            .unwrap_or(DEFAULT_USERNAME)
            .to_string();

        Self { user_id, username }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

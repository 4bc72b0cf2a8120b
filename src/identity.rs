//! Identity verification collaborator.
//!
//! Tokens are opaque here: the user service resolves them to an owner id and
//! the contact fields notifications need. Verification gates every
//! operation, so callers await it and never retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::OwnerId;

/// Used when the user service has no display name on file.
pub const DEFAULT_DISPLAY_NAME: &str = "Usuario";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner_id: OwnerId,
    pub display_name: String,
    pub contact_address: String,
}

#[derive(Debug)]
pub enum IdentityError {
    /// Token missing, malformed, expired, or rejected.
    Unauthenticated,
    /// Token is valid but its user no longer exists.
    NotFound,
    ServiceUnavailable(String),
}

impl IdentityError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            IdentityError::Unauthenticated => "unauthenticated",
            IdentityError::NotFound => "not_found",
            IdentityError::ServiceUnavailable(_) => "unavailable",
        }
    }
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Unauthenticated => write!(f, "user not authenticated or token invalid"),
            IdentityError::NotFound => write!(f, "user not found in user service"),
            IdentityError::ServiceUnavailable(e) => write!(f, "user service unavailable: {e}"),
        }
    }
}

impl std::error::Error for IdentityError {}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// `GET {base}/users/me` with the token as a bearer credential.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "nombre", default)]
    name: Option<String>,
    #[serde(default)]
    email: String,
}

impl HttpIdentityVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        if token.trim().is_empty() {
            return Err(IdentityError::Unauthenticated);
        }
        let url = format!("{}/users/me", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::ServiceUnavailable(e.to_string()))?;

        match response.status().as_u16() {
            401 | 403 => return Err(IdentityError::Unauthenticated),
            404 => return Err(IdentityError::NotFound),
            s if !(200..300).contains(&s) => {
                return Err(IdentityError::ServiceUnavailable(format!("user service returned {s}")));
            }
            _ => {}
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::ServiceUnavailable(format!("bad user payload: {e}")))?;
        if user.id.is_empty() {
            return Err(IdentityError::ServiceUnavailable("user payload has no id".into()));
        }

        Ok(Identity {
            owner_id: user.id,
            display_name: user
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            contact_address: user.email,
        })
    }
}

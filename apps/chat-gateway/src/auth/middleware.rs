//! Bearer credential extraction for the gateway handshake.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

/// The credential presented on a WebSocket upgrade, if any.
///
/// Read from `Authorization: Bearer <token>`, falling back to the `token`
/// query parameter for clients that cannot set headers on upgrade requests.
/// Never rejects: a missing credential is reported after the upgrade so the
/// client receives a close frame with a reason.
#[derive(Debug, Clone)]
pub struct HandshakeToken(pub Option<String>);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl<S> FromRequestParts<S> for HandshakeToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if from_header.is_some() {
            return Ok(Self(from_header));
        }

        let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty());

        Ok(Self(from_query))
    }
}

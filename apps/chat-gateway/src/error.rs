use thiserror::Error;

/// Failure reported by a [`ChatStore`](crate::db::store::ChatStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for StoreError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failure reported by a [`PushDispatcher`](crate::push::PushDispatcher).
#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to load service account: {0}")]
    Credentials(String),
    #[error("failed to obtain access token: {0}")]
    Token(String),
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("push API error: {status} - {body}")]
    Api { status: u16, body: String },
}

/// Errors produced while admitting a connection or processing one of its events.
///
/// Only some variants are ever shown to a client; see [`GatewayError::client_message`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Handshake failed; the connection is never admitted.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// The principal is not a member of the targeted room.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// A referenced message or room does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The principal does not own the resource it tried to modify.
    #[error("not permitted: {0}")]
    Unauthorized(String),
    /// The event payload failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// A persistence call failed; the current event is aborted.
    #[error("{context}")]
    TransientStoreFailure {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    /// Push delivery failed. Logged only.
    #[error("push delivery failed")]
    NotificationFailure(#[from] PushError),
}

impl GatewayError {
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::TransientStoreFailure { context, source }
    }

    /// The text of the `error` event sent back to the originating connection,
    /// or `None` if the failure is dropped silently.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::AccessDenied(msg) | Self::InvalidPayload(msg) => Some(msg.clone()),
            Self::TransientStoreFailure { context, .. } => Some((*context).to_string()),
            Self::AuthRejected(_)
            | Self::NotFound(_)
            | Self::Unauthorized(_)
            | Self::NotificationFailure(_) => None,
        }
    }
}

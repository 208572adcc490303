//! Best-effort push notification delivery for participants of a room.

pub mod fcm;
pub mod queue;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::PushError;

pub use queue::{PushJob, PushQueue};

/// Notification payload sent to every device in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Result of delivering to a single device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub token: String,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(token: &str) -> Self {
        Self {
            token: token.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(token: &str, error: impl Into<String>) -> Self {
        Self {
            token: token.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Delivers a notification to a batch of device tokens.
///
/// Returns one outcome per token. `Err` means the whole batch could not be
/// attempted (e.g. credentials could not be obtained).
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn deliver(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<Vec<DeliveryOutcome>, PushError>;
}

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// One message payload sent to a batch of device tokens.
///
/// `data` is a string-to-string map; callers strip null values and stringify
/// non-string values before building this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
    pub image: Option<String>,
}

/// Per-token outcome of a multicast push call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    pub token: String,
    pub success: bool,
    /// Provider-assigned message identifier, present on success.
    pub message_id: Option<String>,
    pub error: Option<String>,
}

/// Provider response for one multicast call: one outcome per input token.
#[derive(Debug, Clone, Default)]
pub struct MulticastResponse {
    pub responses: Vec<PushResult>,
}

/// Multicast push provider seam.
///
/// Implementations send one message to a batch of tokens and report one
/// outcome per token. A transport or auth failure is an `Err`; a rejected
/// token is a `success = false` entry in the response.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn send_multicast(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<MulticastResponse, AppError>;
}

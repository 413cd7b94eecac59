//! Wire shapes exchanged between page agents and the background service.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Bus topic carrying [`RuntimeMessage::RefreshPodUsers`] notifications.
pub const PAGE_TOPIC: &str = "page";

/// Messages understood by either side, tagged by `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RuntimeMessage {
    /// Page or panel asks the background service to refetch the list.
    UpdateList,
    /// Background service tells page agents the cached list changed.
    RefreshPodUsers,
}

/// Reply to [`RuntimeMessage::UpdateList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// True when the refresh stored a new list.
    pub success: bool,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateResponse {
    /// Successful reply.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed reply carrying `error`'s message.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Cross-context send failures. Expected during shutdown and never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingError {
    /// The background service is no longer listening.
    Disconnected,
    /// The request was accepted but dropped without a reply.
    NoReply,
}

impl fmt::Display for MessagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("background service is not running"),
            Self::NoReply => f.write_str("background service closed without replying"),
        }
    }
}

impl Error for MessagingError {}

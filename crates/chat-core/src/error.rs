use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong";

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input, unknown resource, or other request issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// Local persisted-state failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Input rejected before it reached the network.
    Validation,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// A command that needs a mounted conversation arrived without one.
    pub fn no_open_conversation(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Config,
            "no_open_conversation",
            format!("cannot run '{action}' without an open conversation"),
        )
    }

    /// A command referenced a message that is not in the rendered list.
    pub fn unknown_message(message_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::Config,
            "message_not_found",
            format!("message '{message_id}' is not in the open conversation"),
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Network | ChatErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}

/// Pick the user-facing message for a failed backend response.
///
/// Prefers a JSON body's `message`, then a JSON string body, then the raw
/// body text, then `fallback`.
pub fn server_error_message(body: &str, fallback: Option<&str>) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(message) = value
            .get("message")
            .and_then(|message| message.as_str())
            .filter(|message| !message.trim().is_empty())
        {
            return message.to_owned();
        }
        if let Some(text) = value.as_str().filter(|text| !text.trim().is_empty()) {
            return text.to_owned();
        }
    } else if !trimmed.is_empty() {
        return trimmed.to_owned();
    }

    fallback
        .filter(|fallback| !fallback.trim().is_empty())
        .unwrap_or(GENERIC_FAILURE_MESSAGE)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), ChatErrorCategory::Auth);
        assert_eq!(classify_http_status(429), ChatErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), ChatErrorCategory::Config);
        assert_eq!(classify_http_status(503), ChatErrorCategory::Network);
        assert_eq!(classify_http_status(700), ChatErrorCategory::Internal);
    }

    #[test]
    fn keeps_no_open_conversation_code_stable() {
        let err = ChatError::no_open_conversation("delete_message");
        assert_eq!(err.code, "no_open_conversation");
        assert_eq!(err.category, ChatErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = ChatError::new(ChatErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
        assert!(err.is_recoverable());
    }

    #[test]
    fn server_message_prefers_json_message_field() {
        assert_eq!(
            server_error_message(r#"{"message":"Chat not found"}"#, Some("404")),
            "Chat not found"
        );
        assert_eq!(
            server_error_message(r#""Message already deleted""#, None),
            "Message already deleted"
        );
        assert_eq!(server_error_message("Bad Gateway", None), "Bad Gateway");
    }

    #[test]
    fn server_message_falls_back_when_body_is_unhelpful() {
        assert_eq!(
            server_error_message(r#"{"error":true}"#, Some("HTTP 500")),
            "HTTP 500"
        );
        assert_eq!(server_error_message("", None), "Something went wrong");
    }
}

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chat_core::{
    ChatError, ChatErrorCategory, ConversationKind, ConversationRef, RawMessage, ReminderDraft,
    classify_http_status, server_error_message,
};
use chat_platform::{SessionKey, SessionStore};
use reqwest::{Method, RequestBuilder, Response, header::RETRY_AFTER};
use tracing::{debug, warn};
use url::Url;

use crate::{
    api::ChatApi,
    wire::{
        DirectMessagesResponse, EditMessageRequest, GroupMessageRecord, raw_messages_from_group,
    },
};

pub const DEFAULT_API_BASE_URL: &str = "https://mpiglobal.org";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
}

impl RestClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_base_url",
                format!("invalid API base url '{base_url}': {err}"),
            )
        })?;
        Ok(Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// JSON REST client; every request carries the session's bearer token when one is stored.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<dyn SessionStore>,
}

impl RestClient {
    pub fn new(
        config: RestClientConfig,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            http,
            base_url: config.base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a server-relative media reference; absolute URLs pass through.
    pub fn resolve_media_url(&self, reference: &str) -> Result<Url, ChatError> {
        self.base_url.join(reference.trim()).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_media_reference",
                format!("invalid media reference '{reference}': {err}"),
            )
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "invalid_base_url",
                    format!("base url '{}' cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.get_optional(SessionKey::AuthToken) {
            Ok(Some(token)) => request.bearer_auth(token),
            Ok(None) => request,
            Err(err) => {
                warn!(error = %err, "auth token unavailable; sending unauthenticated request");
                request
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ChatError> {
        debug!(%method, %url, "sending backend request");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let mut err = ChatError::new(
            classify_http_status(status.as_u16()),
            "http_error",
            server_error_message(&body, status.canonical_reason()),
        );
        if let Some(retry_after) = retry_after {
            err = err.with_retry_after(retry_after);
        }
        warn!(status = status.as_u16(), code = %err.code, "backend request failed");
        Err(err)
    }
}

#[async_trait]
impl ChatApi for RestClient {
    async fn fetch_messages(
        &self,
        conversation: &ConversationRef,
    ) -> Result<Vec<RawMessage>, ChatError> {
        match conversation.kind {
            ConversationKind::Direct => {
                let url = self.endpoint(&["api", "v1", "chats", &conversation.id, "messages"])?;
                let response: DirectMessagesResponse = self
                    .send(Method::GET, url, None)
                    .await?
                    .json()
                    .await
                    .map_err(map_reqwest_error)?;
                Ok(response.messages.into_iter().map(Into::into).collect())
            }
            ConversationKind::Group => {
                let url = self.endpoint(&["api", "v1", "groups", &conversation.id, "messages"])?;
                let records: Vec<GroupMessageRecord> = self
                    .send(Method::GET, url, None)
                    .await?
                    .json()
                    .await
                    .map_err(map_reqwest_error)?;
                Ok(raw_messages_from_group(conversation, records))
            }
        }
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ChatError> {
        let url = self.endpoint(&["api", "v1", "chats", "messages", message_id])?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn edit_message(&self, message_id: &str, new_content: &str) -> Result<(), ChatError> {
        let url = self.endpoint(&["api", "v1", "chats", "messages", message_id])?;
        let body = serde_json::to_value(EditMessageRequest {
            content: new_content,
        })
        .map_err(map_serde_error)?;
        self.send(Method::PUT, url, Some(body)).await?;
        Ok(())
    }

    async fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), ChatError> {
        let url = self.endpoint(&["api", "v1", "reminders"])?;
        let body = serde_json::to_value(draft).map_err(map_serde_error)?;
        self.send(Method::POST, url, Some(body)).await?;
        Ok(())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::new(ChatErrorCategory::Network, "request_timeout", err.to_string())
    } else if err.is_decode() {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "decode_error",
            err.to_string(),
        )
    } else if err.is_connect() {
        ChatError::new(ChatErrorCategory::Network, "connect_error", err.to_string())
    } else {
        ChatError::new(
            ChatErrorCategory::Network,
            "http_transport_error",
            err.to_string(),
        )
    }
}

fn map_serde_error(err: serde_json::Error) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Serialization,
        "encode_error",
        err.to_string(),
    )
}

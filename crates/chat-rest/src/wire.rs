//! Backend JSON shapes and their conversion into [`RawMessage`].

use chat_core::{ConversationRef, RawMessage, SenderProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content prefix used by the web client to encode image messages.
pub const LEGACY_IMAGE_PREFIX: &str = "Image: ";

#[derive(Debug, Clone, Deserialize)]
pub struct DirectMessagesResponse {
    #[serde(default)]
    pub messages: Vec<DirectMessageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectMessageRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub sender: SenderRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupRecordType {
    Message,
    Image,
    Voice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMessageRecord {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    /// Sender user id.
    pub sender: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type")]
    pub record_type: GroupRecordType,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditMessageRequest<'a> {
    pub content: &'a str,
}

/// Split the legacy `Image: <path>` encoding into its image reference.
pub fn legacy_image_reference(content: &str) -> Option<&str> {
    content
        .strip_prefix(LEGACY_IMAGE_PREFIX)
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
}

impl From<DirectMessageRecord> for RawMessage {
    fn from(record: DirectMessageRecord) -> Self {
        let image = record
            .image
            .filter(|image| !image.trim().is_empty())
            .or_else(|| legacy_image_reference(&record.content).map(ToOwned::to_owned));

        RawMessage {
            id: record.id,
            content: record.content,
            image,
            created_at: record.created_at,
            sender: SenderProfile {
                id: record.sender.id,
                display_name: record.sender.first_name,
                avatar: record.sender.avatar,
            },
        }
    }
}

/// Convert group records, synthesizing `<conversation>:<index>` ids where missing.
pub fn raw_messages_from_group(
    conversation: &ConversationRef,
    records: Vec<GroupMessageRecord>,
) -> Vec<RawMessage> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let image = match record.record_type {
                GroupRecordType::Image => Some(record.message.clone()),
                GroupRecordType::Message | GroupRecordType::Voice => None,
            };
            RawMessage {
                id: record
                    .id
                    .unwrap_or_else(|| format!("{}:{index}", conversation.id)),
                content: record.message,
                image,
                created_at: record.created_at,
                sender: SenderProfile {
                    id: record.sender,
                    display_name: String::new(),
                    avatar: None,
                },
            }
        })
        .collect()
}

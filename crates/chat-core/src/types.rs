use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::reminder::ReminderDraft;

/// Outbound realtime event name used to join a conversation channel.
pub const JOIN_CHAT_EVENT: &str = "join chat";
/// Realtime event name used for read receipts, both directions.
pub const MESSAGE_SEEN_EVENT: &str = "message-seen";

/// Conversation flavor; selects the backend endpoint and wire shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Two-participant chat.
    Direct,
    /// Group chat.
    Group,
}

/// Opaque conversation identifier plus its kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationRef {
    pub id: String,
    pub kind: ConversationKind,
}

impl ConversationRef {
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ConversationKind::Direct,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ConversationKind::Group,
        }
    }
}

/// Sender descriptor attached to every message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderProfile {
    /// Backend user identifier.
    pub id: String,
    /// Display name (first name for direct chats, empty when unknown).
    pub display_name: String,
    /// Avatar reference when the backend provides one.
    pub avatar: Option<String>,
}

/// Message record as fetched from the backend.
///
/// Immutable once fetched; a re-fetch replaces the whole list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    /// Textual content.
    pub content: String,
    /// Image reference, usually a server-relative path.
    pub image: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    pub sender: SenderProfile,
}

/// Derived content classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
}

/// View-ready message derived from a [`RawMessage`] for one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Same identifier as the source record.
    pub id: String,
    pub kind: ContentKind,
    pub content: String,
    pub image: Option<String>,
    /// Viewer-local `hour:minute`.
    pub time_label: String,
    /// Viewer-local long-form calendar date, for example `01 January 2024`.
    pub date_label: String,
    pub created_at: DateTime<Utc>,
    pub sender: SenderProfile,
    /// `true` when the viewer sent this message.
    pub is_self: bool,
}

/// Messages sharing one calendar-date label, ascending by creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateBucket {
    pub date_label: String,
    pub messages: Vec<NormalizedMessage>,
}

/// Hour cycle used for message time labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HourCycle {
    /// `02:05 PM`
    H12,
    /// `14:05`
    #[default]
    H23,
}

/// Viewer-local display settings for time and date labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DisplaySettings {
    /// Viewer UTC offset in minutes (east positive).
    pub utc_offset_minutes: i32,
    pub hour_cycle: HourCycle,
}

/// Current viewer, read from the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerIdentity {
    pub user_id: String,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

/// Realtime phase of the mounted conversation view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RealtimePhase {
    /// No persistent connection.
    Disconnected,
    /// Join announced; read receipt not yet announced.
    Joining,
    /// Join and read receipt announced.
    Joined,
}

/// Outbound realtime announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Announcement {
    /// `join chat` with the conversation id as payload.
    JoinChat { conversation_id: String },
    /// `message-seen` with `{chatId, userId}` as payload.
    MessageSeen {
        conversation_id: String,
        viewer_id: String,
    },
}

impl Announcement {
    /// Event name on the realtime wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => JOIN_CHAT_EVENT,
            Self::MessageSeen { .. } => MESSAGE_SEEN_EVENT,
        }
    }

    /// Event payload on the realtime wire.
    pub fn payload(&self) -> Value {
        match self {
            Self::JoinChat { conversation_id } => Value::String(conversation_id.clone()),
            Self::MessageSeen {
                conversation_id,
                viewer_id,
            } => json!({ "chatId": conversation_id, "userId": viewer_id }),
        }
    }
}

/// Inbound `message-seen` notification from another participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeenNotification {
    #[serde(rename = "chatId", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "userId", default)]
    pub viewer_id: Option<String>,
}

/// Command channel input accepted by the chat runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Mount a conversation view. Replaces any mounted view.
    OpenConversation { conversation: ConversationRef },
    /// Unmount the current conversation view.
    CloseConversation,
    /// Re-run the fetch for the mounted conversation.
    RefreshMessages,
    /// Re-read the viewer identity and re-render.
    ReloadIdentity,
    /// Open the action menu of one of the viewer's own messages.
    OpenActionMenu { message_id: String },
    /// Close the open action menu.
    CloseActionMenu,
    /// Pointer pressed outside the open action menu's region.
    PointerOutsideMenu,
    /// Delete one of the viewer's messages.
    DeleteMessage { message_id: String },
    /// Seed the external composer with a message for editing.
    BeginEdit { message_id: String },
    /// Persist an edit produced by the composer.
    SubmitEdit {
        message_id: String,
        new_content: String,
    },
    /// Create a reminder/session entry.
    CreateReminder {
        /// Frontend-provided transaction ID echoed in `ReminderAck`.
        client_txn_id: String,
        draft: ReminderDraft,
    },
}

/// Acknowledgement for reminder creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderAck {
    pub client_txn_id: String,
    /// Stable error code on failure.
    pub error_code: Option<String>,
    /// User-facing failure message.
    pub message: Option<String>,
}

/// Event channel output emitted by the chat runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// A conversation view was mounted.
    ConversationOpened { conversation: ConversationRef },
    /// The conversation view was unmounted.
    ConversationClosed { conversation_id: String },
    /// A fetch started and no cached list exists yet.
    MessagesLoading { conversation_id: String },
    /// Messages are available but the viewer identity is not; nothing is rendered.
    IdentityPending { conversation_id: String },
    /// Grouped messages for rendering, buckets in descending recency.
    MessagesUpdated {
        conversation_id: String,
        buckets: Vec<DateBucket>,
    },
    /// Message retrieval failed.
    FetchFailed {
        conversation_id: String,
        error_code: String,
        message: String,
    },
    /// Delete succeeded; a re-fetch follows.
    MessageDeleted {
        conversation_id: String,
        message_id: String,
    },
    /// Edit succeeded; a re-fetch follows.
    MessageEdited {
        conversation_id: String,
        message_id: String,
    },
    /// The composer should open seeded with this pair.
    EditRequested { message_id: String, content: String },
    /// A delete/edit failed; local state is unchanged.
    MutationFailed {
        message_id: String,
        error_code: String,
        message: String,
    },
    /// The open action menu changed.
    ActionMenuChanged { open_message_id: Option<String> },
    /// Realtime phase of the mounted view changed.
    RealtimeStateChanged {
        conversation_id: String,
        phase: RealtimePhase,
    },
    /// Reminder creation result.
    ReminderAck(ReminderAck),
    /// Command could not be handled.
    FatalError {
        code: String,
        message: String,
        recoverable: bool,
    },
}

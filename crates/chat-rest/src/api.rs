use async_trait::async_trait;
use chat_core::{ChatError, ConversationRef, RawMessage, ReminderDraft};

/// Request/response operations the runtime needs from the backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Full ordered message list for one conversation.
    async fn fetch_messages(
        &self,
        conversation: &ConversationRef,
    ) -> Result<Vec<RawMessage>, ChatError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), ChatError>;

    async fn edit_message(&self, message_id: &str, new_content: &str) -> Result<(), ChatError>;

    /// Submit an already validated reminder draft.
    async fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), ChatError>;
}

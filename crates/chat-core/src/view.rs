//! Event-driven view state for one conversation pane.

use tracing::{debug, trace, warn};

use crate::types::{ChatEvent, DateBucket, RealtimePhase};

/// Inline text shown when the message fetch failed.
pub const FETCH_ERROR_TEXT: &str = "Error loading messages.";
/// Inline text shown when a conversation has no messages.
pub const EMPTY_CONVERSATION_TEXT: &str = "No Message";

/// What the message pane should draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewBody {
    /// No conversation mounted.
    Idle,
    /// First fetch in flight; draw a skeleton.
    Loading,
    /// Messages fetched but the viewer is unknown; draw nothing.
    AwaitingIdentity,
    /// Fetch failed; draw [`FETCH_ERROR_TEXT`].
    Failed { error_code: String },
    /// Conversation has no messages; draw [`EMPTY_CONVERSATION_TEXT`].
    Empty,
    /// Date buckets, descending recency.
    Messages(Vec<DateBucket>),
}

/// Seed for the external edit composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerSeed {
    pub message_id: String,
    pub content: String,
}

/// Immutable snapshot for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: Option<String>,
    pub body: ViewBody,
    pub open_menu: Option<String>,
    /// Transient notification text (mutation failures).
    pub notice: Option<String>,
    pub realtime: RealtimePhase,
    pub composer: Option<ComposerSeed>,
}

/// Reducer folding runtime events into a [`ConversationSnapshot`].
#[derive(Debug, Clone)]
pub struct ConversationViewState {
    conversation_id: Option<String>,
    body: ViewBody,
    open_menu: Option<String>,
    notice: Option<String>,
    realtime: RealtimePhase,
    composer: Option<ComposerSeed>,
}

impl Default for ConversationViewState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            body: ViewBody::Idle,
            open_menu: None,
            notice: None,
            realtime: RealtimePhase::Disconnected,
            composer: None,
        }
    }
}

impl ConversationViewState {
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            body: self.body.clone(),
            open_menu: self.open_menu.clone(),
            notice: self.notice.clone(),
            realtime: self.realtime,
            composer: self.composer.clone(),
        }
    }

    /// Inline text for bodies that render as a single line.
    pub fn status_text(&self) -> Option<&'static str> {
        match self.body {
            ViewBody::Failed { .. } => Some(FETCH_ERROR_TEXT),
            ViewBody::Empty => Some(EMPTY_CONVERSATION_TEXT),
            _ => None,
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// The composer consumed its seed.
    pub fn take_composer_seed(&mut self) -> Option<ComposerSeed> {
        self.composer.take()
    }

    /// Fold one runtime event. Returns `true` when the snapshot changed.
    pub fn apply(&mut self, event: &ChatEvent) -> bool {
        let before = self.snapshot();

        match event {
            ChatEvent::ConversationOpened { conversation } => {
                debug!(conversation_id = %conversation.id, "view mounted conversation");
                *self = Self {
                    conversation_id: Some(conversation.id.clone()),
                    body: ViewBody::Loading,
                    ..Self::default()
                };
            }
            ChatEvent::ConversationClosed { conversation_id } => {
                if self.is_current(conversation_id) {
                    *self = Self::default();
                }
            }
            ChatEvent::MessagesLoading { conversation_id } => {
                if self.is_current(conversation_id) {
                    self.body = ViewBody::Loading;
                }
            }
            ChatEvent::IdentityPending { conversation_id } => {
                if self.is_current(conversation_id) {
                    self.body = ViewBody::AwaitingIdentity;
                }
            }
            ChatEvent::MessagesUpdated {
                conversation_id,
                buckets,
            } => {
                if self.is_current(conversation_id) {
                    self.body = if buckets.is_empty() {
                        ViewBody::Empty
                    } else {
                        ViewBody::Messages(buckets.clone())
                    };
                }
            }
            ChatEvent::FetchFailed {
                conversation_id,
                error_code,
                ..
            } => {
                if self.is_current(conversation_id) {
                    warn!(%conversation_id, %error_code, "view showing fetch error");
                    self.body = ViewBody::Failed {
                        error_code: error_code.clone(),
                    };
                }
            }
            ChatEvent::MutationFailed { message, .. } => {
                self.notice = Some(message.clone());
            }
            ChatEvent::ActionMenuChanged { open_message_id } => {
                self.open_menu = open_message_id.clone();
            }
            ChatEvent::EditRequested {
                message_id,
                content,
            } => {
                self.composer = Some(ComposerSeed {
                    message_id: message_id.clone(),
                    content: content.clone(),
                });
            }
            ChatEvent::RealtimeStateChanged {
                conversation_id,
                phase,
            } => {
                if self.is_current(conversation_id) {
                    self.realtime = *phase;
                }
            }
            ChatEvent::MessageDeleted { .. }
            | ChatEvent::MessageEdited { .. }
            | ChatEvent::ReminderAck(_)
            | ChatEvent::FatalError { .. } => {
                trace!("view ignoring event without pane state");
            }
        }

        self.snapshot() != before
    }

    fn is_current(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationRef;

    fn opened(id: &str) -> ChatEvent {
        ChatEvent::ConversationOpened {
            conversation: ConversationRef::direct(id),
        }
    }

    #[test]
    fn mounting_shows_loading_then_empty_state() {
        let mut view = ConversationViewState::default();
        assert_eq!(view.snapshot().body, ViewBody::Idle);

        assert!(view.apply(&opened("c-1")));
        assert_eq!(view.snapshot().body, ViewBody::Loading);

        view.apply(&ChatEvent::MessagesUpdated {
            conversation_id: "c-1".into(),
            buckets: Vec::new(),
        });
        assert_eq!(view.snapshot().body, ViewBody::Empty);
        assert_eq!(view.status_text(), Some("No Message"));
    }

    #[test]
    fn fetch_failure_renders_inline_error() {
        let mut view = ConversationViewState::default();
        view.apply(&opened("c-1"));
        view.apply(&ChatEvent::FetchFailed {
            conversation_id: "c-1".into(),
            error_code: "http_error".into(),
            message: "boom".into(),
        });
        assert_eq!(
            view.snapshot().body,
            ViewBody::Failed {
                error_code: "http_error".into()
            }
        );
        assert_eq!(view.status_text(), Some(FETCH_ERROR_TEXT));
    }

    #[test]
    fn ignores_events_for_other_conversations() {
        let mut view = ConversationViewState::default();
        view.apply(&opened("c-1"));
        let changed = view.apply(&ChatEvent::IdentityPending {
            conversation_id: "c-2".into(),
        });
        assert!(!changed);
        assert_eq!(view.snapshot().body, ViewBody::Loading);
    }

    #[test]
    fn mutation_failure_keeps_menu_open_and_sets_notice() {
        let mut view = ConversationViewState::default();
        view.apply(&opened("c-1"));
        view.apply(&ChatEvent::ActionMenuChanged {
            open_message_id: Some("m-1".into()),
        });
        view.apply(&ChatEvent::MutationFailed {
            message_id: "m-1".into(),
            error_code: "http_error".into(),
            message: "Unable to delete".into(),
        });

        let snapshot = view.snapshot();
        assert_eq!(snapshot.open_menu.as_deref(), Some("m-1"));
        assert_eq!(snapshot.notice.as_deref(), Some("Unable to delete"));

        view.dismiss_notice();
        assert_eq!(view.snapshot().notice, None);
    }

    #[test]
    fn closing_resets_to_idle() {
        let mut view = ConversationViewState::default();
        view.apply(&opened("c-1"));
        view.apply(&ChatEvent::RealtimeStateChanged {
            conversation_id: "c-1".into(),
            phase: RealtimePhase::Joined,
        });
        view.apply(&ChatEvent::ConversationClosed {
            conversation_id: "c-1".into(),
        });
        let snapshot = view.snapshot();
        assert_eq!(snapshot.body, ViewBody::Idle);
        assert_eq!(snapshot.realtime, RealtimePhase::Disconnected);
        assert_eq!(snapshot.conversation_id, None);
    }

    #[test]
    fn edit_request_seeds_composer_once() {
        let mut view = ConversationViewState::default();
        view.apply(&ChatEvent::EditRequested {
            message_id: "m-3".into(),
            content: "see you at 5".into(),
        });
        let seed = view.take_composer_seed().expect("seed present");
        assert_eq!(seed.content, "see you at 5");
        assert_eq!(view.take_composer_seed(), None);
    }
}

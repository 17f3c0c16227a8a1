//! Core chat contract shared between the runtime and view consumers.
//!
//! This crate defines the command/event protocol, the message pipeline
//! (normalization and date grouping), the realtime read-receipt state
//! machine, and the action-menu and view reducers. Nothing here performs I/O.

/// Single-open action menu coordinator.
pub mod action_menu;
/// Async command/event channel primitives.
pub mod channel;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Date bucketing of normalized messages.
pub mod grouping;
/// Raw-to-view message normalization and event helpers.
pub mod normalization;
/// Reminder drafts and role-based validation.
pub mod reminder;
/// Realtime reconnect backoff.
pub mod retry;
/// Realtime join/read-receipt state machine.
pub mod state_machine;
/// Protocol and data types.
pub mod types;
/// Folds runtime events into renderable conversation state.
pub mod view;

pub use action_menu::ActionMenu;
pub use channel::{ChatChannelError, ChatChannels, EventStream};
pub use error::{ChatError, ChatErrorCategory, classify_http_status, server_error_message};
pub use grouping::group_by_date;
pub use normalization::{
    date_label, fatal_error_event, fetch_failed_event, mutation_failed_event, normalize_messages,
    time_label,
};
pub use reminder::{ReminderDraft, ReminderKind};
pub use retry::ReconnectPolicy;
pub use state_machine::RealtimeSync;
pub use types::{
    Announcement, ChatCommand, ChatEvent, ContentKind, ConversationKind, ConversationRef,
    DateBucket, DisplaySettings, HourCycle, JOIN_CHAT_EVENT, MESSAGE_SEEN_EVENT,
    NormalizedMessage, RawMessage, RealtimePhase, ReminderAck, SeenNotification, SenderProfile,
    ViewerIdentity,
};
pub use view::{ComposerSeed, ConversationSnapshot, ConversationViewState, ViewBody};

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::{
    error::ChatError,
    types::{ChatEvent, ContentKind, DisplaySettings, HourCycle, NormalizedMessage, RawMessage},
};

const DATE_LABEL_FORMAT: &str = "%d %B %Y";
const TIME_LABEL_FORMAT_H23: &str = "%H:%M";
const TIME_LABEL_FORMAT_H12: &str = "%I:%M %p";

/// Map fetched records into view-ready messages for one viewer.
///
/// Returns an empty list when `viewer_id` is absent so that no message is
/// ever attributed against a guessed identity.
pub fn normalize_messages(
    messages: &[RawMessage],
    viewer_id: Option<&str>,
    settings: &DisplaySettings,
) -> Vec<NormalizedMessage> {
    let Some(viewer_id) = viewer_id else {
        return Vec::new();
    };

    messages
        .iter()
        .map(|message| normalize_message(message, viewer_id, settings))
        .collect()
}

fn normalize_message(
    message: &RawMessage,
    viewer_id: &str,
    settings: &DisplaySettings,
) -> NormalizedMessage {
    let kind = if message.image.is_some() {
        ContentKind::Image
    } else {
        ContentKind::Text
    };

    NormalizedMessage {
        id: message.id.clone(),
        kind,
        content: message.content.clone(),
        image: message.image.clone(),
        time_label: time_label(message.created_at, settings),
        date_label: date_label(message.created_at, settings),
        created_at: message.created_at,
        sender: message.sender.clone(),
        is_self: message.sender.id == viewer_id,
    }
}

/// Viewer-local `hour:minute` label.
pub fn time_label(at: DateTime<Utc>, settings: &DisplaySettings) -> String {
    let format = match settings.hour_cycle {
        HourCycle::H12 => TIME_LABEL_FORMAT_H12,
        HourCycle::H23 => TIME_LABEL_FORMAT_H23,
    };
    at.with_timezone(&viewer_offset(settings))
        .format(format)
        .to_string()
}

/// Viewer-local long-form calendar date label.
pub fn date_label(at: DateTime<Utc>, settings: &DisplaySettings) -> String {
    at.with_timezone(&viewer_offset(settings))
        .format(DATE_LABEL_FORMAT)
        .to_string()
}

fn viewer_offset(settings: &DisplaySettings) -> FixedOffset {
    FixedOffset::east_opt(settings.utc_offset_minutes.saturating_mul(60))
        .unwrap_or_else(|| Utc.fix())
}

/// Convert a retrieval failure into the inline error event.
pub fn fetch_failed_event(conversation_id: impl Into<String>, error: ChatError) -> ChatEvent {
    ChatEvent::FetchFailed {
        conversation_id: conversation_id.into(),
        error_code: error.code,
        message: error.message,
    }
}

/// Convert a delete/edit failure into the transient notification event.
pub fn mutation_failed_event(message_id: impl Into<String>, error: ChatError) -> ChatEvent {
    ChatEvent::MutationFailed {
        message_id: message_id.into(),
        error_code: error.code,
        message: error.message,
    }
}

/// Convert an unhandled command error into a `FatalError` event.
pub fn fatal_error_event(error: ChatError) -> ChatEvent {
    let recoverable = error.is_recoverable();
    ChatEvent::FatalError {
        code: error.code,
        message: error.message,
        recoverable,
    }
}

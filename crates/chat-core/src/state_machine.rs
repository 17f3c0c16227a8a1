use tracing::debug;

use crate::types::{Announcement, RealtimePhase, SeenNotification};

/// Realtime join/read-receipt state for one mounted conversation view.
///
/// The machine never performs I/O. Each transition returns the announcements
/// the caller should try to send; nothing is queued while disconnected.
#[derive(Debug, Clone)]
pub struct RealtimeSync {
    conversation_id: String,
    viewer_id: Option<String>,
    phase: RealtimePhase,
}

impl RealtimeSync {
    pub fn new(conversation_id: impl Into<String>, viewer_id: Option<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            viewer_id,
            phase: RealtimePhase::Disconnected,
        }
    }

    pub fn phase(&self) -> RealtimePhase {
        self.phase
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Connection established. Announces the join, then the read receipt
    /// when the viewer is already known.
    pub fn on_connected(&mut self) -> Vec<Announcement> {
        if self.phase != RealtimePhase::Disconnected {
            return Vec::new();
        }

        self.phase = RealtimePhase::Joining;
        let mut announcements = vec![Announcement::JoinChat {
            conversation_id: self.conversation_id.clone(),
        }];
        announcements.extend(self.announce_seen());
        announcements
    }

    /// Connection lost. Pending receipts are dropped, not queued.
    pub fn on_disconnected(&mut self) {
        self.phase = RealtimePhase::Disconnected;
    }

    /// Viewer identity changed. Announces the read receipt when connected.
    pub fn on_viewer_changed(&mut self, viewer_id: Option<String>) -> Vec<Announcement> {
        if self.viewer_id == viewer_id {
            return Vec::new();
        }

        self.viewer_id = viewer_id;
        match self.phase {
            RealtimePhase::Disconnected => Vec::new(),
            RealtimePhase::Joining | RealtimePhase::Joined => {
                self.phase = RealtimePhase::Joining;
                self.announce_seen().into_iter().collect()
            }
        }
    }

    /// Inbound receipt from another participant. Observed only.
    pub fn on_seen(&self, notification: &SeenNotification) {
        debug!(
            conversation_id = %self.conversation_id,
            seen_in = ?notification.conversation_id,
            seen_by = ?notification.viewer_id,
            "message seen notification received"
        );
    }

    fn announce_seen(&mut self) -> Option<Announcement> {
        let viewer_id = self.viewer_id.clone()?;
        self.phase = RealtimePhase::Joined;
        Some(Announcement::MessageSeen {
            conversation_id: self.conversation_id.clone(),
            viewer_id,
        })
    }
}

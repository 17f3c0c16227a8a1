//! Realtime transport seam, scoped listeners and the per-view sync driver.

use std::sync::{Arc, Mutex, PoisonError};

use chat_core::{Announcement, ChatChannels, ChatEvent, RealtimeSync, SeenNotification};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("realtime connection is not established")]
    NotConnected,
    #[error("realtime transport is shut down")]
    Closed,
    #[error("failed to encode realtime frame: {0}")]
    Encode(String),
}

/// Persistent bidirectional connection carrying named events.
pub trait RealtimeTransport: Send + Sync {
    /// Connection status updates; the current value is always readable.
    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Send one announcement. Fails immediately when not connected.
    fn announce(&self, announcement: &Announcement) -> Result<(), RealtimeError>;

    /// New receiver for inbound `message-seen` notifications.
    fn subscribe_seen(&self) -> broadcast::Receiver<SeenNotification>;
}

/// Inbound `message-seen` listener tied to one mounted view.
///
/// The listening task stops when the guard is released or dropped, so a
/// view never leaves a listener behind on any exit path.
#[derive(Debug)]
pub struct ListenerGuard {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerGuard {
    pub fn spawn(sync: RealtimeSync, transport: &dyn RealtimeTransport) -> Self {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let mut inbound = transport.subscribe_seen();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    received = inbound.recv() => match received {
                        Ok(notification) => sync.on_seen(&notification),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            trace!(skipped, "seen listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(conversation_id = %sync.conversation_id(), "seen listener stopped");
        });

        Self {
            stop,
            task: Some(task),
        }
    }

    /// Stop listening and wait until the receiver is gone.
    pub async fn release(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Drive join/seen announcements for one mounted view until `stop` fires.
///
/// Announcements that fail because the connection is absent are skipped.
pub async fn drive_realtime(
    transport: Arc<dyn RealtimeTransport>,
    channels: ChatChannels,
    conversation_id: String,
    mut viewer: watch::Receiver<Option<String>>,
    stop: CancellationToken,
) {
    let initial_viewer = viewer.borrow_and_update().clone();
    let mut sync = RealtimeSync::new(conversation_id.clone(), initial_viewer);
    let mut status = transport.status();
    let listener = ListenerGuard::spawn(sync.clone(), transport.as_ref());

    let mut pending = match *status.borrow_and_update() {
        ConnectionStatus::Connected => sync.on_connected(),
        ConnectionStatus::Disconnected => Vec::new(),
    };

    loop {
        send_announcements(transport.as_ref(), &pending);
        channels.emit(ChatEvent::RealtimeStateChanged {
            conversation_id: conversation_id.clone(),
            phase: sync.phase(),
        });

        tokio::select! {
            _ = stop.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                pending = match *status.borrow_and_update() {
                    ConnectionStatus::Connected => sync.on_connected(),
                    ConnectionStatus::Disconnected => {
                        sync.on_disconnected();
                        Vec::new()
                    }
                };
            }
            changed = viewer.changed() => {
                if changed.is_err() {
                    break;
                }
                let viewer_id = viewer.borrow_and_update().clone();
                pending = sync.on_viewer_changed(viewer_id);
            }
        }
    }

    listener.release().await;
    debug!(%conversation_id, "realtime driver stopped");
}

fn send_announcements(transport: &dyn RealtimeTransport, announcements: &[Announcement]) {
    for announcement in announcements {
        match transport.announce(announcement) {
            Ok(()) => debug!(event = announcement.event_name(), "realtime announcement sent"),
            Err(err) => debug!(
                event = announcement.event_name(),
                error = %err,
                "realtime announcement skipped"
            ),
        }
    }
}

/// Transport without a network, driven by tests and offline runs.
#[derive(Clone)]
pub struct InMemoryTransport {
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    seen_tx: broadcast::Sender<SeenNotification>,
    sent: Arc<Mutex<Vec<Announcement>>>,
}

impl InMemoryTransport {
    pub fn new(initial: ConnectionStatus) -> Self {
        let (status_tx, _) = watch::channel(initial);
        let (seen_tx, _) = broadcast::channel(32);
        Self {
            status_tx: Arc::new(status_tx),
            seen_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    /// Deliver an inbound notification to current listeners.
    pub fn push_seen(&self, notification: SeenNotification) -> usize {
        self.seen_tx.send(notification).unwrap_or(0)
    }

    /// Announcements accepted so far.
    pub fn sent(&self) -> Vec<Announcement> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of active inbound listeners.
    pub fn listener_count(&self) -> usize {
        self.seen_tx.receiver_count()
    }
}

impl RealtimeTransport for InMemoryTransport {
    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    fn announce(&self, announcement: &Announcement) -> Result<(), RealtimeError> {
        if *self.status_tx.borrow() != ConnectionStatus::Connected {
            return Err(RealtimeError::NotConnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(announcement.clone());
        Ok(())
    }

    fn subscribe_seen(&self) -> broadcast::Receiver<SeenNotification> {
        self.seen_tx.subscribe()
    }
}

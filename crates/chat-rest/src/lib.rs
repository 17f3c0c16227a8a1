//! Backend I/O for the academy chat client: REST access, realtime transports
//! and the runtime that turns [`chat_core::ChatCommand`]s into
//! [`chat_core::ChatEvent`]s.

pub mod api;
/// Cached, coalesced message retrieval.
pub mod fetcher;
pub mod realtime;
pub mod rest;
/// Command loop for the mounted conversation view.
pub mod runtime;
pub mod socketio;
/// Backend JSON shapes.
pub mod wire;

pub use api::ChatApi;
pub use fetcher::{MessageFetcher, MessageList};
pub use realtime::{
    ConnectionStatus, InMemoryTransport, ListenerGuard, RealtimeError, RealtimeTransport,
    drive_realtime,
};
pub use rest::{DEFAULT_API_BASE_URL, RestClient, RestClientConfig};
pub use runtime::{ChatRuntimeHandle, RuntimeDeps, spawn_runtime};
pub use socketio::{SocketIoTransport, default_realtime_url};

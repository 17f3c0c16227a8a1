use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chat_core::{ChatError, ConversationRef, RawMessage};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tracing::debug;

use crate::api::ChatApi;

/// Shared result of one message fetch.
pub type MessageList = Arc<[RawMessage]>;

type SharedFetch = Shared<BoxFuture<'static, Result<MessageList, ChatError>>>;

#[derive(Default)]
struct FetchState {
    cache: HashMap<String, MessageList>,
    in_flight: HashMap<String, SharedFetch>,
    /// Bumped by `invalidate`; fetches started under an older epoch never write the cache.
    epochs: HashMap<String, u64>,
}

/// Per-conversation message cache with in-flight request coalescing.
#[derive(Clone)]
pub struct MessageFetcher {
    api: Arc<dyn ChatApi>,
    state: Arc<Mutex<FetchState>>,
}

impl MessageFetcher {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(FetchState::default())),
        }
    }

    /// Most recent successful result for `conversation_id`.
    pub fn cached(&self, conversation_id: &str) -> Option<MessageList> {
        lock(&self.state).cache.get(conversation_id).cloned()
    }

    /// Drop the cached result and detach any in-flight request so the next
    /// `fetch` goes back to the backend.
    pub fn invalidate(&self, conversation_id: &str) {
        let mut state = lock(&self.state);
        state.cache.remove(conversation_id);
        state.in_flight.remove(conversation_id);
        *state.epochs.entry(conversation_id.to_owned()).or_default() += 1;
        debug!(%conversation_id, "message cache invalidated");
    }

    /// Fetch the full message list, joining a request already in flight.
    pub async fn fetch(&self, conversation: &ConversationRef) -> Result<MessageList, ChatError> {
        let shared = {
            let mut state = lock(&self.state);
            let epoch = state.epochs.get(&conversation.id).copied().unwrap_or(0);
            match state.in_flight.get(&conversation.id) {
                Some(existing) => {
                    debug!(conversation_id = %conversation.id, "joining in-flight message fetch");
                    existing.clone()
                }
                None => {
                    let request = self.start_request(conversation.clone(), epoch);
                    state
                        .in_flight
                        .insert(conversation.id.clone(), request.clone());
                    request
                }
            }
        };

        shared.await
    }

    fn start_request(&self, conversation: ConversationRef, epoch: u64) -> SharedFetch {
        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);

        async move {
            debug!(conversation_id = %conversation.id, "fetching messages");
            let result = api
                .fetch_messages(&conversation)
                .await
                .map(MessageList::from);

            let mut state = lock(&state);
            let current_epoch = state.epochs.get(&conversation.id).copied().unwrap_or(0);
            if current_epoch == epoch {
                state.in_flight.remove(&conversation.id);
                if let Ok(messages) = &result {
                    state.cache.insert(conversation.id.clone(), Arc::clone(messages));
                }
            } else {
                debug!(
                    conversation_id = %conversation.id,
                    "discarding fetch from before invalidation"
                );
            }
            result
        }
        .boxed()
        .shared()
    }
}

fn lock(state: &Mutex<FetchState>) -> MutexGuard<'_, FetchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

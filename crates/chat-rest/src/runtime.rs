//! Command loop driving one mounted conversation view.

use std::sync::Arc;

use chat_core::{
    ActionMenu, ChatChannelError, ChatChannels, ChatCommand, ChatError, ChatErrorCategory,
    ChatEvent, ConversationRef, DisplaySettings, EventStream, NormalizedMessage, ReminderAck,
    ReminderDraft, fatal_error_event, fetch_failed_event, group_by_date, mutation_failed_event,
    normalize_messages,
};
use chat_platform::{SessionKey, SessionStore, load_viewer_identity};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::ChatApi,
    fetcher::{MessageFetcher, MessageList},
    realtime::{RealtimeTransport, drive_realtime},
};

/// Collaborators injected into the runtime.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub api: Arc<dyn ChatApi>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub session: Arc<dyn SessionStore>,
    pub settings: DisplaySettings,
}

#[derive(Clone, Debug)]
pub struct ChatRuntimeHandle {
    channels: ChatChannels,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

pub fn spawn_runtime(deps: RuntimeDeps) -> ChatRuntimeHandle {
    let (channels, command_rx) = ChatChannels::new(64, 256);
    let runtime = ChatRuntime::new(channels.clone(), command_rx, deps);
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatRuntimeHandle { channels }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationKind {
    Delete,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mutation {
    Delete,
    Edit { content: String },
}

impl Mutation {
    fn kind(&self) -> MutationKind {
        match self {
            Self::Delete => MutationKind::Delete,
            Self::Edit { .. } => MutationKind::Edit,
        }
    }
}

enum Completion {
    Fetched {
        generation: u64,
        /// Sequence of the fetch that produced `result` within its view.
        fetch_seq: u64,
        result: Result<MessageList, ChatError>,
    },
    Mutated {
        generation: u64,
        conversation_id: String,
        message_id: String,
        kind: MutationKind,
        result: Result<(), ChatError>,
    },
}

struct MountedView {
    conversation: ConversationRef,
    generation: u64,
    view_id: Uuid,
    stop: CancellationToken,
    viewer_tx: watch::Sender<Option<String>>,
    realtime_task: JoinHandle<()>,
    raw: Option<MessageList>,
    rendered: Vec<NormalizedMessage>,
    /// Sequence of the most recently started fetch; older results are stale.
    latest_fetch: u64,
}

struct ChatRuntime {
    channels: ChatChannels,
    command_rx: mpsc::Receiver<ChatCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    api: Arc<dyn ChatApi>,
    fetcher: MessageFetcher,
    transport: Arc<dyn RealtimeTransport>,
    session: Arc<dyn SessionStore>,
    settings: DisplaySettings,
    view: Option<MountedView>,
    menu: ActionMenu,
    next_generation: u64,
}

impl ChatRuntime {
    fn new(
        channels: ChatChannels,
        command_rx: mpsc::Receiver<ChatCommand>,
        deps: RuntimeDeps,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            channels,
            command_rx,
            completion_tx,
            completion_rx,
            fetcher: MessageFetcher::new(Arc::clone(&deps.api)),
            api: deps.api,
            transport: deps.transport,
            session: deps.session,
            settings: deps.settings,
            view: None,
            menu: ActionMenu::default(),
            next_generation: 0,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if let Err(err) = self.handle_command(command).await {
                        warn!(code = %err.code, error = %err, "chat command failed");
                        self.channels.emit(fatal_error_event(err));
                    }
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
        }

        self.unmount().await;
        debug!("chat runtime stopped");
    }

    async fn handle_command(&mut self, command: ChatCommand) -> Result<(), ChatError> {
        match command {
            ChatCommand::OpenConversation { conversation } => {
                self.handle_open_conversation(conversation).await;
                Ok(())
            }
            ChatCommand::CloseConversation => {
                if self.view.is_none() {
                    return Err(ChatError::no_open_conversation("close conversation"));
                }
                self.unmount().await;
                Ok(())
            }
            ChatCommand::RefreshMessages => {
                let conversation_id = self
                    .require_view("refresh messages")?
                    .conversation
                    .id
                    .clone();
                self.fetcher.invalidate(&conversation_id);
                self.start_fetch();
                Ok(())
            }
            ChatCommand::ReloadIdentity => {
                self.require_view("reload identity")?;
                self.render();
                Ok(())
            }
            ChatCommand::OpenActionMenu { message_id } => self.handle_open_menu(&message_id),
            ChatCommand::CloseActionMenu => {
                if self.menu.close() {
                    self.emit_menu();
                }
                Ok(())
            }
            ChatCommand::PointerOutsideMenu => {
                if self.menu.pointer_outside() {
                    self.emit_menu();
                }
                Ok(())
            }
            ChatCommand::DeleteMessage { message_id } => {
                self.handle_mutation(message_id, Mutation::Delete);
                Ok(())
            }
            ChatCommand::BeginEdit { message_id } => {
                self.handle_begin_edit(message_id);
                Ok(())
            }
            ChatCommand::SubmitEdit {
                message_id,
                new_content,
            } => {
                self.handle_mutation(
                    message_id,
                    Mutation::Edit {
                        content: new_content,
                    },
                );
                Ok(())
            }
            ChatCommand::CreateReminder {
                client_txn_id,
                draft,
            } => {
                self.handle_create_reminder(client_txn_id, draft);
                Ok(())
            }
        }
    }

    async fn handle_open_conversation(&mut self, conversation: ConversationRef) {
        self.unmount().await;

        self.next_generation += 1;
        let generation = self.next_generation;
        let view_id = Uuid::new_v4();
        let stop = CancellationToken::new();
        let viewer = self.read_viewer().map(|identity| identity.user_id);
        let (viewer_tx, viewer_rx) = watch::channel(viewer);

        info!(conversation_id = %conversation.id, %view_id, "conversation mounted");
        self.channels.emit(ChatEvent::ConversationOpened {
            conversation: conversation.clone(),
        });

        let realtime_task = tokio::spawn(drive_realtime(
            Arc::clone(&self.transport),
            self.channels.clone(),
            conversation.id.clone(),
            viewer_rx,
            stop.child_token(),
        ));

        let cached = self.fetcher.cached(&conversation.id);
        self.view = Some(MountedView {
            conversation,
            generation,
            view_id,
            stop,
            viewer_tx,
            realtime_task,
            raw: cached,
            rendered: Vec::new(),
            latest_fetch: 0,
        });

        match self.view.as_ref().and_then(|view| view.raw.as_ref()) {
            Some(_) => self.render(),
            None => self.emit_loading(),
        }
        self.start_fetch();
    }

    /// Tear down the mounted view, waiting until its realtime listener is gone.
    async fn unmount(&mut self) {
        let Some(view) = self.view.take() else {
            return;
        };

        view.stop.cancel();
        if let Err(err) = view.realtime_task.await {
            warn!(view_id = %view.view_id, error = %err, "realtime driver task failed");
        }
        if self.menu.close() {
            self.emit_menu();
        }

        info!(
            conversation_id = %view.conversation.id,
            view_id = %view.view_id,
            "conversation unmounted"
        );
        self.channels.emit(ChatEvent::ConversationClosed {
            conversation_id: view.conversation.id,
        });
    }

    fn start_fetch(&mut self) {
        let Some(view) = self.view.as_mut() else {
            return;
        };

        view.latest_fetch += 1;
        let fetch_seq = view.latest_fetch;
        let fetcher = self.fetcher.clone();
        let conversation = view.conversation.clone();
        let generation = view.generation;
        let stop = view.stop.child_token();
        let completion_tx = self.completion_tx.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = stop.cancelled() => return,
                result = fetcher.fetch(&conversation) => result,
            };
            let _ = completion_tx.send(Completion::Fetched {
                generation,
                fetch_seq,
                result,
            });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Fetched {
                generation,
                fetch_seq,
                result,
            } => {
                let Some(view) = self.current_view_mut(generation) else {
                    debug!(generation, "dropping fetch result for unmounted view");
                    return;
                };
                if fetch_seq < view.latest_fetch {
                    debug!(
                        conversation_id = %view.conversation.id,
                        fetch_seq,
                        latest = view.latest_fetch,
                        "dropping superseded fetch result"
                    );
                    return;
                }
                match result {
                    Ok(messages) => {
                        view.raw = Some(messages);
                        self.render();
                    }
                    Err(err) => {
                        warn!(
                            conversation_id = %view.conversation.id,
                            code = %err.code,
                            "message fetch failed"
                        );
                        let conversation_id = view.conversation.id.clone();
                        self.channels.emit(fetch_failed_event(conversation_id, err));
                    }
                }
            }
            Completion::Mutated {
                generation,
                conversation_id,
                message_id,
                kind,
                result,
            } => {
                if result.is_ok() {
                    self.fetcher.invalidate(&conversation_id);
                }
                if self.current_view_mut(generation).is_none() {
                    debug!(generation, %message_id, "dropping mutation result for unmounted view");
                    return;
                }

                match result {
                    Ok(()) => {
                        if self.menu.close() {
                            self.emit_menu();
                        }
                        let event = match kind {
                            MutationKind::Delete => ChatEvent::MessageDeleted {
                                conversation_id,
                                message_id,
                            },
                            MutationKind::Edit => ChatEvent::MessageEdited {
                                conversation_id,
                                message_id,
                            },
                        };
                        self.channels.emit(event);
                        self.start_fetch();
                    }
                    Err(err) => {
                        warn!(%message_id, ?kind, code = %err.code, "message mutation failed");
                        self.channels.emit(mutation_failed_event(message_id, err));
                    }
                }
            }
        }
    }

    /// One render pass: identity is read once and every `is_self` flag is
    /// computed against it.
    fn render(&mut self) {
        let identity = self.read_viewer();
        let settings = self.settings;
        let Some(view) = self.view.as_mut() else {
            return;
        };

        let viewer_id = identity.map(|identity| identity.user_id);
        view.viewer_tx.send_if_modified(|current| {
            if *current == viewer_id {
                return false;
            }
            current.clone_from(&viewer_id);
            true
        });

        let Some(raw) = view.raw.as_ref() else {
            return;
        };
        let conversation_id = view.conversation.id.clone();

        let Some(viewer_id) = viewer_id else {
            view.rendered.clear();
            if self.menu.close() {
                self.emit_menu();
            }
            self.channels
                .emit(ChatEvent::IdentityPending { conversation_id });
            return;
        };

        view.rendered = normalize_messages(raw, Some(&viewer_id), &settings);
        let mut newest_first = view.rendered.clone();
        newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let buckets = group_by_date(newest_first);

        if let Some(open) = self.menu.open_message_id()
            && !view.rendered.iter().any(|message| message.id == open)
        {
            self.menu.close();
            self.emit_menu();
        }

        debug!(%conversation_id, buckets = buckets.len(), "messages rendered");
        self.channels.emit(ChatEvent::MessagesUpdated {
            conversation_id,
            buckets,
        });
    }

    fn handle_open_menu(&mut self, message_id: &str) -> Result<(), ChatError> {
        let is_self = self
            .rendered_message(message_id)
            .ok_or_else(|| ChatError::unknown_message(message_id))?
            .is_self;

        if self.menu.open(message_id, is_self) {
            self.emit_menu();
        } else if !is_self {
            debug!(%message_id, "action menu is only offered on own messages");
        }
        Ok(())
    }

    fn handle_begin_edit(&mut self, message_id: String) {
        let content = match self.own_message(&message_id) {
            Ok(message) => message.content.clone(),
            Err(err) => {
                self.channels.emit(mutation_failed_event(message_id, err));
                return;
            }
        };

        if self.menu.close() {
            self.emit_menu();
        }
        self.channels.emit(ChatEvent::EditRequested {
            message_id,
            content,
        });
    }

    fn handle_mutation(&mut self, message_id: String, mut mutation: Mutation) {
        if let Err(err) = self.own_message(&message_id) {
            self.channels.emit(mutation_failed_event(message_id, err));
            return;
        }
        if let Mutation::Edit { content } = &mut mutation {
            *content = content.trim().to_owned();
            if content.is_empty() {
                let err = ChatError::new(
                    ChatErrorCategory::Validation,
                    "edit_content_empty",
                    "edited message cannot be empty",
                );
                self.channels.emit(mutation_failed_event(message_id, err));
                return;
            }
        }
        let Some(view) = self.view.as_ref() else {
            return;
        };

        let api = Arc::clone(&self.api);
        let completion_tx = self.completion_tx.clone();
        let generation = view.generation;
        let conversation_id = view.conversation.id.clone();
        let kind = mutation.kind();
        debug!(%conversation_id, %message_id, ?kind, "submitting message mutation");

        tokio::spawn(async move {
            let result = match mutation {
                Mutation::Delete => api.delete_message(&message_id).await,
                Mutation::Edit { content } => api.edit_message(&message_id, &content).await,
            };
            let _ = completion_tx.send(Completion::Mutated {
                generation,
                conversation_id,
                message_id,
                kind,
                result,
            });
        });
    }

    fn handle_create_reminder(&self, client_txn_id: String, draft: ReminderDraft) {
        let role = match self.session.get_optional(SessionKey::Role) {
            Ok(role) => role,
            Err(err) => {
                warn!(error = %err, "role unavailable; validating reminder without one");
                None
            }
        };

        let draft = match draft.validate(role.as_deref()) {
            Ok(draft) => draft,
            Err(err) => {
                self.channels.emit(reminder_ack(client_txn_id, Err(err)));
                return;
            }
        };

        let api = Arc::clone(&self.api);
        let channels = self.channels.clone();
        tokio::spawn(async move {
            let result = api.create_reminder(&draft).await;
            if let Err(err) = &result {
                warn!(%client_txn_id, code = %err.code, "reminder creation failed");
            }
            channels.emit(reminder_ack(client_txn_id, result));
        });
    }

    fn read_viewer(&self) -> Option<chat_core::ViewerIdentity> {
        match load_viewer_identity(self.session.as_ref()) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "viewer identity could not be read");
                None
            }
        }
    }

    fn require_view(&self, action: &str) -> Result<&MountedView, ChatError> {
        self.view
            .as_ref()
            .ok_or_else(|| ChatError::no_open_conversation(action))
    }

    fn current_view_mut(&mut self, generation: u64) -> Option<&mut MountedView> {
        self.view
            .as_mut()
            .filter(|view| view.generation == generation && !view.stop.is_cancelled())
    }

    fn rendered_message(&self, message_id: &str) -> Option<&NormalizedMessage> {
        self.view
            .as_ref()?
            .rendered
            .iter()
            .find(|message| message.id == message_id)
    }

    fn own_message(&self, message_id: &str) -> Result<&NormalizedMessage, ChatError> {
        let message = self
            .rendered_message(message_id)
            .ok_or_else(|| ChatError::unknown_message(message_id))?;
        if !message.is_self {
            return Err(ChatError::new(
                ChatErrorCategory::Validation,
                "not_message_sender",
                format!("message '{message_id}' was sent by another participant"),
            ));
        }
        Ok(message)
    }

    fn emit_loading(&self) {
        if let Some(view) = self.view.as_ref() {
            self.channels.emit(ChatEvent::MessagesLoading {
                conversation_id: view.conversation.id.clone(),
            });
        }
    }

    fn emit_menu(&self) {
        self.channels.emit(ChatEvent::ActionMenuChanged {
            open_message_id: self.menu.open_message_id().map(ToOwned::to_owned),
        });
    }
}

fn reminder_ack(client_txn_id: String, result: Result<(), ChatError>) -> ChatEvent {
    match result {
        Ok(()) => ChatEvent::ReminderAck(ReminderAck {
            client_txn_id,
            error_code: None,
            message: None,
        }),
        Err(err) => ChatEvent::ReminderAck(ReminderAck {
            client_txn_id,
            error_code: Some(err.code),
            message: Some(err.message),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, PoisonError},
        time::Duration,
    };

    use async_trait::async_trait;
    use chat_core::{ReminderKind, SenderProfile};
    use chat_platform::InMemorySessionStore;
    use chrono::{TimeZone, Utc};
    use tokio::{sync::Notify, time::timeout};

    use chat_core::RawMessage;

    use super::*;
    use crate::realtime::{ConnectionStatus, InMemoryTransport};

    #[derive(Default)]
    struct FakeApi {
        messages: Mutex<Vec<RawMessage>>,
        fail_fetch: bool,
        fail_mutations: bool,
        fetches: Mutex<usize>,
        /// Fetch number that snapshots the list, then waits on the gate.
        held_fetch: Option<(usize, Arc<Notify>)>,
        finished_fetches: Mutex<usize>,
        reminders: Mutex<Vec<ReminderDraft>>,
    }

    impl FakeApi {
        fn with_messages(messages: Vec<RawMessage>) -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(messages),
                ..Self::default()
            })
        }

        fn fetch_count(&self) -> usize {
            *self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn finished_count(&self) -> usize {
            *self
                .finished_fetches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }

    fn mutation_error() -> ChatError {
        ChatError::new(ChatErrorCategory::Auth, "http_error", "Forbidden")
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn fetch_messages(
            &self,
            _conversation: &ConversationRef,
        ) -> Result<Vec<RawMessage>, ChatError> {
            let number = {
                let mut fetches = self.fetches.lock().unwrap_or_else(PoisonError::into_inner);
                *fetches += 1;
                *fetches
            };
            if self.fail_fetch {
                return Err(ChatError::new(
                    ChatErrorCategory::Network,
                    "http_error",
                    "Something went wrong",
                ));
            }
            let snapshot = self.messages.lock().expect("lock").clone();
            if let Some((held, gate)) = &self.held_fetch
                && *held == number
            {
                gate.notified().await;
            }
            *self.finished_fetches.lock().expect("lock") += 1;
            Ok(snapshot)
        }

        async fn delete_message(&self, message_id: &str) -> Result<(), ChatError> {
            if self.fail_mutations {
                return Err(mutation_error());
            }
            self.messages
                .lock()
                .expect("lock")
                .retain(|message| message.id != message_id);
            Ok(())
        }

        async fn edit_message(&self, message_id: &str, new_content: &str) -> Result<(), ChatError> {
            if self.fail_mutations {
                return Err(mutation_error());
            }
            for message in self.messages.lock().expect("lock").iter_mut() {
                if message.id == message_id {
                    message.content = new_content.to_owned();
                }
            }
            Ok(())
        }

        async fn create_reminder(&self, draft: &ReminderDraft) -> Result<(), ChatError> {
            self.reminders.lock().expect("lock").push(draft.clone());
            Ok(())
        }
    }

    fn raw(id: &str, sender: &str, hour: u32) -> RawMessage {
        raw_on(id, sender, 1, hour)
    }

    fn raw_on(id: &str, sender: &str, day: u32, hour: u32) -> RawMessage {
        RawMessage {
            id: id.into(),
            content: format!("message {id}"),
            image: None,
            created_at: Utc
                .with_ymd_and_hms(2024, 1, day, hour, 0, 0)
                .single()
                .expect("valid timestamp"),
            sender: SenderProfile {
                id: sender.into(),
                display_name: sender.into(),
                avatar: None,
            },
        }
    }

    fn session(viewer: Option<&str>) -> InMemorySessionStore {
        InMemorySessionStore::with_values(
            viewer.map(|viewer| (SessionKey::UserId, viewer.to_owned())),
        )
    }

    async fn eventually(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition timeout");
    }

    struct Harness {
        handle: ChatRuntimeHandle,
        events: EventStream,
        transport: InMemoryTransport,
        session: InMemorySessionStore,
    }

    fn harness(api: Arc<FakeApi>, viewer: Option<&str>, status: ConnectionStatus) -> Harness {
        let transport = InMemoryTransport::new(status);
        let session = session(viewer);
        let handle = spawn_runtime(RuntimeDeps {
            api,
            transport: Arc::new(transport.clone()),
            session: Arc::new(session.clone()),
            settings: DisplaySettings::default(),
        });
        let events = handle.subscribe();
        Harness {
            handle,
            events,
            transport,
            session,
        }
    }

    impl Harness {
        async fn send(&self, command: ChatCommand) {
            self.handle.send(command).await.expect("command should enqueue");
        }

        async fn open(&self, id: &str) {
            self.send(ChatCommand::OpenConversation {
                conversation: ConversationRef::direct(id),
            })
            .await;
        }

        /// Next event accepted by `pick`, skipping everything else.
        async fn expect<T>(&mut self, mut pick: impl FnMut(&ChatEvent) -> Option<T>) -> T {
            timeout(Duration::from_secs(2), async {
                loop {
                    let event = self.events.recv().await.expect("event receive");
                    if let ChatEvent::FatalError { code, .. } = &event {
                        panic!("unexpected fatal error: {code}");
                    }
                    if let Some(value) = pick(&event) {
                        return value;
                    }
                }
            })
            .await
            .expect("event timeout")
        }

        async fn next_buckets(&mut self) -> Vec<Vec<String>> {
            self.expect(|event| match event {
                ChatEvent::MessagesUpdated { buckets, .. } => Some(
                    buckets
                        .iter()
                        .map(|bucket| bucket.messages.iter().map(|m| m.id.clone()).collect())
                        .collect(),
                ),
                _ => None,
            })
            .await
        }

        async fn next_menu(&mut self) -> Option<String> {
            self.expect(|event| match event {
                ChatEvent::ActionMenuChanged { open_message_id } => Some(open_message_id.clone()),
                _ => None,
            })
            .await
        }
    }

    #[tokio::test]
    async fn renders_single_day_bucket_in_ascending_order() {
        let api = FakeApi::with_messages(vec![raw("2", "A", 9), raw("1", "B", 10)]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;

        let event = h
            .expect(|event| match event {
                ChatEvent::MessagesUpdated { buckets, .. } => Some(buckets.clone()),
                _ => None,
            })
            .await;
        assert_eq!(event.len(), 1);
        assert_eq!(event[0].date_label, "01 January 2024");
        let ids: Vec<_> = event[0].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["2", "1"]);
        assert!(!event[0].messages[0].is_self);
        assert!(event[0].messages[1].is_self);
    }

    #[tokio::test]
    async fn buckets_run_newest_day_first_with_ascending_messages() {
        let api = FakeApi::with_messages(vec![
            raw_on("a", "A", 2, 9),
            raw_on("b", "B", 1, 18),
            raw_on("c", "A", 3, 7),
            raw_on("d", "B", 2, 8),
            raw_on("e", "A", 1, 6),
            raw_on("f", "B", 3, 12),
        ]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;

        let buckets = h
            .expect(|event| match event {
                ChatEvent::MessagesUpdated { buckets, .. } => Some(buckets.clone()),
                _ => None,
            })
            .await;
        let labels: Vec<_> = buckets.iter().map(|b| b.date_label.as_str()).collect();
        assert_eq!(
            labels,
            ["03 January 2024", "02 January 2024", "01 January 2024"]
        );
        let ids: Vec<Vec<_>> = buckets
            .iter()
            .map(|bucket| bucket.messages.iter().map(|m| m.id.as_str()).collect())
            .collect();
        assert_eq!(ids, [["c", "f"], ["d", "a"], ["e", "b"]]);
    }

    #[tokio::test]
    async fn fetch_started_before_delete_cannot_restore_deleted_message() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeApi {
            messages: Mutex::new(vec![raw("1", "A", 9), raw("2", "B", 10)]),
            held_fetch: Some((2, Arc::clone(&gate))),
            ..FakeApi::default()
        });
        let mut h = harness(api.clone(), Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        assert_eq!(h.next_buckets().await, vec![vec!["1", "2"]]);

        h.send(ChatCommand::RefreshMessages).await;
        eventually(|| api.fetch_count() == 2).await;

        h.send(ChatCommand::DeleteMessage {
            message_id: "2".into(),
        })
        .await;
        h.expect(|event| match event {
            ChatEvent::MessageDeleted { message_id, .. } => (message_id == "2").then_some(()),
            _ => None,
        })
        .await;
        assert_eq!(h.next_buckets().await, vec![vec!["1"]]);

        gate.notify_one();
        eventually(|| api.finished_count() == 3).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }

        h.send(ChatCommand::ReloadIdentity).await;
        assert_eq!(h.next_buckets().await, vec![vec!["1"]]);
    }

    #[tokio::test]
    async fn delete_invalidates_closes_menu_and_refetches() {
        let api = FakeApi::with_messages(vec![raw("1", "A", 9), raw("2", "B", 10)]);
        let mut h = harness(api.clone(), Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        assert_eq!(h.next_buckets().await, vec![vec!["1", "2"]]);

        h.send(ChatCommand::OpenActionMenu {
            message_id: "2".into(),
        })
        .await;
        assert_eq!(h.next_menu().await.as_deref(), Some("2"));

        h.send(ChatCommand::DeleteMessage {
            message_id: "2".into(),
        })
        .await;
        assert_eq!(h.next_menu().await, None);
        h.expect(|event| match event {
            ChatEvent::MessageDeleted { message_id, .. } => (message_id == "2").then_some(()),
            _ => None,
        })
        .await;
        assert_eq!(h.next_buckets().await, vec![vec!["1"]]);
        assert_eq!(api.fetch_count(), 2);
    }

    #[tokio::test]
    async fn failed_delete_keeps_menu_open() {
        let api = Arc::new(FakeApi {
            messages: Mutex::new(vec![raw("2", "B", 10)]),
            fail_mutations: true,
            ..FakeApi::default()
        });
        let mut h = harness(api.clone(), Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;

        h.send(ChatCommand::OpenActionMenu {
            message_id: "2".into(),
        })
        .await;
        assert_eq!(h.next_menu().await.as_deref(), Some("2"));

        h.send(ChatCommand::DeleteMessage {
            message_id: "2".into(),
        })
        .await;
        let code = h
            .expect(|event| match event {
                ChatEvent::ActionMenuChanged { .. } => panic!("menu must stay open"),
                ChatEvent::MutationFailed { error_code, .. } => Some(error_code.clone()),
                _ => None,
            })
            .await;
        assert_eq!(code, "http_error");
        assert_eq!(api.fetch_count(), 1);
    }

    #[tokio::test]
    async fn opening_second_menu_replaces_first_and_outside_press_closes() {
        let api = FakeApi::with_messages(vec![
            raw("1", "A", 8),
            raw("2", "B", 9),
            raw("3", "B", 10),
        ]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;

        for id in ["2", "3"] {
            h.send(ChatCommand::OpenActionMenu {
                message_id: id.into(),
            })
            .await;
        }
        assert_eq!(h.next_menu().await.as_deref(), Some("2"));
        assert_eq!(h.next_menu().await.as_deref(), Some("3"));

        h.send(ChatCommand::PointerOutsideMenu).await;
        assert_eq!(h.next_menu().await, None);

        // Another participant's message never gets a menu.
        h.send(ChatCommand::OpenActionMenu {
            message_id: "1".into(),
        })
        .await;
        h.send(ChatCommand::OpenActionMenu {
            message_id: "2".into(),
        })
        .await;
        assert_eq!(h.next_menu().await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn absent_connection_skips_announcements_silently() {
        let api = FakeApi::with_messages(vec![raw("1", "A", 9)]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Disconnected);
        h.open("c-1").await;

        assert_eq!(h.next_buckets().await, vec![vec!["1"]]);
        eventually(|| h.transport.listener_count() == 1).await;
        assert!(h.transport.sent().is_empty());

        h.send(ChatCommand::CloseConversation).await;
        h.expect(|event| match event {
            ChatEvent::ConversationClosed { .. } => Some(()),
            _ => None,
        })
        .await;
        assert_eq!(h.transport.listener_count(), 0);
    }

    #[tokio::test]
    async fn switching_conversations_keeps_one_listener() {
        let api = FakeApi::with_messages(vec![raw("1", "A", 9)]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;
        h.open("c-2").await;
        h.expect(|event| match event {
            ChatEvent::ConversationOpened { conversation } => {
                (conversation.id == "c-2").then_some(())
            }
            _ => None,
        })
        .await;
        h.next_buckets().await;

        let joins = || {
            h.transport
                .sent()
                .iter()
                .filter(|announcement| announcement.event_name() == chat_core::JOIN_CHAT_EVENT)
                .count()
        };
        eventually(|| joins() == 2).await;
        assert_eq!(h.transport.listener_count(), 1);
    }

    #[tokio::test]
    async fn renders_nothing_until_identity_is_known() {
        let api = FakeApi::with_messages(vec![raw("1", "A", 9)]);
        let mut h = harness(api, None, ConnectionStatus::Connected);
        h.open("c-1").await;
        h.expect(|event| match event {
            ChatEvent::IdentityPending { .. } => Some(()),
            ChatEvent::MessagesUpdated { .. } => panic!("rendered without identity"),
            _ => None,
        })
        .await;

        h.session
            .set(SessionKey::UserId, "A")
            .expect("session write");
        h.send(ChatCommand::ReloadIdentity).await;
        assert_eq!(h.next_buckets().await, vec![vec!["1"]]);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_inline() {
        let api = Arc::new(FakeApi {
            fail_fetch: true,
            ..FakeApi::default()
        });
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;

        let (conversation_id, message) = h
            .expect(|event| match event {
                ChatEvent::FetchFailed {
                    conversation_id,
                    message,
                    ..
                } => Some((conversation_id.clone(), message.clone())),
                _ => None,
            })
            .await;
        assert_eq!(conversation_id, "c-1");
        assert_eq!(message, "Something went wrong");
    }

    #[tokio::test]
    async fn begin_edit_seeds_composer_and_submit_persists() {
        let api = FakeApi::with_messages(vec![raw("2", "B", 10)]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;

        h.send(ChatCommand::BeginEdit {
            message_id: "2".into(),
        })
        .await;
        let content = h
            .expect(|event| match event {
                ChatEvent::EditRequested { content, .. } => Some(content.clone()),
                _ => None,
            })
            .await;
        assert_eq!(content, "message 2");

        h.send(ChatCommand::SubmitEdit {
            message_id: "2".into(),
            new_content: " see you at 9 ".into(),
        })
        .await;
        h.expect(|event| match event {
            ChatEvent::MessageEdited { .. } => Some(()),
            _ => None,
        })
        .await;
        let buckets = h
            .expect(|event| match event {
                ChatEvent::MessagesUpdated { buckets, .. } => Some(buckets.clone()),
                _ => None,
            })
            .await;
        assert_eq!(buckets[0].messages[0].content, "see you at 9");
    }

    #[tokio::test]
    async fn blank_edit_is_rejected_without_touching_the_message() {
        let api = FakeApi::with_messages(vec![raw("2", "B", 10)]);
        let mut h = harness(api.clone(), Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;

        h.send(ChatCommand::SubmitEdit {
            message_id: "2".into(),
            new_content: "   ".into(),
        })
        .await;
        let code = h
            .expect(|event| match event {
                ChatEvent::MessageDeleted { .. } | ChatEvent::MessageEdited { .. } => {
                    panic!("blank edit must not reach the backend")
                }
                ChatEvent::MutationFailed { error_code, .. } => Some(error_code.clone()),
                _ => None,
            })
            .await;
        assert_eq!(code, "edit_content_empty");

        let messages = api.messages.lock().expect("lock").clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "message 2");
        assert_eq!(api.fetch_count(), 1);
    }

    #[tokio::test]
    async fn editing_another_participants_message_is_rejected() {
        let api = FakeApi::with_messages(vec![raw("1", "A", 9)]);
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.open("c-1").await;
        h.next_buckets().await;

        h.send(ChatCommand::BeginEdit {
            message_id: "1".into(),
        })
        .await;
        let code = h
            .expect(|event| match event {
                ChatEvent::MutationFailed { error_code, .. } => Some(error_code.clone()),
                _ => None,
            })
            .await;
        assert_eq!(code, "not_message_sender");
    }

    #[tokio::test]
    async fn reminder_kind_is_checked_against_role_before_submission() {
        let api = FakeApi::with_messages(Vec::new());
        let mut h = harness(api.clone(), Some("B"), ConnectionStatus::Connected);
        h.session
            .set(SessionKey::Role, "player")
            .expect("session write");

        let draft = ReminderDraft {
            title: "Match day".into(),
            description: "Away game".into(),
            date: "2024-03-02".into(),
            kind: ReminderKind::Match,
            timezone: "UTC".into(),
        };
        h.send(ChatCommand::CreateReminder {
            client_txn_id: "tx-1".into(),
            draft: draft.clone(),
        })
        .await;
        let ack = h
            .expect(|event| match event {
                ChatEvent::ReminderAck(ack) => Some(ack.clone()),
                _ => None,
            })
            .await;
        assert_eq!(ack.client_txn_id, "tx-1");
        assert_eq!(ack.error_code.as_deref(), Some("reminder_kind_not_allowed"));

        h.send(ChatCommand::CreateReminder {
            client_txn_id: "tx-2".into(),
            draft: ReminderDraft {
                kind: ReminderKind::Training,
                ..draft
            },
        })
        .await;
        let ack = h
            .expect(|event| match event {
                ChatEvent::ReminderAck(ack) => Some(ack.clone()),
                _ => None,
            })
            .await;
        assert_eq!(ack.client_txn_id, "tx-2");
        assert_eq!(ack.error_code, None);
        assert_eq!(api.reminders.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn commands_without_open_conversation_emit_fatal_error() {
        let api = FakeApi::with_messages(Vec::new());
        let mut h = harness(api, Some("B"), ConnectionStatus::Connected);
        h.send(ChatCommand::RefreshMessages).await;

        let event = timeout(Duration::from_secs(2), h.events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");
        match event {
            ChatEvent::FatalError { code, recoverable, .. } => {
                assert_eq!(code, "no_open_conversation");
                assert!(!recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

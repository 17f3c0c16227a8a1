mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use chat_core::{
    ChatChannelError, ChatCommand, ChatError, ContentKind, ConversationViewState, ReconnectPolicy,
    ViewBody,
};
use chat_platform::{InMemorySessionStore, SessionKey, SessionStore};
use chat_rest::{
    ChatApi, RealtimeTransport, RestClient, RestClientConfig, RuntimeDeps, SocketIoTransport,
    spawn_runtime,
};
use config::{ChatConfig, ConfigError};
use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{error, info, warn};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
enum SmokeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Channel(#[from] ChatChannelError),
    #[error("conversation did not settle within {0:?}")]
    Timeout(Duration),
    #[error("runtime event stream closed")]
    EventsClosed,
}

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        error!(error = %err, "chat smoke failed");
        eprintln!("chat-smoke: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SmokeError> {
    let config = ChatConfig::from_env()?;
    let session: Arc<dyn SessionStore> = Arc::new(seed_session(&config));

    let rest = Arc::new(RestClient::new(
        RestClientConfig {
            base_url: config.api_base_url.clone(),
            request_timeout: config.request_timeout,
        },
        Arc::clone(&session),
    )?);

    let Some(conversation) = config.conversation.clone() else {
        info!(
            api = %rest.base_url(),
            "no conversation configured; set ACADEMY_CONVERSATION_ID to fetch one"
        );
        return Ok(());
    };

    let transport = Arc::new(SocketIoTransport::connect(
        config.realtime_url.clone(),
        config.auth_token.clone(),
        ReconnectPolicy::default(),
    ));
    let handle = spawn_runtime(RuntimeDeps {
        api: Arc::clone(&rest) as Arc<dyn ChatApi>,
        transport: Arc::clone(&transport) as Arc<dyn RealtimeTransport>,
        session,
        settings: config.display,
    });
    let mut events = handle.subscribe();

    info!(conversation_id = %conversation.id, kind = ?conversation.kind, "opening conversation");
    handle
        .send(ChatCommand::OpenConversation { conversation })
        .await?;

    let mut view = ConversationViewState::default();
    timeout(SETTLE_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let chat_core::ChatEvent::FatalError { code, message, .. } = &event {
                        warn!(%code, %message, "runtime reported an error");
                    }
                    view.apply(&event);
                    if settled(&view.snapshot().body) {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "smoke client lagged behind events")
                }
                Err(RecvError::Closed) => return Err(SmokeError::EventsClosed),
            }
        }
    })
    .await
    .map_err(|_| SmokeError::Timeout(SETTLE_TIMEOUT))??;

    print_view(&view, &rest);

    handle.send(ChatCommand::CloseConversation).await?;
    transport.shutdown();
    Ok(())
}

fn seed_session(config: &ChatConfig) -> InMemorySessionStore {
    let values = [
        (SessionKey::AuthToken, config.auth_token.clone()),
        (SessionKey::UserId, config.user_id.clone()),
        (SessionKey::Role, config.role.clone()),
    ];
    InMemorySessionStore::with_values(
        values
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value))),
    )
}

fn settled(body: &ViewBody) -> bool {
    matches!(
        body,
        ViewBody::Messages(_)
            | ViewBody::Empty
            | ViewBody::Failed { .. }
            | ViewBody::AwaitingIdentity
    )
}

fn print_view(view: &ConversationViewState, rest: &RestClient) {
    if let Some(text) = view.status_text() {
        println!("{text}");
        return;
    }

    let snapshot = view.snapshot();
    match snapshot.body {
        ViewBody::AwaitingIdentity => println!("viewer identity unknown; set ACADEMY_USER_ID"),
        ViewBody::Messages(buckets) => {
            for bucket in buckets {
                println!("== {} ==", bucket.date_label);
                for message in bucket.messages {
                    let who = if message.is_self {
                        "you"
                    } else {
                        message.sender.display_name.as_str()
                    };
                    let body = match (message.kind, message.image.as_deref()) {
                        (ContentKind::Image, Some(reference)) => {
                            match rest.resolve_media_url(reference) {
                                Ok(url) => format!("[image] {url}"),
                                Err(_) => format!("[image] {reference}"),
                            }
                        }
                        _ => message.content,
                    };
                    println!("  {} {who}: {body}", message.time_label);
                }
            }
        }
        _ => {}
    }
}

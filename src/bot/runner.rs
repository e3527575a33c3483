//! Telegram runtime entrypoint.

use crate::bot::dispatcher::SubmissionDispatcher;
use crate::bot::poller::PollLoop;
use crate::bot::tokens::TokenRegistry;
use crate::bot::tracker::{CompletionTracker, Origin};
use crate::bot::transport::{ChatTransport, TelegramTransport};
use crate::bot::views::{DefaultDownloadView, DownloadView};
use crate::bot::UnauthorizedCache;
use crate::config::{
    Settings, CALLBACK_ANSWER_LIMIT, RPC_HTTP_TIMEOUT, UNAUTHORIZED_CACHE_MAX_SIZE,
    UNAUTHORIZED_COOLDOWN_SECS,
};
use crate::transmission::{TorrentEngine, TransmissionClient};
use crate::utils::truncate_bytes;
use std::sync::Arc;
use teloxide::dispatching::{ShutdownToken, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ParseMode};
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands available to allow-listed chats
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show usage help
    #[command(description = "usage help")]
    Start,
    /// Show tracked downloads
    #[command(description = "active downloads")]
    Status,
}

/// Run the bot until SIGINT/SIGTERM.
///
/// Exits the process if the Transmission daemon cannot be reached at startup.
pub async fn run_bot(settings: Arc<Settings>) {
    let engine = init_engine(&settings).await;

    let bot = Bot::new(settings.bot_token.clone());
    let shutdown = CancellationToken::new();
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let tokens = Arc::new(TokenRegistry::new());
    let tracker = Arc::new(CompletionTracker::new());

    if settings.categories.is_empty() {
        warn!("No categories configured: torrents will not be offered any buttons");
    }
    info!(
        categories = settings.categories.len(),
        chats = settings.chat_whitelist.len(),
        youtube = settings.youtube.enabled,
        "Submission dispatcher initialized"
    );

    let dispatcher = Arc::new(SubmissionDispatcher::new(
        &settings,
        tokens,
        Arc::clone(&tracker),
        Arc::clone(&engine),
        Arc::clone(&transport),
        shutdown.clone(),
    ));

    let poll_loop = PollLoop::new(
        tracker,
        engine,
        transport,
        settings.poll_interval(),
        shutdown.clone(),
    );
    let poll_handle = tokio::spawn(poll_loop.run());

    let unauthorized_cache = Arc::new(UnauthorizedCache::new(
        UNAUTHORIZED_COOLDOWN_SECS,
        UNAUTHORIZED_CACHE_MAX_SIZE,
    ));

    let mut updates = Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![dispatcher, Arc::clone(&unauthorized_cache)])
        .build();

    spawn_signal_listener(updates.shutdown_token(), shutdown.clone());

    info!("Bot is running...");
    updates.dispatch().await;

    // Covers the dispatcher stopping on its own as well.
    shutdown.cancel();
    if let Err(e) = poll_handle.await {
        error!("Poll loop task failed: {}", e);
    }
    info!(
        silenced_unauthorized = unauthorized_cache.silenced_count(),
        "Bot stopped"
    );
}

async fn init_engine(settings: &Settings) -> Arc<dyn TorrentEngine> {
    let rpc = &settings.transmission_rpc;
    let client = match TransmissionClient::new(&rpc.url, &rpc.user, &rpc.password, RPC_HTTP_TIMEOUT)
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create Transmission client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = client.check_connection().await {
        error!(
            endpoint = %client.endpoint().url(),
            "Transmission connection check failed: {}", e
        );
        std::process::exit(1);
    }

    Arc::new(client)
}

/// Cancel `shutdown` and stop the update dispatcher on SIGINT or SIGTERM.
fn spawn_signal_listener(updates: ShutdownToken, shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
        match updates.shutdown() {
            Ok(done) => done.await,
            Err(e) => debug!("Update dispatcher was not running: {}", e),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for SIGINT: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Cannot listen for SIGINT: {}", e);
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .branch(
                    dptree::filter(|q: CallbackQuery, d: Arc<SubmissionDispatcher>| {
                        callback_origin(&q).is_some_and(|o| d.is_allowed_chat(o.chat_id))
                    })
                    .endpoint(handle_category_callback),
                )
                // Callbacks from other chats are dropped silently
                .endpoint(handle_unauthorized_callback),
        )
        .branch(
            Update::filter_message()
                .branch(
                    // Main branch for allow-listed chats
                    dptree::filter(|msg: Message, d: Arc<SubmissionDispatcher>| {
                        d.is_allowed_chat(msg.chat.id.0)
                    })
                    .branch(
                        dptree::entry()
                            .filter_command::<Command>()
                            .endpoint(handle_command),
                    )
                    .branch(
                        dptree::filter(|msg: Message| msg.text().is_some())
                            .endpoint(handle_text),
                    )
                    .branch(
                        dptree::filter(|msg: Message| msg.document().is_some())
                            .endpoint(handle_document),
                    )
                    .endpoint(|| async { respond(()) }),
                )
                // Everyone not matched above is unauthorized
                .endpoint(handle_unauthorized),
        )
}

fn origin_of(msg: &Message) -> Origin {
    Origin::new(msg.chat.id.0, msg.id.0)
}

fn callback_origin(q: &CallbackQuery) -> Option<Origin> {
    q.message
        .as_ref()
        .map(|m| Origin::new(m.chat().id.0, m.id().0))
}

async fn handle_unauthorized(
    msg: Message,
    cache: Arc<UnauthorizedCache>,
) -> Result<(), teloxide::RequestError> {
    let title = msg
        .chat
        .title()
        .or_else(|| msg.chat.username())
        .unwrap_or("Unknown");
    cache.record(msg.chat.id.0, title).await;
    respond(())
}

async fn handle_unauthorized_callback(
    q: CallbackQuery,
    cache: Arc<UnauthorizedCache>,
) -> Result<(), teloxide::RequestError> {
    if let Some(origin) = callback_origin(&q) {
        cache.record(origin.chat_id, "callback").await;
    }
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dispatcher: Arc<SubmissionDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let text = match cmd {
        Command::Start => DefaultDownloadView::help().to_string(),
        Command::Status => {
            let (tracked, pending) = dispatcher.status().await;
            DefaultDownloadView::status(tracked, pending)
        }
    };
    if let Err(e) = bot
        .send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await
    {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    msg: Message,
    dispatcher: Arc<SubmissionDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let Some(text) = msg.text() else {
        return respond(());
    };
    if let Err(e) = dispatcher.handle_text(origin_of(&msg), text).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_document(
    msg: Message,
    dispatcher: Arc<SubmissionDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let Some(doc) = msg.document() else {
        return respond(());
    };
    let mime_type = doc.mime_type.as_ref().map(ToString::to_string);
    let file_ref = doc.file.id.to_string();

    if let Err(e) = dispatcher
        .handle_document(
            origin_of(&msg),
            &file_ref,
            doc.file_name.as_deref(),
            mime_type.as_deref(),
        )
        .await
    {
        error!("Document handler error: {}", e);
    }
    respond(())
}

async fn handle_category_callback(
    bot: Bot,
    q: CallbackQuery,
    dispatcher: Arc<SubmissionDispatcher>,
) -> Result<(), teloxide::RequestError> {
    let (Some(token), Some(origin)) = (q.data.as_deref(), callback_origin(&q)) else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return respond(());
    };

    let redemption = dispatcher.redeem(token, origin).await;
    debug!(chat_id = origin.chat_id, state = ?redemption.state, "Category callback handled");

    if let Err(e) = bot
        .answer_callback_query(q.id.clone())
        .text(truncate_bytes(&redemption.ack, CALLBACK_ANSWER_LIMIT))
        .await
    {
        error!("Failed to answer callback: {}", e);
    }
    respond(())
}

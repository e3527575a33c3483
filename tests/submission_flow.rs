use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use transmission_tg_control::bot::dispatcher::{
    Rejection, SubmissionDispatcher, SubmissionState,
};
use transmission_tg_control::bot::poller::PollLoop;
use transmission_tg_control::bot::tokens::TokenRegistry;
use transmission_tg_control::bot::tracker::{CompletionTracker, Origin};
use transmission_tg_control::bot::transport::{CategoryButton, ChatTransport, FileResolveError};
use transmission_tg_control::config::{RpcSettings, Settings, YoutubeSettings};
use transmission_tg_control::transmission::{
    TorrentEngine, TorrentId, TorrentStatus, TransmissionError,
};

const CHAT: i64 = -100_500;
const STRANGER: i64 = 777;

#[derive(Debug, Clone, PartialEq)]
enum EngineCall {
    Magnet { magnet: String, dir: String },
    File { len: usize, dir: String },
    Status(TorrentId),
}

/// Engine double that records every call
#[derive(Default)]
struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    add_error: Option<String>,
    next_id: TorrentId,
    status: Option<TorrentStatus>,
}

impl FakeEngine {
    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().expect("lock").clone()
    }

    fn add_result(&self) -> Result<TorrentId, TransmissionError> {
        match &self.add_error {
            Some(msg) => Err(TransmissionError::Rpc(msg.clone())),
            None => Ok(self.next_id),
        }
    }
}

#[async_trait]
impl TorrentEngine for FakeEngine {
    async fn add_magnet(
        &self,
        magnet: &str,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError> {
        self.calls.lock().expect("lock").push(EngineCall::Magnet {
            magnet: magnet.to_string(),
            dir: download_dir.to_string(),
        });
        self.add_result()
    }

    async fn add_torrent_file(
        &self,
        raw: Vec<u8>,
        download_dir: &str,
    ) -> Result<TorrentId, TransmissionError> {
        self.calls.lock().expect("lock").push(EngineCall::File {
            len: raw.len(),
            dir: download_dir.to_string(),
        });
        self.add_result()
    }

    async fn torrent_status(&self, id: TorrentId) -> Result<TorrentStatus, TransmissionError> {
        self.calls.lock().expect("lock").push(EngineCall::Status(id));
        self.status.ok_or(TransmissionError::NotFound(id))
    }
}

/// Transport double that records everything sent to the chat
#[derive(Default)]
struct FakeTransport {
    choices: Mutex<Vec<(Origin, Vec<CategoryButton>)>>,
    edits: Mutex<Vec<(Origin, String)>>,
    replies: Mutex<Vec<(Origin, String)>>,
    file: Option<Vec<u8>>,
}

impl FakeTransport {
    fn with_file(raw: &[u8]) -> Self {
        Self {
            file: Some(raw.to_vec()),
            ..Self::default()
        }
    }

    fn buttons(&self) -> Vec<CategoryButton> {
        self.choices
            .lock()
            .expect("lock")
            .last()
            .map(|(_, b)| b.clone())
            .unwrap_or_default()
    }

    fn token_for(&self, label: &str) -> String {
        self.buttons()
            .into_iter()
            .find(|b| b.label == label)
            .map(|b| b.token)
            .expect("button present")
    }

    fn nothing_sent(&self) -> bool {
        self.choices.lock().expect("lock").is_empty()
            && self.edits.lock().expect("lock").is_empty()
            && self.replies.lock().expect("lock").is_empty()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_choices(
        &self,
        origin: Origin,
        _text: &str,
        buttons: Vec<CategoryButton>,
    ) -> anyhow::Result<()> {
        self.choices.lock().expect("lock").push((origin, buttons));
        Ok(())
    }

    async fn replace_text(&self, origin: Origin, text: &str) -> anyhow::Result<()> {
        self.edits
            .lock()
            .expect("lock")
            .push((origin, text.to_string()));
        Ok(())
    }

    async fn reply(&self, origin: Origin, text: &str) -> anyhow::Result<()> {
        self.replies
            .lock()
            .expect("lock")
            .push((origin, text.to_string()));
        Ok(())
    }

    async fn resolve_file(&self, _file_ref: &str) -> Result<Vec<u8>, FileResolveError> {
        self.file
            .clone()
            .ok_or_else(|| FileResolveError::Lookup("file not found".to_string()))
    }
}

fn settings() -> Settings {
    Settings {
        bot_token: "123:abc".to_string(),
        transmission_rpc: RpcSettings {
            url: "localhost".to_string(),
            ..RpcSettings::default()
        },
        poll_interval_sec: 30,
        chat_whitelist: vec![CHAT],
        categories: BTreeMap::from([
            ("movies".to_string(), "/d/movies".to_string()),
            ("shows".to_string(), "/d/shows".to_string()),
        ]),
        youtube: YoutubeSettings::default(),
    }
}

struct Harness {
    engine: Arc<FakeEngine>,
    transport: Arc<FakeTransport>,
    tokens: Arc<TokenRegistry>,
    tracker: Arc<CompletionTracker>,
    dispatcher: SubmissionDispatcher,
}

fn harness(engine: FakeEngine, transport: FakeTransport) -> Harness {
    let engine = Arc::new(engine);
    let transport = Arc::new(transport);
    let tokens = Arc::new(TokenRegistry::new());
    let tracker = Arc::new(CompletionTracker::new());
    let dispatcher = SubmissionDispatcher::new(
        &settings(),
        Arc::clone(&tokens),
        Arc::clone(&tracker),
        Arc::clone(&engine) as Arc<dyn TorrentEngine>,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        CancellationToken::new(),
    );
    Harness {
        engine,
        transport,
        tokens,
        tracker,
        dispatcher,
    }
}

const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";

#[tokio::test]
async fn magnet_submission_is_added_to_chosen_category_and_tracked() {
    let h = harness(
        FakeEngine {
            next_id: 17,
            ..FakeEngine::default()
        },
        FakeTransport::default(),
    );
    let origin = Origin::new(CHAT, 10);

    h.dispatcher
        .handle_text(origin, &format!("please {MAGNET}"))
        .await
        .expect("offer sent");

    let buttons = h.transport.buttons();
    assert_eq!(buttons.len(), 2);
    assert!(buttons.iter().all(|b| b.token.len() <= 64));

    let prompt = Origin::new(CHAT, 11);
    let redemption = h
        .dispatcher
        .redeem(&h.transport.token_for("movies"), prompt)
        .await;

    assert_eq!(redemption.state, SubmissionState::Tracked(17));
    assert_eq!(
        h.engine.calls(),
        vec![EngineCall::Magnet {
            magnet: MAGNET.to_string(),
            dir: "/d/movies".to_string(),
        }]
    );
    let edits = h.transport.edits.lock().expect("lock").clone();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, prompt);
    assert!(edits[0].1.contains("movies"));
    assert_eq!(h.tracker.len().await, 1);
}

#[tokio::test]
async fn second_press_of_same_button_is_expired_without_engine_call() {
    let h = harness(FakeEngine::default(), FakeTransport::default());
    let origin = Origin::new(CHAT, 10);
    h.dispatcher
        .handle_text(origin, MAGNET)
        .await
        .expect("offer sent");
    let token = h.transport.token_for("shows");

    let first = h.dispatcher.redeem(&token, origin).await;
    assert!(matches!(first.state, SubmissionState::Tracked(_)));

    let second = h.dispatcher.redeem(&token, origin).await;
    assert_eq!(second.state, SubmissionState::Rejected(Rejection::Expired));
    assert_eq!(h.engine.calls().len(), 1);
}

#[tokio::test]
async fn sibling_buttons_stay_redeemable() {
    let h = harness(FakeEngine::default(), FakeTransport::default());
    let origin = Origin::new(CHAT, 10);
    h.dispatcher
        .handle_text(origin, MAGNET)
        .await
        .expect("offer sent");

    h.dispatcher
        .redeem(&h.transport.token_for("movies"), origin)
        .await;
    assert_eq!(h.tokens.pending_count().await, 1);

    let other = h
        .dispatcher
        .redeem(&h.transport.token_for("shows"), origin)
        .await;
    assert!(matches!(other.state, SubmissionState::Tracked(_)));
}

#[tokio::test]
async fn unknown_token_is_expired() {
    let h = harness(FakeEngine::default(), FakeTransport::default());
    let redemption = h
        .dispatcher
        .redeem("deadbeef", Origin::new(CHAT, 1))
        .await;
    assert_eq!(
        redemption.state,
        SubmissionState::Rejected(Rejection::Expired)
    );
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn full_percent_is_complete_and_notifies_origin() {
    let engine = Arc::new(FakeEngine {
        status: Some(TorrentStatus {
            is_finished: false,
            percent_done: 1.0,
        }),
        ..FakeEngine::default()
    });
    let transport = Arc::new(FakeTransport::default());
    let tracker = Arc::new(CompletionTracker::new());
    let origin = Origin::new(CHAT, 42);
    tracker.track(5, origin).await;

    let poller = PollLoop::new(
        Arc::clone(&tracker),
        Arc::clone(&engine) as Arc<dyn TorrentEngine>,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        Duration::from_secs(30),
        CancellationToken::new(),
    );

    assert_eq!(poller.tick().await, 1);
    assert!(tracker.is_empty().await);
    let replies = transport.replies.lock().expect("lock").clone();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, origin);

    // Completed ids are not queried again.
    assert_eq!(poller.tick().await, 0);
    assert_eq!(engine.calls(), vec![EngineCall::Status(5)]);
}

#[tokio::test]
async fn just_below_threshold_stays_tracked() {
    let engine = Arc::new(FakeEngine {
        status: Some(TorrentStatus {
            is_finished: false,
            percent_done: 0.998,
        }),
        ..FakeEngine::default()
    });
    let transport = Arc::new(FakeTransport::default());
    let tracker = Arc::new(CompletionTracker::new());
    tracker.track(5, Origin::new(CHAT, 42)).await;

    let poller = PollLoop::new(
        Arc::clone(&tracker),
        engine as Arc<dyn TorrentEngine>,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        Duration::from_secs(30),
        CancellationToken::new(),
    );

    assert_eq!(poller.tick().await, 0);
    assert_eq!(tracker.len().await, 1);
    assert!(transport.nothing_sent());
}

#[tokio::test]
async fn events_from_unlisted_chat_change_nothing() {
    let h = harness(FakeEngine::default(), FakeTransport::with_file(b"d8:announce"));
    let origin = Origin::new(STRANGER, 3);

    h.dispatcher
        .handle_text(origin, MAGNET)
        .await
        .expect("ignored");
    h.dispatcher
        .handle_document(origin, "file-id", Some("a.torrent"), None)
        .await
        .expect("ignored");

    assert!(h.transport.nothing_sent());
    assert_eq!(h.tokens.pending_count().await, 0);
    assert!(h.tracker.is_empty().await);
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn failed_file_add_is_rejected_with_engine_text() {
    let h = harness(
        FakeEngine {
            add_error: Some("invalid or corrupt torrent file".to_string()),
            ..FakeEngine::default()
        },
        FakeTransport::with_file(b"d8:announce"),
    );
    let origin = Origin::new(CHAT, 10);
    h.dispatcher
        .handle_document(
            origin,
            "file-id",
            Some("ubuntu.torrent"),
            Some("application/x-bittorrent"),
        )
        .await
        .expect("offer sent");

    let redemption = h
        .dispatcher
        .redeem(&h.transport.token_for("movies"), origin)
        .await;

    assert_eq!(
        redemption.state,
        SubmissionState::Rejected(Rejection::Engine)
    );
    assert!(redemption.ack.contains("invalid or corrupt torrent file"));
    assert!(redemption.ack.len() <= 200);
    assert_eq!(
        h.engine.calls(),
        vec![EngineCall::File {
            len: 11,
            dir: "/d/movies".to_string(),
        }]
    );
    assert!(h.tracker.is_empty().await);
    assert!(h.transport.edits.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn long_engine_error_is_truncated_for_popup() {
    let h = harness(
        FakeEngine {
            add_error: Some("ы".repeat(500)),
            ..FakeEngine::default()
        },
        FakeTransport::default(),
    );
    let origin = Origin::new(CHAT, 10);
    h.dispatcher
        .handle_text(origin, MAGNET)
        .await
        .expect("offer sent");

    let redemption = h
        .dispatcher
        .redeem(&h.transport.token_for("movies"), origin)
        .await;

    assert!(redemption.ack.len() <= 200);
    assert!(redemption.ack.starts_with("Transmission: "));
}

#[tokio::test]
async fn concurrent_presses_add_exactly_once() {
    let h = Arc::new(harness(FakeEngine::default(), FakeTransport::default()));
    let origin = Origin::new(CHAT, 10);
    h.dispatcher
        .handle_text(origin, MAGNET)
        .await
        .expect("offer sent");
    let token = h.transport.token_for("movies");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            h.dispatcher.redeem(&token, origin).await
        }));
    }

    let mut tracked = 0;
    for handle in handles {
        if matches!(
            handle.await.expect("task").state,
            SubmissionState::Tracked(_)
        ) {
            tracked += 1;
        }
    }
    assert_eq!(tracked, 1);
    assert_eq!(h.engine.calls().len(), 1);
}

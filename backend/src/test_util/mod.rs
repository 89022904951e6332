//! Test helpers: scriptable in-process backends and ready-made state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use chat_relay_common::ChatMessage;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Validator};
use crate::llm::{BackendClient, BackendError, InferenceBackend};
use crate::AppState;

enum Reply {
    Text(String),
    Echo,
    Fail(String),
    Panic,
}

/// In-process [`InferenceBackend`] with scripted behaviour.
///
/// Optionally delays each call, or holds it until the test opens the gate.
pub struct ScriptedBackend {
    reply: Reply,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `text`.
    pub fn replying(text: &str) -> Self {
        Self::with_reply(Reply::Text(text.to_string()))
    }

    /// Answers with the content of the last message.
    pub fn echo() -> Self {
        Self::with_reply(Reply::Echo)
    }

    /// Always fails with a backend-reported error.
    pub fn failing(message: &str) -> Self {
        Self::with_reply(Reply::Fail(message.to_string()))
    }

    /// Panics inside `invoke`.
    pub fn panicking() -> Self {
        Self::with_reply(Reply::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call blocks until [`BackendGate::open`] releases it.
    pub fn gated(mut self) -> (Self, BackendGate) {
        let semaphore = Arc::new(Semaphore::new(0));
        self.gate = Some(semaphore.clone());
        (self, BackendGate { semaphore })
    }

    /// Number of times `invoke` was entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently inside `invoke`.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.seen.lock().unwrap().last().cloned()
    }

    /// User contents in the order the calls reached the backend.
    pub fn seen_contents(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Echo => Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default()),
            Reply::Fail(message) => Err(BackendError::Backend(message.clone())),
            Reply::Panic => panic!("scripted backend panic"),
        }
    }
}

/// Releases calls held by a gated [`ScriptedBackend`].
#[derive(Clone)]
pub struct BackendGate {
    semaphore: Arc<Semaphore>,
}

impl BackendGate {
    /// Let `n` pending or future calls proceed.
    pub fn open(&self, n: usize) {
        self.semaphore.add_permits(n);
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.backend.model = "test-model".to_string();
    config.backend.timeout_secs = 5;
    config.dispatch.workers = 1;
    config.dispatch.queue_depth = 1;
    config.logging.level = "debug".to_string();
    config
}

/// Build application state around `backend`, sized by `config`.
pub fn create_test_state(config: Config, backend: Arc<dyn InferenceBackend>) -> Arc<AppState> {
    let client = BackendClient::new(backend, config.backend.timeout());
    let dispatcher = Dispatcher::start(client, &config.dispatch);
    let validator = Validator::new(config.validation.max_content_chars);

    Arc::new(AppState {
        config,
        validator,
        dispatcher,
    })
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

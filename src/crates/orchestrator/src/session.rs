//! Session table and lifecycle.
//!
//! One [`Session`] per `(user_id, conversation_id)`: the socket's outbound
//! channel, activity timestamps, cumulative usage, and the at-most-one
//! active [`RunHandle`]. A disconnect only marks the session inactive; run
//! state survives for the resume grace window so a quick reconnect picks up
//! where it left off (pending interrupt frame first). The background
//! sweeper cancels runs and destroys sandbox bindings for sessions that
//! stay idle or disconnected too long.

use dashmap::DashMap;
use flowgraph::UsageMetadata;
use parking_lot::Mutex;
use sandbox::SandboxManager;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{KvStore, SessionMeta};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::protocol::ServerFrame;

pub type SessionKey = (String, String);

/// The one active run of a session.
pub struct RunHandle {
    pub run_id: String,
    pub request_id: String,
    /// Set when the run is inside a subgraph (needed to resume it).
    pub subgraph: Option<String>,
    pub cancel: CancellationToken,
    /// The latest interrupt frame, replayed on reconnect.
    pub pending_interrupt: Option<ServerFrame>,
}

pub struct Session {
    pub user_id: String,
    pub conversation_id: String,
    pub created_at: Instant,
    last_active: Mutex<Instant>,
    active: AtomicBool,
    disconnected_at: Mutex<Option<Instant>>,
    outbound: Mutex<mpsc::Sender<ServerFrame>>,
    socket_epoch: AtomicU64,
    cumulative: Mutex<UsageMetadata>,
    pub run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl Session {
    fn new(user_id: &str, conversation_id: &str, outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            created_at: Instant::now(),
            last_active: Mutex::new(Instant::now()),
            active: AtomicBool::new(true),
            disconnected_at: Mutex::new(None),
            outbound: Mutex::new(outbound),
            socket_epoch: AtomicU64::new(0),
            cumulative: Mutex::new(UsageMetadata::default()),
            run: tokio::sync::Mutex::new(None),
        }
    }

    pub fn key(&self) -> SessionKey {
        (self.user_id.clone(), self.conversation_id.clone())
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn mark_inactive(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            *self.disconnected_at.lock() = Some(Instant::now());
        }
    }

    fn mark_active(&self) {
        self.active.store(true, Ordering::SeqCst);
        *self.disconnected_at.lock() = None;
        self.touch();
    }

    pub fn disconnected_for(&self) -> Option<Duration> {
        self.disconnected_at.lock().map(|t| t.elapsed())
    }

    pub fn socket_epoch(&self) -> u64 {
        self.socket_epoch.load(Ordering::SeqCst)
    }

    pub fn add_usage(&self, usage: &UsageMetadata) -> UsageMetadata {
        let mut total = self.cumulative.lock();
        total.add(usage);
        *total
    }

    pub fn usage(&self) -> UsageMetadata {
        *self.cumulative.lock()
    }

    /// FIFO send with the backpressure deadline. Failure (closed channel or
    /// deadline exceeded) marks the session inactive and reports false.
    pub async fn emit(&self, frame: ServerFrame, backpressure_timeout: Duration) -> bool {
        let sender = self.outbound.lock().clone();
        match tokio::time::timeout(backpressure_timeout, sender.send(frame)).await {
            Ok(Ok(())) => {
                self.touch();
                true
            }
            _ => {
                tracing::warn!(
                    user = %self.user_id,
                    conversation = %self.conversation_id,
                    "emit failed, marking session inactive"
                );
                self.mark_inactive();
                false
            }
        }
    }

    fn replace_socket(&self, outbound: mpsc::Sender<ServerFrame>) -> u64 {
        *self.outbound.lock() = outbound;
        let epoch = self.socket_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.mark_active();
        epoch
    }
}

pub struct SessionManager {
    sessions: DashMap<SessionKey, Arc<Session>>,
    store: Arc<dyn KvStore>,
    sandboxes: Arc<SandboxManager>,
    settings: Arc<Settings>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        sandboxes: Arc<SandboxManager>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            sandboxes,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    pub fn sandboxes(&self) -> Arc<SandboxManager> {
        Arc::clone(&self.sandboxes)
    }

    /// Register (or re-attach) a session and hand back the outbound stream.
    /// On reconnect the pending interrupt frame, if any, is queued first.
    pub async fn connect(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> (Arc<Session>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(self.settings.emit_channel_capacity);
        let key = (user_id.to_string(), conversation_id.to_string());

        let session = match self.sessions.get(&key) {
            Some(existing) => {
                let session = Arc::clone(&existing);
                drop(existing);
                let epoch = session.replace_socket(tx.clone());
                tracing::info!(user = %user_id, conversation = %conversation_id, epoch, "session reconnected");
                session
            }
            None => {
                let session = Arc::new(Session::new(user_id, conversation_id, tx.clone()));
                self.sessions.insert(key.clone(), Arc::clone(&session));
                tracing::info!(user = %user_id, conversation = %conversation_id, "session connected");
                session
            }
        };

        // replay the pending interrupt before any new work
        if let Some(run) = session.run.lock().await.as_ref() {
            if let Some(frame) = &run.pending_interrupt {
                let _ = tx.send(frame.clone()).await;
            }
        }

        let meta = SessionMeta {
            last_active: chrono::Utc::now(),
            socket_epoch: session.socket_epoch(),
        };
        if let Err(e) = self.store.put_session_meta(user_id, conversation_id, &meta).await {
            tracing::warn!(error = %e, "failed to persist session meta");
        }

        (session, rx)
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|e| Arc::clone(&e))
    }

    /// Socket closed: keep run state for the grace window.
    pub fn disconnect(&self, key: &SessionKey) {
        if let Some(session) = self.get(key) {
            session.mark_inactive();
        }
    }

    /// Cancel the session's run, destroy its sandbox, drop it.
    pub async fn destroy(&self, key: &SessionKey) {
        if let Some((_, session)) = self.sessions.remove(key) {
            if let Some(run) = session.run.lock().await.take() {
                run.cancel.cancel();
            }
            if let Err(e) = self.sandboxes.cleanup(&key.0, &key.1).await {
                tracing::warn!(error = %e, "sandbox cleanup failed during session destroy");
            }
            tracing::info!(user = %key.0, conversation = %key.1, "session destroyed");
        }
    }

    /// One sweep pass: destroy idle sessions and cancel runs whose owners
    /// never reconnected. Returns the destroyed keys.
    pub async fn sweep(&self) -> Vec<SessionKey> {
        let mut doomed = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            let expired_idle = session.idle_for() > self.settings.session_timeout();
            let expired_grace = !session.is_active()
                && session
                    .disconnected_for()
                    .map(|d| d > self.settings.run_resume_grace())
                    .unwrap_or(false);
            if expired_idle || expired_grace {
                doomed.push(entry.key().clone());
            }
        }
        for key in &doomed {
            self.destroy(key).await;
        }
        doomed
    }

    /// Periodic sweeper task; lives until the token fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = manager.sweep().await;
                        if !swept.is_empty() {
                            tracing::info!(count = swept.len(), "swept idle sessions");
                        }
                    }
                }
            }
        });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

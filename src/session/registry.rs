//! `SessionRegistry`: one serialized task per session key.
//!
//! ```text
//! dispatch(key, event)
//!     │  get_or_create(key)   ← map lock, never held across .await
//!     ▼
//! mpsc queue (per key) ──▶ session task ──▶ SessionStateMachine::handle
//!     ▲                          │
//!     │                          ├─ Reply  → ReplySink::deliver (in order)
//!     │                          ├─ Submit → spawn job task
//!     │                          └─ Cancel → abort job task
//!     │                                          │
//!     └──────────── JobFinished { token } ───────┘
//! ```
//!
//! The session task keeps only a weak sender to its own queue; a running
//! job upgrades it, so the task lives while the registry entry exists or a
//! job is in flight, and stops once neither does.  [`SessionRegistry::shutdown`]
//! relies on this: it drops every entry and joins the tasks, which finish
//! after their last job has been answered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::machine::SessionStateMachine;
use super::state::{Effect, JobToken, SessionEvent};
use crate::config::SessionConfig;
use crate::inference::InferenceExecutor;
use crate::style::StyleCatalog;
use crate::transport::{Outbound, ReplySink, SessionKey};

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The session task stopped before the event could be queued.
    #[error("session {0} is closed")]
    SessionClosed(SessionKey),
}

// ---------------------------------------------------------------------------
// SessionActivity
// ---------------------------------------------------------------------------

/// Bookkeeping shared between a registry entry and its session task.
#[derive(Debug)]
struct SessionActivity {
    busy: AtomicBool,
    retiring: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl SessionActivity {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            retiring: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn is_retiring(&self) -> bool {
        self.retiring.load(Ordering::SeqCst)
    }
}

/// Sending side of one session's queue.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    tx: mpsc::Sender<SessionEvent>,
    activity: Arc<SessionActivity>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// `true` while the session has a job in flight.
    pub fn is_busy(&self) -> bool {
        self.activity.is_busy()
    }

    /// Queue an event for this session.
    pub async fn send(&self, event: SessionEvent) -> Result<(), RegistryError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RegistryError::SessionClosed(self.key.clone()))
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    tasks: Mutex<JoinSet<()>>,
    catalog: Arc<StyleCatalog>,
    executor: InferenceExecutor,
    sink: Arc<dyn ReplySink>,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(
        catalog: Arc<StyleCatalog>,
        executor: InferenceExecutor,
        sink: Arc<dyn ReplySink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                catalog,
                executor,
                sink,
                config,
            }),
        }
    }

    /// Route one inbound event to its session, creating the session on first
    /// contact.  Waits only for queue space, never for the event to be
    /// handled.
    pub async fn dispatch(&self, key: SessionKey, event: SessionEvent) -> Result<(), RegistryError> {
        let handle = self.inner.get_or_create(&key);
        match handle.tx.send(event).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(event)) => {
                // The task stopped between lookup and send; start over once.
                self.inner.forget(&key, &handle.activity);
                let handle = self.inner.get_or_create(&key);
                handle
                    .tx
                    .send(event)
                    .await
                    .map_err(|_| RegistryError::SessionClosed(key))
            }
        }
    }

    /// The session for `key`, created on first use.  Concurrent callers
    /// for the same key always get handles to the same session.
    pub fn get_or_create(&self, key: &SessionKey) -> SessionHandle {
        self.inner.get_or_create(key)
    }

    /// Drop the session for `key`.
    ///
    /// A session with a job in flight is only marked for retirement and is
    /// removed as soon as the job completes or is cancelled.  Returns `true`
    /// if the session was removed right away.
    pub fn remove(&self, key: &SessionKey) -> bool {
        let mut sessions = self.inner.lock();
        let Some(handle) = sessions.get(key) else {
            return false;
        };
        if handle.activity.is_busy() {
            handle.activity.retiring.store(true, Ordering::SeqCst);
            log::info!("registry: {key} busy, removal deferred");
            return false;
        }
        sessions.remove(key);
        log::info!("registry: removed {key}");
        true
    }

    /// Drop sessions idle for longer than the configured timeout, plus any
    /// retired ones that have finished their job.  Busy sessions are kept.
    ///
    /// Returns how many sessions were removed.
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle(self.inner.config.idle_timeout())
    }

    /// Run [`evict_idle`](Self::evict_idle) every sweep interval until the
    /// registry is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = inner.evict_idle(inner.config.idle_timeout());
                if removed > 0 {
                    log::info!("registry: swept {removed} idle session(s)");
                }
            }
        })
    }

    /// Close every session and wait until each has answered its in-flight
    /// job and stopped.  Events dispatched afterwards start fresh sessions.
    pub async fn shutdown(&self) {
        let closed = std::mem::take(&mut *self.inner.lock());
        let mut tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        log::info!("registry: closing {} session(s)", closed.len());
        drop(closed);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::warn!("registry: session task ended abnormally: {e}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.inner.lock().contains_key(key)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lookup or spawn under the map lock, touching the entry so a
    /// concurrent sweep cannot evict it between lookup and send.
    fn get_or_create(self: &Arc<Self>, key: &SessionKey) -> SessionHandle {
        let mut sessions = self.lock();
        if let Some(handle) = sessions.get(key) {
            if !handle.tx.is_closed() {
                handle.activity.touch();
                return handle.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let activity = Arc::new(SessionActivity::new());
        let machine = SessionStateMachine::new(
            key.clone(),
            Arc::clone(&self.catalog),
            self.executor.pipeline().clone(),
        );
        let task = SessionTask {
            machine,
            rx,
            weak_tx: tx.downgrade(),
            executor: self.executor.clone(),
            sink: Arc::clone(&self.sink),
            activity: Arc::clone(&activity),
            registry: Arc::downgrade(self),
            job: None,
        };
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            while tasks.try_join_next().is_some() {}
            tasks.spawn(task.run());
        }

        let handle = SessionHandle {
            key: key.clone(),
            tx,
            activity,
        };
        sessions.insert(key.clone(), handle.clone());
        log::debug!("registry: created {key} ({} live)", sessions.len());
        handle
    }

    /// Remove `key` only if it still maps to the session owning `activity`.
    fn forget(&self, key: &SessionKey, activity: &Arc<SessionActivity>) -> bool {
        let mut sessions = self.lock();
        let same = sessions
            .get(key)
            .is_some_and(|h| Arc::ptr_eq(&h.activity, activity));
        if same {
            sessions.remove(key);
        }
        same
    }

    fn evict_idle(&self, timeout: Duration) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|key, handle| {
            let activity = &handle.activity;
            if activity.is_busy() {
                return true;
            }
            let expired = activity.is_retiring() || activity.idle_for() >= timeout;
            if expired {
                log::debug!("registry: evicting {key}");
            }
            !expired
        });
        before - sessions.len()
    }
}

// ---------------------------------------------------------------------------
// SessionTask
// ---------------------------------------------------------------------------

struct SessionTask {
    machine: SessionStateMachine,
    rx: mpsc::Receiver<SessionEvent>,
    weak_tx: mpsc::WeakSender<SessionEvent>,
    executor: InferenceExecutor,
    sink: Arc<dyn ReplySink>,
    activity: Arc<SessionActivity>,
    registry: Weak<Inner>,
    job: Option<(JobToken, JoinHandle<()>)>,
}

impl SessionTask {
    async fn run(mut self) {
        let key = self.machine.key().clone();
        log::debug!("session: {key} started");

        while let Some(event) = self.rx.recv().await {
            if let SessionEvent::JobFinished { token, .. } = &event {
                if self.job.as_ref().is_some_and(|(t, _)| t == token) {
                    self.job = None;
                }
            }

            let effects = self.machine.handle(event);
            let busy = self.machine.state().is_busy();
            self.activity.busy.store(busy, Ordering::SeqCst);
            for effect in effects {
                self.apply(&key, effect).await;
            }

            if !busy && self.activity.is_retiring() {
                if let Some(registry) = self.registry.upgrade() {
                    if registry.forget(&key, &self.activity) {
                        log::info!("registry: removed {key} after its job finished");
                    }
                }
            }
        }

        if let Some((_, handle)) = self.job.take() {
            handle.abort();
        }
        log::debug!("session: {key} stopped");
    }

    async fn apply(&mut self, key: &SessionKey, effect: Effect) {
        match effect {
            Effect::Reply(reply) => {
                let outbound = Outbound {
                    key: key.clone(),
                    reply,
                };
                if let Err(e) = self.sink.deliver(outbound).await {
                    log::warn!("session: {key} reply not delivered: {e}");
                }
            }
            Effect::Submit {
                token,
                style,
                photo,
            } => {
                let Some(tx) = self.weak_tx.upgrade() else {
                    log::warn!("session: {key} closed, dropping {token}");
                    return;
                };
                let executor = self.executor.clone();
                let handle = tokio::spawn(async move {
                    let result = executor.execute(style, photo).await;
                    let _ = tx.send(SessionEvent::JobFinished { token, result }).await;
                });
                log::debug!("session: {key} submitted {token} for {style}");
                if let Some((_, previous)) = self.job.replace((token, handle)) {
                    previous.abort();
                }
            }
            Effect::Cancel(token) => {
                if let Some((current, handle)) = self.job.take() {
                    if current == token {
                        handle.abort();
                    } else {
                        self.job = Some((current, handle));
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageConfig;
    use crate::imaging::ImagePipeline;
    use crate::session::Reply;
    use crate::style::{ArtifactStore, MemoryStore, MockLoader, ModelCache, NetworkLoader};
    use crate::transport::RecordingSink;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        registry: SessionRegistry,
        sink: Arc<RecordingSink>,
        loader: Arc<MockLoader>,
    }

    fn harness(loader: MockLoader, config: SessionConfig) -> Harness {
        let store: Arc<dyn ArtifactStore> =
            Arc::new(MemoryStore::with_ids(&["candy", "mosaic", "udnie"]));
        let catalog = Arc::new(StyleCatalog::open(store).unwrap());
        let loader = Arc::new(loader);
        let cache = Arc::new(ModelCache::new(
            Arc::clone(&catalog),
            Arc::clone(&loader) as Arc<dyn NetworkLoader>,
            2,
        ));
        let pipeline = ImagePipeline::new(&ImageConfig {
            max_side: 32,
            jpeg_quality: 75,
        });
        let executor = InferenceExecutor::new(pipeline, cache, 4, Duration::from_secs(5));
        let sink = Arc::new(RecordingSink::new());
        let registry = SessionRegistry::new(
            catalog,
            executor,
            Arc::clone(&sink) as Arc<dyn ReplySink>,
            config,
        );
        Harness {
            registry,
            sink,
            loader,
        }
    }

    fn png() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(48, 40, Rgb([90, 120, 200])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn finished(replies: &[Reply]) -> bool {
        replies
            .iter()
            .any(|r| matches!(r, Reply::StylizedResult(_) | Reply::JobFailed(_)))
    }

    async fn send(h: &Harness, key: &SessionKey, event: SessionEvent) {
        h.registry.dispatch(key.clone(), event).await.unwrap();
    }

    #[tokio::test]
    async fn full_cycle_produces_a_jpeg() {
        let h = harness(MockLoader::new(), SessionConfig::default());
        let key = SessionKey::from("alice");

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(2)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;

        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        assert!(matches!(replies[0], Reply::StyleMenu(ref s) if s.len() == 3));
        assert!(matches!(replies[1], Reply::StyleSelected(ref s) if s.id.get() == 2));
        assert!(matches!(replies[2], Reply::ProcessingStarted));
        match &replies[3] {
            Reply::StylizedResult(img) => {
                assert_eq!((img.width, img.height), (32, 32));
                assert!(image::load_from_memory_with_format(&img.jpeg, ImageFormat::Jpeg).is_ok());
            }
            other => panic!("expected a result, got {other:?}"),
        }
        assert_eq!(h.loader.loads_of("mosaic"), 1);
    }

    #[tokio::test]
    async fn busy_session_answers_work_in_progress() {
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(300)),
            SessionConfig::default(),
        );
        let key = SessionKey::from("bob");

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(1)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        send(&h, &key, SessionEvent::style(3)).await;

        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        let in_progress = replies
            .iter()
            .filter(|r| matches!(r, Reply::WorkInProgress))
            .count();
        assert_eq!(in_progress, 2);
        assert_eq!(
            replies
                .iter()
                .filter(|r| matches!(r, Reply::ProcessingStarted))
                .count(),
            1
        );
        // The result arrives after the acknowledgements.
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
    }

    #[tokio::test]
    async fn restart_mid_job_discards_the_result() {
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(200)),
            SessionConfig::default(),
        );
        let key = SessionKey::from("carol");

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(1)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        send(&h, &key, SessionEvent::Restart).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let replies = h.sink.replies_for(&key);
        assert!(!finished(&replies), "stale result leaked: {replies:?}");
        assert_eq!(
            replies
                .iter()
                .filter(|r| matches!(r, Reply::StyleMenu(_)))
                .count(),
            2
        );

        // The session is usable again.
        send(&h, &key, SessionEvent::style(1)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_sessions_share_one_model_load() {
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(150)),
            SessionConfig::default(),
        );
        let (a, b) = (SessionKey::from("a"), SessionKey::from("b"));

        for key in [&a, &b] {
            send(&h, key, SessionEvent::Restart).await;
            send(&h, key, SessionEvent::style(3)).await;
        }
        send(&h, &a, SessionEvent::PhotoReceived(png())).await;
        send(&h, &b, SessionEvent::PhotoReceived(png())).await;

        for key in [&a, &b] {
            let replies = h.sink.wait_for(key, WAIT, finished).await;
            assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
        }
        assert_eq!(h.loader.loads_of("udnie"), 1);
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let h = harness(MockLoader::new(), SessionConfig::default());
        let (a, b) = (SessionKey::from("a"), SessionKey::from("b"));

        send(&h, &a, SessionEvent::Restart).await;
        send(&h, &a, SessionEvent::style(1)).await;
        send(&h, &b, SessionEvent::style(1)).await;

        let replies_b = h
            .sink
            .wait_for(&b, WAIT, |r| !r.is_empty())
            .await;
        assert!(matches!(replies_b.as_slice(), [Reply::NotStarted]));
        let replies_a = h.sink.wait_for(&a, WAIT, |r| r.len() == 2).await;
        assert!(matches!(replies_a[1], Reply::StyleSelected(_)));
    }

    #[tokio::test]
    async fn one_instance_per_key() {
        let h = harness(MockLoader::new(), SessionConfig::default());
        let key = SessionKey::from("same");
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = h.registry.clone();
                let key = key.clone();
                tokio::spawn(async move { registry.dispatch(key, SessionEvent::Restart).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(h.registry.len(), 1);
        let replies = h.sink.wait_for(&key, WAIT, |r| r.len() == 16).await;
        assert_eq!(replies.len(), 16);
    }

    #[tokio::test]
    async fn remove_is_deferred_while_busy() {
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(200)),
            SessionConfig::default(),
        );
        let key = SessionKey::from("dave");

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(1)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        h.sink
            .wait_for(&key, WAIT, |r| {
                r.iter().any(|r| matches!(r, Reply::ProcessingStarted))
            })
            .await;

        assert!(!h.registry.remove(&key));
        assert!(h.registry.contains(&key));

        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));

        let deadline = Instant::now() + WAIT;
        while h.registry.contains(&key) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!h.registry.contains(&key));
    }

    #[tokio::test]
    async fn remove_idle_session_is_immediate() {
        let h = harness(MockLoader::new(), SessionConfig::default());
        let key = SessionKey::from("erin");
        send(&h, &key, SessionEvent::Restart).await;
        h.sink.wait_for(&key, WAIT, |r| !r.is_empty()).await;

        assert!(h.registry.remove(&key));
        assert!(!h.registry.contains(&key));
        assert!(!h.registry.remove(&key));

        // A new event starts a fresh session.
        send(&h, &key, SessionEvent::style(1)).await;
        let replies = h.sink.wait_for(&key, WAIT, |r| r.len() == 2).await;
        assert!(matches!(replies[1], Reply::NotStarted));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_but_busy_ones_kept() {
        let config = SessionConfig {
            idle_timeout_secs: 0,
            ..SessionConfig::default()
        };
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(300)),
            config,
        );
        let (idle, busy) = (SessionKey::from("idle"), SessionKey::from("busy"));

        send(&h, &idle, SessionEvent::Restart).await;
        send(&h, &busy, SessionEvent::Restart).await;
        send(&h, &busy, SessionEvent::style(1)).await;
        send(&h, &busy, SessionEvent::PhotoReceived(png())).await;
        h.sink
            .wait_for(&busy, WAIT, |r| {
                r.iter().any(|r| matches!(r, Reply::ProcessingStarted))
            })
            .await;

        assert_eq!(h.registry.evict_idle(), 1);
        assert!(!h.registry.contains(&idle));
        assert!(h.registry.contains(&busy));

        let replies = h.sink.wait_for(&busy, WAIT, finished).await;
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
    }

    #[tokio::test]
    async fn truncated_photo_is_unsupported_and_keeps_the_style() {
        let h = harness(MockLoader::new(), SessionConfig::default());
        let key = SessionKey::from("gina");
        // Header intact, image data cut off two bytes in.
        let mut truncated = png();
        let idat = truncated
            .windows(4)
            .position(|w| w == b"IDAT")
            .expect("png has image data");
        truncated.truncate(idat + 6);

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(2)).await;
        send(&h, &key, SessionEvent::PhotoReceived(truncated)).await;
        let replies = h
            .sink
            .wait_for(&key, WAIT, |r| {
                r.iter().any(|r| matches!(r, Reply::UnsupportedImage))
            })
            .await;
        assert!(matches!(replies[2], Reply::ProcessingStarted));
        assert!(matches!(replies.last(), Some(Reply::UnsupportedImage)));
        assert_eq!(h.loader.loads_of("mosaic"), 0);

        // The chosen style survives; a good photo goes straight through.
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        assert!(!replies.iter().any(|r| matches!(r, Reply::ChooseStyleFirst)));
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
        assert_eq!(h.loader.loads_of("mosaic"), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_results() {
        let h = harness(
            MockLoader::new().with_delay(Duration::from_millis(200)),
            SessionConfig::default(),
        );
        let (busy, idle) = (SessionKey::from("henry"), SessionKey::from("iris"));

        send(&h, &idle, SessionEvent::Restart).await;
        send(&h, &busy, SessionEvent::Restart).await;
        send(&h, &busy, SessionEvent::style(1)).await;
        send(&h, &busy, SessionEvent::PhotoReceived(png())).await;
        h.sink
            .wait_for(&busy, WAIT, |r| {
                r.iter().any(|r| matches!(r, Reply::ProcessingStarted))
            })
            .await;

        tokio::time::timeout(WAIT, h.registry.shutdown())
            .await
            .expect("shutdown finishes");

        assert!(h.registry.is_empty());
        let replies = h.sink.replies_for(&busy);
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
    }

    #[tokio::test]
    async fn failed_load_returns_session_to_selection() {
        let h = harness(MockLoader::new().broken("candy"), SessionConfig::default());
        let key = SessionKey::from("frank");

        send(&h, &key, SessionEvent::Restart).await;
        send(&h, &key, SessionEvent::style(1)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        let replies = h.sink.wait_for(&key, WAIT, finished).await;
        assert!(matches!(replies.last(), Some(Reply::JobFailed(_))));

        // Another style still works.
        send(&h, &key, SessionEvent::style(2)).await;
        send(&h, &key, SessionEvent::PhotoReceived(png())).await;
        let replies = h
            .sink
            .wait_for(&key, WAIT, |r| {
                r.iter().any(|r| matches!(r, Reply::StylizedResult(_)))
            })
            .await;
        assert!(matches!(replies.last(), Some(Reply::StylizedResult(_))));
    }
}

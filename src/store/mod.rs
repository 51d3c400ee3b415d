
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::watcher::WatchDriver;
use crate::Error;
use crate::Key;
use crate::Result;
use crate::StoreBackend;
use crate::StoreConfig;
use crate::WatchEvent;
use crate::WatchStream;
use crate::WatcherManager;

use crate::FileBackend;
use crate::MemoryBackend;

/// Options recognized by `list`-shaped calls, including `watch`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Skip the initial snapshot phase of `watch` and start directly in
    /// streaming mode. Useful when the caller already holds a snapshot.
    pub watch_only: bool,
}

/// Keyed CRUD with diff-aware change notification, generic over the
/// object type and the persistence backend.
///
/// Every successful mutation that changes logical state emits exactly
/// one [`WatchEvent`]; a content-identical `update` emits none. While
/// the store is stopped, mutations still persist but notifications are
/// dropped rather than queued.
pub struct Store<T, B> {
    backend: Arc<B>,
    manager: Arc<WatcherManager<T>>,
    config: StoreConfig,
    /// Serializes read-modify-write so a persist cannot interleave with
    /// a stale diff comparison, and makes emission order total.
    write_lock: Mutex<()>,
    /// Notification gate, read before every emission.
    watching: RwLock<bool>,
}

/// Store over the in-memory map backend.
pub type MemoryStore<T> = Store<T, MemoryBackend<T>>;

/// Store over the per-object JSON file backend.
pub type FileStore<T> = Store<T, FileBackend<T>>;

impl<T, B> Store<T, B>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    B: StoreBackend<T>,
{
    pub fn new(backend: B) -> Self {
        let config = StoreConfig::default();
        Self {
            backend: Arc::new(backend),
            manager: Arc::new(WatcherManager::new(config.max_watchers)),
            config,
            write_lock: Mutex::new(()),
            watching: RwLock::new(false),
        }
    }

    pub fn with_config(
        backend: B,
        config: StoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            manager: Arc::new(WatcherManager::new(config.max_watchers)),
            config,
            write_lock: Mutex::new(()),
            watching: RwLock::new(false),
        })
    }

    /// Opens the notification gate and spawns the dispatch loop, which
    /// runs until `shutdown` fires or [`stop`](Store::stop) is called.
    /// Idempotent; a second call while watching is a no-op.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) {
        let mut watching = self.watching.write().await;
        if *watching {
            return;
        }
        *watching = true;
        let manager = self.manager.clone();
        tokio::spawn(async move {
            manager.run(shutdown).await;
        });
    }

    /// Closes the notification gate and cancels the dispatch loop.
    /// Waits for any in-flight emission before flipping the gate, so no
    /// producer is left blocked on a loop that no longer drains.
    pub async fn stop(&self) {
        let mut watching = self.watching.write().await;
        *watching = false;
        self.manager.stop();
    }

    /// Pure backend read-through; no notification.
    pub fn get(
        &self,
        key: &Key,
    ) -> Result<T> {
        self.backend.read(key)
    }

    /// Visits every object. Backend iteration errors are logged, not
    /// returned: partial iteration must not abort an in-progress
    /// fan-out.
    pub fn list(
        &self,
        mut visitor: impl FnMut(&Key, T),
    ) {
        if let Err(err) = self.backend.iterate(&mut visitor) {
            error!(error = %err, "list iteration failed");
        }
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.list(|key, _| keys.push(key.name.clone()));
        keys
    }

    pub fn len(&self) -> usize {
        let mut items = 0;
        self.list(|_, _| items += 1);
        items
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists a new object; fails with `AlreadyExists` when the key is
    /// live. Emits `Added`.
    pub async fn create(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.backend.exists(key) {
            return Err(Error::AlreadyExists(key.clone()));
        }
        self.backend.write(key, obj.clone())?;
        self.notify(WatchEvent::Added(obj)).await;
        Ok(())
    }

    /// Persists unconditionally. Emits `Modified` only when the new
    /// value differs from the old one, `Added` when the key was absent;
    /// repeated idempotent updates with identical content stay silent.
    pub async fn update(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.backend.read(key).ok();
        self.backend.write(key, obj.clone())?;
        match previous {
            Some(old) if old == obj => {}
            Some(_) => self.notify(WatchEvent::Modified(obj)).await,
            None => self.notify(WatchEvent::Added(obj)).await,
        }
        Ok(())
    }

    /// Create-or-replace without a content compare: existence alone
    /// decides `Added` vs `Modified`. Cheaper than [`update`](Store::update)
    /// for callers that already know they changed something.
    pub async fn apply(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existed = self.backend.exists(key);
        self.backend.write(key, obj.clone())?;
        if existed {
            self.notify(WatchEvent::Modified(obj)).await;
        } else {
            self.notify(WatchEvent::Added(obj)).await;
        }
        Ok(())
    }

    /// Read-modify-write under the store's write lock. The closure sees
    /// `None` when the key is absent.
    ///
    /// Emits NO notification; callers that need watch consistency must
    /// not rely on this entry point.
    pub async fn update_with_fn(
        &self,
        key: &Key,
        update_fn: impl FnOnce(Option<T>) -> T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.backend.read(key).ok();
        self.backend.write(key, update_fn(current))
    }

    /// Idempotent delete. An absent key returns success with no event; a
    /// present key is read first so the `Deleted` event carries the
    /// pre-delete snapshot. A read failure mid-delete reads as "already
    /// gone".
    pub async fn delete(
        &self,
        key: &Key,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let obj = match self.backend.read(key) {
            Ok(obj) => obj,
            Err(_) => return Ok(()),
        };
        self.backend.remove(key)?;
        self.notify(WatchEvent::Deleted(obj)).await;
        Ok(())
    }

    /// Subscribes to changes. The initial snapshot (unless
    /// `options.watch_only`) and all subsequent events arrive on the
    /// returned stream in emission order; the list-and-watch protocol
    /// runs as a background task. Fails with `ResourceExhausted` when
    /// the admission ceiling is reached.
    pub fn watch(
        &self,
        options: ListOptions,
    ) -> Result<WatchStream<T>> {
        debug!("watch");
        let token = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(self.config.watch_channel_capacity);
        let driver = WatchDriver::new(token.clone(), event_tx);
        // registration precedes the snapshot read so racing mutations
        // land in the backlog; admission failure surfaces here
        driver.register(&self.manager, options.clone())?;
        tokio::spawn(driver.run(self.backend.clone(), options));
        Ok(WatchStream::new(event_rx, token))
    }

    /// Hands one event to the dispatch loop. The read guard on the
    /// watching gate is held across the send so `stop` cannot cancel the
    /// loop out from under a blocked producer.
    async fn notify(
        &self,
        event: WatchEvent<T>,
    ) {
        let watching = self.watching.read().await;
        if !*watching {
            return;
        }
        if self.manager.sender().send(event).await.is_err() {
            warn!("dispatch channel closed, notification dropped");
        }
    }
}

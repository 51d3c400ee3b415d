mod registry;

#[cfg(test)]
mod manager_test;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use nanoid::nanoid;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

pub(crate) use registry::RegisteredWatcher;
use registry::Registry;

use crate::Error;
use crate::ListOptions;
use crate::Result;
use crate::WatchEvent;

/// Capability handed to the watcher manager by a subscription: receive
/// one event, report whether the subscription wants more. Returning
/// `false` evicts the subscription and frees its admission slot.
pub trait EventSink<T>: Send + Sync {
    fn on_event(
        &self,
        event: WatchEvent<T>,
    ) -> BoxFuture<'_, bool>;
}

/// Admission control plus ordered, concurrent fan-out of store-emitted
/// events to all live subscriptions.
///
/// A single dispatch loop drains the ingestion channel; per event it
/// fans out to every subscriber concurrently and waits for all of them
/// before taking the next event. Events are strictly serialized,
/// subscribers within one event are not.
pub struct WatcherManager<T> {
    semaphore: Arc<Semaphore>,
    registry: Registry<T>,
    event_tx: mpsc::Sender<WatchEvent<T>>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<WatchEvent<T>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl<T> WatcherManager<T>
where T: Clone + Send + Sync + 'static
{
    pub fn new(max_watchers: usize) -> Self {
        // Single-slot hand-off: a producer's send completes once the
        // dispatch loop is ready to take the event, not once fan-out
        // for it has finished.
        let (event_tx, event_rx) = mpsc::channel(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_watchers)),
            registry: Registry::new(),
            event_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            shutdown: Mutex::new(None),
        }
    }

    /// The ingestion channel producers write events to.
    pub fn sender(&self) -> mpsc::Sender<WatchEvent<T>> {
        self.event_tx.clone()
    }

    /// Registers a subscription under the admission ceiling.
    ///
    /// Sweeps expired entries first so their slots are reclaimed, then
    /// tries to take one admission unit; fails with `ResourceExhausted`
    /// when none is available. The assigned id stays internal.
    pub fn add(
        &self,
        token: CancellationToken,
        sink: Arc<dyn EventSink<T>>,
        options: ListOptions,
    ) -> Result<()> {
        for id in self.registry.expired() {
            debug!(%id, "reclaiming slot of finished watcher");
            self.registry.remove(&id);
        }

        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::ResourceExhausted)?;

        let watcher = RegisteredWatcher {
            id: nanoid!(),
            token,
            sink,
            options,
            _permit: permit,
        };
        debug!(id = %watcher.id, watch_only = watcher.options.watch_only, "watcher registered");
        self.registry.insert(watcher);
        debug!(watchers = self.registry.len(), "registry size");
        Ok(())
    }

    /// Runs the dispatch loop until `parent` is cancelled or `stop` is
    /// called. Blocking; callers run it as a background task.
    pub async fn run(
        &self,
        parent: CancellationToken,
    ) {
        let shutdown = parent.child_token();
        *self.shutdown.lock() = Some(shutdown.clone());

        // also serializes against a second loop being started
        let mut event_rx = self.event_rx.lock().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("dispatch loop stopped");
                    return;
                }
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else {
                        return;
                    };
                    self.dispatch(event).await;
                }
            }
        }
    }

    /// Cancels the dispatch loop. In-flight per-event deliveries finish
    /// naturally; nothing drains the channel afterwards, so producers
    /// must check their watching gate before sending.
    pub fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.registry.len()
    }

    /// Fans one event out to a snapshot of the registry and waits for
    /// every delivery before returning.
    async fn dispatch(
        &self,
        event: WatchEvent<T>,
    ) {
        let watchers = self.registry.snapshot();
        debug!(kind = %event.kind(), watchers = watchers.len(), "dispatching event");

        let mut deliveries = Vec::with_capacity(watchers.len());
        for watcher in watchers {
            let event = event.clone();
            deliveries.push(tokio::spawn(deliver(watcher, event)));
        }

        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(Some(id)) => self.registry.remove(&id),
                Ok(None) => {}
                Err(error) => warn!(%error, "delivery task failed"),
            }
        }
    }
}

/// Delivers one event to one subscriber. Returns the id to evict when
/// the subscriber is finished, declined the event, or panicked; a
/// panicking sink is isolated to its own eviction.
async fn deliver<T>(
    watcher: Arc<RegisteredWatcher<T>>,
    event: WatchEvent<T>,
) -> Option<String> {
    if watcher.token.is_cancelled() {
        debug!(id = %watcher.id, "watcher finished, evicting");
        return Some(watcher.id.clone());
    }

    match AssertUnwindSafe(watcher.sink.on_event(event)).catch_unwind().await {
        Ok(true) => None,
        Ok(false) => {
            debug!(id = %watcher.id, "watcher declined event, evicting");
            Some(watcher.id.clone())
        }
        Err(_) => {
            warn!(id = %watcher.id, "watch sink panicked, evicting");
            Some(watcher.id.clone())
        }
    }
}

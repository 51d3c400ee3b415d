
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;

use crate::Error;
use crate::EventSink;
use crate::ListOptions;
use crate::Result;
use crate::StoreBackend;
use crate::WatchEvent;
use crate::WatcherManager;

/// Consumer-facing side of a subscription: a receive-only event channel
/// delivering events in emission order, plus a cancellation handle.
///
/// Dropping the stream without calling [`stop`](WatchStream::stop) is
/// safe: the next delivery attempt fails and the subscription is
/// evicted lazily.
pub struct WatchStream<T> {
    event_rx: mpsc::Receiver<WatchEvent<T>>,
    token: CancellationToken,
}

impl<T> WatchStream<T> {
    pub(crate) fn new(
        event_rx: mpsc::Receiver<WatchEvent<T>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            event_rx,
            token,
        }
    }

    /// Receives the next event. `None` once the stream is torn down.
    pub async fn recv(&mut self) -> Option<WatchEvent<T>> {
        self.event_rx.recv().await
    }

    /// Stops watching. The protocol driver pushes a final
    /// [`WatchEvent::Error`] and the subscription is evicted.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Adapts the channel into a [`futures::Stream`]. Cancellation stays
    /// with the caller: keep a [`stop`](WatchStream::stop) handle or let
    /// lazy eviction clean up when the stream is dropped.
    pub fn into_stream(self) -> ReceiverStream<WatchEvent<T>> {
        ReceiverStream::new(self.event_rx)
    }
}

/// Where a subscription routes incoming events.
enum SinkMode<T> {
    /// Startup: events accumulate until the initial snapshot has been
    /// delivered.
    Backlog(Vec<WatchEvent<T>>),
    /// Pass-through to the consumer channel.
    Streaming,
}

struct SinkState<T> {
    mode: SinkMode<T>,
    done: bool,
}

/// Drives the list-and-watch protocol for one subscription:
/// register (backlog mode) → initial snapshot → converging backlog
/// drain → streaming → blocking wait for cancellation.
///
/// Registration happens before the snapshot read, so any mutation racing
/// with the snapshot lands in the backlog instead of being lost.
/// Consumers must treat a duplicate `Added`/`Modified` for the same key
/// as idempotent state, never as an error.
pub(crate) struct WatchDriver<T> {
    token: CancellationToken,
    consumer_tx: mpsc::Sender<WatchEvent<T>>,
    state: Mutex<SinkState<T>>,
}

impl<T> EventSink<T> for WatchDriver<T>
where T: Clone + Send + Sync + 'static
{
    fn on_event(
        &self,
        event: WatchEvent<T>,
    ) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.done {
                return false;
            }
            match &mut state.mode {
                SinkMode::Backlog(backlog) => {
                    backlog.push(event);
                    true
                }
                // the send blocks until the consumer takes the event;
                // a dropped consumer reads as "no more events wanted"
                SinkMode::Streaming => self.consumer_tx.send(event).await.is_ok(),
            }
        })
    }
}

impl<T> WatchDriver<T>
where T: Clone + Send + Sync + 'static
{
    pub(crate) fn new(
        token: CancellationToken,
        consumer_tx: mpsc::Sender<WatchEvent<T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            consumer_tx,
            state: Mutex::new(SinkState {
                mode: SinkMode::Backlog(Vec::new()),
                done: false,
            }),
        })
    }

    /// Registers this subscription with the manager, in backlog mode.
    /// Must happen before the snapshot read.
    pub(crate) fn register(
        self: &Arc<Self>,
        manager: &WatcherManager<T>,
        options: ListOptions,
    ) -> Result<()> {
        manager.add(self.token.clone(), self.clone(), options)
    }

    /// Runs the protocol to completion. Blocking for the lifetime of the
    /// subscription; the store spawns it as a background task.
    pub(crate) async fn run<B>(
        self: Arc<Self>,
        backend: Arc<B>,
        options: ListOptions,
    ) where
        B: StoreBackend<T>,
    {
        if let Err(err) = self.list_and_stream(backend, options).await {
            debug!(error = %err, "watch terminating, sending error event");
            let _ = self.consumer_tx.send(WatchEvent::Error).await;
        }
        debug!("stop list-and-watch");
        self.token.cancel();
    }

    async fn list_and_stream<B>(
        &self,
        backend: Arc<B>,
        options: ListOptions,
    ) -> Result<()>
    where
        B: StoreBackend<T>,
    {
        if options.watch_only {
            debug!("watch only, skipping snapshot");
        } else {
            // Initial snapshot, synthesized as Added events and sent
            // ahead of the backlog by construction.
            let mut snapshot = Vec::new();
            if let Err(err) = backend.iterate(&mut |_, obj| snapshot.push(obj)) {
                error!(error = %err, "snapshot list failed");
            }
            debug!(objects = snapshot.len(), "delivering snapshot");
            for obj in snapshot {
                self.forward(WatchEvent::Added(obj)).await?;
            }
        }

        // Converging drain: each pass flushes what had landed before the
        // swap; a pass that observes an empty backlog flips the mode to
        // streaming under the same lock acquisition, so no event can
        // slip between draining and streaming.
        loop {
            let chunk = {
                let mut state = self.state.lock().await;
                match &mut state.mode {
                    SinkMode::Backlog(backlog) if backlog.is_empty() => {
                        debug!("backlog empty, moving to streaming mode");
                        state.mode = SinkMode::Streaming;
                        break;
                    }
                    SinkMode::Backlog(backlog) => std::mem::take(backlog),
                    SinkMode::Streaming => break,
                }
            };
            debug!(pending = chunk.len(), "flushing backlog");
            for event in chunk {
                self.forward(event).await?;
            }
        }

        self.token.cancelled().await;
        self.state.lock().await.done = true;
        Err(Error::Cancelled)
    }

    async fn forward(
        &self,
        event: WatchEvent<T>,
    ) -> Result<()> {
        self.consumer_tx
            .send(event)
            .await
            .map_err(|_| Error::Cancelled)
    }
}

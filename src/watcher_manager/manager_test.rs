use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::WatcherManager;
use crate::Error;
use crate::EventSink;
use crate::ListOptions;
use crate::WatchEvent;

struct CollectingSink {
    events: Mutex<Vec<WatchEvent<u32>>>,
    keep_going: AtomicBool,
}

impl CollectingSink {
    fn new(keep_going: bool) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            keep_going: AtomicBool::new(keep_going),
        })
    }

    fn events(&self) -> Vec<WatchEvent<u32>> {
        self.events.lock().clone()
    }
}

impl EventSink<u32> for CollectingSink {
    fn on_event(
        &self,
        event: WatchEvent<u32>,
    ) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.events.lock().push(event);
            self.keep_going.load(Ordering::SeqCst)
        })
    }
}

struct PanickingSink;

impl EventSink<u32> for PanickingSink {
    fn on_event(
        &self,
        _event: WatchEvent<u32>,
    ) -> BoxFuture<'_, bool> {
        Box::pin(async move { panic!("sink failure") })
    }
}

fn start_manager(max_watchers: usize) -> (Arc<WatcherManager<u32>>, CancellationToken) {
    let manager = Arc::new(WatcherManager::new(max_watchers));
    let shutdown = CancellationToken::new();
    let loop_manager = manager.clone();
    let loop_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop_manager.run(loop_shutdown).await;
    });
    (manager, shutdown)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn add_should_fail_with_resource_exhausted_beyond_ceiling() {
    let manager: WatcherManager<u32> = WatcherManager::new(2);

    for _ in 0..2 {
        manager
            .add(
                CancellationToken::new(),
                CollectingSink::new(true),
                ListOptions::default(),
            )
            .unwrap();
    }

    let result = manager.add(
        CancellationToken::new(),
        CollectingSink::new(true),
        ListOptions::default(),
    );
    assert!(matches!(result, Err(Error::ResourceExhausted)));
}

#[tokio::test]
async fn add_should_sweep_finished_watchers_before_admission() {
    let manager: WatcherManager<u32> = WatcherManager::new(1);
    let first_token = CancellationToken::new();
    manager
        .add(
            first_token.clone(),
            CollectingSink::new(true),
            ListOptions::default(),
        )
        .unwrap();

    // ceiling reached until the first watcher is cancelled
    assert!(matches!(
        manager.add(
            CancellationToken::new(),
            CollectingSink::new(true),
            ListOptions::default()
        ),
        Err(Error::ResourceExhausted)
    ));

    first_token.cancel();
    manager
        .add(
            CancellationToken::new(),
            CollectingSink::new(true),
            ListOptions::default(),
        )
        .unwrap();
    assert_eq!(manager.watcher_count(), 1);
}

#[tokio::test]
async fn dispatch_should_deliver_each_event_to_every_live_watcher() {
    let (manager, _shutdown) = start_manager(4);
    let first = CollectingSink::new(true);
    let second = CollectingSink::new(true);
    manager
        .add(CancellationToken::new(), first.clone(), ListOptions::default())
        .unwrap();
    manager
        .add(CancellationToken::new(), second.clone(), ListOptions::default())
        .unwrap();

    manager.sender().send(WatchEvent::Added(1)).await.unwrap();
    manager.sender().send(WatchEvent::Modified(2)).await.unwrap();
    settle().await;

    let expected = vec![WatchEvent::Added(1), WatchEvent::Modified(2)];
    assert_eq!(first.events(), expected);
    assert_eq!(second.events(), expected);
}

#[tokio::test]
async fn watcher_declining_an_event_should_be_evicted_and_slot_reclaimed() {
    let (manager, _shutdown) = start_manager(1);
    let sink = CollectingSink::new(false);
    manager
        .add(CancellationToken::new(), sink.clone(), ListOptions::default())
        .unwrap();

    manager.sender().send(WatchEvent::Added(1)).await.unwrap();
    settle().await;

    assert_eq!(sink.events(), vec![WatchEvent::Added(1)]);
    assert_eq!(manager.watcher_count(), 0);
    // the slot is free again
    manager
        .add(
            CancellationToken::new(),
            CollectingSink::new(true),
            ListOptions::default(),
        )
        .unwrap();
}

#[tokio::test]
async fn cancelled_watcher_should_be_evicted_without_callback() {
    let (manager, _shutdown) = start_manager(2);
    let sink = CollectingSink::new(true);
    let token = CancellationToken::new();
    manager
        .add(token.clone(), sink.clone(), ListOptions::default())
        .unwrap();

    token.cancel();
    manager.sender().send(WatchEvent::Added(1)).await.unwrap();
    settle().await;

    assert!(sink.events().is_empty());
    assert_eq!(manager.watcher_count(), 0);
}

#[tokio::test]
async fn panicking_sink_should_not_abort_delivery_to_others() {
    let (manager, _shutdown) = start_manager(2);
    let healthy = CollectingSink::new(true);
    manager
        .add(
            CancellationToken::new(),
            Arc::new(PanickingSink),
            ListOptions::default(),
        )
        .unwrap();
    manager
        .add(CancellationToken::new(), healthy.clone(), ListOptions::default())
        .unwrap();

    manager.sender().send(WatchEvent::Added(7)).await.unwrap();
    settle().await;

    assert_eq!(healthy.events(), vec![WatchEvent::Added(7)]);
    // the faulty watcher alone was evicted
    assert_eq!(manager.watcher_count(), 1);
}

#[tokio::test]
async fn stop_should_terminate_the_dispatch_loop() {
    let manager: Arc<WatcherManager<u32>> = Arc::new(WatcherManager::new(1));
    let loop_manager = manager.clone();
    let handle = tokio::spawn(async move {
        loop_manager.run(CancellationToken::new()).await;
    });
    // give the loop a chance to install its shutdown token
    settle().await;

    manager.stop();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("dispatch loop should exit after stop")
        .unwrap();
}

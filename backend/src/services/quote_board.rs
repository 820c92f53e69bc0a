use crate::change_feed::{ChangeSource, FeedError, FeedItem};
use crate::models::{ChangeEvent, PriceQuote};
use crate::reconciler::QuoteMirror;
use crate::repositories::QuoteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Buffered change notices per subscriber before it starts lagging
const CHANGE_CAPACITY: usize = 256;

/// What display surfaces render from
#[derive(Debug, Clone, Default)]
pub struct BoardSnapshot {
    /// Bumped on every publish
    pub version: u64,
    /// False until the first full read has landed
    pub seeded: bool,
    pub quotes: Arc<Vec<PriceQuote>>,
}

/// Live mirror of the quote table.
///
/// One task owns the list: the initial read, the change feed and re-reads
/// after a reconnect are all handled on it, one at a time. Readers get
/// immutable snapshots through a watch channel and individual changes
/// through a broadcast channel.
pub struct QuoteBoard<S: QuoteStore + ?Sized> {
    store: Arc<S>,
    retry_delay: Duration,
}

impl<S: QuoteStore + ?Sized + 'static> QuoteBoard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set how long to wait before retrying a failed read
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Start the board task. `source` should already be subscribed so that
    /// changes made during the initial read are not lost.
    pub fn spawn<C: ChangeSource + 'static>(self, source: C) -> BoardHandle {
        let (snapshot_tx, snapshot_rx) = watch::channel(BoardSnapshot::default());
        let (changes_tx, _) = broadcast::channel(CHANGE_CAPACITY);

        let task = BoardTask {
            store: self.store,
            source,
            mirror: QuoteMirror::new(),
            snapshot_tx,
            changes_tx: changes_tx.clone(),
            version: 0,
            feed_open: true,
            retry_delay: self.retry_delay,
        };

        let task = tokio::spawn(task.run());
        info!("Quote board started");

        BoardHandle {
            snapshots: snapshot_rx,
            changes: changes_tx,
            task,
        }
    }
}

/// Owner-side handle; dropping it stops the board and its subscription
pub struct BoardHandle {
    snapshots: watch::Receiver<BoardSnapshot>,
    changes: broadcast::Sender<ChangeEvent>,
    task: JoinHandle<()>,
}

impl BoardHandle {
    /// Latest published snapshot
    pub fn current(&self) -> BoardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every publish
    pub fn watch(&self) -> watch::Receiver<BoardSnapshot> {
        self.snapshots.clone()
    }

    /// Receiver for individual applied changes
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Wait for the first full read to land
    pub async fn seeded(&self) -> BoardSnapshot {
        let mut rx = self.snapshots.clone();
        if let Ok(snapshot) = rx.wait_for(|snapshot| snapshot.seeded).await {
            return snapshot.clone();
        }
        // board task is gone; last known state is all there is
        let snapshot = rx.borrow().clone();
        snapshot
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the board and drop its change subscription
    pub fn shutdown(self) {
        info!("Quote board shutting down");
        self.task.abort();
    }
}

impl Drop for BoardHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Step {
    Continue,
    Resync,
}

struct BoardTask<S: ?Sized, C> {
    store: Arc<S>,
    source: C,
    mirror: QuoteMirror,
    snapshot_tx: watch::Sender<BoardSnapshot>,
    changes_tx: broadcast::Sender<ChangeEvent>,
    version: u64,
    feed_open: bool,
    retry_delay: Duration,
}

impl<S: QuoteStore + ?Sized, C: ChangeSource> BoardTask<S, C> {
    async fn run(mut self) {
        loop {
            if !self.mirror.is_seeded() {
                self.seed().await;
                continue;
            }

            if !self.feed_open {
                // No more changes will come; keep serving the last state.
                futures::future::pending::<()>().await;
            }

            let item = self.source.next_item().await;
            let receive_failed = matches!(item, Err(FeedError::Receive(_)));
            self.on_item(item);
            if receive_failed {
                time::sleep(self.retry_delay).await;
            }
        }
    }

    /// Read the full table while still draining the feed; changes seen
    /// meanwhile are buffered by the mirror and replayed on top of the read.
    async fn seed(&mut self) {
        loop {
            let store = Arc::clone(&self.store);
            let fetch = store.fetch_quotes();
            tokio::pin!(fetch);

            let result = loop {
                tokio::select! {
                    result = &mut fetch => break Some(result),
                    item = self.source.next_item(), if self.feed_open => {
                        if let Step::Resync = self.on_item(item) {
                            break None;
                        }
                    }
                }
            };

            match result {
                Some(Ok(rows)) => {
                    let count = rows.len();
                    let replayed = self.mirror.seed(rows);
                    info!(
                        "Quote board seeded with {} quotes ({} buffered changes replayed)",
                        count, replayed
                    );
                    self.publish();
                    return;
                }
                Some(Err(e)) => {
                    error!("Failed to read quotes, retrying in {:?}: {}", self.retry_delay, e);
                    let sleep = time::sleep(self.retry_delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            item = self.source.next_item(), if self.feed_open => {
                                self.on_item(item);
                            }
                        }
                    }
                }
                // feed reconnected mid-read; the read may predate lost changes
                None => debug!("Restarting quote read after feed resync"),
            }
        }
    }

    fn on_item(&mut self, item: Result<FeedItem, FeedError>) -> Step {
        match item {
            Ok(FeedItem::Change(event)) => {
                if self.mirror.is_seeded() {
                    let changed = self.mirror.push(event.clone());
                    debug!(
                        kind = event.kind().as_str(),
                        id = event.quote_id(),
                        changed,
                        "Applied quote change"
                    );
                    // receivers of a change must already see it in the snapshot
                    self.publish();
                    let _ = self.changes_tx.send(event);
                } else {
                    self.mirror.push(event);
                    if self.mirror.overflowed() {
                        self.mirror.reset();
                        return Step::Resync;
                    }
                }
                Step::Continue
            }
            Ok(FeedItem::Resync) => {
                warn!("Change feed resynced; re-reading quotes");
                self.mirror.reset();
                Step::Resync
            }
            Err(FeedError::Closed) => {
                warn!("Change feed closed; quote board keeps its last state");
                self.feed_open = false;
                Step::Continue
            }
            Err(e @ FeedError::Malformed(_)) => {
                warn!("Skipping quote change: {}", e);
                Step::Continue
            }
            Err(e) => {
                error!("Change feed error, re-reading quotes: {}", e);
                self.mirror.reset();
                Step::Resync
            }
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        self.snapshot_tx.send_replace(BoardSnapshot {
            version: self.version,
            seeded: self.mirror.is_seeded(),
            quotes: Arc::new(self.mirror.snapshot()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::reconciler::PENDING_LIMIT;
    use crate::models::NewPriceQuote;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Mutex};

    fn quote(id: i64, buy: i64) -> PriceQuote {
        PriceQuote {
            id,
            product_label: format!("Vàng {}", id),
            buy_price: Decimal::new(buy, 0),
            sell_price: Decimal::new(buy + 5, 0),
            unit_label: "VNĐ/chỉ".to_string(),
            updated_at: Utc.with_ymd_and_hms(2025, 10, 19, 8, 0, 0).unwrap(),
        }
    }

    /// Store whose reads block until the test releases them
    struct GatedStore {
        reads: Mutex<mpsc::Receiver<Result<Vec<PriceQuote>, RepositoryError>>>,
        calls: AtomicUsize,
    }

    impl GatedStore {
        fn new() -> (Arc<Self>, mpsc::Sender<Result<Vec<PriceQuote>, RepositoryError>>) {
            let (tx, rx) = mpsc::channel(8);
            let store = Arc::new(Self {
                reads: Mutex::new(rx),
                calls: AtomicUsize::new(0),
            });
            (store, tx)
        }
    }

    #[async_trait]
    impl QuoteStore for GatedStore {
        async fn fetch_quotes(&self) -> Result<Vec<PriceQuote>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut reads = self.reads.lock().await;
            match reads.recv().await {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        async fn create_quote(&self, _: &NewPriceQuote) -> Result<PriceQuote, RepositoryError> {
            unreachable!("board never writes")
        }

        async fn update_quote(
            &self,
            _: i64,
            _: &NewPriceQuote,
        ) -> Result<Option<PriceQuote>, RepositoryError> {
            unreachable!("board never writes")
        }

        async fn delete_quote(&self, _: i64) -> Result<bool, RepositoryError> {
            unreachable!("board never writes")
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    async fn next_version(rx: &mut watch::Receiver<BoardSnapshot>) -> BoardSnapshot {
        rx.changed().await.expect("board stopped");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn test_changes_before_seed_are_replayed() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store.clone()).spawn(source);
        let mut rx = board.watch();

        feed.send(FeedItem::Change(ChangeEvent::Update { record: quote(1, 150) }))
            .await
            .unwrap();
        feed.send(FeedItem::Change(ChangeEvent::Insert { record: quote(3, 300) }))
            .await
            .unwrap();
        settle().await;
        assert!(!board.current().seeded);

        reads.send(Ok(vec![quote(1, 100), quote(2, 200)])).await.unwrap();
        let snapshot = board.seeded().await;
        assert_eq!(
            *snapshot.quotes,
            vec![quote(1, 150), quote(2, 200), quote(3, 300)]
        );

        let _ = rx.borrow_and_update();
        feed.send(FeedItem::Change(ChangeEvent::Delete { old_id: 2 }))
            .await
            .unwrap();
        let snapshot = next_version(&mut rx).await;
        assert_eq!(*snapshot.quotes, vec![quote(1, 150), quote(3, 300)]);
    }

    #[tokio::test]
    async fn test_every_change_is_broadcast() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store).spawn(source);
        let mut changes = board.subscribe_changes();

        reads.send(Ok(vec![])).await.unwrap();
        board.seeded().await;

        let noop = ChangeEvent::Delete { old_id: 42 };
        feed.send(FeedItem::Change(noop.clone())).await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), noop);
    }

    #[tokio::test]
    async fn test_failed_read_is_retried_and_state_kept() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store.clone())
            .with_retry_delay(Duration::from_millis(10))
            .spawn(source);

        reads
            .send(Err(RepositoryError::NotFound("boom".into())))
            .await
            .unwrap();
        feed.send(FeedItem::Change(ChangeEvent::Insert { record: quote(9, 900) }))
            .await
            .unwrap();
        reads.send(Ok(vec![quote(1, 100)])).await.unwrap();

        let snapshot = board.seeded().await;
        assert_eq!(*snapshot.quotes, vec![quote(1, 100), quote(9, 900)]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resync_rereads_and_keeps_stale_rows_meanwhile() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store.clone()).spawn(source);
        let mut rx = board.watch();

        reads.send(Ok(vec![quote(1, 100)])).await.unwrap();
        board.seeded().await;
        let _ = rx.borrow_and_update();

        feed.send(FeedItem::Resync).await.unwrap();
        feed.send(FeedItem::Change(ChangeEvent::Update { record: quote(1, 120) }))
            .await
            .unwrap();
        settle().await;
        // still showing the old list while the re-read is pending
        assert_eq!(*board.current().quotes, vec![quote(1, 100)]);

        reads.send(Ok(vec![quote(1, 110), quote(2, 200)])).await.unwrap();
        let snapshot = next_version(&mut rx).await;
        assert_eq!(*snapshot.quotes, vec![quote(1, 120), quote(2, 200)]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_feed_keeps_last_state() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store).spawn(source);

        reads.send(Ok(vec![quote(1, 100)])).await.unwrap();
        board.seeded().await;
        drop(feed);
        settle().await;

        assert!(board.is_running());
        assert_eq!(*board.current().quotes, vec![quote(1, 100)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_change_notice_follows_snapshot() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store).spawn(source);
        let mut changes = board.subscribe_changes();

        reads.send(Ok(vec![quote(1, 100)])).await.unwrap();
        board.seeded().await;

        for buy in 101..=120 {
            let event = ChangeEvent::Update { record: quote(1, buy) };
            feed.send(FeedItem::Change(event.clone())).await.unwrap();
            assert_eq!(changes.recv().await.unwrap(), event);
            assert_eq!(*board.current().quotes, vec![quote(1, buy)]);
        }
    }

    #[tokio::test]
    async fn test_buffer_overflow_restarts_read() {
        let (store, reads) = GatedStore::new();
        let (feed, source) = mpsc::channel(PENDING_LIMIT + 8);
        let board = QuoteBoard::new(store.clone()).spawn(source);

        settle().await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        for id in 0..=PENDING_LIMIT as i64 {
            feed.send(FeedItem::Change(ChangeEvent::Delete { old_id: id }))
                .await
                .unwrap();
        }
        feed.send(FeedItem::Change(ChangeEvent::Insert { record: quote(7, 700) }))
            .await
            .unwrap();

        // the first read is abandoned and a second one starts
        time::timeout(Duration::from_secs(1), async {
            while store.calls.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("read was not restarted");
        reads.send(Ok(vec![quote(2, 200)])).await.unwrap();

        let snapshot = board.seeded().await;
        assert_eq!(*snapshot.quotes, vec![quote(2, 200), quote(7, 700)]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (store, reads) = GatedStore::new();
        let (_feed, source) = mpsc::channel(8);
        let board = QuoteBoard::new(store).spawn(source);
        let mut rx = board.watch();

        reads.send(Ok(vec![quote(1, 100)])).await.unwrap();
        board.seeded().await;
        let _ = rx.borrow_and_update();

        board.shutdown();
        // sender goes away with the task
        let stopped = time::timeout(Duration::from_secs(1), rx.changed()).await;
        assert!(matches!(stopped, Ok(Err(_))));
        assert_eq!(*rx.borrow().quotes, vec![quote(1, 100)]);
    }
}

use crate::error::RepositoryError;
use crate::models::{HistoryRange, PriceHistoryEntry, PriceQuote};
use crate::repositories::HistoryStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The chart's current data and the request it came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySnapshot {
    /// Sequence number of the request `entries` answer; 0 before any
    pub seq: u64,
    pub product_label: Option<String>,
    pub range: HistoryRange,
    pub entries: Arc<Vec<PriceHistoryEntry>>,
    /// True while the most recently issued request is outstanding
    pub loading: bool,
}

/// Historical series for one chart.
///
/// Each [`request`](Self::request) is tagged with an increasing sequence
/// number. A response is shown only if no newer request was issued in the
/// meantime, so a slow old query can never overwrite a newer one. Failed
/// queries are logged and the previous series stays on display.
pub struct HistoryView<S: HistoryStore + ?Sized> {
    store: Arc<S>,
    issued: Arc<AtomicU64>,
    state: Arc<watch::Sender<HistorySnapshot>>,
}

impl<S: HistoryStore + ?Sized> Clone for HistoryView<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            issued: Arc::clone(&self.issued),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: HistoryStore + ?Sized + 'static> HistoryView<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (state, _) = watch::channel(HistorySnapshot::default());
        Self {
            store,
            issued: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
        }
    }

    /// Receiver that wakes whenever the displayed series or loading flag changes
    pub fn watch(&self) -> watch::Receiver<HistorySnapshot> {
        self.state.subscribe()
    }

    pub fn current(&self) -> HistorySnapshot {
        self.state.borrow().clone()
    }

    /// Sequence number of the most recently issued request
    pub fn latest_seq(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Fetch `product_label` over `range`, ending now.
    ///
    /// The returned handle resolves to whether this response was displayed.
    pub fn request(&self, product_label: &str, range: HistoryRange) -> JoinHandle<bool> {
        self.request_at(product_label, range, Utc::now())
    }

    /// [`request`](Self::request) with an explicit "now"
    pub fn request_at(
        &self,
        product_label: &str,
        range: HistoryRange,
        now: DateTime<Utc>,
    ) -> JoinHandle<bool> {
        let mut seq = 0;
        self.state.send_modify(|snapshot| {
            seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            snapshot.loading = true;
        });
        debug!(
            seq,
            product_label,
            range = range.as_str(),
            "Requesting price history"
        );

        let store = Arc::clone(&self.store);
        let issued = Arc::clone(&self.issued);
        let state = Arc::clone(&self.state);
        let label = product_label.to_string();

        tokio::spawn(async move {
            let result = store.fetch_history(&label, range.since(now)).await;
            complete(&issued, &state, seq, label, range, result)
        })
    }
}

/// Install a response if it belongs to the latest request
fn complete(
    issued: &AtomicU64,
    state: &watch::Sender<HistorySnapshot>,
    seq: u64,
    product_label: String,
    range: HistoryRange,
    result: Result<Vec<PriceHistoryEntry>, RepositoryError>,
) -> bool {
    let mut displayed = false;
    state.send_if_modified(|snapshot| {
        // checked under the watch lock so a concurrent request cannot slip in
        let latest = issued.load(Ordering::SeqCst);
        if latest != seq {
            debug!(seq, latest, "Discarding superseded history response");
            return false;
        }

        snapshot.loading = false;
        match result {
            Ok(entries) => {
                debug!(seq, count = entries.len(), "Displaying price history");
                snapshot.seq = seq;
                snapshot.product_label = Some(product_label);
                snapshot.range = range;
                snapshot.entries = Arc::new(entries);
                displayed = true;
            }
            Err(e) => {
                warn!(
                    "Failed to load {} history for {}: {}",
                    range.as_str(),
                    product_label,
                    e
                );
            }
        }
        true
    });
    displayed
}

/// Distinct product labels in table order; the first is the chart's default
pub fn product_labels(quotes: &[PriceQuote]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for quote in quotes {
        if !labels.iter().any(|label| label == &quote.product_label) {
            labels.push(quote.product_label.clone());
        }
    }
    labels
}

//! Folding change-feed events into a locally held list of quotes.
//!
//! [`apply`] and [`reduce`] are the whole merge rule. [`QuoteMirror`] adds
//! the seeding step: events seen before the initial full read lands are
//! held back and replayed on top of it in arrival order.

use crate::models::{ChangeEvent, PriceQuote};
use tracing::{debug, warn};

/// Apply one event in place. Returns whether the list changed.
///
/// INSERT appends, UPDATE replaces the matching row (never inserts),
/// DELETE removes the matching row. Unknown ids are no-ops. A repeated
/// INSERT appends a second row with the same id.
pub fn apply(quotes: &mut Vec<PriceQuote>, event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::Insert { record } => {
            quotes.push(record.clone());
            true
        }
        ChangeEvent::Update { record } => {
            let mut changed = false;
            for quote in quotes.iter_mut().filter(|q| q.id == record.id) {
                if quote != record {
                    *quote = record.clone();
                    changed = true;
                }
            }
            changed
        }
        ChangeEvent::Delete { old_id } => {
            let before = quotes.len();
            quotes.retain(|q| q.id != *old_id);
            quotes.len() != before
        }
    }
}

/// Pure reducer form of [`apply`]
pub fn reduce(mut quotes: Vec<PriceQuote>, event: &ChangeEvent) -> Vec<PriceQuote> {
    apply(&mut quotes, event);
    quotes
}

/// Most events held while waiting for a read. Past this the buffer is
/// dropped and the read has to start over.
pub const PENDING_LIMIT: usize = 1024;

/// Held copy of the quote table plus the pre-seed event buffer
#[derive(Debug, Default)]
pub struct QuoteMirror {
    quotes: Vec<PriceQuote>,
    pending: Vec<ChangeEvent>,
    seeded: bool,
    overflowed: bool,
}

impl QuoteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event. Before [`seed`](Self::seed) it is buffered and
    /// `false` is returned; afterwards it is applied immediately.
    ///
    /// A full buffer is discarded and [`overflowed`](Self::overflowed)
    /// stays set until [`reset`](Self::reset).
    pub fn push(&mut self, event: ChangeEvent) -> bool {
        if !self.seeded {
            if self.pending.len() >= PENDING_LIMIT {
                warn!(
                    "Dropping {} buffered changes; quotes must be re-read",
                    self.pending.len()
                );
                self.pending = Vec::new();
                self.overflowed = true;
            }
            if self.overflowed {
                return false;
            }
            debug!(
                kind = event.kind().as_str(),
                id = event.quote_id(),
                "Buffering change until initial read completes"
            );
            self.pending.push(event);
            return false;
        }
        apply(&mut self.quotes, &event)
    }

    /// Install the result of a full read, then replay buffered events.
    ///
    /// Calling it again (after a feed reconnect) replaces the list with the
    /// fresh read. Returns the number of replayed events.
    pub fn seed(&mut self, rows: Vec<PriceQuote>) -> usize {
        self.quotes = rows;
        self.seeded = true;

        let pending = std::mem::take(&mut self.pending);
        let replayed = pending.len();
        for event in &pending {
            apply(&mut self.quotes, event);
        }
        replayed
    }

    /// Forget the seed so the next events buffer until a fresh read lands
    pub fn reset(&mut self) {
        self.seeded = false;
        self.overflowed = false;
        self.pending.clear();
    }

    /// True once changes were dropped; a read in flight is no longer enough
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn quotes(&self) -> &[PriceQuote] {
        &self.quotes
    }

    pub fn snapshot(&self) -> Vec<PriceQuote> {
        self.quotes.clone()
    }
}

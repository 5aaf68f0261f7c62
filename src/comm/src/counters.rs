use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of records and words moved through a communicator.
/// Incremented from the send path and the dispatch loop; readable at any
/// time without blocking either.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    messages_sent: AtomicU64,
    words_sent: AtomicU64,
    messages_received: AtomicU64,
    words_received: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub messages_sent: u64,
    pub words_sent: u64,
    pub messages_received: u64,
    pub words_received: u64,
}

impl TrafficCounters {
    /// One transmitted record of `words` transport elements.
    pub fn record_send(&self, words: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.words_sent.fetch_add(words as u64, Ordering::Relaxed);
    }

    /// One received record of `words` transport elements.
    pub fn record_receive(&self, words: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.words_received.fetch_add(words as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            words_sent: self.words_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            words_received: self.words_received.load(Ordering::Relaxed),
        }
    }
}

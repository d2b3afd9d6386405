use std::sync::atomic::{AtomicU64, Ordering};

/// Counters over every sync the downloader ran.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DownloaderStats {
    pub headers_in: u64,
    pub bodies_in: u64,
    pub receipts_in: u64,
    /// State trie nodes.
    pub states_in: u64,
    /// Responses thrown away because they failed validation.
    pub dropped: u64,
    /// Retrievals that gave up.
    pub timed_out: u64,
    /// Times the sync peer was replaced.
    pub stalls: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub headers_in: AtomicU64,
    pub bodies_in: AtomicU64,
    pub receipts_in: AtomicU64,
    pub states_in: AtomicU64,
    pub dropped: AtomicU64,
    pub timed_out: AtomicU64,
    pub stalls: AtomicU64,
}

impl Counters {
    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(
            u64::try_from(amount).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    pub(crate) fn snapshot(&self) -> DownloaderStats {
        DownloaderStats {
            headers_in: self.headers_in.load(Ordering::Relaxed),
            bodies_in: self.bodies_in.load(Ordering::Relaxed),
            receipts_in: self.receipts_in.load(Ordering::Relaxed),
            states_in: self.states_in.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }
}

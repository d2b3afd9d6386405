use std::{cmp::Ordering, collections::BinaryHeap};

/// A downloaded batch waiting for the batches below it.
///
/// The [`Eq`] and [`Ord`] impls only take into account the `start_height`, the downloader
/// only downloads one chain at once so no 2 batches have the same `start_height`.
///
/// The [`Ord`] impl is reversed so lower batches come first in a [`BinaryHeap`].
#[derive(Debug, Clone)]
pub(super) struct ReadyQueueBatch<T> {
    pub start_height: u64,
    /// The amount of heights the batch covers.
    pub len: u64,
    pub item: T,
}

impl<T> Eq for ReadyQueueBatch<T> {}

impl<T> PartialEq<Self> for ReadyQueueBatch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.start_height.eq(&other.start_height)
    }
}

impl<T> PartialOrd<Self> for ReadyQueueBatch<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ReadyQueueBatch<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse the ordering so lower batches come first in a [`BinaryHeap`]
        self.start_height.cmp(&other.start_height).reverse()
    }
}

/// Puts batches that finish downloading out of order back in height order.
pub(super) struct BlockQueue<T> {
    ready_batches: BinaryHeap<ReadyQueueBatch<T>>,
    /// The start height of the next batch to hand out.
    next_height: u64,
}

impl<T> BlockQueue<T> {
    pub(super) fn new(next_height: u64) -> Self {
        Self {
            ready_batches: BinaryHeap::new(),
            next_height,
        }
    }

    pub(super) fn push(&mut self, start_height: u64, len: u64, item: T) {
        self.ready_batches.push(ReadyQueueBatch {
            start_height,
            len,
            item,
        });
    }

    /// Returns the next batch in height order, if it has arrived.
    pub(super) fn pop_ready(&mut self) -> Option<T> {
        if self
            .ready_batches
            .peek()
            .is_none_or(|batch| batch.start_height != self.next_height)
        {
            return None;
        }

        let batch = self.ready_batches.pop()?;
        self.next_height = batch.start_height + batch.len;
        Some(batch.item)
    }

    pub(super) const fn next_height(&self) -> u64 {
        self.next_height
    }

    pub(super) fn len(&self) -> usize {
        self.ready_batches.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.ready_batches.is_empty()
    }
}

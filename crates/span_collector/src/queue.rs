//! Bounded FIFO admission queue between receivers and the worker pool.
//!
//! Receivers call [`AdaptiveQueue::enqueue`], which never blocks: a full
//! queue fails fast with [`EnqueueError::QueueFull`] so the receiver can push
//! back on its client. Workers block in [`AdaptiveQueue::dequeue`] while the
//! queue is empty and open.
//!
//! # Sizing
//!
//! - [`QueueMode::Fixed`]: a constant item-count capacity.
//! - [`QueueMode::MemoryBudget`]: capacity is recomputed on every admission
//!   as `floor(budget / mean)`, where `mean` is the average estimated size
//!   of the last `sample_window` admitted items. Queued bytes never exceed
//!   the budget either.
//!
//! A size sample is only recorded when its item is admitted, so capacity
//! never drops below the current length.
//!
//! # Lifecycle
//!
//! `Open → Draining → Closed`. [`begin_drain`](AdaptiveQueue::begin_drain)
//! stops admissions while workers keep dequeuing; the queue closes itself
//! once a draining queue runs empty. [`close`](AdaptiveQueue::close) forces
//! the transition and drops whatever is left.

#[cfg(debug_assertions)]
use crate::invariants::{
    debug_assert_closed_empty, debug_assert_forward_transition, debug_assert_within_budget,
    debug_assert_within_capacity,
};
use crate::span::EstimateSize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

/// Rolling window used when none is configured.
pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

/// Errors returned to producers by [`AdaptiveQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Capacity (count or byte budget) would be exceeded.
    #[error("queue is full")]
    QueueFull,
    /// The queue is draining or closed.
    #[error("queue is closed")]
    QueueClosed,
}

impl EnqueueError {
    /// Returns `true` if the caller may retry later.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    /// Returns `true` if the queue will never accept items again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::QueueClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Fixed { capacity: usize },
    MemoryBudget { budget_bytes: u64, sample_window: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub mode: QueueMode,
}

impl QueueConfig {
    pub fn fixed(capacity: usize) -> Self {
        Self {
            mode: QueueMode::Fixed { capacity },
        }
    }

    pub fn memory_budget(budget_bytes: u64) -> Self {
        Self {
            mode: QueueMode::MemoryBudget {
                budget_bytes,
                sample_window: DEFAULT_SAMPLE_WINDOW,
            },
        }
    }

    /// Byte-budget mode when a budget is given, fixed mode otherwise.
    pub fn from_options(queue_size: usize, budget_bytes: Option<u64>) -> Self {
        match budget_bytes {
            Some(budget) => Self::memory_budget(budget),
            None => Self::fixed(queue_size),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::fixed(pipeline_config::options::DEFAULT_QUEUE_SIZE)
    }
}

/// Lifecycle state; ordered so transitions can only increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueState {
    Open,
    Draining,
    Closed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Open => f.write_str("open"),
            QueueState::Draining => f.write_str("draining"),
            QueueState::Closed => f.write_str("closed"),
        }
    }
}

/// A queued value with its size estimate and arrival time.
#[derive(Debug)]
pub struct QueueItem<T> {
    pub item: T,
    pub size: usize,
    pub enqueued_at: Instant,
}

/// Admission counters (relaxed atomics, read for observability only).
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub rejected_full: AtomicU64,
    pub rejected_closed: AtomicU64,
    pub dropped_on_close: AtomicU64,
    /// Longest time an item spent queued, in microseconds
    pub max_wait_micros: AtomicU64,
}

impl QueueMetrics {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn rejected_full(&self) -> u64 {
        self.rejected_full.load(Ordering::Relaxed)
    }

    pub fn rejected_closed(&self) -> u64 {
        self.rejected_closed.load(Ordering::Relaxed)
    }

    pub fn dropped_on_close(&self) -> u64 {
        self.dropped_on_close.load(Ordering::Relaxed)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_micros(self.max_wait_micros.load(Ordering::Relaxed))
    }

    fn record_wait(&self, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.max_wait_micros.fetch_max(micros, Ordering::Relaxed);
    }
}

/// Rolling mean of admitted item sizes.
#[derive(Debug)]
struct SizeWindow {
    samples: VecDeque<usize>,
    sum: u64,
    limit: usize,
}

impl SizeWindow {
    fn new(limit: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            sum: 0,
            limit: limit.max(1),
        }
    }

    /// Mean as it would be after recording `size`.
    fn mean_with(&self, size: usize) -> u64 {
        let (sum, count) = if self.samples.len() == self.limit {
            let evicted = self.samples.front().copied().unwrap_or_default() as u64;
            (self.sum - evicted + size as u64, self.limit)
        } else {
            (self.sum + size as u64, self.samples.len() + 1)
        };
        sum / count as u64
    }

    fn mean(&self) -> u64 {
        if self.samples.is_empty() {
            0
        } else {
            self.sum / self.samples.len() as u64
        }
    }

    fn record(&mut self, size: usize) {
        if self.samples.len() == self.limit {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted as u64;
            }
        }
        self.samples.push_back(size);
        self.sum += size as u64;
    }
}

#[derive(Debug)]
enum Sizer {
    Fixed(usize),
    Budget { budget: u64, window: SizeWindow },
}

fn budget_capacity(budget: u64, mean: u64) -> usize {
    usize::try_from(budget / mean.max(1)).unwrap_or(usize::MAX)
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<QueueItem<T>>,
    bytes: u64,
    state: QueueState,
    sizer: Sizer,
}

impl<T> Inner<T> {
    fn capacity(&self) -> usize {
        match &self.sizer {
            Sizer::Fixed(capacity) => *capacity,
            Sizer::Budget { budget, window } => budget_capacity(*budget, window.mean()),
        }
    }

    /// Dequeues the head, closing a draining queue once it runs empty.
    fn pop(&mut self) -> Option<QueueItem<T>> {
        let item = self.items.pop_front();
        match &item {
            Some(queued) => self.bytes -= queued.size as u64,
            None if self.state == QueueState::Draining => {
                self.state = QueueState::Closed;
                #[cfg(debug_assertions)]
                debug_assert_closed_empty!(true, self.items.len());
            }
            None => {}
        }
        item
    }
}

/// Bounded FIFO queue shared by every receiver and worker of one pipeline.
pub struct AdaptiveQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    metrics: QueueMetrics,
}

impl<T: EstimateSize> AdaptiveQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let sizer = match config.mode {
            QueueMode::Fixed { capacity } => Sizer::Fixed(capacity),
            QueueMode::MemoryBudget {
                budget_bytes,
                sample_window,
            } => Sizer::Budget {
                budget: budget_bytes,
                window: SizeWindow::new(sample_window),
            },
        };
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                bytes: 0,
                state: QueueState::Open,
                sizer,
            }),
            available: Notify::new(),
            metrics: QueueMetrics::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits `item` or fails immediately; never blocks.
    pub fn enqueue(&self, item: T) -> Result<(), EnqueueError> {
        let size = item.estimated_size();
        let mut inner = self.lock();

        if inner.state != QueueState::Open {
            self.metrics.rejected_closed.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueError::QueueClosed);
        }

        let len = inner.items.len();
        let queued_bytes = inner.bytes;
        let admitted = match &mut inner.sizer {
            Sizer::Fixed(capacity) => len < *capacity,
            Sizer::Budget { budget, window } => {
                let fits_budget = queued_bytes.saturating_add(size as u64) <= *budget;
                let fits_count = len < budget_capacity(*budget, window.mean_with(size));
                if fits_budget && fits_count {
                    window.record(size);
                }
                fits_budget && fits_count
            }
        };
        if !admitted {
            self.metrics.rejected_full.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueError::QueueFull);
        }

        inner.items.push_back(QueueItem {
            item,
            size,
            enqueued_at: Instant::now(),
        });
        inner.bytes += size as u64;

        #[cfg(debug_assertions)]
        {
            debug_assert_within_capacity!(inner.items.len(), inner.capacity());
            if let Sizer::Budget { budget, .. } = &inner.sizer {
                debug_assert_within_budget!(inner.bytes, *budget);
            }
        }
        drop(inner);

        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        Ok(())
    }

    /// Removes the head item without waiting.
    pub fn try_dequeue(&self) -> Option<QueueItem<T>> {
        let mut inner = self.lock();
        let was_draining = inner.state == QueueState::Draining;
        let item = inner.pop();
        let closed_now = was_draining && inner.state == QueueState::Closed;
        drop(inner);

        if let Some(queued) = &item {
            self.metrics.dequeued.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_wait(queued.enqueued_at.elapsed());
        }
        if closed_now {
            self.available.notify_waiters();
        }
        item
    }

    /// Waits for the head item.
    ///
    /// Returns `None` once the queue is closed, or draining and empty.
    pub async fn dequeue(&self) -> Option<QueueItem<T>> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent notify is not lost.
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            if self.state() != QueueState::Open {
                return None;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current item-count ceiling.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Estimated bytes currently queued.
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    /// Stops admissions; queued items stay available to workers.
    pub fn begin_drain(&self) {
        let mut inner = self.lock();
        if inner.state == QueueState::Open {
            #[cfg(debug_assertions)]
            debug_assert_forward_transition!(inner.state, QueueState::Draining);
            inner.state = if inner.items.is_empty() {
                QueueState::Closed
            } else {
                QueueState::Draining
            };
        }
        drop(inner);
        self.available.notify_waiters();
    }

    /// Forces the queue closed, returning how many items were dropped.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        #[cfg(debug_assertions)]
        debug_assert_forward_transition!(inner.state, QueueState::Closed);
        let dropped = inner.items.len();
        inner.items.clear();
        inner.bytes = 0;
        inner.state = QueueState::Closed;
        #[cfg(debug_assertions)]
        debug_assert_closed_empty!(true, inner.items.len());
        drop(inner);

        self.metrics
            .dropped_on_close
            .fetch_add(dropped as u64, Ordering::Relaxed);
        self.available.notify_waiters();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Blob(usize);

    impl EstimateSize for Blob {
        fn estimated_size(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_dequeue_records_queue_wait() {
        let queue = AdaptiveQueue::new(QueueConfig::fixed(4));
        assert_eq!(queue.metrics().max_wait(), Duration::ZERO);
        queue.enqueue(Blob(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let queued = queue.try_dequeue().unwrap();
        assert!(queued.enqueued_at.elapsed() >= Duration::from_millis(5));
        assert!(queue.metrics().max_wait() >= Duration::from_millis(5));
    }

    #[test]
    fn test_fixed_capacity_rejects_eleventh() {
        let queue = AdaptiveQueue::new(QueueConfig::fixed(10));
        for i in 0..10 {
            queue.enqueue(Blob(i)).unwrap();
        }
        assert_eq!(queue.enqueue(Blob(10)), Err(EnqueueError::QueueFull));
        assert_eq!(queue.metrics().rejected_full(), 1);

        assert_eq!(queue.try_dequeue().unwrap().item, Blob(0));
        assert!(queue.enqueue(Blob(11)).is_ok());
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn test_fifo_order() {
        let queue = AdaptiveQueue::new(QueueConfig::fixed(100));
        for i in 0..50 {
            queue.enqueue(Blob(i)).unwrap();
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|q| q.item.0)
            .collect();
        assert_eq!(drained, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_budget_capacity_tracks_mean_size() {
        let queue = AdaptiveQueue::new(QueueConfig::memory_budget(1000));
        queue.enqueue(Blob(100)).unwrap();
        assert_eq!(queue.capacity(), 10);
        queue.enqueue(Blob(300)).unwrap();
        // mean 200 -> floor(1000 / 200)
        assert_eq!(queue.capacity(), 5);
        assert_eq!(queue.bytes(), 400);
    }

    #[test]
    fn test_budget_rejects_oversized_item() {
        let queue = AdaptiveQueue::new(QueueConfig::memory_budget(1000));
        assert_eq!(queue.enqueue(Blob(1001)), Err(EnqueueError::QueueFull));
        assert!(queue.enqueue(Blob(1000)).is_ok());
        assert_eq!(queue.enqueue(Blob(1)), Err(EnqueueError::QueueFull));
    }

    #[test]
    fn test_budget_rejection_does_not_shift_mean() {
        let queue = AdaptiveQueue::new(QueueConfig::memory_budget(1000));
        queue.enqueue(Blob(100)).unwrap();
        let _ = queue.enqueue(Blob(5000));
        assert_eq!(queue.capacity(), 10);
    }

    #[test]
    fn test_sample_window_rolls() {
        let queue = AdaptiveQueue::new(QueueConfig {
            mode: QueueMode::MemoryBudget {
                budget_bytes: 10_000,
                sample_window: 2,
            },
        });
        queue.enqueue(Blob(1000)).unwrap();
        queue.enqueue(Blob(1000)).unwrap();
        queue.enqueue(Blob(10)).unwrap();
        queue.enqueue(Blob(10)).unwrap();
        // Only the last two samples count.
        assert_eq!(queue.capacity(), 1000);
    }

    #[test]
    fn test_drain_rejects_then_closes_when_empty() {
        let queue = AdaptiveQueue::new(QueueConfig::fixed(4));
        queue.enqueue(Blob(1)).unwrap();
        queue.begin_drain();
        assert_eq!(queue.state(), QueueState::Draining);
        assert_eq!(queue.enqueue(Blob(2)), Err(EnqueueError::QueueClosed));
        assert!(queue.try_dequeue().is_some());
        assert!(queue.try_dequeue().is_none());
        assert_eq!(queue.state(), QueueState::Closed);
        assert_eq!(queue.metrics().rejected_closed(), 1);
    }

    #[test]
    fn test_drain_of_empty_queue_closes_immediately() {
        let queue: AdaptiveQueue<Blob> = AdaptiveQueue::new(QueueConfig::fixed(4));
        queue.begin_drain();
        assert_eq!(queue.state(), QueueState::Closed);
    }

    #[test]
    fn test_close_drops_remaining() {
        let queue = AdaptiveQueue::new(QueueConfig::fixed(4));
        queue.enqueue(Blob(1)).unwrap();
        queue.enqueue(Blob(2)).unwrap();
        assert_eq!(queue.close(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.metrics().dropped_on_close(), 2);
        assert_eq!(queue.enqueue(Blob(3)), Err(EnqueueError::QueueClosed));
    }

    #[test]
    fn test_error_classification() {
        assert!(EnqueueError::QueueFull.is_recoverable());
        assert!(!EnqueueError::QueueFull.is_terminal());
        assert!(EnqueueError::QueueClosed.is_terminal());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(AdaptiveQueue::new(QueueConfig::fixed(4)));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await.map(|q| q.item) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(Blob(7)).unwrap();
        assert_eq!(consumer.await.unwrap(), Some(Blob(7)));
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_after_drain() {
        let queue: Arc<AdaptiveQueue<Blob>> = Arc::new(AdaptiveQueue::new(QueueConfig::fixed(4)));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.begin_drain();
        assert!(consumer.await.unwrap());
    }
}

//! Bounded per-subscriber channels
//!
//! Each subscription owns exactly one [`SubscriberChannel`]. The hub's publish
//! path is the only writer, the subscription's delivery worker the only reader.
//!
//! # Design
//! - Lock-free bounded ring (`crossbeam::queue::ArrayQueue`), capacity fixed at creation
//! - `push` never waits for the reader; a full ring applies the [`OverflowPolicy`]
//! - An idle reader parks and is unparked by the next push or by `close`
//! - After `close`, the reader waits out pushes already past the closed check
//!   ([`ChannelReceiver::settle`]), so every accepted event gets read
//!
//! # Example
//! ```
//! use market_data_hub::channel::{OverflowPolicy, PushOutcome, SubscriberChannel};
//!
//! let (tx, rx) = SubscriberChannel::<u64>::bounded(2, OverflowPolicy::DropOldest);
//! let _ = tx.push(1);
//! let _ = tx.push(2);
//! assert!(matches!(tx.push(3), PushOutcome::Evicted(1)));
//! assert_eq!(rx.pop(), Some(2));
//! ```

use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::{Backoff, CachePadded};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a full channel does with an incoming event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest unread event to make room (reader sees fresh data)
    #[default]
    DropOldest,
    /// Reject the incoming event (reader sees an unbroken prefix)
    DropNewest,
}

/// Result of a single [`SubscriberChannel::push`]
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum PushOutcome<T> {
    Enqueued,
    /// Enqueued after evicting the returned oldest event
    Evicted(T),
    /// Channel full under `DropNewest`; the event is handed back
    Rejected(T),
    /// Reader is gone or going; the event is handed back
    Closed(T),
}

impl<T> PushOutcome<T> {
    /// True when the pushed event is now in the channel
    #[inline(always)]
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Enqueued | PushOutcome::Evicted(_))
    }
}

/// Writer side of a subscriber channel, shared with the hub
pub struct SubscriberChannel<T> {
    queue: ArrayQueue<T>,
    policy: OverflowPolicy,
    closed: AtomicBool,
    /// Pushes between their closed check and their enqueue
    pushing: CachePadded<AtomicUsize>,
    unparker: Unparker,
    enqueued: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
}

/// Reader side of a subscriber channel, owned by exactly one delivery worker
pub struct ChannelReceiver<T> {
    channel: Arc<SubscriberChannel<T>>,
    parker: Parker,
}

impl<T> SubscriberChannel<T> {
    /// Create a channel with `capacity` slots
    ///
    /// # Panics
    /// If `capacity` is zero. Hub configuration rejects that before it gets here.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (Arc<Self>, ChannelReceiver<T>) {
        let parker = Parker::new();
        let channel = Arc::new(Self {
            queue: ArrayQueue::new(capacity),
            policy,
            closed: AtomicBool::new(false),
            pushing: CachePadded::new(AtomicUsize::new(0)),
            unparker: parker.unparker().clone(),
            enqueued: CachePadded::new(AtomicU64::new(0)),
            dropped: CachePadded::new(AtomicU64::new(0)),
        });

        let receiver = ChannelReceiver {
            channel: Arc::clone(&channel),
            parker,
        };

        (channel, receiver)
    }

    /// Push without waiting for the reader
    #[inline]
    pub fn push(&self, event: T) -> PushOutcome<T> {
        // SeqCst pairs with `close` and `settle`: either this push sees the
        // close, or the reader sees this push in flight and waits for it
        self.pushing.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.pushing.fetch_sub(1, Ordering::Release);
            return PushOutcome::Closed(event);
        }

        let outcome = match self.policy {
            OverflowPolicy::DropOldest => match self.queue.force_push(event) {
                None => PushOutcome::Enqueued,
                Some(evicted) => PushOutcome::Evicted(evicted),
            },
            OverflowPolicy::DropNewest => match self.queue.push(event) {
                Ok(()) => PushOutcome::Enqueued,
                Err(rejected) => PushOutcome::Rejected(rejected),
            },
        };
        self.pushing.fetch_sub(1, Ordering::Release);

        match &outcome {
            PushOutcome::Enqueued => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Evicted(_) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Rejected(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed(_) => {}
        }

        if outcome.is_accepted() {
            self.unparker.unpark();
        }

        outcome
    }

    /// Stop accepting pushes and wake the reader so it can drain and exit
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.unparker.unpark();
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Events currently waiting for the reader
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events that entered the channel
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Events lost to overflow (evicted or rejected)
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> ChannelReceiver<T> {
    /// Take the oldest unread event
    #[inline(always)]
    pub fn pop(&self) -> Option<T> {
        self.channel.queue.pop()
    }

    /// Park until a push, a close, or `timeout`, whichever comes first
    ///
    /// A push or close that happened since the last wait makes this return
    /// immediately, so a wake-up is never lost between `pop` and `wait`.
    #[inline]
    pub fn wait(&self, timeout: Duration) {
        self.parker.park_timeout(timeout);
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Once closed, wait for pushes that got past the closed check to land
    ///
    /// After this returns the queue holds everything that will ever be
    /// accepted, so one more drain reads every event reported as accepted.
    pub fn settle(&self) {
        debug_assert!(self.is_closed());
        let backoff = Backoff::new();
        while self.channel.pushing.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }

    pub fn channel(&self) -> &Arc<SubscriberChannel<T>> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = SubscriberChannel::<u32>::bounded(16, OverflowPolicy::DropOldest);
        for i in 0..10 {
            assert_eq!(tx.push(i), PushOutcome::Enqueued);
        }

        let drained: Vec<u32> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_drop_oldest_evicts_first_five() {
        let k = 8;
        let (tx, rx) = SubscriberChannel::<usize>::bounded(k, OverflowPolicy::DropOldest);

        let mut evicted = Vec::new();
        for i in 0..k + 5 {
            if let PushOutcome::Evicted(old) = tx.push(i) {
                evicted.push(old);
            }
        }

        assert_eq!(evicted, vec![0, 1, 2, 3, 4]);
        assert_eq!(tx.dropped(), 5);
        assert_eq!(tx.enqueued(), (k + 5) as u64);

        let survivors: Vec<usize> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(survivors, (5..k + 5).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_newest_rejects_last_five() {
        let k = 8;
        let (tx, rx) = SubscriberChannel::<usize>::bounded(k, OverflowPolicy::DropNewest);

        let mut rejected = Vec::new();
        for i in 0..k + 5 {
            if let PushOutcome::Rejected(ev) = tx.push(i) {
                rejected.push(ev);
            }
        }

        assert_eq!(rejected, (k..k + 5).collect::<Vec<_>>());
        assert_eq!(tx.dropped(), 5);

        let survivors: Vec<usize> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(survivors, (0..k).collect::<Vec<_>>());
    }

    #[test]
    fn test_closed_channel_hands_event_back() {
        let (tx, rx) = SubscriberChannel::<u8>::bounded(4, OverflowPolicy::DropOldest);
        assert!(tx.push(1).is_accepted());
        tx.close();

        assert!(matches!(tx.push(2), PushOutcome::Closed(2)));
        assert!(rx.is_closed());
        // Already-enqueued events survive the close
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn test_close_during_pushes_loses_no_accepted_event() {
        let (tx, rx) = SubscriberChannel::<u64>::bounded(1 << 16, OverflowPolicy::DropNewest);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let tx = Arc::clone(&tx);
                thread::spawn(move || {
                    let mut accepted = 0u64;
                    for i in 0..10_000 {
                        match tx.push(i) {
                            PushOutcome::Closed(_) => break,
                            outcome => {
                                assert!(outcome.is_accepted());
                                accepted += 1;
                            }
                        }
                    }
                    accepted
                })
            })
            .collect();

        let reader = thread::spawn(move || {
            let mut read = 0u64;
            loop {
                while rx.pop().is_some() {
                    read += 1;
                }
                if rx.is_closed() {
                    break;
                }
                rx.wait(Duration::from_millis(1));
            }
            rx.settle();
            while rx.pop().is_some() {
                read += 1;
            }
            read
        });

        thread::sleep(Duration::from_millis(2));
        tx.close();

        let accepted: u64 = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(reader.join().unwrap(), accepted);
        assert_eq!(tx.enqueued(), accepted);
    }

    #[test]
    fn test_settle_returns_with_no_pushes_in_flight() {
        let (tx, rx) = SubscriberChannel::<u8>::bounded(2, OverflowPolicy::DropOldest);
        assert!(tx.push(1).is_accepted());
        tx.close();
        rx.settle();
        assert_eq!(rx.pop(), Some(1));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_push_survives_dropped_receiver() {
        let (tx, rx) = SubscriberChannel::<String>::bounded(2, OverflowPolicy::DropOldest);
        drop(rx);

        assert!(tx.push("a".into()).is_accepted());
        assert!(tx.push("b".into()).is_accepted());
        assert!(matches!(tx.push("c".into()), PushOutcome::Evicted(_)));
    }

    #[test]
    fn test_push_wakes_parked_reader() {
        let (tx, rx) = SubscriberChannel::<u64>::bounded(4, OverflowPolicy::DropOldest);

        let reader = thread::spawn(move || {
            let start = Instant::now();
            loop {
                if let Some(v) = rx.pop() {
                    return (v, start.elapsed());
                }
                rx.wait(Duration::from_secs(10));
            }
        });

        thread::sleep(Duration::from_millis(20));
        assert!(tx.push(42).is_accepted());

        let (value, elapsed) = reader.join().unwrap();
        assert_eq!(value, 42);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_push_before_wait_is_not_lost() {
        let (tx, rx) = SubscriberChannel::<u64>::bounded(4, OverflowPolicy::DropOldest);
        assert!(tx.push(7).is_accepted());

        // The pending unpark token makes this return immediately
        let start = Instant::now();
        rx.wait(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(rx.pop(), Some(7));
    }
}

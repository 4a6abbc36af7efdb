//! Market data hub: single producer, many independent subscribers
//!
//! # Design
//! - One bounded lock-free channel and one delivery thread per subscription
//! - Publish pushes into every matching channel and returns; it never waits
//!   for a subscriber
//! - A slow subscriber only loses its own oldest (or newest) events
//!
//! ```text
//!   add_trade(t)
//!       │   snapshot routes[TRADE]
//!       ├──────────► [channel #0] ─► worker #0 ─► handler.handle()
//!       └──────────► [channel #3] ─► worker #3 ─► handler.handle()
//!
//!   routes[KLINE]  ─► [channel #1] ─► worker #1 ─► ...
//! ```
//!
//! # Example
//! ```
//! use market_data_hub::{DataType, MarketData, MarketDataHub, Trade};
//!
//! let hub = MarketDataHub::new();
//! let (tx, rx) = std::sync::mpsc::channel();
//!
//! hub.subscribe(DataType::Trade, move |_: DataType, ev: &MarketData| -> anyhow::Result<()> {
//!     tx.send(ev.timestamp())?;
//!     Ok(())
//! })?;
//!
//! hub.add_trade(Trade { timestamp: 1, symbol: "BTCUSDT".into(), ..Default::default() }, true)?;
//! assert_eq!(rx.recv()?, 1);
//! hub.stop_all();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::channel::{OverflowPolicy, PushOutcome, SubscriberChannel};
use crate::config::{HubConfig, SubscriptionOptions};
use crate::dispatch::{DispatchTable, Route, SubscriptionId};
use crate::error::{HubError, Result};
use crate::events::{BookL1, DataType, Kline, MarketData, MarketEvent, Trade};
use crate::handler::{MarketDataHandler, Payload};
use crate::worker::{CallbackFailure, DeliveryWorker, WorkerState, WorkerStatus};
use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the hub holds for one live subscription
struct Subscription {
    data_type: DataType,
    route: Arc<Route>,
    status: Arc<WorkerStatus>,
    join: WorkerJoin,
}

/// Join handle of a delivery thread, shared by `unsubscribe` and `stop_all`
///
/// Whoever joins holds the lock for the whole join, so a second caller
/// blocks until the worker has exited.
#[derive(Clone)]
struct WorkerJoin {
    thread: ThreadId,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerJoin {
    fn new(handle: JoinHandle<()>) -> Self {
        Self {
            thread: handle.thread().id(),
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    fn is_current_thread(&self) -> bool {
        self.thread == thread::current().id()
    }
}

/// Point-in-time view of one subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStats {
    pub id: SubscriptionId,
    pub data_type: DataType,
    pub capacity: usize,
    pub policy: OverflowPolicy,
    /// Waiting in the channel
    pub queued: usize,
    /// Accepted into the channel
    pub enqueued: u64,
    /// Lost to overflow
    pub dropped: u64,
    /// Handed to the handler
    pub delivered: u64,
    /// Handler errors and panics
    pub failed: u64,
    pub state: WorkerState,
}

/// Point-in-time view of the whole hub
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStats {
    pub hub_id: Uuid,
    pub running: bool,
    pub subscribers: usize,
    /// Publish calls per type, indexed by [`DataType::index`]
    pub published: [u64; DataType::COUNT],
}

impl HubStats {
    pub fn published(&self, data_type: DataType) -> u64 {
        self.published[data_type.index()]
    }

    pub fn total_published(&self) -> u64 {
        self.published.iter().sum()
    }
}

/// Fan-out hub for klines, trades and top-of-book quotes
///
/// Share across threads with `Arc<MarketDataHub>`. Dropping the hub stops
/// every subscription.
pub struct MarketDataHub {
    id: Uuid,
    config: HubConfig,
    running: AtomicBool,
    next_id: AtomicU64,
    table: DispatchTable,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    /// Unsubscribed workers not joined yet; `stop_all` waits for these too
    closing: DashMap<SubscriptionId, WorkerJoin>,
    /// Orders subscribe/unsubscribe/stop_all against each other; publish never takes it
    lifecycle: Mutex<()>,
    published: [CachePadded<AtomicU64>; DataType::COUNT],
    failures_tx: flume::Sender<CallbackFailure>,
    failures_rx: flume::Receiver<CallbackFailure>,
}

impl MarketDataHub {
    /// Create a running hub with default configuration
    pub fn new() -> Self {
        Self::build(HubConfig::default())
    }

    /// Create a running hub with validated configuration
    pub fn with_config(config: HubConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: HubConfig) -> Self {
        let (failures_tx, failures_rx) = flume::bounded(config.failure_report_capacity.max(1));
        let id = Uuid::new_v4();
        info!(hub = %id, capacity = config.channel_capacity, policy = ?config.overflow_policy, "market data hub started");

        Self {
            id,
            config,
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            table: DispatchTable::new(),
            subscriptions: DashMap::new(),
            closing: DashMap::new(),
            lifecycle: Mutex::new(()),
            published: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
            failures_tx,
            failures_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Subscribe a callback to one event type with hub-default channel settings
    pub fn subscribe<F>(&self, data_type: DataType, callback: F) -> Result<SubscriptionId>
    where
        F: FnMut(DataType, &MarketData) -> anyhow::Result<()> + Send + 'static,
    {
        self.subscribe_with(data_type, SubscriptionOptions::default(), callback)
    }

    /// Subscribe a [`MarketDataHandler`] implementation
    pub fn subscribe_handler<H: MarketDataHandler>(
        &self,
        data_type: DataType,
        handler: H,
    ) -> Result<SubscriptionId> {
        self.subscribe_with(data_type, SubscriptionOptions::default(), handler)
    }

    /// Subscribe with per-subscription channel capacity and overflow policy
    pub fn subscribe_with<H: MarketDataHandler>(
        &self,
        data_type: DataType,
        options: SubscriptionOptions,
        handler: H,
    ) -> Result<SubscriptionId> {
        let (capacity, policy) = options.resolve(&self.config)?;

        let _guard = self.lifecycle.lock();
        if !self.is_running() {
            return Err(HubError::HubStopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (channel, receiver) = SubscriberChannel::bounded(capacity, policy);
        let status = Arc::new(WorkerStatus::new());

        let worker = DeliveryWorker::new(
            self.id,
            id,
            data_type,
            receiver,
            handler,
            Arc::clone(&status),
            self.failures_tx.clone(),
            self.config.idle_park(),
        );
        let thread_name = format!("{}-sub-{}", self.config.thread_name_prefix, id);
        let join = worker.spawn(thread_name).map_err(|e| {
            error!(hub = %self.id, subscription = id, "failed to spawn delivery worker: {}", e);
            HubError::Spawn(e)
        })?;

        let route = Arc::new(Route { id, channel });
        self.subscriptions.insert(
            id,
            Subscription {
                data_type,
                route: Arc::clone(&route),
                status,
                join: WorkerJoin::new(join),
            },
        );
        self.table.insert(data_type, route);

        debug!(hub = %self.id, subscription = id, %data_type, capacity, ?policy, "subscribed");
        Ok(id)
    }

    /// Remove a subscription after its worker drains what is already queued
    ///
    /// Blocks until the worker has exited, unless called from that worker's
    /// own callback, in which case the worker finishes on its own after the
    /// callback returns (and a later `stop_all` still waits for it). Unknown or
    /// already-removed ids are a no-op; returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let join = {
            let _guard = self.lifecycle.lock();
            let Some((_, subscription)) = self.subscriptions.remove(&id) else {
                debug!(hub = %self.id, subscription = id, "unsubscribe of unknown subscription ignored");
                return false;
            };
            self.table.remove(subscription.data_type, id);
            subscription.route.channel.close();
            // Visible to a concurrent stop_all until the join below finishes
            self.closing.insert(id, subscription.join.clone());
            subscription.join
        };

        if self.join_worker(id, &join) {
            self.closing.remove(&id);
        }
        debug!(hub = %self.id, subscription = id, "unsubscribed");
        true
    }

    /// Stop the hub: reject further subscribes and publishes, drain and join every worker
    ///
    /// Includes workers a concurrent `unsubscribe` is still joining. Idempotent.
    /// Also runs on drop.
    pub fn stop_all(&self) {
        let (stopped, closing) = {
            let _guard = self.lifecycle.lock();
            let was_running = self.running.swap(false, Ordering::AcqRel);
            self.table.clear();

            let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|e| *e.key()).collect();
            let stopped: Vec<(SubscriptionId, Subscription)> = ids
                .into_iter()
                .filter_map(|id| self.subscriptions.remove(&id))
                .collect();
            let closing: Vec<(SubscriptionId, WorkerJoin)> = self
                .closing
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect();

            if !was_running && stopped.is_empty() && closing.is_empty() {
                return;
            }
            (stopped, closing)
        };

        // Close everything first so workers drain in parallel
        for (_, subscription) in &stopped {
            subscription.route.channel.close();
        }
        let count = stopped.len();
        for (id, subscription) in stopped {
            self.join_worker(id, &subscription.join);
        }

        // Workers an in-flight unsubscribe is still draining
        for (id, join) in closing {
            if self.join_worker(id, &join) {
                self.closing.remove(&id);
            }
        }

        info!(hub = %self.id, subscriptions = count, "market data hub stopped");
    }

    /// Wait for a worker to exit; returns false if it is the calling thread
    fn join_worker(&self, id: SubscriptionId, join: &WorkerJoin) -> bool {
        if join.is_current_thread() {
            debug!(hub = %self.id, subscription = id, "removed from own callback, worker detached");
            return false;
        }

        let mut slot = join.handle.lock();
        if let Some(handle) = slot.take() {
            if handle.join().is_err() {
                warn!(hub = %self.id, subscription = id, "delivery worker exited abnormally");
            }
        }
        true
    }

    /// Live subscriptions across all types
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Live subscriptions for one type
    pub fn subscriber_count_for(&self, data_type: DataType) -> usize {
        self.table.len(data_type)
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    /// Publish a kline to every `Kline` subscriber
    #[inline]
    pub fn add_kline(&self, kline: Kline, copy: bool) -> Result<usize> {
        self.add(kline, copy)
    }

    /// Publish a trade to every `Trade` subscriber
    #[inline]
    pub fn add_trade(&self, trade: Trade, copy: bool) -> Result<usize> {
        self.add(trade, copy)
    }

    /// Publish a top-of-book quote to every `BookL1` subscriber
    #[inline]
    pub fn add_book_l1(&self, book: BookL1, copy: bool) -> Result<usize> {
        self.add(book, copy)
    }

    /// Publish any concrete event shape
    #[inline]
    pub fn add<E: MarketEvent>(&self, event: E, copy: bool) -> Result<usize> {
        self.publish(event.into_market_data(), copy)
    }

    /// Fan `event` out to every subscriber of its type
    ///
    /// With `copy` each channel gets its own copy; without it all channels
    /// share one `Arc`, freed after the last subscriber handles it.
    /// Returns how many channels accepted the event.
    pub fn publish(&self, event: MarketData, copy: bool) -> Result<usize> {
        if !self.is_running() {
            return Err(HubError::HubStopped);
        }

        let data_type = event.data_type();
        self.published[data_type.index()].fetch_add(1, Ordering::Relaxed);

        let routes = self.table.snapshot(data_type);
        if routes.is_empty() {
            return Ok(0);
        }
        Ok(self.fan_out(&routes, event, copy))
    }

    /// Publish a batch of klines in slice order
    pub fn add_klines(&self, klines: &[Kline], copy: bool) -> Result<usize> {
        self.add_batch(klines, copy)
    }

    /// Publish a batch of trades in slice order
    pub fn add_trades(&self, trades: &[Trade], copy: bool) -> Result<usize> {
        self.add_batch(trades, copy)
    }

    /// Publish a batch of top-of-book quotes in slice order
    pub fn add_books_l1(&self, books: &[BookL1], copy: bool) -> Result<usize> {
        self.add_batch(books, copy)
    }

    /// Publish a slice of one event shape
    ///
    /// The running check and the route snapshot are taken once for the whole
    /// batch: a subscription added mid-batch sees none of it, and each
    /// subscriber gets the events back to back in slice order. Returns the
    /// number of channel acceptances summed over the batch.
    pub fn add_batch<E: MarketEvent>(&self, events: &[E], copy: bool) -> Result<usize> {
        if !self.is_running() {
            return Err(HubError::HubStopped);
        }
        if events.is_empty() {
            return Ok(0);
        }

        self.published[E::DATA_TYPE.index()].fetch_add(events.len() as u64, Ordering::Relaxed);

        let routes = self.table.snapshot(E::DATA_TYPE);
        if routes.is_empty() {
            return Ok(0);
        }
        Ok(events
            .iter()
            .map(|&event| self.fan_out(&routes, event.into_market_data(), copy))
            .sum())
    }

    #[inline]
    fn fan_out(&self, routes: &[Arc<Route>], event: MarketData, copy: bool) -> usize {
        let mut accepted = 0;
        if copy {
            for route in routes {
                accepted += self.push(route, Payload::Owned(event));
            }
        } else {
            let shared = Arc::new(event);
            for route in routes {
                accepted += self.push(route, Payload::Shared(Arc::clone(&shared)));
            }
        }
        accepted
    }

    #[inline(always)]
    fn push(&self, route: &Route, payload: Payload) -> usize {
        match route.channel.push(payload) {
            PushOutcome::Enqueued => 1,
            PushOutcome::Evicted(_) => {
                self.note_overflow(route);
                1
            }
            PushOutcome::Rejected(_) => {
                self.note_overflow(route);
                0
            }
            PushOutcome::Closed(_) => 0,
        }
    }

    #[cold]
    fn note_overflow(&self, route: &Route) {
        // Log at 1, 2, 4, 8, ... drops so a lagging subscriber cannot flood the log
        let dropped = route.channel.dropped();
        if dropped.is_power_of_two() {
            warn!(
                hub = %self.id,
                subscription = route.id,
                dropped,
                policy = ?route.channel.policy(),
                "subscriber channel overflow"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------------

    pub fn subscription_stats(&self, id: SubscriptionId) -> Option<SubscriptionStats> {
        self.subscriptions.get(&id).map(|entry| {
            let channel = &entry.route.channel;
            SubscriptionStats {
                id,
                data_type: entry.data_type,
                capacity: channel.capacity(),
                policy: channel.policy(),
                queued: channel.len(),
                enqueued: channel.enqueued(),
                dropped: channel.dropped(),
                delivered: entry.status.delivered(),
                failed: entry.status.failed(),
                state: entry.status.state(),
            }
        })
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            hub_id: self.id,
            running: self.is_running(),
            subscribers: self.subscriber_count(),
            published: std::array::from_fn(|i| self.published[i].load(Ordering::Relaxed)),
        }
    }

    /// Out-of-band reports of callback errors and panics
    ///
    /// Bounded by `failure_report_capacity`; reports that do not fit are
    /// discarded (they still show up in [`SubscriptionStats::failed`]).
    pub fn failures(&self) -> flume::Receiver<CallbackFailure> {
        self.failures_rx.clone()
    }
}

impl Default for MarketDataHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MarketDataHub {
    fn drop(&mut self) {
        self.stop_all();
    }
}

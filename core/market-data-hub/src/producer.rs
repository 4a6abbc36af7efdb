//! Synthetic producer for load tests and demos
//!
//! Publishes a fixed number of generated events from its own thread, the
//! way a feed handler would. Timestamps are wall-clock nanoseconds so
//! subscribers can measure publish-to-callback latency.

use crate::error::{HubError, Result};
use crate::events::{BookL1, DataType, Kline, MarketData, Symbol, Trade};
use crate::hub::MarketDataHub;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Wall-clock time in nanoseconds since epoch
#[inline]
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Event number `i` of a synthetic `BTCUSDT` feed
pub fn synthetic_event(i: u64, data_type: DataType) -> MarketData {
    let symbol = Symbol::new("BTCUSDT");
    let timestamp = now_nanos();
    let drift = (i % 100) as f64;

    match data_type {
        DataType::Trade => MarketData::Trade(Trade {
            timestamp,
            symbol,
            price: 50000.0 + drift,
            quantity: 1.0,
            is_buyer_maker: i % 2 == 0,
        }),
        DataType::Kline => MarketData::Kline(Kline {
            timestamp,
            symbol,
            open: 50000.0,
            high: 50100.0,
            low: 49900.0,
            close: 50000.0 + drift,
            volume: 100.0,
        }),
        DataType::BookL1 => MarketData::BookL1(BookL1 {
            timestamp,
            symbol,
            bid_price: 50000.0,
            bid_quantity: 10.0,
            ask_price: 50001.0,
            ask_quantity: 10.0,
        }),
    }
}

/// Background thread publishing synthetic events into a hub
pub struct MockProducer {
    hub: Arc<MarketDataHub>,
    running: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl MockProducer {
    pub fn new(hub: Arc<MarketDataHub>) -> Self {
        Self {
            hub,
            running: Arc::new(AtomicBool::new(false)),
            produced: Arc::new(AtomicU64::new(0)),
            thread: None,
        }
    }

    /// Start publishing `count` events of `data_type`
    ///
    /// No-op while a previous run is still in progress.
    pub fn start(&mut self, count: u64, data_type: DataType) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Reap a finished previous run
        self.wait();
        self.produced.store(0, Ordering::Relaxed);

        let hub = Arc::clone(&self.hub);
        let running = Arc::clone(&self.running);
        let produced = Arc::clone(&self.produced);

        let spawned = thread::Builder::new()
            .name(format!("{}-producer", hub.config().thread_name_prefix))
            .spawn(move || {
                info!(hub = %hub.id(), count, %data_type, "mock producer started");
                for i in 0..count {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    match hub.publish(synthetic_event(i, data_type), true) {
                        Ok(_) => {
                            produced.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(HubError::HubStopped) => {
                            debug!(hub = %hub.id(), "hub stopped, mock producer exiting");
                            break;
                        }
                        Err(e) => {
                            debug!(hub = %hub.id(), "mock producer publish failed: {}", e);
                            break;
                        }
                    }
                }
                running.store(false, Ordering::Release);
                info!(hub = %hub.id(), produced = produced.load(Ordering::Relaxed), "mock producer finished");
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(HubError::Spawn(e))
            }
        }
    }

    /// Ask the producer to stop and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait();
    }

    /// Wait for the current run to finish
    pub fn wait(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.join().is_err() {
            // A panicked run never cleared the flag; clear it so `start` works again
            self.running.store(false, Ordering::Release);
            warn!(
                hub = %self.hub.id(),
                produced = self.messages_produced(),
                "mock producer thread panicked"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn messages_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

impl Drop for MockProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

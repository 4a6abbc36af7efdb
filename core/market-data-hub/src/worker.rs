//! Delivery workers
//!
//! One OS thread per subscription drains that subscription's channel and runs
//! its handler. Lifecycle:
//!
//! ```text
//! Starting ─► Running ──(channel closed)──► Draining ─► Terminated
//!               │  ▲
//!        empty  ▼  │ push / close / idle timeout
//!             parked
//! ```
//!
//! A handler error or panic is caught here, counted, logged and reported on
//! the hub's failure queue; the worker then moves on to the next event.

use crate::channel::ChannelReceiver;
use crate::dispatch::SubscriptionId;
use crate::events::DataType;
use crate::handler::{MarketDataHandler, Payload};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Terminated = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Terminated,
        }
    }
}

/// Counters a worker publishes for the hub to read
#[derive(Debug)]
pub struct WorkerStatus {
    state: AtomicU8,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Starting as u8),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Handler invocations, successful or not
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler invocations that returned `Err` or panicked
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler error or panic, reported out of band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackFailure {
    pub subscription_id: SubscriptionId,
    pub data_type: DataType,
    /// Timestamp of the event being handled
    pub event_timestamp: i64,
    pub message: String,
    pub panicked: bool,
}

pub struct DeliveryWorker<H> {
    hub_id: Uuid,
    id: SubscriptionId,
    data_type: DataType,
    receiver: ChannelReceiver<Payload>,
    handler: H,
    status: Arc<WorkerStatus>,
    failures: flume::Sender<CallbackFailure>,
    idle_park: Duration,
}

impl<H: MarketDataHandler> DeliveryWorker<H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub_id: Uuid,
        id: SubscriptionId,
        data_type: DataType,
        receiver: ChannelReceiver<Payload>,
        handler: H,
        status: Arc<WorkerStatus>,
        failures: flume::Sender<CallbackFailure>,
        idle_park: Duration,
    ) -> Self {
        Self {
            hub_id,
            id,
            data_type,
            receiver,
            handler,
            status,
            failures,
            idle_park,
        }
    }

    /// Start the worker on its own named thread
    pub fn spawn(self, thread_name: String) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!(hub = %self.hub_id, subscription = self.id, data_type = %self.data_type, "delivery worker started");
        self.status.set_state(WorkerState::Running);

        loop {
            while let Some(payload) = self.receiver.pop() {
                self.deliver(payload);
            }
            if self.receiver.is_closed() {
                break;
            }
            self.receiver.wait(self.idle_park);
        }

        // Closed: nothing new gets in, finish what is already queued
        self.status.set_state(WorkerState::Draining);
        self.receiver.settle();
        let mut drained = 0u64;
        while let Some(payload) = self.receiver.pop() {
            self.deliver(payload);
            drained += 1;
        }

        self.status.set_state(WorkerState::Terminated);
        debug!(
            hub = %self.hub_id,
            subscription = self.id,
            drained,
            delivered = self.status.delivered(),
            "delivery worker terminated"
        );
    }

    #[inline]
    fn deliver(&mut self, payload: Payload) {
        let data_type = payload.data_type();
        debug_assert_eq!(data_type, self.data_type);

        let handler = &mut self.handler;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(data_type, &payload)));
        self.status.delivered.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.report(&payload, format!("{err:#}"), false),
            Err(panic) => self.report(&payload, panic_message(panic.as_ref()), true),
        }
    }

    fn report(&self, payload: &Payload, message: String, panicked: bool) {
        self.status.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            hub = %self.hub_id,
            subscription = self.id,
            data_type = %self.data_type,
            panicked,
            "subscriber callback failed: {}",
            message
        );

        let failure = CallbackFailure {
            subscription_id: self.id,
            data_type: self.data_type,
            event_timestamp: payload.timestamp(),
            message,
            panicked,
        };
        // Full or nobody listening: the counter above still has it
        let _ = self.failures.try_send(failure);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

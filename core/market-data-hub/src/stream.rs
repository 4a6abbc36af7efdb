//! Async bridge: consume a subscription as a tokio channel

use crate::dispatch::SubscriptionId;
use crate::error::Result;
use crate::events::{DataType, MarketData};
use crate::handler::MarketDataHandler;
use crate::hub::MarketDataHub;
use anyhow::anyhow;
use tokio::sync::mpsc;

/// Handler that forwards every event into a bounded tokio channel
///
/// Runs on the subscription's delivery thread, so a full channel blocks that
/// thread only; other subscriptions and the producer are unaffected.
pub struct StreamForwarder {
    tx: mpsc::Sender<MarketData>,
}

impl StreamForwarder {
    pub fn new(tx: mpsc::Sender<MarketData>) -> Self {
        Self { tx }
    }
}

impl MarketDataHandler for StreamForwarder {
    fn handle(&mut self, _data_type: DataType, event: &MarketData) -> anyhow::Result<()> {
        self.tx
            .blocking_send(*event)
            .map_err(|_| anyhow!("stream receiver dropped"))
    }
}

impl MarketDataHub {
    /// Subscribe and receive events through an async channel of `buffer` slots
    pub fn subscribe_stream(
        &self,
        data_type: DataType,
        buffer: usize,
    ) -> Result<(SubscriptionId, mpsc::Receiver<MarketData>)> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.subscribe_handler(data_type, StreamForwarder::new(tx))?;
        Ok((id, rx))
    }
}

//! Subscriber callbacks and the payloads delivered to them

use crate::events::{DataType, MarketData};
use std::ops::Deref;
use std::sync::Arc;

/// Receives events for one subscription
///
/// Called from the subscription's own delivery thread, one event at a time,
/// in publish order. Returning `Err` (or panicking) counts as a callback
/// failure; delivery continues with the next event.
pub trait MarketDataHandler: Send + 'static {
    fn handle(&mut self, data_type: DataType, event: &MarketData) -> anyhow::Result<()>;
}

impl<F> MarketDataHandler for F
where
    F: FnMut(DataType, &MarketData) -> anyhow::Result<()> + Send + 'static,
{
    #[inline]
    fn handle(&mut self, data_type: DataType, event: &MarketData) -> anyhow::Result<()> {
        self(data_type, event)
    }
}

/// Event as it sits in a subscriber channel
///
/// `Owned` is a private copy per subscriber. `Shared` is one allocation
/// referenced by every subscriber; it is freed when the last delivery
/// drops its handle.
#[derive(Debug, Clone)]
pub enum Payload {
    Owned(MarketData),
    Shared(Arc<MarketData>),
}

impl Payload {
    pub fn is_shared(&self) -> bool {
        matches!(self, Payload::Shared(_))
    }
}

impl Deref for Payload {
    type Target = MarketData;

    #[inline(always)]
    fn deref(&self) -> &MarketData {
        match self {
            Payload::Owned(data) => data,
            Payload::Shared(data) => data,
        }
    }
}

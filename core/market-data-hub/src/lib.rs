//! # Market Data Hub
//!
//! In-process fan-out of klines, trades and top-of-book quotes from one
//! producer to many independent subscribers.
//!
//! ## Features
//!
//! - **Type Routing**: each subscription receives exactly one [`DataType`]
//! - **No Producer Stalls**: publish never waits on a subscriber
//! - **Per-Subscriber Isolation**: own bounded lock-free channel and delivery thread
//! - **Ordering**: per-subscription FIFO in publish order
//! - **Bounded Memory**: overflow drops the oldest (default) or newest event
//! - **Failure Containment**: callback errors and panics are caught and reported
//!
//! ## Example
//!
//! ```rust
//! use market_data_hub::{DataType, MarketData, MarketDataHub, Trade};
//!
//! let hub = MarketDataHub::new();
//!
//! let id = hub.subscribe(DataType::Trade, |dt: DataType, ev: &MarketData| -> anyhow::Result<()> {
//!     println!("{dt}: {:?}", ev.as_trade());
//!     Ok(())
//! })?;
//!
//! hub.add_trade(Trade {
//!     timestamp: 1,
//!     symbol: "BTCUSDT".into(),
//!     price: 50000.0,
//!     quantity: 1.0,
//!     is_buyer_maker: false,
//! }, true)?;
//!
//! hub.unsubscribe(id);
//! assert_eq!(hub.subscriber_count(), 0);
//! # Ok::<(), market_data_hub::HubError>(())
//! ```

pub mod events;
pub mod channel;
pub mod dispatch;
pub mod handler;
pub mod worker;
pub mod hub;
pub mod stream;
pub mod producer;
pub mod config;
pub mod error;

// Re-exports
pub use events::{BookL1, DataType, Kline, MarketData, MarketEvent, Symbol, Trade};
pub use channel::{OverflowPolicy, PushOutcome, SubscriberChannel};
pub use dispatch::SubscriptionId;
pub use handler::{MarketDataHandler, Payload};
pub use worker::{CallbackFailure, WorkerState};
pub use hub::{HubStats, MarketDataHub, SubscriptionStats};
pub use stream::StreamForwarder;
pub use producer::MockProducer;
pub use config::{HubConfig, SubscriptionOptions};
pub use error::{HubError, Result};

//! Event type definitions for the market data hub

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest [`Symbol`] in bytes
///
/// Feed symbols travel in a 32-byte NUL-terminated field, leaving 31 bytes of text.
pub const SYMBOL_CAPACITY: usize = 31;

/// Fixed-capacity trading pair symbol (e.g. "BTCUSDT")
///
/// Stored inline so events stay fixed-shape and cheap to copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(ArrayString<SYMBOL_CAPACITY>);

impl Symbol {
    /// Create symbol, truncating at a char boundary if `s` does not fit
    pub fn new(s: &str) -> Self {
        let mut end = s.len().min(SYMBOL_CAPACITY);
        while !s.is_char_boundary(end) {
            end -= 1;
        }

        let mut inner = ArrayString::new();
        inner.push_str(&s[..end]);
        Self(inner)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event Type Tag
// ============================================================================

/// Closed set of event shapes, used as the fan-out key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DataType {
    Kline = 0,
    Trade = 1,
    BookL1 = 2,
}

impl DataType {
    /// Every variant, in tag order
    pub const ALL: [DataType; 3] = [DataType::Kline, DataType::Trade, DataType::BookL1];

    /// Number of variants
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index for per-type tables
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Kline => "kline",
            DataType::Trade => "trade",
            DataType::BookL1 => "book_l1",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown data type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data type: {0}")]
pub struct ParseDataTypeError(pub String);

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kline" => Ok(DataType::Kline),
            "trade" => Ok(DataType::Trade),
            "book_l1" | "bookl1" => Ok(DataType::BookL1),
            other => Err(ParseDataTypeError(other.to_string())),
        }
    }
}

// ============================================================================
// Market Data Events
// ============================================================================

/// Candlestick bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Nanoseconds since epoch
    pub timestamp: i64,
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Individual trade print
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Nanoseconds since epoch
    pub timestamp: i64,
    pub symbol: Symbol,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
}

/// Top-of-book quote
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BookL1 {
    /// Nanoseconds since epoch
    pub timestamp: i64,
    pub symbol: Symbol,
    pub bid_price: f64,
    pub bid_quantity: f64,
    pub ask_price: f64,
    pub ask_quantity: f64,
}

/// Any event the hub can carry
///
/// The tag is the variant itself, so a payload can never disagree with
/// its [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketData {
    Kline(Kline),
    Trade(Trade),
    BookL1(BookL1),
}

impl MarketData {
    #[inline(always)]
    pub fn data_type(&self) -> DataType {
        match self {
            MarketData::Kline(_) => DataType::Kline,
            MarketData::Trade(_) => DataType::Trade,
            MarketData::BookL1(_) => DataType::BookL1,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            MarketData::Kline(k) => k.timestamp,
            MarketData::Trade(t) => t.timestamp,
            MarketData::BookL1(b) => b.timestamp,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketData::Kline(k) => &k.symbol,
            MarketData::Trade(t) => &t.symbol,
            MarketData::BookL1(b) => &b.symbol,
        }
    }

    pub fn as_kline(&self) -> Option<&Kline> {
        match self {
            MarketData::Kline(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_trade(&self) -> Option<&Trade> {
        match self {
            MarketData::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_book_l1(&self) -> Option<&BookL1> {
        match self {
            MarketData::BookL1(b) => Some(b),
            _ => None,
        }
    }
}

// ============================================================================
// Trait Definitions for Event System
// ============================================================================

/// Shape that can be published through the hub
pub trait MarketEvent: Copy + Send + Sync + fmt::Debug + 'static {
    /// Tag this shape is routed under
    const DATA_TYPE: DataType;

    /// Event timestamp (nanoseconds since epoch)
    fn timestamp(&self) -> i64;

    /// Associated symbol
    fn symbol(&self) -> &Symbol;

    /// Wrap into the tagged union
    fn into_market_data(self) -> MarketData;
}

impl MarketEvent for Kline {
    const DATA_TYPE: DataType = DataType::Kline;

    fn timestamp(&self) -> i64 { self.timestamp }
    fn symbol(&self) -> &Symbol { &self.symbol }
    fn into_market_data(self) -> MarketData { MarketData::Kline(self) }
}

impl MarketEvent for Trade {
    const DATA_TYPE: DataType = DataType::Trade;

    fn timestamp(&self) -> i64 { self.timestamp }
    fn symbol(&self) -> &Symbol { &self.symbol }
    fn into_market_data(self) -> MarketData { MarketData::Trade(self) }
}

impl MarketEvent for BookL1 {
    const DATA_TYPE: DataType = DataType::BookL1;

    fn timestamp(&self) -> i64 { self.timestamp }
    fn symbol(&self) -> &Symbol { &self.symbol }
    fn into_market_data(self) -> MarketData { MarketData::BookL1(self) }
}

impl From<Kline> for MarketData {
    fn from(k: Kline) -> Self {
        MarketData::Kline(k)
    }
}

impl From<Trade> for MarketData {
    fn from(t: Trade) -> Self {
        MarketData::Trade(t)
    }
}

impl From<BookL1> for MarketData {
    fn from(b: BookL1) -> Self {
        MarketData::BookL1(b)
    }
}

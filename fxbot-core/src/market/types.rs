//! Market domain types shared across the decision core

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Traded instrument, identified by a currency pair code such as "EURUSD".
///
/// `Ord` so that per-tick iteration over instruments is lexicographic and
/// therefore deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl Instrument {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// P&L sign: +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// One closed price bar for an instrument.
///
/// Stop and target crossings are evaluated against the high-low range, not
/// just the close.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarSnapshot {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// One bar-close event across all traded instruments.
///
/// The day marker is supplied by the tick source rather than read from the
/// wall clock, so day-boundary handling stays deterministic and testable.
#[derive(Clone, Debug)]
pub struct TickEvent {
    /// Monotonically increasing bar index
    pub bar_index: u64,
    /// Trading day this bar belongs to
    pub day: NaiveDate,
    /// Close time of the bar
    pub timestamp: DateTime<Utc>,
    /// Latest closed bar per instrument, in lexicographic order
    pub bars: BTreeMap<Instrument, BarSnapshot>,
}

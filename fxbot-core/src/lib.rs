//! FX Paper Trading Decision Core
//!
//! Consumes calibrated probability signals and bar-close market state, and
//! deterministically decides whether to open, hold, or close positions
//! under strict capital-preservation limits: 2% risk per trade, a 3% daily
//! loss halt, ATR-sized stops with a 1.2R target, a 6-bar time stop, and a
//! hard cap of five open positions.
//!
//! Market data retrieval, feature computation, model inference and order
//! persistence live behind the `SignalProvider`, `TickSource` and
//! `ExecutionSink` boundaries; this crate owns only the decision loop and
//! its bookkeeping.

pub mod execution;
pub mod market;
pub mod paper_trading;
pub mod signal;

// Re-export main types for easy access
pub use execution::{ExecutionSink, ExitReason, Instruction, SinkError};
pub use market::{BarSnapshot, Direction, Instrument, ReplayTickSource, TickEvent, TickSource};
pub use paper_trading::{
    DecisionEngine, EngineConfig, EngineStatus, GuardsConfig, Position, PositionBook, PositionId,
    RiskConfig, RiskLedger, SessionSummary, TickReport, TradingSession,
};
pub use signal::{Signal, SignalError, SignalProvider};

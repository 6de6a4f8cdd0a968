//! Calibrated model signals consumed by the decision engine

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::market::Instrument;

/// Calibrated probability signal for one instrument at one bar
#[derive(Clone, Debug)]
pub struct Signal {
    /// Calibrated probability of a positive return over the next horizon
    pub p_up: f64,
    /// ATR(14) in price units, used to size stops
    pub atr14: Decimal,
    /// Fast-minus-slow EMA distance, used for trend alignment
    pub ema_diff: Decimal,
    /// Volatility z-score, when the feature pipeline provides one
    pub vol_z: Option<f64>,
}

/// Signal retrieval failure
#[derive(Clone, Debug, thiserror::Error)]
pub enum SignalError {
    #[error("insufficient history for {instrument} at bar {bar_index}")]
    DataUnavailable { instrument: String, bar_index: u64 },
}

/// Boundary to the model and feature pipeline.
///
/// The core never computes features or runs inference itself; it consumes
/// `p_up` and ATR as already-calibrated inputs. `DataUnavailable` means the
/// instrument is skipped for entries this tick (exits still run).
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn get(&self, instrument: &Instrument, bar_index: u64) -> Result<Signal, SignalError>;
}

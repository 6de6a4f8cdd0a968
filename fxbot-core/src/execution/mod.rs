//! Execution boundary: instructions emitted by the decision engine

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::market::Instrument;
use crate::paper_trading::position_book::{Position, PositionId};

/// Why a position was closed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Stop-loss crossed
    Stop,
    /// Take-profit crossed
    Target,
    /// Time stop reached with neither level touched
    Time,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Stop => write!(f, "STOP"),
            ExitReason::Target => write!(f, "TARGET"),
            ExitReason::Time => write!(f, "TIME"),
        }
    }
}

/// Instruction handed to the execution sink.
///
/// Fire-and-forget from the core's perspective; the sink must make the
/// record durable before the next tick. The `id` is the persistence key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Instruction {
    Open {
        id: Uuid,
        position: Position,
    },
    Close {
        id: Uuid,
        position_id: PositionId,
        instrument: Instrument,
        exit_price: Decimal,
        exit_bar: u64,
        reason: ExitReason,
        pnl: Decimal,
    },
}

impl Instruction {
    pub fn open(position: Position) -> Self {
        Self::Open {
            id: Uuid::new_v4(),
            position,
        }
    }
}

/// Sink failure surfaced to the engine
#[derive(Debug, thiserror::Error)]
#[error("execution sink rejected instruction: {message}")]
pub struct SinkError {
    pub message: String,
}

/// Boundary receiving fill/close instructions (paper ledger or broker
/// adapter). The engine awaits each submission before advancing, so
/// instructions arrive in decision order.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn submit(&self, instruction: Instruction) -> Result<(), SinkError>;
}

//! Risk-gated decision engine: one bar-close tick in, exit and entry
//! instructions out.
//!
//! Each tick runs to completion before the next is admitted: the whole
//! book is scanned for exits first, then entries are evaluated per
//! instrument in lexicographic order. A failure on one instrument never
//! aborts the tick for the others.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::execution::{ExecutionSink, ExitReason, Instruction};
use crate::market::{BarSnapshot, Direction, Instrument, TickEvent};
use crate::signal::{SignalError, SignalProvider};

use super::guards::{EntryClusterGuard, GuardsConfig, TrendGuard, VolatilityFilter};
use super::position_book::{
    BookError, ExitTrigger, Position, PositionBook, PositionDraft, PositionId,
};
use super::risk_ledger::{RiskConfig, RiskLedger};

/// Decision engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Probability above which a long entry is considered
    pub entry_threshold_long: f64,
    /// Probability below which a short entry is considered
    pub entry_threshold_short: f64,
    /// Stop distance as a multiple of ATR(14)
    pub sl_atr_mult: Decimal,
    /// Take-profit distance in R (multiples of the stop distance)
    pub tp_r_mult: Decimal,
    /// Bars after which an open position is force-closed
    pub time_stop_bars: u64,
    /// Hard cap on simultaneously open positions
    pub max_open_positions: usize,
    /// Admit at most one open position per instrument
    pub single_position_per_instrument: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_threshold_long: 0.55,
            entry_threshold_short: 0.45,
            sl_atr_mult: dec!(1.5),
            tp_r_mult: dec!(1.2),
            time_stop_bars: 6,
            max_open_positions: 5,
            single_position_per_instrument: true,
        }
    }
}

/// Recoverable engine failures; none of these abort a tick
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid stop distance {stop_distance} for {instrument}")]
    InvalidStopDistance {
        instrument: Instrument,
        stop_distance: Decimal,
    },

    #[error(transparent)]
    Book(#[from] BookError),
}

/// One realized exit from a tick
#[derive(Clone, Debug)]
pub struct ClosedTrade {
    pub position_id: PositionId,
    pub instrument: Instrument,
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub pnl: Decimal,
}

/// What one tick produced
#[derive(Clone, Debug)]
pub struct TickReport {
    pub bar_index: u64,
    pub opened: Vec<Position>,
    pub closed: Vec<ClosedTrade>,
    pub halted: bool,
}

/// Queryable snapshot of engine state after a tick
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStatus {
    pub bar_index: u64,
    pub equity: Decimal,
    pub daily_loss_ratio: Decimal,
    pub halted_for_day: bool,
    pub open_positions: usize,
    pub trades_closed: usize,
    pub wins: usize,
    pub losses: usize,
}

/// Consumes bar-close ticks and decides entries and exits under the
/// capital-preservation limits held by the risk ledger.
pub struct DecisionEngine {
    config: EngineConfig,
    ledger: RiskLedger,
    book: PositionBook,
    cluster_guard: EntryClusterGuard,
    trend_guard: TrendGuard,
    vol_filter: VolatilityFilter,
    signals: Arc<dyn SignalProvider>,
    sink: Arc<dyn ExecutionSink>,
    trades_closed: usize,
    wins: usize,
    losses: usize,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        risk: RiskConfig,
        guards: GuardsConfig,
        signals: Arc<dyn SignalProvider>,
        sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        let book = PositionBook::new(config.max_open_positions);
        Self {
            ledger: RiskLedger::new(risk),
            book,
            cluster_guard: EntryClusterGuard::new(guards.cluster),
            trend_guard: TrendGuard::new(guards.trend),
            vol_filter: VolatilityFilter::new(guards.volatility),
            signals,
            sink,
            trades_closed: 0,
            wins: 0,
            losses: 0,
            config,
        }
    }

    /// Process one bar-close tick to completion: day roll, halt check,
    /// exits for the whole book, then entry evaluation per instrument.
    pub async fn on_tick(&mut self, tick: &TickEvent) -> TickReport {
        if self.ledger.day() != Some(tick.day) {
            self.ledger.roll_day(tick.day);
        }
        self.ledger.check_and_apply_halt();

        let mut report = TickReport {
            bar_index: tick.bar_index,
            opened: Vec::new(),
            closed: Vec::new(),
            halted: false,
        };

        // Exit phase. Triggers are collected up front; the scan reflects
        // book state at the top of the tick.
        let triggers: Vec<ExitTrigger> = self.book.scan_exits(tick.bar_index, &tick.bars).collect();
        for trigger in triggers {
            match self.process_exit(&trigger, tick).await {
                Ok(closed) => report.closed.push(closed),
                Err(e) => {
                    // Closing a scanned id can only fail if an invariant
                    // broke; drop the instruction, keep the tick alive
                    error!(id = %trigger.position_id, error = %e, "close failed");
                }
            }
        }

        // Losses realized this tick can trip the limit before entries run
        self.ledger.check_and_apply_halt();
        report.halted = self.ledger.halted_for_day();

        // Entry phase, instruments in lexicographic order
        for (instrument, bar) in &tick.bars {
            if self.ledger.halted_for_day() {
                debug!(day_loss = %self.ledger.daily_loss_ratio(), "entries suppressed for the day");
                break;
            }
            match self.evaluate_entry(instrument, bar, tick).await {
                Ok(Some(position)) => report.opened.push(position),
                Ok(None) => {}
                Err(e) => {
                    warn!(instrument = %instrument, error = %e, "entry evaluation failed");
                }
            }
        }

        report
    }

    async fn process_exit(
        &mut self,
        trigger: &ExitTrigger,
        tick: &TickEvent,
    ) -> Result<ClosedTrade, BookError> {
        let fill = self.book.close(
            trigger.position_id,
            trigger.exit_price,
            tick.bar_index,
            trigger.reason,
        )?;

        let pnl = self.ledger.record_fill(&fill.position, fill.exit_price);
        self.trades_closed += 1;
        if pnl >= Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.cluster_guard
            .on_trade_closed(&fill.position.instrument, tick.bar_index, pnl);

        info!(
            id = %fill.position.id,
            instrument = %fill.position.instrument,
            side = %fill.position.direction,
            reason = %fill.reason,
            exit = %fill.exit_price,
            pnl = %pnl,
            equity = %self.ledger.equity(),
            "position closed"
        );

        let instruction = Instruction::Close {
            id: Uuid::new_v4(),
            position_id: fill.position.id,
            instrument: fill.position.instrument.clone(),
            exit_price: fill.exit_price,
            exit_bar: tick.bar_index,
            reason: fill.reason,
            pnl,
        };
        if let Err(e) = self.sink.submit(instruction).await {
            // Book and ledger are already settled; the sink owns durability
            error!(id = %fill.position.id, error = %e, "close instruction rejected by sink");
        }

        Ok(ClosedTrade {
            position_id: fill.position.id,
            instrument: fill.position.instrument.clone(),
            reason: fill.reason,
            exit_price: fill.exit_price,
            pnl,
        })
    }

    async fn evaluate_entry(
        &mut self,
        instrument: &Instrument,
        bar: &BarSnapshot,
        tick: &TickEvent,
    ) -> Result<Option<Position>, EngineError> {
        if !self.book.can_open() {
            debug!(instrument = %instrument, "entry skipped: position cap reached");
            return Ok(None);
        }
        if self.config.single_position_per_instrument && self.book.has_open_for(instrument) {
            debug!(instrument = %instrument, "entry skipped: position already open");
            return Ok(None);
        }

        let signal = match self.signals.get(instrument, tick.bar_index).await {
            Ok(signal) => signal,
            Err(SignalError::DataUnavailable { .. }) => {
                debug!(instrument = %instrument, "entry skipped: signal unavailable");
                return Ok(None);
            }
        };

        let direction = if signal.p_up > self.config.entry_threshold_long {
            Direction::Long
        } else if signal.p_up < self.config.entry_threshold_short {
            Direction::Short
        } else {
            return Ok(None);
        };

        if !self.trend_guard.allows(direction, signal.ema_diff) {
            debug!(instrument = %instrument, side = %direction, "entry skipped: trend misaligned");
            return Ok(None);
        }
        let vol = self.vol_filter.decide(signal.atr14, signal.vol_z);
        if !vol.allow {
            debug!(instrument = %instrument, reason = %vol.reason, "entry skipped: volatility filter");
            return Ok(None);
        }
        let cluster = self
            .cluster_guard
            .can_enter(instrument, direction, tick.bar_index);
        if !cluster.allow {
            debug!(instrument = %instrument, reason = %cluster.reason, "entry skipped: cluster guard");
            return Ok(None);
        }

        let stop_distance = self.config.sl_atr_mult * signal.atr14;
        let size = self.size_position(instrument, stop_distance)?;

        let tp_distance = self.config.tp_r_mult * stop_distance;
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (bar.close - stop_distance, bar.close + tp_distance),
            Direction::Short => (bar.close + stop_distance, bar.close - tp_distance),
        };

        let draft = PositionDraft {
            instrument: instrument.clone(),
            direction,
            entry_price: bar.close,
            stop_loss,
            take_profit,
            size,
            opened_at_bar: tick.bar_index,
            time_stop_bars: self.config.time_stop_bars,
            opened_at: tick.timestamp,
        };

        let position = match self.book.open(draft) {
            Ok(position) => position,
            Err(BookError::CapacityExceeded { .. }) => {
                // Capacity was checked at the top of this evaluation; a
                // rejection here is the defensive re-check, drop the entry
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.cluster_guard
            .on_trade_opened(instrument, direction, tick.bar_index);

        info!(
            id = %position.id,
            instrument = %instrument,
            side = %direction,
            p_up = signal.p_up,
            entry = %position.entry_price,
            sl = %position.stop_loss,
            tp = %position.take_profit,
            units = %position.size,
            equity = %self.ledger.equity(),
            "position opened"
        );

        if let Err(e) = self.sink.submit(Instruction::open(position.clone())).await {
            error!(id = %position.id, error = %e, "open instruction rejected by sink");
        }

        Ok(Some(position))
    }

    /// Size so that a full stop-out loses at most the ledger's risk amount.
    /// Units are rounded toward zero, keeping the bound an exact inequality.
    fn size_position(
        &self,
        instrument: &Instrument,
        stop_distance: Decimal,
    ) -> Result<Decimal, EngineError> {
        if stop_distance <= Decimal::ZERO {
            return Err(EngineError::InvalidStopDistance {
                instrument: instrument.clone(),
                stop_distance,
            });
        }
        let size = (self.ledger.max_risk_amount() / stop_distance)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        if size <= Decimal::ZERO {
            return Err(EngineError::InvalidStopDistance {
                instrument: instrument.clone(),
                stop_distance,
            });
        }
        Ok(size)
    }

    pub fn status(&self, bar_index: u64) -> EngineStatus {
        EngineStatus {
            bar_index,
            equity: self.ledger.equity(),
            daily_loss_ratio: self.ledger.daily_loss_ratio(),
            halted_for_day: self.ledger.halted_for_day(),
            open_positions: self.book.open_count(),
            trades_closed: self.trades_closed,
            wins: self.wins,
            losses: self.losses,
        }
    }

    pub fn ledger(&self) -> &RiskLedger {
        &self.ledger
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

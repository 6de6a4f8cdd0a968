//! Position lifecycle and exit scanning for paper trading

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::execution::ExitReason;
use crate::market::{BarSnapshot, Direction, Instrument};

/// Monotonically assigned position identifier
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POS-{}", self.0)
    }
}

/// Position status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Individual paper position.
///
/// Stop-loss and take-profit are set once at open and never mutated; the
/// only lifecycle transition is Open -> Closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument: Instrument,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Size in base-currency units
    pub size: Decimal,
    pub opened_at_bar: u64,
    /// Bars after which the position is force-closed if neither level hit
    pub time_stop_bars: u64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
}

/// Position parameters computed by the decision engine before admission
#[derive(Clone, Debug)]
pub struct PositionDraft {
    pub instrument: Instrument,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub size: Decimal,
    pub opened_at_bar: u64,
    pub time_stop_bars: u64,
    pub opened_at: DateTime<Utc>,
}

/// Book admission and lookup failures
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("open position cap reached: {open}/{cap}")]
    CapacityExceeded { open: usize, cap: usize },

    #[error("position {id} not found or already closed")]
    NotFound { id: PositionId },
}

/// Exit condition detected by `scan_exits`
#[derive(Clone, Debug, PartialEq)]
pub struct ExitTrigger {
    pub position_id: PositionId,
    pub instrument: Instrument,
    pub exit_price: Decimal,
    pub reason: ExitReason,
}

/// Realized exit produced by `close`, consumed by the risk ledger
#[derive(Clone, Debug)]
pub struct ExitFill {
    /// The position, with status already flipped to Closed
    pub position: Position,
    pub exit_price: Decimal,
    pub exit_bar: u64,
    pub reason: ExitReason,
}

/// Open positions keyed by id, plus the closed-position history.
///
/// Ids are assigned in open order, so iteration over the book is
/// deterministic. The open-position cap is enforced before any position is
/// admitted.
pub struct PositionBook {
    max_open_positions: usize,
    open_positions: BTreeMap<PositionId, Position>,
    closed_positions: Vec<Position>,
    next_id: u64,
}

impl PositionBook {
    pub fn new(max_open_positions: usize) -> Self {
        Self {
            max_open_positions,
            open_positions: BTreeMap::new(),
            closed_positions: Vec::new(),
            next_id: 1,
        }
    }

    /// True iff another position can be admitted
    pub fn can_open(&self) -> bool {
        self.open_positions.len() < self.max_open_positions
    }

    pub fn open_count(&self) -> usize {
        self.open_positions.len()
    }

    /// True iff an open position exists for the instrument
    pub fn has_open_for(&self, instrument: &Instrument) -> bool {
        self.open_positions
            .values()
            .any(|p| &p.instrument == instrument)
    }

    /// Admit a new position, assigning its id
    pub fn open(&mut self, draft: PositionDraft) -> Result<Position, BookError> {
        if !self.can_open() {
            return Err(BookError::CapacityExceeded {
                open: self.open_positions.len(),
                cap: self.max_open_positions,
            });
        }

        let id = PositionId(self.next_id);
        self.next_id += 1;

        let position = Position {
            id,
            instrument: draft.instrument,
            direction: draft.direction,
            entry_price: draft.entry_price,
            stop_loss: draft.stop_loss,
            take_profit: draft.take_profit,
            size: draft.size,
            opened_at_bar: draft.opened_at_bar,
            time_stop_bars: draft.time_stop_bars,
            status: PositionStatus::Open,
            opened_at: draft.opened_at,
        };
        self.open_positions.insert(id, position.clone());
        Ok(position)
    }

    /// Close an open position, returning the realized-exit event
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: Decimal,
        exit_bar: u64,
        reason: ExitReason,
    ) -> Result<ExitFill, BookError> {
        let mut position = self
            .open_positions
            .remove(&id)
            .ok_or(BookError::NotFound { id })?;
        position.status = PositionStatus::Closed;
        self.closed_positions.push(position.clone());

        Ok(ExitFill {
            position,
            exit_price,
            exit_bar,
            reason,
        })
    }

    /// Scan open positions for exit conditions against the given bars.
    ///
    /// Lazy, single pass over current state only; positions already closed
    /// no longer appear, so repeating the scan after closing produces no
    /// duplicates. Per position the priority is STOP over TARGET (the
    /// conservative tie-break when one bar straddles both levels), then
    /// TARGET over TIME. Positions whose instrument has no bar this tick
    /// are left alone.
    pub fn scan_exits<'a>(
        &'a self,
        current_bar: u64,
        bars: &'a BTreeMap<Instrument, BarSnapshot>,
    ) -> impl Iterator<Item = ExitTrigger> + 'a {
        self.open_positions.values().filter_map(move |position| {
            let bar = bars.get(&position.instrument)?;
            Self::exit_for(position, current_bar, bar)
        })
    }

    fn exit_for(position: &Position, current_bar: u64, bar: &BarSnapshot) -> Option<ExitTrigger> {
        let (stop_hit, target_hit) = match position.direction {
            Direction::Long => (
                bar.low <= position.stop_loss,
                bar.high >= position.take_profit,
            ),
            Direction::Short => (
                bar.high >= position.stop_loss,
                bar.low <= position.take_profit,
            ),
        };

        let (exit_price, reason) = if stop_hit {
            (position.stop_loss, ExitReason::Stop)
        } else if target_hit {
            (position.take_profit, ExitReason::Target)
        } else if current_bar.saturating_sub(position.opened_at_bar) >= position.time_stop_bars {
            // Time stop fills at the bar close
            (bar.close, ExitReason::Time)
        } else {
            return None;
        };

        Some(ExitTrigger {
            position_id: position.id,
            instrument: position.instrument.clone(),
            exit_price,
            reason,
        })
    }

    pub fn iter_open(&self) -> impl Iterator<Item = &Position> {
        self.open_positions.values()
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.open_positions.get(&id)
    }

    pub fn closed(&self) -> &[Position] {
        &self.closed_positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft(instrument: &str, direction: Direction) -> PositionDraft {
        let entry = dec!(1.1000);
        let stop_distance = dec!(0.0015);
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (entry - stop_distance, entry + dec!(0.0018)),
            Direction::Short => (entry + stop_distance, entry - dec!(0.0018)),
        };
        PositionDraft {
            instrument: Instrument::new(instrument),
            direction,
            entry_price: entry,
            stop_loss,
            take_profit,
            size: dec!(1000),
            opened_at_bar: 100,
            time_stop_bars: 6,
            opened_at: Utc::now(),
        }
    }

    fn bars_for(instrument: &str, high: Decimal, low: Decimal, close: Decimal) -> BTreeMap<Instrument, BarSnapshot> {
        let mut bars = BTreeMap::new();
        bars.insert(Instrument::new(instrument), BarSnapshot { high, low, close });
        bars
    }

    #[test]
    fn cap_is_enforced_before_admission() {
        let mut book = PositionBook::new(5);
        for i in 0..5 {
            book.open(draft(&format!("PAIR{i}"), Direction::Long)).unwrap();
        }
        assert!(!book.can_open());

        let err = book.open(draft("PAIR5", Direction::Long)).unwrap_err();
        assert_eq!(err, BookError::CapacityExceeded { open: 5, cap: 5 });
        assert_eq!(book.open_count(), 5);
    }

    #[test]
    fn close_unknown_or_closed_id_is_not_found() {
        let mut book = PositionBook::new(5);
        let position = book.open(draft("EURUSD", Direction::Long)).unwrap();

        let missing = PositionId(99);
        assert_eq!(
            book.close(missing, dec!(1.1), 101, ExitReason::Stop).unwrap_err(),
            BookError::NotFound { id: missing }
        );

        let fill = book
            .close(position.id, dec!(1.0985), 101, ExitReason::Stop)
            .unwrap();
        assert_eq!(fill.position.status, PositionStatus::Closed);

        assert_eq!(
            book.close(position.id, dec!(1.0985), 102, ExitReason::Stop).unwrap_err(),
            BookError::NotFound { id: position.id }
        );
    }

    #[test]
    fn stop_wins_when_bar_straddles_both_levels() {
        let mut book = PositionBook::new(5);
        let position = book.open(draft("EURUSD", Direction::Long)).unwrap();

        // Bar range covers both the stop (1.0985) and the target (1.1018)
        let bars = bars_for("EURUSD", dec!(1.1030), dec!(1.0980), dec!(1.1000));
        let triggers: Vec<_> = book.scan_exits(101, &bars).collect();

        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].reason, ExitReason::Stop);
        assert_eq!(triggers[0].exit_price, position.stop_loss);
    }

    #[test]
    fn long_target_fills_at_the_level() {
        let mut book = PositionBook::new(5);
        let position = book.open(draft("EURUSD", Direction::Long)).unwrap();

        let bars = bars_for("EURUSD", dec!(1.1020), dec!(1.0999), dec!(1.1010));
        let triggers: Vec<_> = book.scan_exits(101, &bars).collect();

        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].reason, ExitReason::Target);
        assert_eq!(triggers[0].exit_price, position.take_profit);
    }

    #[test]
    fn short_levels_are_mirrored() {
        let mut book = PositionBook::new(5);
        let position = book.open(draft("EURUSD", Direction::Short)).unwrap();

        // Stop sits above entry for a short
        let bars = bars_for("EURUSD", dec!(1.1016), dec!(1.1000), dec!(1.1010));
        let triggers: Vec<_> = book.scan_exits(101, &bars).collect();
        assert_eq!(triggers[0].reason, ExitReason::Stop);
        assert_eq!(triggers[0].exit_price, position.stop_loss);

        // Target sits below entry
        let bars = bars_for("EURUSD", dec!(1.1005), dec!(1.0980), dec!(1.0990));
        let triggers: Vec<_> = book.scan_exits(101, &bars).collect();
        assert_eq!(triggers[0].reason, ExitReason::Target);
        assert_eq!(triggers[0].exit_price, position.take_profit);
    }

    #[test]
    fn time_stop_fires_at_six_bars_and_fills_at_close() {
        let mut book = PositionBook::new(5);
        book.open(draft("EURUSD", Direction::Long)).unwrap();

        // Neither level touched
        let bars = bars_for("EURUSD", dec!(1.1005), dec!(1.0995), dec!(1.1002));

        assert_eq!(book.scan_exits(105, &bars).count(), 0);

        let triggers: Vec<_> = book.scan_exits(106, &bars).collect();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].reason, ExitReason::Time);
        assert_eq!(triggers[0].exit_price, dec!(1.1002));
    }

    #[test]
    fn rescanning_after_close_produces_no_duplicate() {
        let mut book = PositionBook::new(5);
        book.open(draft("EURUSD", Direction::Long)).unwrap();

        let bars = bars_for("EURUSD", dec!(1.1020), dec!(1.0999), dec!(1.1010));
        let triggers: Vec<_> = book.scan_exits(101, &bars).collect();
        assert_eq!(triggers.len(), 1);

        book.close(triggers[0].position_id, triggers[0].exit_price, 101, triggers[0].reason)
            .unwrap();
        assert_eq!(book.scan_exits(101, &bars).count(), 0);
        assert_eq!(book.closed().len(), 1);
    }

    #[test]
    fn ids_are_assigned_in_open_order() {
        let mut book = PositionBook::new(5);
        let first = book.open(draft("AUDUSD", Direction::Long)).unwrap();
        let second = book.open(draft("EURUSD", Direction::Short)).unwrap();
        assert!(first.id < second.id);
        assert!(book.has_open_for(&Instrument::new("AUDUSD")));
        assert!(!book.has_open_for(&Instrument::new("USDJPY")));
    }
}

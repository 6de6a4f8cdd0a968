//! Daily risk bookkeeping for the paper account

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::position_book::Position;

/// Risk configuration for the paper account
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Equity the paper account starts with
    pub starting_equity: Decimal,
    /// Fractional daily loss that halts entries for the day (0.03 = 3%)
    pub daily_max_loss: Decimal,
    /// Fraction of equity put at risk by a single new position (0.02 = 2%)
    pub risk_per_trade: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            starting_equity: dec!(10000),
            daily_max_loss: dec!(0.03),
            risk_per_trade: dec!(0.02),
        }
    }
}

/// Tracks equity, daily realized P&L and the daily halt flag.
///
/// The ledger never rejects a fill; admission checks happen upstream in the
/// decision engine. Day-scoped fields reset exactly once per new trading
/// day, via `roll_day`.
#[derive(Clone, Debug)]
pub struct RiskLedger {
    config: RiskConfig,
    equity: Decimal,
    daily_start_equity: Decimal,
    daily_realized_pnl: Decimal,
    halted_for_day: bool,
    day: Option<NaiveDate>,
}

impl RiskLedger {
    pub fn new(config: RiskConfig) -> Self {
        let equity = config.starting_equity;
        Self {
            config,
            equity,
            daily_start_equity: equity,
            daily_realized_pnl: Decimal::ZERO,
            halted_for_day: false,
            day: None,
        }
    }

    /// Realize a fill into equity and daily P&L, returning the P&L
    pub fn record_fill(&mut self, position: &Position, exit_price: Decimal) -> Decimal {
        let pnl = position.size * (exit_price - position.entry_price) * position.direction.sign();
        self.daily_realized_pnl += pnl;
        self.equity += pnl;
        pnl
    }

    /// Fractional loss since the day start. Negative values mean a gain.
    pub fn daily_loss_ratio(&self) -> Decimal {
        if self.daily_start_equity.is_zero() {
            return Decimal::ZERO;
        }
        -self.daily_realized_pnl / self.daily_start_equity
    }

    /// Latches the halt flag once the daily loss limit is breached.
    ///
    /// Monotonic within a day: once set, only `roll_day` clears it.
    pub fn check_and_apply_halt(&mut self) -> bool {
        if !self.halted_for_day && self.daily_loss_ratio() >= self.config.daily_max_loss {
            warn!(
                day_loss = %self.daily_loss_ratio(),
                limit = %self.config.daily_max_loss,
                "daily loss limit breached, halting entries for the day"
            );
            self.halted_for_day = true;
        }
        self.halted_for_day
    }

    /// Maximum capital at risk for a single new position
    pub fn max_risk_amount(&self) -> Decimal {
        self.config.risk_per_trade * self.equity
    }

    /// Snapshot equity and clear daily state for a new trading day.
    ///
    /// Called exactly once per day boundary, when the tick's day marker
    /// differs from the stored one (the first tick of a session included).
    pub fn roll_day(&mut self, new_day: NaiveDate) {
        self.daily_start_equity = self.equity;
        self.daily_realized_pnl = Decimal::ZERO;
        self.halted_for_day = false;
        self.day = Some(new_day);
        info!(day = %new_day, equity = %self.equity, "trading day initialized");
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn daily_start_equity(&self) -> Decimal {
        self.daily_start_equity
    }

    pub fn daily_realized_pnl(&self) -> Decimal {
        self.daily_realized_pnl
    }

    pub fn halted_for_day(&self) -> bool {
        self.halted_for_day
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }
}

//! Entry guards layered in front of the decision engine.
//!
//! Each guard is independently configurable and answers one question: is
//! this entry allowed right now? A refusal is a normal skip with a reason
//! string, never an error.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::market::{Direction, Instrument};

/// Guard verdict plus the reason it is logged under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardDecision {
    pub allow: bool,
    pub reason: String,
}

impl GuardDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allow: true,
            reason: reason.to_string(),
        }
    }

    fn block(reason: String) -> Self {
        Self {
            allow: false,
            reason,
        }
    }
}

/// Trend guard configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendGuardConfig {
    pub enabled: bool,
    /// Longs require a positive EMA spread
    pub require_alignment_for_long: bool,
    /// Shorts require a negative EMA spread
    pub require_alignment_for_short: bool,
}

impl Default for TrendGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_alignment_for_long: true,
            require_alignment_for_short: true,
        }
    }
}

/// Counter-trend protection: blocks entries that fight the EMA spread
#[derive(Clone, Debug, Default)]
pub struct TrendGuard {
    config: TrendGuardConfig,
}

impl TrendGuard {
    pub fn new(config: TrendGuardConfig) -> Self {
        Self { config }
    }

    pub fn allows(&self, direction: Direction, ema_diff: Decimal) -> bool {
        if !self.config.enabled {
            return true;
        }
        match direction {
            Direction::Long => {
                !self.config.require_alignment_for_long || ema_diff > Decimal::ZERO
            }
            Direction::Short => {
                !self.config.require_alignment_for_short || ema_diff < Decimal::ZERO
            }
        }
    }
}

/// Volatility filter configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityFilterConfig {
    pub enabled: bool,
    /// ATR below this is dead tape, no entries
    pub atr_min: Decimal,
    /// ATR above this is disorderly tape, no entries
    pub atr_max: Decimal,
    pub block_on_spike: bool,
    /// Volatility z-score at or above this blocks entries
    pub vol_spike_z: f64,
}

impl Default for VolatilityFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_min: Decimal::ZERO,
            atr_max: dec!(1000000000),
            block_on_spike: true,
            vol_spike_z: 2.5,
        }
    }
}

/// Blocks entries in dead or spiking volatility
#[derive(Clone, Debug, Default)]
pub struct VolatilityFilter {
    config: VolatilityFilterConfig,
}

impl VolatilityFilter {
    pub fn new(config: VolatilityFilterConfig) -> Self {
        Self { config }
    }

    pub fn decide(&self, atr: Decimal, vol_z: Option<f64>) -> GuardDecision {
        if !self.config.enabled {
            return GuardDecision::allow("vol_disabled");
        }
        if atr < self.config.atr_min {
            return GuardDecision::block(format!("atr_too_low<{}", self.config.atr_min));
        }
        if atr > self.config.atr_max {
            return GuardDecision::block(format!("atr_too_high>{}", self.config.atr_max));
        }
        if self.config.block_on_spike {
            if let Some(z) = vol_z {
                if z >= self.config.vol_spike_z {
                    return GuardDecision::block(format!(
                        "vol_spike_z>={}",
                        self.config.vol_spike_z
                    ));
                }
            }
        }
        GuardDecision::allow("vol_ok")
    }
}

/// Cluster guard configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGuardConfig {
    pub enabled: bool,
    /// Bars to wait after any entry on the instrument
    pub cooldown_bars: u64,
    /// Max same-side entries inside the window
    pub max_same_side_entries: u32,
    pub window_bars: u64,
    /// Losing trades in a row that trigger a pause
    pub block_after_losses: u32,
    pub pause_bars_after_loss_streak: u64,
}

impl Default for ClusterGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_bars: 2,
            max_same_side_entries: 2,
            window_bars: 12,
            block_after_losses: 2,
            pause_bars_after_loss_streak: 8,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ClusterState {
    last_trade_bar: Option<u64>,
    last_side: Option<Direction>,
    same_side_count: u32,
    same_side_window_start: u64,
    loss_streak: u32,
    pause_until_bar: Option<u64>,
}

/// Prevents clustered entries per instrument: cooldown after any trade,
/// same-side bursts inside a window, and a pause after a loss streak.
#[derive(Clone, Debug, Default)]
pub struct EntryClusterGuard {
    config: ClusterGuardConfig,
    state: HashMap<Instrument, ClusterState>,
}

impl EntryClusterGuard {
    pub fn new(config: ClusterGuardConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    pub fn can_enter(
        &mut self,
        instrument: &Instrument,
        direction: Direction,
        bar_index: u64,
    ) -> GuardDecision {
        if !self.config.enabled {
            return GuardDecision::allow("cluster_guard_disabled");
        }
        let state = self.state.entry(instrument.clone()).or_default();

        if let Some(until) = state.pause_until_bar {
            if bar_index < until {
                return GuardDecision::block(format!("paused_until_bar={until}"));
            }
        }

        if let Some(last) = state.last_trade_bar {
            let elapsed = bar_index.saturating_sub(last);
            if elapsed <= self.config.cooldown_bars {
                return GuardDecision::block(format!(
                    "cooldown_active({elapsed}<={})",
                    self.config.cooldown_bars
                ));
            }
        }

        if state.last_side == Some(direction) {
            let in_window =
                bar_index.saturating_sub(state.same_side_window_start) <= self.config.window_bars;
            if in_window && state.same_side_count >= self.config.max_same_side_entries {
                return GuardDecision::block(format!(
                    "same_side_cluster>{}",
                    self.config.max_same_side_entries
                ));
            }
        }

        GuardDecision::allow("cluster_ok")
    }

    /// Record an admitted entry for cooldown and same-side tracking
    pub fn on_trade_opened(&mut self, instrument: &Instrument, direction: Direction, bar_index: u64) {
        if !self.config.enabled {
            return;
        }
        let state = self.state.entry(instrument.clone()).or_default();
        state.last_trade_bar = Some(bar_index);

        let in_window =
            bar_index.saturating_sub(state.same_side_window_start) <= self.config.window_bars;
        if state.last_side == Some(direction) && in_window {
            state.same_side_count += 1;
        } else {
            state.same_side_window_start = bar_index;
            state.same_side_count = 1;
        }
        state.last_side = Some(direction);
    }

    /// Record a realized trade for loss-streak tracking
    pub fn on_trade_closed(&mut self, instrument: &Instrument, bar_index: u64, pnl: Decimal) {
        if !self.config.enabled {
            return;
        }
        let state = self.state.entry(instrument.clone()).or_default();

        if pnl < Decimal::ZERO {
            state.loss_streak += 1;
            if state.loss_streak >= self.config.block_after_losses {
                state.pause_until_bar =
                    Some(bar_index + self.config.pause_bars_after_loss_streak);
            }
        } else {
            state.loss_streak = 0;
        }
    }
}

/// Guard configuration bundle wired into the engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardsConfig {
    pub trend: TrendGuardConfig,
    pub volatility: VolatilityFilterConfig,
    pub cluster: ClusterGuardConfig,
}

impl GuardsConfig {
    /// All guards off; the engine then gates on thresholds and risk alone
    pub fn disabled() -> Self {
        Self {
            trend: TrendGuardConfig {
                enabled: false,
                ..TrendGuardConfig::default()
            },
            volatility: VolatilityFilterConfig {
                enabled: false,
                ..VolatilityFilterConfig::default()
            },
            cluster: ClusterGuardConfig {
                enabled: false,
                ..ClusterGuardConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Instrument {
        Instrument::new("EURUSD")
    }

    #[test]
    fn trend_guard_blocks_misaligned_entries() {
        let guard = TrendGuard::new(TrendGuardConfig::default());
        assert!(guard.allows(Direction::Long, dec!(0.0004)));
        assert!(!guard.allows(Direction::Long, dec!(-0.0004)));
        assert!(guard.allows(Direction::Short, dec!(-0.0004)));
        assert!(!guard.allows(Direction::Short, Decimal::ZERO));

        let off = TrendGuard::new(TrendGuardConfig {
            enabled: false,
            ..TrendGuardConfig::default()
        });
        assert!(off.allows(Direction::Long, dec!(-1)));
    }

    #[test]
    fn volatility_filter_blocks_extremes_and_spikes() {
        let filter = VolatilityFilter::new(VolatilityFilterConfig {
            atr_min: dec!(0.0002),
            atr_max: dec!(0.0050),
            ..VolatilityFilterConfig::default()
        });

        assert!(filter.decide(dec!(0.0010), None).allow);
        assert!(!filter.decide(dec!(0.0001), None).allow);
        assert!(!filter.decide(dec!(0.0100), None).allow);
        assert!(!filter.decide(dec!(0.0010), Some(3.0)).allow);
        assert!(filter.decide(dec!(0.0010), Some(1.0)).allow);
    }

    #[test]
    fn cooldown_blocks_reentry_right_after_a_trade() {
        let mut guard = EntryClusterGuard::new(ClusterGuardConfig::default());

        assert!(guard.can_enter(&pair(), Direction::Long, 100).allow);
        guard.on_trade_opened(&pair(), Direction::Long, 100);

        assert!(!guard.can_enter(&pair(), Direction::Long, 101).allow);
        assert!(!guard.can_enter(&pair(), Direction::Long, 102).allow);
        assert!(guard.can_enter(&pair(), Direction::Long, 103).allow);
    }

    #[test]
    fn same_side_burst_is_capped_within_the_window() {
        let mut guard = EntryClusterGuard::new(ClusterGuardConfig {
            cooldown_bars: 0,
            ..ClusterGuardConfig::default()
        });

        guard.on_trade_opened(&pair(), Direction::Long, 100);
        guard.on_trade_opened(&pair(), Direction::Long, 103);

        // Third long inside the 12-bar window is refused
        let decision = guard.can_enter(&pair(), Direction::Long, 106);
        assert!(!decision.allow);
        assert!(decision.reason.contains("same_side_cluster"));

        // The opposite side is unaffected
        assert!(guard.can_enter(&pair(), Direction::Short, 106).allow);

        // Outside the window the counter restarts
        assert!(guard.can_enter(&pair(), Direction::Long, 120).allow);
    }

    #[test]
    fn loss_streak_pauses_the_instrument() {
        let mut guard = EntryClusterGuard::new(ClusterGuardConfig::default());

        guard.on_trade_closed(&pair(), 100, dec!(-50));
        assert!(guard.can_enter(&pair(), Direction::Long, 103).allow);

        guard.on_trade_closed(&pair(), 104, dec!(-50));
        let decision = guard.can_enter(&pair(), Direction::Long, 107);
        assert!(!decision.allow);
        assert!(decision.reason.contains("paused_until_bar"));

        // Pause expires 8 bars after the streak
        assert!(guard.can_enter(&pair(), Direction::Long, 112).allow);

        // A winner resets the streak
        guard.on_trade_closed(&pair(), 113, dec!(75));
        guard.on_trade_closed(&pair(), 114, dec!(-10));
        assert!(guard.can_enter(&pair(), Direction::Long, 117).allow);
    }
}

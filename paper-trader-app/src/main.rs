//! FX Paper Trading Application
//!
//! Drives the decision core over a deterministic multi-day replay: a
//! scripted signal provider stands in for the calibrated model, and every
//! instruction lands in a JSON-lines paper ledger. Pass a JSON config path
//! as the first argument to override the defaults.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use fxbot_core::execution::{ExecutionSink, Instruction, SinkError};
use fxbot_core::market::{BarSnapshot, Instrument, ReplayTickSource, TickEvent};
use fxbot_core::paper_trading::{
    DecisionEngine, EngineConfig, GuardsConfig, RiskConfig, TradingSession,
};
use fxbot_core::signal::{Signal, SignalError, SignalProvider};

/// Top-level bot configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct BotConfig {
    pairs: Vec<String>,
    replay_days: u32,
    bars_per_day: u64,
    ledger_path: PathBuf,
    risk: RiskConfig,
    engine: EngineConfig,
    guards: GuardsConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["EURUSD".to_string(), "GBPUSD".to_string()],
            replay_days: 3,
            bars_per_day: 288,
            ledger_path: PathBuf::from("paper_ledger.jsonl"),
            risk: RiskConfig::default(),
            engine: EngineConfig::default(),
            guards: GuardsConfig::default(),
        }
    }
}

fn load_config() -> Result<BotConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("failed to parse config {path}"))
        }
        None => Ok(BotConfig::default()),
    }
}

/// Deterministic stand-in for the calibrated model: alternates bullish,
/// bearish and flat stretches so the demo exercises both entry sides and
/// the no-trade dead zone.
struct ScriptedSignals {
    atr: Decimal,
    warmup_bars: u64,
}

#[async_trait]
impl SignalProvider for ScriptedSignals {
    async fn get(&self, instrument: &Instrument, bar_index: u64) -> Result<Signal, SignalError> {
        if bar_index < self.warmup_bars {
            return Err(SignalError::DataUnavailable {
                instrument: instrument.to_string(),
                bar_index,
            });
        }
        let phase = (bar_index / 12) % 3;
        let (p_up, ema_diff) = match phase {
            0 => (0.62, dec!(0.0004)),
            1 => (0.38, dec!(-0.0004)),
            _ => (0.50, Decimal::ZERO),
        };
        Ok(Signal {
            p_up,
            atr14: self.atr,
            ema_diff,
            vol_z: None,
        })
    }
}

/// Appends every instruction as one JSON line, flushed before returning so
/// the record is durable before the next tick.
struct JsonlLedgerSink {
    file: Mutex<File>,
}

impl JsonlLedgerSink {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create paper ledger at {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ExecutionSink for JsonlLedgerSink {
    async fn submit(&self, instruction: Instruction) -> Result<(), SinkError> {
        let line = serde_json::to_string(&instruction).map_err(|e| SinkError {
            message: e.to_string(),
        })?;
        let mut file = self.file.lock().await;
        writeln!(file, "{line}")
            .and_then(|_| file.flush())
            .map_err(|e| SinkError {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// Builds a zig-zag price walk per pair: twelve bars drifting up, twelve
/// drifting down, so stops, targets and time stops all get exercised.
fn build_replay(pairs: &[Instrument], days: u32, bars_per_day: u64) -> Vec<TickEvent> {
    let start_day = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid replay start date");
    let mut bases: Vec<Decimal> = pairs
        .iter()
        .enumerate()
        .map(|(i, _)| dec!(1.1000) + Decimal::from(i as i64) * dec!(0.1500))
        .collect();

    let mut ticks = Vec::new();
    let mut bar_index = 0u64;
    for d in 0..days {
        let day = start_day + Days::new(u64::from(d));
        let midnight = day.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();
        for b in 0..bars_per_day {
            let step = if (bar_index / 12) % 2 == 0 {
                dec!(0.0003)
            } else {
                dec!(-0.0003)
            };
            let mut bars = BTreeMap::new();
            for (i, pair) in pairs.iter().enumerate() {
                bases[i] += step;
                let close = bases[i];
                bars.insert(
                    pair.clone(),
                    BarSnapshot {
                        high: close + dec!(0.0005),
                        low: close - dec!(0.0005),
                        close,
                    },
                );
            }
            ticks.push(TickEvent {
                bar_index,
                day,
                timestamp: midnight + Duration::minutes((b * 5) as i64),
                bars,
            });
            bar_index += 1;
        }
    }
    ticks
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = load_config()?;
    info!(
        pairs = ?config.pairs,
        risk_per_trade = %config.risk.risk_per_trade,
        daily_max_loss = %config.risk.daily_max_loss,
        max_open = config.engine.max_open_positions,
        "starting FX paper trading session"
    );

    let pairs: Vec<Instrument> = config.pairs.iter().map(Instrument::new).collect();
    let clock = ReplayTickSource::new(build_replay(
        &pairs,
        config.replay_days,
        config.bars_per_day,
    ));

    let signals = Arc::new(ScriptedSignals {
        atr: dec!(0.0010),
        warmup_bars: 14,
    });
    let sink = Arc::new(JsonlLedgerSink::create(&config.ledger_path)?);
    info!(ledger = %config.ledger_path.display(), "paper ledger ready");

    let engine = DecisionEngine::new(config.engine, config.risk, config.guards, signals, sink);
    let (session, shutdown) = TradingSession::new(engine, clock);

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received, finishing current tick");
            let _ = shutdown.send(true);
        }
    });

    let summary = session.run().await;
    info!(
        ticks = summary.ticks,
        opened = summary.opened,
        closed = summary.closed,
        final_equity = %summary.final_equity,
        "session complete"
    );

    Ok(())
}

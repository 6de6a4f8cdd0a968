//! Tick-driven session runner around the decision engine

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::market::{BarSnapshot, Instrument, TickSource};

use super::engine::{DecisionEngine, EngineStatus};

/// Summary returned when the tick stream ends
#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub ticks: u64,
    pub opened: usize,
    pub closed: usize,
    pub final_equity: Decimal,
}

/// Drives the engine one tick at a time.
///
/// Ticks never overlap: each is processed to completion before the next is
/// pulled from the source. The shutdown signal is only observed between
/// ticks, so an admitted tick always finishes its bookkeeping. Status and
/// latest-bar handles let surrounding tooling observe equity and the halt
/// flag without touching the engine.
pub struct TradingSession<C: TickSource> {
    engine: DecisionEngine,
    clock: C,
    status: Arc<RwLock<EngineStatus>>,
    latest_bars: Arc<DashMap<Instrument, BarSnapshot>>,
    shutdown: watch::Receiver<bool>,
}

impl<C: TickSource> TradingSession<C> {
    pub fn new(engine: DecisionEngine, clock: C) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Self {
            engine,
            clock,
            status: Arc::new(RwLock::new(EngineStatus::default())),
            latest_bars: Arc::new(DashMap::new()),
            shutdown: shutdown_rx,
        };
        (session, shutdown_tx)
    }

    /// Shared status snapshot, refreshed after every tick
    pub fn status_handle(&self) -> Arc<RwLock<EngineStatus>> {
        self.status.clone()
    }

    /// Most recent bar per instrument
    pub fn latest_bars(&self) -> Arc<DashMap<Instrument, BarSnapshot>> {
        self.latest_bars.clone()
    }

    pub async fn run(mut self) -> SessionSummary {
        let mut summary = SessionSummary::default();

        loop {
            if *self.shutdown.borrow() {
                info!("shutdown requested, ending session");
                break;
            }
            let Some(tick) = self.clock.next().await else {
                info!("tick stream exhausted, ending session");
                break;
            };

            for (instrument, bar) in &tick.bars {
                self.latest_bars.insert(instrument.clone(), *bar);
            }

            let report = self.engine.on_tick(&tick).await;
            summary.ticks += 1;
            summary.opened += report.opened.len();
            summary.closed += report.closed.len();

            let status = self.engine.status(tick.bar_index);
            info!(
                bar = tick.bar_index,
                equity = %status.equity,
                day_loss = %status.daily_loss_ratio,
                open = status.open_positions,
                halted = status.halted_for_day,
                "tick processed"
            );
            *self.status.write() = status;
        }

        summary.final_equity = self.engine.ledger().equity();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionSink, Instruction, SinkError};
    use crate::market::{ReplayTickSource, TickEvent};
    use crate::paper_trading::{EngineConfig, GuardsConfig, RiskConfig};
    use crate::signal::{Signal, SignalError, SignalProvider};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    struct NoSignals;

    #[async_trait::async_trait]
    impl SignalProvider for NoSignals {
        async fn get(
            &self,
            instrument: &Instrument,
            bar_index: u64,
        ) -> Result<Signal, SignalError> {
            Err(SignalError::DataUnavailable {
                instrument: instrument.to_string(),
                bar_index,
            })
        }
    }

    struct NullSink;

    #[async_trait::async_trait]
    impl ExecutionSink for NullSink {
        async fn submit(&self, _instruction: Instruction) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn ticks(n: u64) -> Vec<TickEvent> {
        (0..n)
            .map(|bar_index| {
                let mut bars = BTreeMap::new();
                bars.insert(
                    Instrument::new("EURUSD"),
                    BarSnapshot {
                        high: dec!(1.1005),
                        low: dec!(1.0995),
                        close: dec!(1.1000),
                    },
                );
                TickEvent {
                    bar_index,
                    day: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
                    timestamp: Utc::now(),
                    bars,
                }
            })
            .collect()
    }

    fn session(n: u64) -> (TradingSession<ReplayTickSource>, watch::Sender<bool>) {
        let engine = DecisionEngine::new(
            EngineConfig::default(),
            RiskConfig::default(),
            GuardsConfig::disabled(),
            Arc::new(NoSignals),
            Arc::new(NullSink),
        );
        TradingSession::new(engine, ReplayTickSource::new(ticks(n)))
    }

    #[tokio::test]
    async fn runs_to_stream_end() {
        let (session, _shutdown) = session(10);
        let status = session.status_handle();

        let summary = session.run().await;
        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.opened, 0);
        assert_eq!(summary.final_equity, dec!(10000));
        assert_eq!(status.read().bar_index, 9);
    }

    #[tokio::test]
    async fn shutdown_lands_between_ticks() {
        let (session, shutdown) = session(10);
        shutdown.send(true).unwrap();

        let summary = session.run().await;
        assert_eq!(summary.ticks, 0);
    }
}

//! Periodic expiry of reservations past their hold time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stock_store::StockStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::reservation::ReservationEngine;

/// Sweeper timing and batch size.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,

    /// Most reservations expired in one pass.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,

    /// Reservations resolved or extended by another path before the sweeper got the lock.
    pub skipped: usize,

    pub failed: usize,
}

/// Expires active reservations whose hold time has passed.
pub struct ExpirySweeper<S: StockStore> {
    engine: Arc<ReservationEngine<S>>,
    config: SweeperConfig,
}

impl<S: StockStore + 'static> ExpirySweeper<S> {
    pub fn new(engine: Arc<ReservationEngine<S>>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Runs one pass treating `now` as the current time.
    ///
    /// A reservation that fails to expire is logged and left for the next pass.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self
            .engine
            .expired_reservations(now, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for reservation in due {
            match self.engine.expire(reservation.id, now).await {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "Failed to expire reservation"
                    );
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps on every interval tick until the shutdown flag turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

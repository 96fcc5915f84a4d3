//! Low-stock alerting.
//!
//! Alerts are persisted through the store and move through
//! `PENDING → ACKNOWLEDGED → RESOLVED`. While a product has a PENDING alert
//! younger than the suppression window, no new alert is raised for it, so
//! a run of reservations at low stock produces one alert rather than one
//! per mutation. A periodic check re-evaluates every low entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stock_store::{
    AlertStatistics, AlertStatus, LowStockAlert, ProductId, StockLedgerEntry, StockStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::publisher::{EventPublisher, publish_best_effort};

pub use stock_store::AlertSeverity;

/// Alerting switches and timing.
#[derive(Debug, Clone, Copy)]
pub struct AlertConfig {
    /// When false, mutations and the periodic check raise nothing.
    /// Explicit checks still run.
    pub enabled: bool,
    pub suppression_window: chrono::Duration,
    pub check_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suppression_window: chrono::Duration::hours(24),
            check_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// What one global check did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCheckReport {
    pub checked: usize,
    pub raised: usize,
    pub suppressed: usize,
    pub failed: usize,
}

pub struct LowStockAlerts<S: StockStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    config: AlertConfig,
}

impl<S: StockStore> LowStockAlerts<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            config: AlertConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AlertConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Raises an alert after a mutation if the entry is low and nothing recent is pending.
    ///
    /// Never fails the caller: store errors are logged and dropped.
    pub async fn check(&self, entry: &StockLedgerEntry) -> Option<LowStockAlert> {
        if !self.config.enabled {
            return None;
        }
        match self.raise(entry, Utc::now()).await {
            Ok(alert) => alert,
            Err(e) => {
                tracing::warn!(
                    product_id = %entry.product_id,
                    error = %e,
                    "Low-stock check failed"
                );
                None
            }
        }
    }

    /// Evaluates one product on request.
    #[tracing::instrument(skip(self))]
    pub async fn check_product(&self, product_id: ProductId) -> Result<Option<LowStockAlert>> {
        let entry = self
            .store
            .get_entry(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))?;
        self.raise(&entry, Utc::now()).await
    }

    /// Evaluates every entry at or below its reorder level.
    #[tracing::instrument(skip(self))]
    pub async fn check_all(&self) -> Result<AlertCheckReport> {
        let now = Utc::now();
        let entries = self.store.low_stock_entries().await?;
        let mut report = AlertCheckReport {
            checked: entries.len(),
            ..AlertCheckReport::default()
        };

        for entry in &entries {
            match self.raise(entry, now).await {
                Ok(Some(_)) => report.raised += 1,
                Ok(None) => report.suppressed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        product_id = %entry.product_id,
                        error = %e,
                        "Low-stock check failed"
                    );
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            raised = report.raised,
            suppressed = report.suppressed,
            failed = report.failed,
            "Low-stock check finished"
        );
        Ok(report)
    }

    async fn raise(
        &self,
        entry: &StockLedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<LowStockAlert>> {
        let Some(alert) = LowStockAlert::evaluate(entry, now) else {
            return Ok(None);
        };

        let suppress_since = now
            .checked_sub_signed(self.config.suppression_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if !self.store.record_alert(&alert, suppress_since).await? {
            tracing::debug!(
                product_id = %alert.product_id,
                "Pending low-stock alert exists, not raising another"
            );
            metrics::counter!("low_stock_alerts_suppressed_total").increment(1);
            return Ok(None);
        }

        tracing::warn!(
            alert_id = %alert.id,
            product_id = %alert.product_id,
            available = alert.current_stock,
            reorder_level = alert.reorder_level,
            severity = %alert.severity,
            "Low stock"
        );
        metrics::counter!("low_stock_alerts_total", "severity" => alert.severity.as_str())
            .increment(1);

        publish_best_effort(
            self.publisher.as_ref(),
            &InventoryEvent::LowStockAlert((&alert).into()),
        )
        .await;
        Ok(Some(alert))
    }

    pub async fn get(&self, id: Uuid) -> Result<LowStockAlert> {
        self.store
            .get_alert(id)
            .await?
            .ok_or_else(|| InventoryError::AlertNotFound(id.to_string()))
    }

    /// Newest first.
    pub async fn list(
        &self,
        status: Option<AlertStatus>,
        product_id: Option<ProductId>,
    ) -> Result<Vec<LowStockAlert>> {
        Ok(self.store.list_alerts(status, product_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn acknowledge(&self, id: Uuid) -> Result<LowStockAlert> {
        self.transition(id, AlertStatus::Acknowledged).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: Uuid) -> Result<LowStockAlert> {
        self.transition(id, AlertStatus::Resolved).await
    }

    async fn transition(&self, id: Uuid, next: AlertStatus) -> Result<LowStockAlert> {
        let mut alert = self.get(id).await?;
        let from = alert.status;
        if !alert.transition(next, Utc::now()) {
            return Err(InventoryError::InvalidAlertTransition {
                alert_id: id,
                from,
                to: next,
            });
        }

        if !self.store.update_alert(&alert, from).await? {
            let current = self.get(id).await?;
            return Err(InventoryError::InvalidAlertTransition {
                alert_id: id,
                from: current.status,
                to: next,
            });
        }

        metrics::counter!("low_stock_alert_transitions_total", "status" => next.as_str())
            .increment(1);
        tracing::info!(alert_id = %id, from = %from, to = %next, "Low-stock alert updated");
        Ok(alert)
    }

    pub async fn statistics(&self) -> Result<AlertStatistics> {
        Ok(self.store.alert_statistics().await?)
    }
}

impl<S: StockStore + 'static> LowStockAlerts<S> {
    /// Runs [`LowStockAlerts::check_all`] on every interval tick until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Low-stock alerts disabled, periodic check not started");
            return;
        }

        let period = self.config.check_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Low-stock check started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_all().await {
                        tracing::error!(error = %e, "Low-stock check failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Low-stock check stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

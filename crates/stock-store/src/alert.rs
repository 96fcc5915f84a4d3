//! Persisted low-stock alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProductId, StockLedgerEntry};

/// How urgent a low-stock alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Nothing left to sell.
    Critical,
    Warning,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(AlertSeverity::Critical),
            "WARNING" => Ok(AlertSeverity::Warning),
            other => Err(format!("unknown alert severity '{other}'")),
        }
    }
}

/// Lifecycle of an alert.
///
/// ```text
/// Pending ──► Acknowledged ──► Resolved
///    └───────────────────────────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    /// Raised and not yet looked at. Suppresses new alerts for the product.
    #[default]
    Pending,
    Acknowledged,
    /// Closed (terminal state).
    Resolved,
}

impl AlertStatus {
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::Pending, AlertStatus::Acknowledged)
                | (AlertStatus::Pending, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "PENDING",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(AlertStatus::Pending),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// A low-stock alert raised for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub id: Uuid,
    pub product_id: ProductId,

    /// Available quantity when the alert was raised.
    pub current_stock: i64,
    pub reorder_level: i64,
    pub severity: AlertSeverity,
    pub suggested_reorder_quantity: i64,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LowStockAlert {
    /// Grades an entry, or returns `None` when stock is above the reorder level.
    ///
    /// Available 0 is CRITICAL; anything else at or below the reorder level is WARNING.
    pub fn evaluate(entry: &StockLedgerEntry, now: DateTime<Utc>) -> Option<Self> {
        if !entry.is_low_stock() {
            return None;
        }
        let available = entry.available_quantity();
        let severity = if available == 0 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };

        Some(Self {
            id: Uuid::new_v4(),
            product_id: entry.product_id,
            current_stock: available,
            reorder_level: entry.reorder_level,
            severity,
            suggested_reorder_quantity: entry.suggested_reorder_quantity(),
            message: format!(
                "Low stock alert: product {} has only {} items remaining",
                entry.product_id, available
            ),
            status: AlertStatus::Pending,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
        })
    }

    /// Moves the alert to `next`, stamping the matching timestamp.
    ///
    /// Returns false and leaves the alert unchanged when the move is not allowed.
    pub fn transition(&mut self, next: AlertStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            AlertStatus::Acknowledged => self.acknowledged_at = Some(at),
            AlertStatus::Resolved => self.resolved_at = Some(at),
            AlertStatus::Pending => {}
        }
        self.status = next;
        true
    }
}

/// Alert counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatistics {
    pub total: u64,
    pub pending: u64,
    pub acknowledged: u64,
    pub resolved: u64,
}

impl AlertStatistics {
    pub fn record(&mut self, status: AlertStatus, count: u64) {
        self.total += count;
        match status {
            AlertStatus::Pending => self.pending += count,
            AlertStatus::Acknowledged => self.acknowledged += count,
            AlertStatus::Resolved => self.resolved += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(quantity: i64, reserved: i64) -> StockLedgerEntry {
        let mut e = StockLedgerEntry::new(ProductId::new(5), quantity, 10, 100);
        e.reserve(reserved).unwrap();
        e
    }

    #[test]
    fn no_alert_above_reorder_level() {
        assert!(LowStockAlert::evaluate(&entry(20, 5), Utc::now()).is_none());
    }

    #[test]
    fn warning_at_reorder_level() {
        let alert = LowStockAlert::evaluate(&entry(20, 10), Utc::now()).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.current_stock, 10);
        assert_eq!(alert.suggested_reorder_quantity, 80);
        assert_eq!(alert.status, AlertStatus::Pending);
        assert!(alert.message.contains("only 10 items"));
    }

    #[test]
    fn critical_when_nothing_available() {
        let alert = LowStockAlert::evaluate(&entry(7, 7), Utc::now()).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn lifecycle_transitions() {
        let now = Utc::now();
        let mut alert = LowStockAlert::evaluate(&entry(3, 0), now).unwrap();

        assert!(alert.transition(AlertStatus::Acknowledged, now));
        assert_eq!(alert.acknowledged_at, Some(now));
        assert!(!alert.transition(AlertStatus::Acknowledged, now));
        assert!(!alert.transition(AlertStatus::Pending, now));

        assert!(alert.transition(AlertStatus::Resolved, now));
        assert_eq!(alert.resolved_at, Some(now));
        assert!(!alert.transition(AlertStatus::Acknowledged, now));
        assert_eq!(alert.status, AlertStatus::Resolved);
    }

    #[test]
    fn pending_alert_can_be_resolved_directly() {
        let now = Utc::now();
        let mut alert = LowStockAlert::evaluate(&entry(0, 0), now).unwrap();
        assert!(alert.transition(AlertStatus::Resolved, now));
        assert!(alert.acknowledged_at.is_none());
    }

    #[test]
    fn status_parsing() {
        assert_eq!(
            "acknowledged".parse::<AlertStatus>().unwrap(),
            AlertStatus::Acknowledged
        );
        assert!("LOST".parse::<AlertStatus>().is_err());
        assert_eq!("CRITICAL".parse::<AlertSeverity>().unwrap(), AlertSeverity::Critical);
    }
}

//! Dead-letter queue for events that could not be applied.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::InboundEvent;

/// Lifecycle of a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterStatus {
    /// Waiting for an operator.
    Pending,
    /// Replayed successfully.
    Resolved,
    /// Dropped by an operator.
    Discarded,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterStatus::Pending => "PENDING",
            DeadLetterStatus::Resolved => "RESOLVED",
            DeadLetterStatus::Discarded => "DISCARDED",
        }
    }
}

impl std::str::FromStr for DeadLetterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeadLetterStatus::Pending),
            "RESOLVED" => Ok(DeadLetterStatus::Resolved),
            "DISCARDED" => Ok(DeadLetterStatus::Discarded),
            other => Err(format!("unknown dead letter status '{other}'")),
        }
    }
}

/// A failed event with metadata about the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub event: InboundEvent,

    /// Error message of the last failure.
    pub error_message: String,

    /// Handler runs so far, across deliveries and replays.
    pub attempts: usize,

    pub status: DeadLetterStatus,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Bounded in-memory dead-letter queue.
///
/// When full, the oldest resolved or discarded entry makes room. Pending
/// entries are never evicted: if every entry is pending the queue grows
/// past `max_size` and reports the overflow.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    max_size: usize,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    /// Adds a failed event and returns its dead-letter id.
    pub fn push(&self, event: InboundEvent, error_message: String, attempts: usize) -> Uuid {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if entries.len() >= self.max_size {
            match entries
                .iter()
                .position(|e| e.status != DeadLetterStatus::Pending)
            {
                Some(index) => {
                    entries.remove(index);
                    metrics::counter!("dead_letters_evicted_total").increment(1);
                    tracing::debug!(max_size = self.max_size, "Evicted oldest closed dead letter");
                }
                None => {
                    metrics::counter!("dead_letters_over_capacity_total").increment(1);
                    tracing::error!(
                        max_size = self.max_size,
                        len = entries.len(),
                        "Dead-letter queue full of pending entries, keeping all of them"
                    );
                }
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        tracing::warn!(
            dead_letter_id = %id,
            event_type = %event.event_type,
            attempts,
            error = %error_message,
            "Event dead-lettered"
        );
        entries.push_back(DeadLetter {
            id,
            event,
            error_message,
            attempts,
            status: DeadLetterStatus::Pending,
            first_failed_at: now,
            last_failed_at: now,
            resolved_at: None,
        });

        metrics::counter!("saga_events_dead_lettered_total").increment(1);
        metrics::gauge!("dead_letters_pending").set(
            entries
                .iter()
                .filter(|e| e.status == DeadLetterStatus::Pending)
                .count() as f64,
        );
        id
    }

    /// Lists entries oldest first, optionally filtered by status.
    pub fn list(&self, status: Option<DeadLetterStatus>) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.list(Some(DeadLetterStatus::Pending)).len()
    }

    /// Moves a pending entry to `status`. Returns the updated entry, or
    /// `None` if it does not exist or is no longer pending.
    pub fn resolve(&self, id: Uuid, status: DeadLetterStatus) -> Option<DeadLetter> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id && e.status == DeadLetterStatus::Pending)?;
        entry.status = status;
        entry.resolved_at = Some(Utc::now());
        Some(entry.clone())
    }

    /// Records another failed attempt on a pending entry.
    pub fn record_failure(&self, id: Uuid, error_message: String, attempts: usize) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.error_message = error_message;
            entry.attempts += attempts;
            entry.last_failed_at = Utc::now();
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

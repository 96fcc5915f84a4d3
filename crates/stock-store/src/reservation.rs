//! Reservation record and its state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, ProductId, ReservationId};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Committed
///          ├──► Released
///          └──► Expired
/// ```
/// Every terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Stock is held and counts towards the ledger's reserved quantity.
    #[default]
    Active,

    /// Stock was permanently deducted (terminal state).
    Committed,

    /// Stock was returned to the available pool on request (terminal state).
    Released,

    /// Stock was returned to the available pool by the expiry sweep (terminal state).
    Expired,
}

impl ReservationStatus {
    pub fn can_commit(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn can_expire(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ReservationStatus::Active),
            "COMMITTED" => Ok(ReservationStatus::Committed),
            "RELEASED" => Ok(ReservationStatus::Released),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(format!("unknown reservation status '{other}'")),
        }
    }
}

/// Why a reservation was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationType {
    #[default]
    Checkout,
    Hold,
    Admin,
}

impl ReservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationType::Checkout => "CHECKOUT",
            ReservationType::Hold => "HOLD",
            ReservationType::Admin => "ADMIN",
        }
    }

    /// Parses a reservation type, falling back to `Checkout` for unknown input.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOLD" => ReservationType::Hold,
            "ADMIN" => ReservationType::Admin,
            _ => ReservationType::Checkout,
        }
    }
}

impl std::fmt::Display for ReservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who holds a reservation: a signed-in user, an anonymous cart session, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOwner {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ReservationOwner {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id: None,
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            session_id: Some(session_id.into()),
        }
    }
}

/// Rejected state change on a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
}

/// A time-bounded claim on stock tied to one order and one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub quantity: i64,
    pub reservation_type: ReservationType,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates a new active reservation.
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        owner: ReservationOwner,
        reservation_type: ReservationType,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::new(),
            product_id,
            order_id,
            user_id: owner.user_id,
            session_id: owner.session_id,
            quantity,
            reservation_type,
            status: ReservationStatus::Active,
            expires_at,
            is_expired: false,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// The user id if present, otherwise the session id.
    pub fn reserved_by(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.session_id.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry; zero once the expiry time has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Moves an active reservation into a terminal state.
    pub fn transition(
        &mut self,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        let allowed = match to {
            ReservationStatus::Committed => self.status.can_commit(),
            ReservationStatus::Released => self.status.can_release(),
            ReservationStatus::Expired => self.status.can_expire(),
            ReservationStatus::Active => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.is_expired = to == ReservationStatus::Expired;
        self.updated_at = now;
        self.resolved_at = Some(now);
        Ok(())
    }
}

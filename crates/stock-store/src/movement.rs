use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProductId;

/// Kind of stock movement recorded in the movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Inbound,
    Outbound,
    Reserved,
    ReservationReleased,
    Adjustment,
    Transfer,
}

impl MovementType {
    /// Returns true if the movement changes the owned quantity.
    ///
    /// Reservation movements only shift units between the available and
    /// reserved pools.
    pub fn affects_quantity(&self) -> bool {
        !matches!(
            self,
            MovementType::Reserved | MovementType::ReservationReleased
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
            MovementType::Reserved => "RESERVED",
            MovementType::ReservationReleased => "RESERVATION_RELEASED",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Transfer => "TRANSFER",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INBOUND" => Ok(MovementType::Inbound),
            "OUTBOUND" => Ok(MovementType::Outbound),
            "RESERVED" => Ok(MovementType::Reserved),
            "RESERVATION_RELEASED" => Ok(MovementType::ReservationReleased),
            "ADJUSTMENT" => Ok(MovementType::Adjustment),
            "TRANSFER" => Ok(MovementType::Transfer),
            other => Err(format!("unknown movement type '{other}'")),
        }
    }
}

/// What the `reference_id` of a movement points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Order,
    Admin,
    System,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Order => "ORDER",
            ReferenceType::Admin => "ADMIN",
            ReferenceType::System => "SYSTEM",
        }
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER" => Ok(ReferenceType::Order),
            "ADMIN" => Ok(ReferenceType::Admin),
            "SYSTEM" => Ok(ReferenceType::System),
            other => Err(format!("unknown reference type '{other}'")),
        }
    }
}

/// One write-once entry of the movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub product_id: ProductId,
    pub quantity_change: i64,
    pub movement_type: MovementType,
    pub reference_id: Option<String>,
    pub reference_type: Option<ReferenceType>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub performed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MovementRecord {
    /// Starts a movement record; the remaining fields are set with the chained setters.
    pub fn new(product_id: ProductId, movement_type: MovementType, quantity_change: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity_change,
            movement_type,
            reference_id: None,
            reference_type: None,
            reason: None,
            notes: None,
            performed_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn reference(mut self, reference_type: ReferenceType, id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type);
        self.reference_id = Some(id.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn performed_by(mut self, who: impl Into<String>) -> Self {
        self.performed_by = Some(who.into());
        self
    }

    /// The change this movement contributes to the owned quantity.
    pub fn quantity_effect(&self) -> i64 {
        if self.movement_type.affects_quantity() {
            self.quantity_change
        } else {
            0
        }
    }
}

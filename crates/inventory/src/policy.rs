//! Reservation hold times.

use chrono::{DateTime, Duration, Utc};
use stock_store::Reservation;

/// Hold time rules applied when reserving and extending.
#[derive(Debug, Clone, Copy)]
pub struct ReservationPolicy {
    /// Hold time used when the caller asks for none, or for a non-positive one.
    pub default_ttl: Duration,
    /// Longest hold measured from creation, including extensions.
    pub max_ttl: Duration,
    /// Extension is only allowed when less than this much time remains.
    pub extension_window: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(15),
            max_ttl: Duration::minutes(60),
            extension_window: Duration::minutes(60),
        }
    }
}

impl ReservationPolicy {
    /// Clamps a requested hold time into the allowed range.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(ttl) if ttl > Duration::zero() => ttl.min(self.max_ttl),
            _ => self.default_ttl,
        }
    }

    pub fn expiry_for(&self, requested: Option<Duration>, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.effective_ttl(requested))
    }

    /// Computes the new expiry of an extended hold, or the reason it is refused.
    pub fn extended_expiry(
        &self,
        reservation: &Reservation,
        additional: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, String> {
        if !reservation.is_active() {
            return Err(format!("reservation is {}", reservation.status));
        }
        if reservation.is_expired || reservation.is_past_expiry(now) {
            return Err("reservation has expired".to_string());
        }
        if additional <= Duration::zero() {
            return Err("extension must be positive".to_string());
        }
        if reservation.remaining(now) >= self.extension_window {
            return Err("remaining hold time is above the extension window".to_string());
        }

        let cap = saturating_add(reservation.created_at, self.max_ttl);
        let extended = saturating_add(reservation.expires_at, additional).min(cap);
        if extended <= reservation.expires_at {
            return Err("maximum hold time reached".to_string());
        }
        Ok(extended)
    }
}

fn saturating_add(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_store::{OrderId, ProductId, ReservationOwner, ReservationStatus, ReservationType};

    fn reservation(ttl: Duration) -> Reservation {
        Reservation::new(
            OrderId::new(),
            ProductId::new(1),
            1,
            ReservationOwner::default(),
            ReservationType::Checkout,
            Utc::now() + ttl,
        )
    }

    #[test]
    fn ttl_defaults_and_clamps() {
        let policy = ReservationPolicy::default();
        assert_eq!(policy.effective_ttl(None), Duration::minutes(15));
        assert_eq!(policy.effective_ttl(Some(Duration::zero())), Duration::minutes(15));
        assert_eq!(policy.effective_ttl(Some(Duration::minutes(-3))), Duration::minutes(15));
        assert_eq!(policy.effective_ttl(Some(Duration::minutes(5))), Duration::minutes(5));
        assert_eq!(policy.effective_ttl(Some(Duration::hours(5))), Duration::minutes(60));
        assert_eq!(policy.effective_ttl(Some(Duration::seconds(1))), Duration::seconds(1));
    }

    #[test]
    fn extension_is_capped_at_max_ttl_from_creation() {
        let policy = ReservationPolicy::default();
        let r = reservation(Duration::minutes(15));
        let extended = policy
            .extended_expiry(&r, Duration::hours(2), Utc::now())
            .unwrap();
        assert_eq!(extended, r.created_at + Duration::minutes(60));
    }

    #[test]
    fn extension_refused_once_expired() {
        let policy = ReservationPolicy::default();
        let mut r = reservation(Duration::minutes(15));
        r.expires_at = Utc::now() - Duration::seconds(1);
        assert!(
            policy
                .extended_expiry(&r, Duration::minutes(5), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn extension_refused_for_resolved_reservation() {
        let policy = ReservationPolicy::default();
        let mut r = reservation(Duration::minutes(15));
        r.transition(ReservationStatus::Committed, Utc::now()).unwrap();
        let err = policy
            .extended_expiry(&r, Duration::minutes(5), Utc::now())
            .unwrap_err();
        assert!(err.contains("COMMITTED"));
    }

    #[test]
    fn extension_refused_outside_window() {
        let policy = ReservationPolicy {
            extension_window: Duration::minutes(10),
            ..ReservationPolicy::default()
        };
        let r = reservation(Duration::minutes(15));
        assert!(
            policy
                .extended_expiry(&r, Duration::minutes(5), Utc::now())
                .is_err()
        );
    }

    #[test]
    fn huge_extension_is_capped_instead_of_overflowing() {
        let policy = ReservationPolicy::default();
        let r = reservation(Duration::minutes(15));
        let extended = policy
            .extended_expiry(&r, Duration::MAX, Utc::now())
            .unwrap();
        assert_eq!(extended, r.created_at + Duration::minutes(60));
    }

    #[test]
    fn huge_max_ttl_does_not_overflow_expiry() {
        let policy = ReservationPolicy {
            max_ttl: Duration::MAX,
            ..ReservationPolicy::default()
        };
        let now = Utc::now();
        assert_eq!(
            policy.expiry_for(Some(Duration::MAX), now),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn extension_refused_at_cap() {
        let policy = ReservationPolicy::default();
        let mut r = reservation(Duration::minutes(15));
        r.expires_at = r.created_at + Duration::minutes(60);
        assert_eq!(
            policy
                .extended_expiry(&r, Duration::minutes(5), Utc::now())
                .unwrap_err(),
            "maximum hold time reached"
        );
    }
}

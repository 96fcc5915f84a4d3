use chrono::{DateTime, Utc};

use crate::{MovementType, ProductId};

/// Builder for movement log queries.
///
/// Filters combine with AND; `movement_types` matches any of the listed types.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    pub product_id: Option<ProductId>,
    pub movement_types: Option<Vec<MovementType>>,
    pub reference_id: Option<String>,
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl MovementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one product's movements.
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    /// Creates a query for movements referencing an order or admin action.
    pub fn for_reference(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            ..Default::default()
        }
    }

    pub fn product_id(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_types = Some(vec![movement_type]);
        self
    }

    pub fn movement_types(mut self, movement_types: Vec<MovementType>) -> Self {
        self.movement_types = Some(movement_types);
        self
    }

    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the movement passes every filter except paging.
    pub fn matches(&self, movement: &crate::MovementRecord) -> bool {
        if let Some(id) = self.product_id
            && movement.product_id != id
        {
            return false;
        }
        if let Some(ref types) = self.movement_types
            && !types.contains(&movement.movement_type)
        {
            return false;
        }
        if let Some(ref reference) = self.reference_id
            && movement.reference_id.as_ref() != Some(reference)
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && movement.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && movement.created_at > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MovementRecord;

    #[test]
    fn query_builder_chain() {
        let query = MovementQuery::for_product(ProductId::new(3))
            .movement_type(MovementType::Outbound)
            .limit(20)
            .offset(40);

        assert_eq!(query.product_id, Some(ProductId::new(3)));
        assert_eq!(query.movement_types, Some(vec![MovementType::Outbound]));
        assert_eq!(query.limit, Some(20));
        assert_eq!(query.offset, Some(40));
    }

    #[test]
    fn matches_applies_all_filters() {
        let movement = MovementRecord::new(ProductId::new(3), MovementType::Outbound, -2)
            .reference(crate::ReferenceType::Order, "order-1");

        assert!(MovementQuery::for_product(ProductId::new(3)).matches(&movement));
        assert!(!MovementQuery::for_product(ProductId::new(4)).matches(&movement));
        assert!(MovementQuery::for_reference("order-1").matches(&movement));
        assert!(
            !MovementQuery::new()
                .movement_type(MovementType::Inbound)
                .matches(&movement)
        );
    }
}

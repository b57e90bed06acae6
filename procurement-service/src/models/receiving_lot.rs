//! Receiving lot model for procurement-service.

use crate::costing::CostingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A lot-tracked physical receipt against a purchase order line. Created and
/// owned by the receiving subsystem; this core only writes the cost fields
/// and the finalize flag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReceivingLot {
    pub receiving_item_id: Uuid,
    pub tenant_id: Uuid,
    pub po_line_id: Uuid,
    pub lot_number: String,
    pub quantity_received: Decimal,
    pub cost_finalized: bool,
    pub landed_cost_per_unit: Option<Decimal>,
    pub cost_finalized_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl ReceivingLot {
    /// Reject cost writes once the lot cost has been finalized, regardless of
    /// which invoice initiates the write.
    pub fn ensure_cost_mutable(&self) -> Result<(), CostingError> {
        if self.cost_finalized {
            return Err(CostingError::LotCostLocked {
                lot_id: self.receiving_item_id,
            });
        }
        Ok(())
    }
}

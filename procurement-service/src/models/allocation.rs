//! Landed cost allocation model for procurement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Output of the allocation engine: one row per (invoice, receiving lot)
/// pair. Fully replaced on every engine run; permanent once the owning
/// invoice is closed and the lot cost is locked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LandedCostAllocation {
    pub allocation_id: Uuid,
    pub invoice_id: Uuid,
    pub receiving_item_id: Uuid,
    pub tenant_id: Uuid,
    pub quantity_in_base_unit: Decimal,
    pub material_cost: Decimal,
    pub freight_allocated: Decimal,
    pub duty_allocated: Decimal,
    pub other_costs_allocated: Decimal,
    pub total_landed_cost: Decimal,
    /// None for a zero-quantity lot: per-unit cost is undefined, not infinite.
    pub cost_per_base_unit: Option<Decimal>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

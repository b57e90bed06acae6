//! Freight link model for procurement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Association from a freight-type invoice into a material invoice's
/// allocation pool. A freight invoice can feed at most one pool at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FreightLink {
    pub link_id: Uuid,
    pub material_invoice_id: Uuid,
    pub freight_invoice_id: Uuid,
    pub tenant_id: Uuid,
    /// Portion of the freight invoice attributed to this pool. NULL means the
    /// freight invoice's full total_amount.
    pub allocation_amount: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

/// Input for linking a freight invoice.
#[derive(Debug, Clone)]
pub struct CreateFreightLink {
    pub tenant_id: Uuid,
    pub material_invoice_id: Uuid,
    pub freight_invoice_id: Uuid,
    pub allocation_amount: Option<Decimal>,
}

/// A freight link resolved against the linked invoice's total, as consumed by
/// the cost aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FreightContribution {
    pub freight_invoice_id: Uuid,
    pub allocation_amount: Option<Decimal>,
    pub total_amount: Decimal,
}

impl FreightContribution {
    /// Amount this link contributes to the freight bucket.
    pub fn amount(&self) -> Decimal {
        self.allocation_amount.unwrap_or(self.total_amount)
    }
}

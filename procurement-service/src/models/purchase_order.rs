//! Purchase order line model for procurement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One ordered material quantity on a purchase order. Owned by the purchasing
/// subsystem; this core reads it to gate invoicing and to weight allocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseOrderLine {
    pub po_line_id: Uuid,
    pub tenant_id: Uuid,
    pub po_number: String,
    pub material_id: Uuid,
    pub material_name: String,
    pub quantity_ordered: Decimal,
    pub quantity_received: Decimal,
    pub unit_cost: Decimal,
    pub purchase_unit: String,
    pub usage_unit: String,
    /// Conversion factor from purchase unit to usage/base unit. NULL means 1.
    pub usage_unit_conversion: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

/// Purchase order line together with its remaining invoiceable quantity.
/// Lines with zero remainder are filtered out of invoiceable listings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceablePoLine {
    pub po_line_id: Uuid,
    pub po_number: String,
    pub material_id: Uuid,
    pub material_name: String,
    pub quantity_ordered: Decimal,
    pub quantity_received: Decimal,
    pub unit_cost: Decimal,
    pub remaining_invoiceable: Decimal,
}

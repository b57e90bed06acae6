//! Invoice line item model for procurement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Line item on a material invoice, referencing a purchase order line and,
/// once receiving is matched, a physical receiving lot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub po_line_id: Uuid,
    pub receiving_item_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
    pub voided: bool,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a line item.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub po_line_id: Uuid,
    pub receiving_item_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub created_by: Option<Uuid>,
}

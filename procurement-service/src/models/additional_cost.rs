//! Additional cost model for procurement-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Type of an additional cost record. Determines which allocation bucket the
/// amount feeds: duty and tax join the duty bucket, other stands alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    Duty,
    Tax,
    Other,
}

impl CostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Duty => "duty",
            CostType::Tax => "tax",
            CostType::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "duty" => CostType::Duty,
            "tax" => CostType::Tax,
            _ => CostType::Other,
        }
    }
}

/// An indirect cost attached directly to a material invoice. Purely additive
/// into the allocation pool.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdditionalCost {
    pub cost_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub cost_type: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for attaching an additional cost.
#[derive(Debug, Clone)]
pub struct CreateAdditionalCost {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub cost_type: CostType,
    pub amount: Decimal,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
}

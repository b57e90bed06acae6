//! Invoice model for procurement-service.

use crate::costing::CostingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Material,
    Freight,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Material => "material",
            InvoiceType::Freight => "freight",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "freight" => InvoiceType::Freight,
            _ => InvoiceType::Material,
        }
    }
}

/// Approval status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::Pending,
        }
    }
}

/// Finalization status of an invoice. `Closed` is monotonic: once set it is
/// never reverted, and the invoice becomes read-only for cost-bearing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationStatus {
    Incomplete,
    ReadyToClose,
    Closed,
}

impl FinalizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationStatus::Incomplete => "incomplete",
            FinalizationStatus::ReadyToClose => "ready_to_close",
            FinalizationStatus::Closed => "closed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "ready_to_close" => FinalizationStatus::ReadyToClose,
            "closed" => FinalizationStatus::Closed,
            _ => FinalizationStatus::Incomplete,
        }
    }
}

/// Purchase invoice document.
///
/// Header amounts (`subtotal`, `tax_amount`, `freight_amount`, `total_amount`)
/// come from the supplier's bill as entered; they are inputs to cost
/// allocation, never derived from line items.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub freight_amount: Decimal,
    pub total_amount: Decimal,
    pub approval_status: String,
    pub finalization_status: String,
    pub receiving_complete: bool,
    pub freight_complete: bool,
    pub freight_complete_by: Option<Uuid>,
    pub freight_complete_utc: Option<DateTime<Utc>>,
    pub financials_complete: bool,
    pub financials_complete_by: Option<Uuid>,
    pub financials_complete_utc: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn is_closed(&self) -> bool {
        FinalizationStatus::from_string(&self.finalization_status) == FinalizationStatus::Closed
    }

    pub fn is_approved(&self) -> bool {
        ApprovalStatus::from_string(&self.approval_status) == ApprovalStatus::Approved
    }

    /// Reject any cost-bearing mutation once the invoice is closed.
    pub fn ensure_mutable(&self) -> Result<(), CostingError> {
        if self.is_closed() {
            return Err(CostingError::InvoiceClosed {
                invoice_id: self.invoice_id,
            });
        }
        Ok(())
    }

    /// Submit may not quietly revoke an existing approval; approval is
    /// reversed only by an explicit reject.
    pub fn ensure_submittable(&self) -> Result<(), CostingError> {
        self.ensure_mutable()?;
        if self.is_approved() {
            return Err(CostingError::AlreadyApproved {
                invoice_id: self.invoice_id,
            });
        }
        Ok(())
    }
}

/// Which operator attestation is being recorded on the close checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationKind {
    Freight,
    Financials,
}

impl AttestationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationKind::Freight => "freight",
            AttestationKind::Financials => "financials",
        }
    }
}

/// Two-phase outcome of a close: the close itself commits even when some lot
/// locks fail, so callers see the partial-failure state explicitly instead of
/// a log line.
#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub invoice: Invoice,
    pub lock_failures: Vec<Uuid>,
    pub already_closed: bool,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub freight_amount: Decimal,
    pub total_amount: Decimal,
    pub created_by: Option<Uuid>,
}

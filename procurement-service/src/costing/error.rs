//! Domain error taxonomy for the landed-cost core.
//!
//! Every rejection names the violated invariant and the identifiers needed to
//! correct it; none of these are transient, so none are retried.

use crate::costing::checklist::ChecklistItem;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostingError {
    #[error(
        "Requested quantity {requested} exceeds the remaining invoiceable quantity {remaining} on purchase order line {po_line_id}"
    )]
    OverInvoice {
        po_line_id: Uuid,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Close checklist incomplete: {}", failed_list(.failed))]
    ChecklistIncomplete { failed: Vec<ChecklistItem> },

    #[error("Invoice {invoice_id} is closed; its costs are frozen")]
    InvoiceClosed { invoice_id: Uuid },

    #[error("Invoice {invoice_id} is already approved; approval is reversed only by reject")]
    AlreadyApproved { invoice_id: Uuid },

    #[error("Receiving lot {lot_id} has a finalized cost and cannot be modified")]
    LotCostLocked { lot_id: Uuid },

    #[error("Line item {line_item_id} cannot be resolved to a single receiving lot")]
    UnresolvedReceiving { line_item_id: Uuid },

    #[error("Freight invoice {freight_invoice_id} is already linked to another material invoice")]
    FreightLinkTaken { freight_invoice_id: Uuid },

    #[error("Receiving lot {lot_id} is already claimed by invoice {invoice_id}")]
    LotClaimed { lot_id: Uuid, invoice_id: Uuid },
}

fn failed_list(items: &[ChecklistItem]) -> String {
    items
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<CostingError> for AppError {
    fn from(err: CostingError) -> Self {
        match err {
            CostingError::OverInvoice { .. }
            | CostingError::InvoiceClosed { .. }
            | CostingError::AlreadyApproved { .. }
            | CostingError::LotCostLocked { .. }
            | CostingError::FreightLinkTaken { .. }
            | CostingError::LotClaimed { .. } => AppError::Conflict(anyhow::anyhow!("{}", err)),
            CostingError::ChecklistIncomplete { .. } | CostingError::UnresolvedReceiving { .. } => {
                AppError::FailedPrecondition(anyhow::anyhow!("{}", err))
            }
        }
    }
}

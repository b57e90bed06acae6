//! Close checklist for the finalization state machine.
//!
//! `close` is the only irreversible transition, so every precondition is
//! re-evaluated server-side at the instant of the call, whatever the caller's
//! UI showed. Failures name the specific unmet condition(s).

use crate::models::{Invoice, InvoiceLineItem};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// One precondition of the close transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItem {
    /// Every non-voided line item links to a physical receiving lot.
    ReceivingLinked,
    /// Freight cost attached, or the operator attested none applies.
    FreightConfirmed,
    /// Operator attested the financial figures are complete.
    FinancialsConfirmed,
    /// Invoice approval granted.
    Approved,
}

impl ChecklistItem {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistItem::ReceivingLinked => "receiving_linked",
            ChecklistItem::FreightConfirmed => "freight_confirmed",
            ChecklistItem::FinancialsConfirmed => "financials_confirmed",
            ChecklistItem::Approved => "approved",
        }
    }
}

impl fmt::Display for ChecklistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluated state of all close preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloseChecklist {
    pub receiving_linked: bool,
    pub freight_confirmed: bool,
    pub financials_confirmed: bool,
    pub approved: bool,
}

impl CloseChecklist {
    pub fn is_satisfied(&self) -> bool {
        self.receiving_linked && self.freight_confirmed && self.financials_confirmed && self.approved
    }

    /// The unmet preconditions, in checklist order.
    pub fn failed_items(&self) -> Vec<ChecklistItem> {
        let mut failed = Vec::new();
        if !self.receiving_linked {
            failed.push(ChecklistItem::ReceivingLinked);
        }
        if !self.freight_confirmed {
            failed.push(ChecklistItem::FreightConfirmed);
        }
        if !self.financials_confirmed {
            failed.push(ChecklistItem::FinancialsConfirmed);
        }
        if !self.approved {
            failed.push(ChecklistItem::Approved);
        }
        failed
    }
}

/// Evaluate the close checklist against the current invoice state.
///
/// `freight_bucket` is the aggregated freight amount (invoice field plus
/// linked freight): a positive bucket counts as freight being accounted for,
/// while a zero bucket requires the operator's explicit no-freight
/// attestation.
pub fn evaluate_checklist(
    invoice: &Invoice,
    lines: &[InvoiceLineItem],
    freight_bucket: Decimal,
) -> CloseChecklist {
    let active: Vec<&InvoiceLineItem> = lines.iter().filter(|l| !l.voided).collect();
    let receiving_linked =
        !active.is_empty() && active.iter().all(|l| l.receiving_item_id.is_some());

    CloseChecklist {
        receiving_linked,
        freight_confirmed: invoice.freight_complete || freight_bucket > Decimal::ZERO,
        financials_confirmed: invoice.financials_complete,
        approved: invoice.is_approved(),
    }
}

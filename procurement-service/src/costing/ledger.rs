//! Invoice line ledger arithmetic.
//!
//! The ledger is not a counter: the invoiced total is always re-aggregated
//! from the non-voided line items that exist, so it can never drift from
//! them. The database layer supplies the aggregate; the enforcement rule
//! lives here.

use crate::costing::CostingError;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Maximum quantity still invoiceable against a purchase order line.
pub fn remaining_invoiceable(quantity_received: Decimal, already_invoiced: Decimal) -> Decimal {
    let remaining = quantity_received - already_invoiced;
    if remaining < Decimal::ZERO {
        Decimal::ZERO
    } else {
        remaining
    }
}

/// Gate a proposed line item quantity against the remaining invoiceable
/// amount. Over-invoicing is rejected, never clamped.
pub fn check_invoiceable(
    po_line_id: Uuid,
    quantity_received: Decimal,
    already_invoiced: Decimal,
    requested: Decimal,
) -> Result<(), CostingError> {
    let remaining = remaining_invoiceable(quantity_received, already_invoiced);
    if requested > remaining {
        return Err(CostingError::OverInvoice {
            po_line_id,
            requested,
            remaining,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn remaining_is_received_minus_invoiced() {
        assert_eq!(remaining_invoiceable(d("100"), d("40")), d("60"));
    }

    #[test]
    fn remaining_never_negative() {
        // Historical data may already be over quantity_received.
        assert_eq!(remaining_invoiceable(d("100"), d("120")), Decimal::ZERO);
    }

    #[test]
    fn exact_remainder_is_allowed() {
        let id = Uuid::new_v4();
        assert!(check_invoiceable(id, d("100"), d("40"), d("60")).is_ok());
    }

    #[test]
    fn over_invoice_is_rejected_with_context() {
        let id = Uuid::new_v4();
        let err = check_invoiceable(id, d("100"), Decimal::ZERO, d("150")).unwrap_err();
        assert_eq!(
            err,
            CostingError::OverInvoice {
                po_line_id: id,
                requested: d("150"),
                remaining: d("100"),
            }
        );
    }

    #[test]
    fn zero_remaining_rejects_any_positive_quantity() {
        let id = Uuid::new_v4();
        assert!(check_invoiceable(id, d("100"), d("100"), d("0.01")).is_err());
    }
}

//! Cost aggregator: collects every cost input for one material invoice.
//!
//! Always recomputed from source records, both for display and as direct
//! input to the allocation engine. No cached running totals.

use crate::models::{AdditionalCost, CostType, FreightContribution, Invoice, InvoiceLineItem};
use rust_decimal::Decimal;
use serde::Serialize;

/// Aggregated cost inputs for one material invoice, bucketed so each
/// allocation output field traces to a named input bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostPool {
    /// Σ line_total over non-voided line items.
    pub material_total: Decimal,
    /// Invoice freight_amount plus linked freight contributions.
    pub freight: Decimal,
    /// Invoice tax_amount plus duty/tax typed additional costs.
    pub duty: Decimal,
    /// Other typed additional costs.
    pub other: Decimal,
}

impl CostPool {
    /// Total indirect cost to spread across the invoice's lots.
    pub fn total_costs_to_allocate(&self) -> Decimal {
        self.freight + self.duty + self.other
    }

    /// Material plus indirect: the conserved total of an allocation run.
    pub fn grand_total(&self) -> Decimal {
        self.material_total + self.total_costs_to_allocate()
    }
}

/// Aggregate all cost inputs for a material invoice.
pub fn aggregate_costs(
    invoice: &Invoice,
    lines: &[InvoiceLineItem],
    additional_costs: &[AdditionalCost],
    freight_links: &[FreightContribution],
) -> CostPool {
    let material_total: Decimal = lines
        .iter()
        .filter(|l| !l.voided)
        .map(|l| l.line_total)
        .sum();

    let linked_freight: Decimal = freight_links.iter().map(|f| f.amount()).sum();

    let mut duty = invoice.tax_amount;
    let mut other = Decimal::ZERO;
    for cost in additional_costs {
        match CostType::from_string(&cost.cost_type) {
            CostType::Duty | CostType::Tax => duty += cost.amount,
            CostType::Other => other += cost.amount,
        }
    }

    CostPool {
        material_total,
        freight: invoice.freight_amount + linked_freight,
        duty,
        other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn invoice(tax: &str, freight: &str) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            invoice_number: "INV-1001".to_string(),
            invoice_type: "material".to_string(),
            supplier_id: None,
            supplier_name: "Acme Materials".to_string(),
            subtotal: d("0"),
            tax_amount: d(tax),
            freight_amount: d(freight),
            total_amount: d("0"),
            approval_status: "pending".to_string(),
            finalization_status: "incomplete".to_string(),
            receiving_complete: false,
            freight_complete: false,
            freight_complete_by: None,
            freight_complete_utc: None,
            financials_complete: false,
            financials_complete_by: None,
            financials_complete_utc: None,
            closed_at: None,
            closed_by: None,
            created_by: None,
            created_utc: Utc::now(),
        }
    }

    fn line(total: &str, voided: bool) -> InvoiceLineItem {
        InvoiceLineItem {
            line_item_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            po_line_id: Uuid::new_v4(),
            receiving_item_id: None,
            quantity: d("1"),
            unit_cost: d(total),
            line_total: d(total),
            voided,
            created_by: None,
            created_utc: Utc::now(),
        }
    }

    fn additional(cost_type: &str, amount: &str) -> AdditionalCost {
        AdditionalCost {
            cost_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            cost_type: cost_type.to_string(),
            amount: d(amount),
            description: None,
            created_by: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn material_total_skips_voided_lines() {
        let pool = aggregate_costs(
            &invoice("0", "0"),
            &[line("100.00", false), line("50.00", true)],
            &[],
            &[],
        );
        assert_eq!(pool.material_total, d("100.00"));
    }

    #[test]
    fn buckets_split_by_cost_type() {
        let pool = aggregate_costs(
            &invoice("10.00", "25.00"),
            &[],
            &[
                additional("duty", "5.00"),
                additional("tax", "2.50"),
                additional("other", "7.00"),
            ],
            &[],
        );
        assert_eq!(pool.duty, d("17.50"));
        assert_eq!(pool.other, d("7.00"));
        assert_eq!(pool.freight, d("25.00"));
        assert_eq!(pool.total_costs_to_allocate(), d("49.50"));
    }

    #[test]
    fn freight_link_uses_allocation_amount_when_present() {
        let links = vec![
            FreightContribution {
                freight_invoice_id: Uuid::new_v4(),
                allocation_amount: Some(d("30.00")),
                total_amount: d("120.00"),
            },
            FreightContribution {
                freight_invoice_id: Uuid::new_v4(),
                allocation_amount: None,
                total_amount: d("45.00"),
            },
        ];
        let pool = aggregate_costs(&invoice("0", "5.00"), &[], &[], &links);
        assert_eq!(pool.freight, d("80.00"));
    }

    #[test]
    fn grand_total_is_material_plus_indirect() {
        let pool = aggregate_costs(
            &invoice("10.00", "40.00"),
            &[line("400.00", false)],
            &[additional("other", "2.00")],
            &[],
        );
        assert_eq!(pool.grand_total(), d("452.00"));
    }
}

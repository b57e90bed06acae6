//! Request and response shapes for the HTTP surface.

use crate::models::{
    AdditionalCost, CostType, FreightLink, Invoice, InvoiceLineItem, InvoiceType,
    LandedCostAllocation,
};
use crate::services::database::CostSummary;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Header amounts feed the allocation buckets directly; a negative one would
/// flow into negative allocation rows.
fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, max = 64))]
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub supplier_id: Option<Uuid>,
    #[validate(length(min = 1, max = 256))]
    pub supplier_name: String,
    #[validate(custom(function = "non_negative"))]
    pub subtotal: Decimal,
    #[serde(default)]
    #[validate(custom(function = "non_negative"))]
    pub tax_amount: Decimal,
    #[serde(default)]
    #[validate(custom(function = "non_negative"))]
    pub freight_amount: Decimal,
    #[validate(custom(function = "non_negative"))]
    pub total_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AddLineItemRequest {
    pub po_line_id: Uuid,
    pub receiving_item_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddCostRequest {
    pub cost_type: CostType,
    pub amount: Decimal,
    #[validate(length(max = 512))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddFreightLinkRequest {
    pub freight_invoice_id: Uuid,
    /// Portion of the freight invoice to allocate here; the full total when
    /// omitted.
    pub allocation_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AttestRequest {
    pub complete: bool,
}

/// Full invoice view: the document plus every cost input and the current
/// allocation snapshot.
#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
    pub additional_costs: Vec<AdditionalCost>,
    pub freight_links: Vec<FreightLink>,
    pub allocations: Vec<LandedCostAllocation>,
    pub cost_summary: CostSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn request() -> CreateInvoiceRequest {
        CreateInvoiceRequest {
            invoice_number: "INV-3001".to_string(),
            invoice_type: InvoiceType::Material,
            supplier_id: None,
            supplier_name: "Acme Materials".to_string(),
            subtotal: d("1000.00"),
            tax_amount: d("50.00"),
            freight_amount: d("25.00"),
            total_amount: d("1075.00"),
        }
    }

    #[test]
    fn header_amounts_may_be_zero() {
        let mut req = request();
        req.tax_amount = Decimal::ZERO;
        req.freight_amount = Decimal::ZERO;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn negative_tax_amount_is_rejected() {
        // A negative tax header would feed the duty bucket and come out as
        // negative allocation rows.
        let mut req = request();
        req.tax_amount = d("-50.00");
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("tax_amount"));
    }

    #[test]
    fn negative_subtotal_freight_and_total_are_rejected() {
        for field in ["subtotal", "freight_amount", "total_amount"] {
            let mut req = request();
            match field {
                "subtotal" => req.subtotal = d("-1.00"),
                "freight_amount" => req.freight_amount = d("-1.00"),
                _ => req.total_amount = d("-1.00"),
            }
            let errors = req.validate().unwrap_err();
            assert!(errors.field_errors().contains_key(field), "{field}");
        }
    }
}

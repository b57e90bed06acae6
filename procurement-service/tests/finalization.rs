//! Tests for the close checklist and the immutability guards around the
//! finalization state machine.

use chrono::Utc;
use procurement_service::costing::{
    ChecklistItem, CostingError, aggregate_costs, evaluate_checklist,
};
use procurement_service::models::{AdditionalCost, Invoice, InvoiceLineItem, ReceivingLot};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn invoice() -> Invoice {
    Invoice {
        invoice_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        invoice_number: "INV-2001".to_string(),
        invoice_type: "material".to_string(),
        supplier_id: None,
        supplier_name: "Acme Materials".to_string(),
        subtotal: d("1000.00"),
        tax_amount: d("0"),
        freight_amount: d("0"),
        total_amount: d("1000.00"),
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

fn linked_line(invoice_id: Uuid) -> InvoiceLineItem {
    InvoiceLineItem {
        line_item_id: Uuid::new_v4(),
        invoice_id,
        tenant_id: Uuid::new_v4(),
        po_line_id: Uuid::new_v4(),
        receiving_item_id: Some(Uuid::new_v4()),
        quantity: d("10"),
        unit_cost: d("100.00"),
        line_total: d("1000.00"),
        voided: false,
        created_by: None,
        created_utc: Utc::now(),
    }
}

#[test]
fn fully_attested_approved_invoice_is_closeable() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.freight_amount = d("25.00");
    inv.financials_complete = true;
    let lines = vec![linked_line(inv.invoice_id)];

    let checklist = evaluate_checklist(&inv, &lines, d("25.00"));
    assert!(checklist.is_satisfied());
    assert!(checklist.failed_items().is_empty());
}

#[test]
fn every_unmet_item_is_named() {
    let inv = invoice();
    let checklist = evaluate_checklist(&inv, &[], Decimal::ZERO);

    assert!(!checklist.is_satisfied());
    assert_eq!(
        checklist.failed_items(),
        vec![
            ChecklistItem::ReceivingLinked,
            ChecklistItem::FreightConfirmed,
            ChecklistItem::FinancialsConfirmed,
            ChecklistItem::Approved,
        ]
    );
}

#[test]
fn unlinked_line_blocks_receiving() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.financials_complete = true;

    let mut unlinked = linked_line(inv.invoice_id);
    unlinked.receiving_item_id = None;
    let lines = vec![linked_line(inv.invoice_id), unlinked];

    let checklist = evaluate_checklist(&inv, &lines, d("10.00"));
    assert_eq!(checklist.failed_items(), vec![ChecklistItem::ReceivingLinked]);
}

#[test]
fn voided_unlinked_line_does_not_block_receiving() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.financials_complete = true;

    let mut voided = linked_line(inv.invoice_id);
    voided.receiving_item_id = None;
    voided.voided = true;
    let lines = vec![linked_line(inv.invoice_id), voided];

    let checklist = evaluate_checklist(&inv, &lines, d("10.00"));
    assert!(checklist.receiving_linked);
}

#[test]
fn no_freight_requires_explicit_attestation() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.financials_complete = true;
    let lines = vec![linked_line(inv.invoice_id)];

    let without = evaluate_checklist(&inv, &lines, Decimal::ZERO);
    assert_eq!(without.failed_items(), vec![ChecklistItem::FreightConfirmed]);

    inv.freight_complete = true;
    let attested = evaluate_checklist(&inv, &lines, Decimal::ZERO);
    assert!(attested.is_satisfied());
}

#[test]
fn positive_freight_bucket_counts_as_confirmed() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.financials_complete = true;
    let lines = vec![linked_line(inv.invoice_id)];

    // Aggregated freight, not the operator flag, satisfies the item.
    let checklist = evaluate_checklist(&inv, &lines, d("0.01"));
    assert!(checklist.freight_confirmed);
}

#[test]
fn closed_invoice_rejects_cost_mutation() {
    let mut inv = invoice();
    inv.finalization_status = "closed".to_string();

    let err = inv.ensure_mutable().unwrap_err();
    assert_eq!(
        err,
        CostingError::InvoiceClosed {
            invoice_id: inv.invoice_id
        }
    );
}

#[test]
fn open_invoice_allows_mutation() {
    let inv = invoice();
    assert!(inv.ensure_mutable().is_ok());
}

#[test]
fn resubmitting_an_approved_invoice_is_rejected() {
    // Approval is reversed only by an explicit reject; submit must not
    // quietly demote an approved invoice back to pending.
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();

    let err = inv.ensure_submittable().unwrap_err();
    assert_eq!(
        err,
        CostingError::AlreadyApproved {
            invoice_id: inv.invoice_id
        }
    );
}

#[test]
fn pending_and_rejected_invoices_are_submittable() {
    let inv = invoice();
    assert!(inv.ensure_submittable().is_ok());

    let mut rejected = invoice();
    rejected.approval_status = "rejected".to_string();
    assert!(rejected.ensure_submittable().is_ok());
}

#[test]
fn closed_invoice_is_not_submittable() {
    let mut inv = invoice();
    inv.approval_status = "approved".to_string();
    inv.finalization_status = "closed".to_string();

    let err = inv.ensure_submittable().unwrap_err();
    assert_eq!(
        err,
        CostingError::InvoiceClosed {
            invoice_id: inv.invoice_id
        }
    );
}

#[test]
fn cost_locked_lot_rejects_cost_writes() {
    let lot = ReceivingLot {
        receiving_item_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        po_line_id: Uuid::new_v4(),
        lot_number: "LOT-7".to_string(),
        quantity_received: d("50"),
        cost_finalized: true,
        landed_cost_per_unit: Some(d("12.5000")),
        cost_finalized_utc: Some(Utc::now()),
        created_utc: Utc::now(),
    };

    let err = lot.ensure_cost_mutable().unwrap_err();
    assert_eq!(
        err,
        CostingError::LotCostLocked {
            lot_id: lot.receiving_item_id
        }
    );
}

#[test]
fn duty_and_tax_costs_share_the_duty_bucket() {
    let inv = invoice();
    let costs = vec![
        AdditionalCost {
            cost_id: Uuid::new_v4(),
            invoice_id: inv.invoice_id,
            tenant_id: inv.tenant_id,
            cost_type: "duty".to_string(),
            amount: d("15.00"),
            description: None,
            created_by: None,
            created_utc: Utc::now(),
        },
        AdditionalCost {
            cost_id: Uuid::new_v4(),
            invoice_id: inv.invoice_id,
            tenant_id: inv.tenant_id,
            cost_type: "tax".to_string(),
            amount: d("5.00"),
            description: None,
            created_by: None,
            created_utc: Utc::now(),
        },
    ];

    let pool = aggregate_costs(&inv, &[], &costs, &[]);
    assert_eq!(pool.duty, d("20.00"));
    assert_eq!(pool.other, Decimal::ZERO);
}

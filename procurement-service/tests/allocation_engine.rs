//! End-to-end tests for the landed-cost allocation engine: aggregation,
//! weighting, conservation and idempotence, driven through the same types the
//! service persists.

use procurement_service::costing::{
    AllocationInput, AllocationLine, CostPool, CostingError, allocate,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn line(lot: Uuid, quantity: &str, line_total: &str) -> AllocationLine {
    AllocationLine {
        line_item_id: Uuid::new_v4(),
        receiving_item_id: Some(lot),
        candidate_lots: vec![],
        quantity: d(quantity),
        line_total: d(line_total),
        usage_unit_conversion: None,
    }
}

fn pool(freight: &str, duty: &str, other: &str) -> CostPool {
    CostPool {
        material_total: Decimal::ZERO,
        freight: d(freight),
        duty: d(duty),
        other: d(other),
    }
}

#[test]
fn freight_splits_proportionally_to_usage_quantity() {
    let lot_a = Uuid::new_v4();
    let lot_b = Uuid::new_v4();

    let input = AllocationInput {
        lines: vec![line(lot_a, "100", "500.00"), line(lot_b, "300", "1500.00")],
        pool: pool("40.00", "0", "0"),
    };

    let rows = allocate(&input).unwrap();
    assert_eq!(rows.len(), 2);

    let a = rows.iter().find(|r| r.receiving_item_id == lot_a).unwrap();
    let b = rows.iter().find(|r| r.receiving_item_id == lot_b).unwrap();
    assert_eq!(a.freight_allocated, d("10.00"));
    assert_eq!(b.freight_allocated, d("30.00"));
}

#[test]
fn every_bucket_is_conserved_exactly() {
    let lots: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let input = AllocationInput {
        lines: vec![
            line(lots[0], "7", "70.00"),
            line(lots[1], "11", "110.00"),
            line(lots[2], "13", "130.00"),
        ],
        pool: pool("100.00", "33.33", "0.05"),
    };

    let rows = allocate(&input).unwrap();

    let freight: Decimal = rows.iter().map(|r| r.freight_allocated).sum();
    let duty: Decimal = rows.iter().map(|r| r.duty_allocated).sum();
    let other: Decimal = rows.iter().map(|r| r.other_costs_allocated).sum();
    assert_eq!(freight, d("100.00"));
    assert_eq!(duty, d("33.33"));
    assert_eq!(other, d("0.05"));

    let grand: Decimal = rows.iter().map(|r| r.total_landed_cost).sum();
    assert_eq!(grand, d("310.00") + d("100.00") + d("33.33") + d("0.05"));
}

#[test]
fn rerun_on_unchanged_input_is_identical() {
    let lots: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let input = AllocationInput {
        lines: vec![
            line(lots[0], "3", "30.00"),
            line(lots[1], "5", "50.00"),
            line(lots[2], "5", "50.00"),
            line(lots[3], "8", "80.00"),
        ],
        pool: pool("77.77", "12.34", "9.99"),
    };

    let first = allocate(&input).unwrap();
    let second = allocate(&input).unwrap();
    assert_eq!(first, second);
}

#[test]
fn usage_conversion_weights_override_purchase_quantity() {
    let lot_a = Uuid::new_v4();
    let lot_b = Uuid::new_v4();

    // Same purchase quantity, but lot A's material unpacks 4x into usage
    // units, so it carries 4x the freight.
    let mut line_a = line(lot_a, "10", "100.00");
    line_a.usage_unit_conversion = Some(d("4"));
    let line_b = line(lot_b, "10", "100.00");

    let input = AllocationInput {
        lines: vec![line_a, line_b],
        pool: pool("50.00", "0", "0"),
    };

    let rows = allocate(&input).unwrap();
    let a = rows.iter().find(|r| r.receiving_item_id == lot_a).unwrap();
    let b = rows.iter().find(|r| r.receiving_item_id == lot_b).unwrap();
    assert_eq!(a.quantity_in_base_unit, d("40"));
    assert_eq!(a.freight_allocated, d("40.00"));
    assert_eq!(b.freight_allocated, d("10.00"));
}

#[test]
fn multiple_lines_on_one_lot_merge_into_one_row() {
    let lot = Uuid::new_v4();
    let input = AllocationInput {
        lines: vec![line(lot, "10", "100.00"), line(lot, "20", "250.00")],
        pool: pool("30.00", "0", "0"),
    };

    let rows = allocate(&input).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity_in_base_unit, d("30"));
    assert_eq!(rows[0].material_cost, d("350.00"));
    assert_eq!(rows[0].freight_allocated, d("30.00"));
}

#[test]
fn zero_quantity_lot_gets_no_cost_and_no_per_unit() {
    let lot_a = Uuid::new_v4();
    let lot_b = Uuid::new_v4();
    let input = AllocationInput {
        lines: vec![line(lot_a, "0", "0.00"), line(lot_b, "10", "100.00")],
        pool: pool("20.00", "0", "0"),
    };

    let rows = allocate(&input).unwrap();
    let a = rows.iter().find(|r| r.receiving_item_id == lot_a).unwrap();
    let b = rows.iter().find(|r| r.receiving_item_id == lot_b).unwrap();
    assert_eq!(a.freight_allocated, Decimal::ZERO);
    assert_eq!(a.cost_per_base_unit, None);
    assert_eq!(b.freight_allocated, d("20.00"));
}

#[test]
fn all_zero_quantities_allocate_nothing_without_panicking() {
    let input = AllocationInput {
        lines: vec![line(Uuid::new_v4(), "0", "0.00"), line(Uuid::new_v4(), "0", "0.00")],
        pool: pool("40.00", "10.00", "5.00"),
    };

    let rows = allocate(&input).unwrap();
    for row in &rows {
        assert_eq!(row.freight_allocated, Decimal::ZERO);
        assert_eq!(row.duty_allocated, Decimal::ZERO);
        assert_eq!(row.other_costs_allocated, Decimal::ZERO);
        assert_eq!(row.cost_per_base_unit, None);
    }
}

#[test]
fn cost_per_base_unit_is_total_over_usage_quantity() {
    let lot = Uuid::new_v4();
    let input = AllocationInput {
        lines: vec![line(lot, "8", "100.00")],
        pool: pool("20.00", "4.00", "0"),
    };

    let rows = allocate(&input).unwrap();
    // (100 + 20 + 4) / 8 = 15.5
    assert_eq!(rows[0].cost_per_base_unit, Some(d("15.5000")));
}

#[test]
fn sole_candidate_lot_resolves_implicitly() {
    let lot = Uuid::new_v4();
    let implicit = AllocationLine {
        line_item_id: Uuid::new_v4(),
        receiving_item_id: None,
        candidate_lots: vec![lot],
        quantity: d("10"),
        line_total: d("100.00"),
        usage_unit_conversion: None,
    };

    let input = AllocationInput {
        lines: vec![implicit],
        pool: pool("10.00", "0", "0"),
    };

    let rows = allocate(&input).unwrap();
    assert_eq!(rows[0].receiving_item_id, lot);
}

#[test]
fn ambiguous_receiving_fails_with_the_line_named() {
    let line_item_id = Uuid::new_v4();
    let ambiguous = AllocationLine {
        line_item_id,
        receiving_item_id: None,
        candidate_lots: vec![Uuid::new_v4(), Uuid::new_v4()],
        quantity: d("10"),
        line_total: d("100.00"),
        usage_unit_conversion: None,
    };

    let input = AllocationInput {
        lines: vec![ambiguous],
        pool: pool("10.00", "0", "0"),
    };

    let err = allocate(&input).unwrap_err();
    assert_eq!(err, CostingError::UnresolvedReceiving { line_item_id });
}

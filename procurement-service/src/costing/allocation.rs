//! Landed-cost allocation engine.
//!
//! Spreads the aggregated indirect costs of a material invoice across its
//! receiving lots, weighted by usage quantity (received quantity converted to
//! the unit actually consumed in production). Shares are computed at full
//! decimal precision; only the stored amounts are rounded to currency
//! precision, with each bucket's penny-rounding residual assigned to the
//! largest-share lot so allocated amounts sum exactly to the bucket input.
//!
//! The engine is a pure function of its input: running it twice on unchanged
//! inputs yields identical rows, and lots iterate in a fixed order.

use crate::costing::{CostPool, CostingError};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

const CURRENCY_DP: u32 = 2;
const UNIT_COST_DP: u32 = 4;

/// One non-voided line item of the invoice, as seen by the engine.
#[derive(Debug, Clone)]
pub struct AllocationLine {
    pub line_item_id: Uuid,
    /// Explicit receiving lot link, when the operator has matched one.
    pub receiving_item_id: Option<Uuid>,
    /// Lots the purchase order line's receiving history offers, for implicit
    /// resolution when the line has exactly one candidate.
    pub candidate_lots: Vec<Uuid>,
    pub quantity: Decimal,
    pub line_total: Decimal,
    /// Purchase unit to usage unit factor. None means 1.
    pub usage_unit_conversion: Option<Decimal>,
}

impl AllocationLine {
    /// Allocation weight: consumable quantity, not purchase quantity.
    pub fn usage_quantity(&self) -> Decimal {
        self.quantity * self.usage_unit_conversion.unwrap_or(Decimal::ONE)
    }

    fn resolve_lot(&self) -> Result<Uuid, CostingError> {
        if let Some(lot) = self.receiving_item_id {
            return Ok(lot);
        }
        if self.candidate_lots.len() == 1 {
            return Ok(self.candidate_lots[0]);
        }
        Err(CostingError::UnresolvedReceiving {
            line_item_id: self.line_item_id,
        })
    }
}

/// Snapshot input to one engine run.
#[derive(Debug, Clone)]
pub struct AllocationInput {
    pub lines: Vec<AllocationLine>,
    pub pool: CostPool,
}

/// Computed allocation for one receiving lot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotAllocation {
    pub receiving_item_id: Uuid,
    pub quantity_in_base_unit: Decimal,
    pub material_cost: Decimal,
    pub freight_allocated: Decimal,
    pub duty_allocated: Decimal,
    pub other_costs_allocated: Decimal,
    pub total_landed_cost: Decimal,
    /// None for a zero-quantity lot.
    pub cost_per_base_unit: Option<Decimal>,
}

/// Run the allocation: one output row per receiving lot implied by the
/// invoice's line items.
pub fn allocate(input: &AllocationInput) -> Result<Vec<LotAllocation>, CostingError> {
    // Group lines by resolved lot. BTreeMap keeps lot order stable across
    // runs, which the idempotence guarantee depends on.
    let mut lots: BTreeMap<Uuid, (Decimal, Decimal)> = BTreeMap::new();
    for line in &input.lines {
        let lot_id = line.resolve_lot()?;
        let entry = lots.entry(lot_id).or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += line.usage_quantity();
        entry.1 += line.line_total;
    }

    let weights: Vec<Decimal> = lots.values().map(|(usage, _)| *usage).collect();
    let freight = distribute(input.pool.freight, &weights);
    let duty = distribute(input.pool.duty, &weights);
    let other = distribute(input.pool.other, &weights);

    let rows = lots
        .iter()
        .enumerate()
        .map(|(i, (lot_id, (usage, material)))| {
            let total_landed_cost = *material + freight[i] + duty[i] + other[i];
            let cost_per_base_unit = if usage.is_zero() {
                None
            } else {
                Some(
                    (total_landed_cost / usage)
                        .round_dp_with_strategy(UNIT_COST_DP, RoundingStrategy::MidpointAwayFromZero),
                )
            };
            LotAllocation {
                receiving_item_id: *lot_id,
                quantity_in_base_unit: *usage,
                material_cost: *material,
                freight_allocated: freight[i],
                duty_allocated: duty[i],
                other_costs_allocated: other[i],
                total_landed_cost,
                cost_per_base_unit,
            }
        })
        .collect();

    Ok(rows)
}

/// Spread one cost bucket over the lot weights.
///
/// Zero total weight allocates zero everywhere (the division guard is policy,
/// not an error). The rounding residual goes to the largest-weight lot; ties
/// break toward the first lot in iteration order, keeping runs deterministic.
fn distribute(bucket: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    let total: Decimal = weights.iter().sum();
    if total.is_zero() || bucket.is_zero() {
        return vec![Decimal::ZERO; weights.len()];
    }

    let mut amounts: Vec<Decimal> = weights
        .iter()
        .map(|w| {
            (*w / total * bucket)
                .round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero)
        })
        .collect();

    let allocated: Decimal = amounts.iter().sum();
    let residual = bucket - allocated;
    if !residual.is_zero() {
        let largest = weights
            .iter()
            .enumerate()
            .max_by(|(ai, a), (bi, b)| a.cmp(b).then(bi.cmp(ai)))
            .map(|(i, _)| i);
        if let Some(i) = largest {
            amounts[i] += residual;
        }
    }

    amounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn distribute_exact_shares() {
        let amounts = distribute(d("40.00"), &[d("100"), d("300")]);
        assert_eq!(amounts, vec![d("10.00"), d("30.00")]);
    }

    #[test]
    fn distribute_zero_weights_allocates_nothing() {
        let amounts = distribute(d("40.00"), &[d("0"), d("0")]);
        assert_eq!(amounts, vec![Decimal::ZERO, Decimal::ZERO]);
    }

    #[test]
    fn distribute_residual_goes_to_largest_weight() {
        // 100 / 3 rounds to 33.33 per lot; the missing cent lands on the
        // largest weight.
        let amounts = distribute(d("100.00"), &[d("10"), d("10"), d("20")]);
        let total: Decimal = amounts.iter().sum();
        assert_eq!(total, d("100.00"));
        assert_eq!(amounts[2], d("50.00"));
        assert_eq!(amounts[0] + amounts[1], d("50.00"));
    }

    #[test]
    fn distribute_residual_tie_breaks_to_first_lot() {
        let amounts = distribute(d("0.01"), &[d("1"), d("1"), d("1")]);
        let total: Decimal = amounts.iter().sum();
        assert_eq!(total, d("0.01"));
        assert_eq!(amounts[0], d("0.01"));
        assert_eq!(amounts[1], Decimal::ZERO);
    }

    #[test]
    fn distribute_conserves_awkward_buckets() {
        let weights = vec![d("7"), d("11"), d("13"), d("29")];
        let amounts = distribute(d("99.97"), &weights);
        let total: Decimal = amounts.iter().sum();
        assert_eq!(total, d("99.97"));
    }

    #[test]
    fn usage_quantity_defaults_conversion_to_one() {
        let line = AllocationLine {
            line_item_id: Uuid::new_v4(),
            receiving_item_id: Some(Uuid::new_v4()),
            candidate_lots: vec![],
            quantity: d("25"),
            line_total: d("100.00"),
            usage_unit_conversion: None,
        };
        assert_eq!(line.usage_quantity(), d("25"));

        let converted = AllocationLine {
            usage_unit_conversion: Some(d("12")),
            ..line
        };
        assert_eq!(converted.usage_quantity(), d("300"));
    }
}

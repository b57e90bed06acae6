//! Pure costing core: the invoice line ledger arithmetic, cost aggregation,
//! the landed-cost allocation engine, and the close checklist.
//!
//! Everything here is a function from an invoice snapshot to values, with no
//! hidden mutable state; the database layer feeds snapshots in and persists
//! results out.

pub mod aggregator;
pub mod allocation;
pub mod checklist;
pub mod error;
pub mod ledger;

pub use aggregator::{CostPool, aggregate_costs};
pub use allocation::{AllocationInput, AllocationLine, LotAllocation, allocate};
pub use checklist::{ChecklistItem, CloseChecklist, evaluate_checklist};
pub use error::CostingError;

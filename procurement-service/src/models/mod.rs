//! Domain models for procurement-service.

pub mod additional_cost;
pub mod allocation;
pub mod freight_link;
pub mod invoice;
pub mod line_item;
pub mod purchase_order;
pub mod receiving_lot;

pub use additional_cost::{AdditionalCost, CostType, CreateAdditionalCost};
pub use allocation::LandedCostAllocation;
pub use freight_link::{CreateFreightLink, FreightContribution, FreightLink};
pub use invoice::{
    ApprovalStatus, AttestationKind, CloseOutcome, CreateInvoice, FinalizationStatus, Invoice,
    InvoiceType,
};
pub use line_item::{CreateLineItem, InvoiceLineItem};
pub use purchase_order::{InvoiceablePoLine, PurchaseOrderLine};
pub use receiving_lot::ReceivingLot;

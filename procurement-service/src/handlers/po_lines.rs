//! Purchase order line handlers: the invoiceable quantity ledger's read side.

use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    AppState,
    middleware::TenantContext,
    models::{InvoiceablePoLine, PurchaseOrderLine},
};

#[derive(Debug, Serialize)]
pub struct RemainingResponse {
    pub po_line: PurchaseOrderLine,
    pub remaining_invoiceable: Decimal,
}

/// List purchase order lines that still have invoiceable quantity.
pub async fn list_invoiceable(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<InvoiceablePoLine>>, AppError> {
    let lines = state.db.list_invoiceable_po_lines(tenant.tenant_id).await?;
    Ok(Json(lines))
}

/// Get one purchase order line with its remaining invoiceable quantity,
/// re-aggregated from non-voided line items.
pub async fn get_remaining(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(po_line_id): Path<Uuid>,
) -> Result<Json<RemainingResponse>, AppError> {
    let (po_line, remaining_invoiceable) = state
        .db
        .remaining_invoiceable(tenant.tenant_id, po_line_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Purchase order line not found")))?;

    Ok(Json(RemainingResponse {
        po_line,
        remaining_invoiceable,
    }))
}

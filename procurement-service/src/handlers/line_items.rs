//! Line item handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    AppState,
    dtos::AddLineItemRequest,
    middleware::TenantContext,
    models::{CreateLineItem, InvoiceLineItem},
};

/// Add a line item to a material invoice. The quantity is checked against the
/// purchase order line's remaining invoiceable quantity in the same
/// transaction as the insert.
pub async fn add_line_item(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<InvoiceLineItem>), AppError> {
    if payload.quantity <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Line item quantity must be positive"
        )));
    }
    if payload.unit_cost < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Line item unit cost cannot be negative"
        )));
    }

    let item = state
        .db
        .add_line_item(&CreateLineItem {
            tenant_id: tenant.tenant_id,
            invoice_id,
            po_line_id: payload.po_line_id,
            receiving_item_id: payload.receiving_item_id,
            quantity: payload.quantity,
            unit_cost: payload.unit_cost,
            created_by: tenant.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(item)))
}

/// Void a line item. The record stays for audit; its quantity returns to the
/// purchase order line's invoiceable remainder immediately.
pub async fn void_line_item(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((invoice_id, line_item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<InvoiceLineItem>, AppError> {
    let item = state
        .db
        .void_line_item(tenant.tenant_id, invoice_id, line_item_id)
        .await?;
    Ok(Json(item))
}

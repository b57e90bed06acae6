//! Invoice lifecycle handlers.
//!
//! All operations are scoped to the tenant from the request context. State
//! transitions re-check their preconditions server-side; the UI's view of the
//! checklist is advisory only.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use service_core::error::AppError;

use crate::{
    AppState,
    dtos::{AttestRequest, CreateInvoiceRequest, InvoiceDetailResponse},
    middleware::TenantContext,
    models::{AttestationKind, CloseOutcome, CreateInvoice, Invoice, LandedCostAllocation},
    services::database::CostSummary,
};
use uuid::Uuid;
use validator::Validate;

/// Create a new invoice within the tenant's scope.
pub async fn create_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    payload.validate()?;

    let invoice = state
        .db
        .create_invoice(&CreateInvoice {
            tenant_id: tenant.tenant_id,
            invoice_number: payload.invoice_number,
            invoice_type: payload.invoice_type,
            supplier_id: payload.supplier_id,
            supplier_name: payload.supplier_name,
            subtotal: payload.subtotal,
            tax_amount: payload.tax_amount,
            freight_amount: payload.freight_amount,
            total_amount: payload.total_amount,
            created_by: tenant.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Get the full invoice view: document, cost inputs and current allocations.
pub async fn get_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let invoice = state
        .db
        .get_invoice(tenant.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let line_items = state.db.get_line_items(tenant.tenant_id, invoice_id).await?;
    let additional_costs = state
        .db
        .get_additional_costs(tenant.tenant_id, invoice_id)
        .await?;
    let freight_links = state
        .db
        .get_freight_links(tenant.tenant_id, invoice_id)
        .await?;
    let contributions = state
        .db
        .get_freight_contributions(tenant.tenant_id, invoice_id)
        .await?;
    let allocations = state.db.get_allocations(tenant.tenant_id, invoice_id).await?;

    let cost_summary = CostSummary::build(&invoice, &line_items, &additional_costs, &contributions);

    Ok(Json(InvoiceDetailResponse {
        invoice,
        line_items,
        additional_costs,
        freight_links,
        allocations,
        cost_summary,
    }))
}

/// Get the cost summary alone, recomputed from source records.
pub async fn get_cost_summary(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<CostSummary>, AppError> {
    let invoice = state
        .db
        .get_invoice(tenant.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    let line_items = state.db.get_line_items(tenant.tenant_id, invoice_id).await?;
    let additional_costs = state
        .db
        .get_additional_costs(tenant.tenant_id, invoice_id)
        .await?;
    let contributions = state
        .db
        .get_freight_contributions(tenant.tenant_id, invoice_id)
        .await?;

    Ok(Json(CostSummary::build(
        &invoice,
        &line_items,
        &additional_costs,
        &contributions,
    )))
}

/// Get the invoice's allocation rows.
pub async fn get_allocations(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<LandedCostAllocation>>, AppError> {
    let allocations = state.db.get_allocations(tenant.tenant_id, invoice_id).await?;
    Ok(Json(allocations))
}

/// Submit the invoice for approval.
pub async fn submit_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .submit_for_approval(tenant.tenant_id, invoice_id)
        .await?;
    Ok(Json(invoice))
}

/// Approve the invoice; triggers the allocation engine atomically.
pub async fn approve_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .approve_invoice(tenant.tenant_id, invoice_id, tenant.user_id)
        .await?;
    Ok(Json(invoice))
}

/// Reject the invoice.
pub async fn reject_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state.db.reject_invoice(tenant.tenant_id, invoice_id).await?;
    Ok(Json(invoice))
}

/// Re-run the allocation engine on demand.
pub async fn recalculate_allocations(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<LandedCostAllocation>>, AppError> {
    let allocations = state
        .db
        .recalculate_allocations(tenant.tenant_id, invoice_id, tenant.user_id)
        .await?;
    Ok(Json(allocations))
}

/// Record an operator attestation (freight or financials completeness).
pub async fn attest_checklist(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((invoice_id, kind)): Path<(Uuid, String)>,
    Json(payload): Json<AttestRequest>,
) -> Result<Json<Invoice>, AppError> {
    let kind = match kind.as_str() {
        "freight" => AttestationKind::Freight,
        "financials" => AttestationKind::Financials,
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown attestation kind '{}'",
                other
            )));
        }
    };

    let invoice = state
        .db
        .attest_checklist(
            tenant.tenant_id,
            invoice_id,
            kind,
            payload.complete,
            tenant.user_id,
        )
        .await?;
    Ok(Json(invoice))
}

/// Close the invoice: the only irreversible transition. Repeating the call on
/// a closed invoice reports success without re-running anything.
pub async fn close_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<CloseOutcome>, AppError> {
    let outcome = state
        .db
        .close_invoice(tenant.tenant_id, invoice_id, tenant.user_id)
        .await?;
    Ok(Json(outcome))
}

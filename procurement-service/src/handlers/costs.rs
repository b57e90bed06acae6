//! Cost input handlers: additional costs and freight links.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    dtos::{AddCostRequest, AddFreightLinkRequest},
    middleware::TenantContext,
    models::{AdditionalCost, CreateAdditionalCost, CreateFreightLink, FreightLink},
};

/// Attach an additional cost (duty, tax or other) to a material invoice.
pub async fn add_cost(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<AddCostRequest>,
) -> Result<(StatusCode, Json<AdditionalCost>), AppError> {
    payload.validate()?;
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Additional cost amount must be positive"
        )));
    }

    let cost = state
        .db
        .add_additional_cost(&CreateAdditionalCost {
            tenant_id: tenant.tenant_id,
            invoice_id,
            cost_type: payload.cost_type,
            amount: payload.amount,
            description: payload.description,
            created_by: tenant.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(cost)))
}

/// Remove an additional cost.
pub async fn remove_cost(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((invoice_id, cost_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let removed = state
        .db
        .remove_additional_cost(tenant.tenant_id, invoice_id, cost_id)
        .await?;
    if !removed {
        return Err(AppError::NotFound(anyhow::anyhow!("Additional cost not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Link a freight invoice into a material invoice's allocation pool.
pub async fn add_freight_link(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<AddFreightLinkRequest>,
) -> Result<(StatusCode, Json<FreightLink>), AppError> {
    if let Some(amount) = payload.allocation_amount {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Freight allocation amount must be positive"
            )));
        }
    }

    let link = state
        .db
        .add_freight_link(&CreateFreightLink {
            tenant_id: tenant.tenant_id,
            material_invoice_id: invoice_id,
            freight_invoice_id: payload.freight_invoice_id,
            allocation_amount: payload.allocation_amount,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// Remove a freight link, releasing the freight invoice for linking
/// elsewhere.
pub async fn remove_freight_link(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((invoice_id, link_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let removed = state
        .db
        .remove_freight_link(tenant.tenant_id, invoice_id, link_id)
        .await?;
    if !removed {
        return Err(AppError::NotFound(anyhow::anyhow!("Freight link not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

//! Database service for procurement-service.
//!
//! Each public method is one synchronous server-side operation. Operations
//! that recompute allocations or transition invoice state run inside a single
//! transaction with the invoice row locked, so concurrent attempts on the
//! same invoice serialize.

use crate::costing::{
    AllocationInput, AllocationLine, CostPool, CostingError, LotAllocation, aggregate_costs,
    allocate, evaluate_checklist, ledger,
};
use crate::models::{
    AdditionalCost, AttestationKind, CloseOutcome, CreateAdditionalCost, CreateFreightLink,
    CreateInvoice, CreateLineItem, FreightContribution, FreightLink, Invoice, InvoiceLineItem,
    InvoiceType, InvoiceablePoLine, LandedCostAllocation, PurchaseOrderLine, ReceivingLot,
};
use crate::services::metrics::{
    ALLOCATED_COST_TOTAL, ALLOCATION_RUNS_TOTAL, DB_QUERY_DURATION, ERRORS_TOTAL,
    INVOICES_CLOSED_TOTAL, INVOICES_TOTAL, LOT_LOCK_FAILURES_TOTAL,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, tenant_id, invoice_number, invoice_type, supplier_id, supplier_name, \
     subtotal, tax_amount, freight_amount, total_amount, approval_status, finalization_status, \
     receiving_complete, freight_complete, freight_complete_by, freight_complete_utc, \
     financials_complete, financials_complete_by, financials_complete_utc, \
     closed_at, closed_by, created_by, created_utc";

const LINE_ITEM_COLUMNS: &str = "line_item_id, invoice_id, tenant_id, po_line_id, receiving_item_id, \
     quantity, unit_cost, line_total, voided, created_by, created_utc";

const ALLOCATION_COLUMNS: &str = "allocation_id, invoice_id, receiving_item_id, tenant_id, quantity_in_base_unit, \
     material_cost, freight_allocated, duty_allocated, other_costs_allocated, \
     total_landed_cost, cost_per_base_unit, created_by, created_utc";

/// Row shape for building allocation engine input: a non-voided line item
/// joined with its PO line's conversion factor and receiving history.
#[derive(sqlx::FromRow)]
struct AllocationLineRow {
    line_item_id: Uuid,
    receiving_item_id: Option<Uuid>,
    quantity: Decimal,
    line_total: Decimal,
    usage_unit_conversion: Option<Decimal>,
    candidate_lots: Vec<Uuid>,
}

impl From<AllocationLineRow> for AllocationLine {
    fn from(row: AllocationLineRow) -> Self {
        AllocationLine {
            line_item_id: row.line_item_id,
            receiving_item_id: row.receiving_item_id,
            candidate_lots: row.candidate_lots,
            quantity: row.quantity,
            line_total: row.line_total,
            usage_unit_conversion: row.usage_unit_conversion,
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "procurement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a new invoice.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, tenant_id, invoice_number, invoice_type, supplier_id, supplier_name,
                subtotal, tax_amount, freight_amount, total_amount, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(input.tenant_id)
        .bind(&input.invoice_number)
        .bind(input.invoice_type.as_str())
        .bind(input.supplier_id)
        .bind(&input.supplier_name)
        .bind(input.subtotal)
        .bind(input.tax_amount)
        .bind(input.freight_amount)
        .bind(input.total_amount)
        .bind(input.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    input.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        timer.observe_duration();
        INVOICES_TOTAL
            .with_label_values(&[input.invoice_type.as_str()])
            .inc();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            invoice_type = %invoice.invoice_type,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get all line items of an invoice, voided included.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            SELECT {LINE_ITEM_COLUMNS}
            FROM invoice_line_items
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        timer.observe_duration();

        Ok(items)
    }

    /// Get the additional costs attached to an invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_additional_costs(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<AdditionalCost>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_additional_costs"])
            .start_timer();

        let costs = sqlx::query_as::<_, AdditionalCost>(
            r#"
            SELECT cost_id, invoice_id, tenant_id, cost_type, amount, description, created_by, created_utc
            FROM additional_costs
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get additional costs: {}", e))
        })?;

        timer.observe_duration();

        Ok(costs)
    }

    /// Get the freight links of a material invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_freight_links(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<FreightLink>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_freight_links"])
            .start_timer();

        let links = sqlx::query_as::<_, FreightLink>(
            r#"
            SELECT link_id, material_invoice_id, freight_invoice_id, tenant_id, allocation_amount, created_utc
            FROM freight_links
            WHERE tenant_id = $1 AND material_invoice_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get freight links: {}", e)))?;

        timer.observe_duration();

        Ok(links)
    }

    /// Get freight link contributions resolved against the linked freight
    /// invoices' totals.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_freight_contributions(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<FreightContribution>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_freight_contributions"])
            .start_timer();

        let contributions = Self::fetch_freight_contributions(&self.pool, tenant_id, invoice_id).await?;

        timer.observe_duration();

        Ok(contributions)
    }

    /// Get the allocation rows of an invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_allocations(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<LandedCostAllocation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_allocations"])
            .start_timer();

        let rows = sqlx::query_as::<_, LandedCostAllocation>(&format!(
            r#"
            SELECT {ALLOCATION_COLUMNS}
            FROM landed_cost_allocations
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY receiving_item_id
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get allocations: {}", e)))?;

        timer.observe_duration();

        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Invoice Line Ledger
    // -------------------------------------------------------------------------

    /// Get a purchase order line with its remaining invoiceable quantity.
    /// The remainder is always re-aggregated from non-voided line items.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, po_line_id = %po_line_id))]
    pub async fn remaining_invoiceable(
        &self,
        tenant_id: Uuid,
        po_line_id: Uuid,
    ) -> Result<Option<(PurchaseOrderLine, Decimal)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remaining_invoiceable"])
            .start_timer();

        let line = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT po_line_id, tenant_id, po_number, material_id, material_name,
                quantity_ordered, quantity_received, unit_cost, purchase_unit, usage_unit,
                usage_unit_conversion, created_utc
            FROM purchase_order_lines
            WHERE tenant_id = $1 AND po_line_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(po_line_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get purchase order line: {}", e))
        })?;

        let Some(line) = line else {
            timer.observe_duration();
            return Ok(None);
        };

        let invoiced = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM invoice_line_items
            WHERE tenant_id = $1 AND po_line_id = $2 AND voided = false
            "#,
        )
        .bind(tenant_id)
        .bind(po_line_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoiced quantity: {}", e))
        })?;

        timer.observe_duration();

        let remaining = ledger::remaining_invoiceable(line.quantity_received, invoiced);
        Ok(Some((line, remaining)))
    }

    /// List purchase order lines that still have invoiceable quantity. Lines
    /// with zero remainder are filtered out, not merely disabled.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_invoiceable_po_lines(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<InvoiceablePoLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoiceable_po_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, InvoiceablePoLine>(
            r#"
            SELECT pol.po_line_id, pol.po_number, pol.material_id, pol.material_name,
                pol.quantity_ordered, pol.quantity_received, pol.unit_cost,
                pol.quantity_received - COALESCE(inv.invoiced, 0) AS remaining_invoiceable
            FROM purchase_order_lines pol
            LEFT JOIN (
                SELECT po_line_id, SUM(quantity) AS invoiced
                FROM invoice_line_items
                WHERE tenant_id = $1 AND voided = false
                GROUP BY po_line_id
            ) inv ON inv.po_line_id = pol.po_line_id
            WHERE pol.tenant_id = $1
              AND pol.quantity_received - COALESCE(inv.invoiced, 0) > 0
            ORDER BY pol.po_number, pol.material_name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list invoiceable lines: {}", e))
        })?;

        timer.observe_duration();

        Ok(lines)
    }

    /// Add a line item to a material invoice.
    ///
    /// The ledger check and the insert run in one transaction with the PO
    /// line row locked, so concurrent creates against the same line
    /// serialize and can never jointly exceed quantity_received.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, invoice_id = %input.invoice_id))]
    pub async fn add_line_item(&self, input: &CreateLineItem) -> Result<InvoiceLineItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_line_item"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, input.tenant_id, input.invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;
        Self::ensure_material_invoice(&invoice)?;

        // Row lock serializes the ledger check against concurrent inserts.
        let po_line = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT po_line_id, tenant_id, po_number, material_id, material_name,
                quantity_ordered, quantity_received, unit_cost, purchase_unit, usage_unit,
                usage_unit_conversion, created_utc
            FROM purchase_order_lines
            WHERE tenant_id = $1 AND po_line_id = $2
            FOR UPDATE
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.po_line_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock purchase order line: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Purchase order line not found")))?;

        if let Some(lot_id) = input.receiving_item_id {
            Self::check_lot_claim(&mut tx, input, lot_id).await?;
        }

        let invoiced = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM invoice_line_items
            WHERE tenant_id = $1 AND po_line_id = $2 AND voided = false
            "#,
        )
        .bind(input.tenant_id)
        .bind(input.po_line_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoiced quantity: {}", e))
        })?;

        ledger::check_invoiceable(
            input.po_line_id,
            po_line.quantity_received,
            invoiced,
            input.quantity,
        )
        .map_err(|e| self.reject(e))?;

        let line_item_id = Uuid::new_v4();
        let line_total = input.quantity * input.unit_cost;
        let item = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            INSERT INTO invoice_line_items (line_item_id, invoice_id, tenant_id, po_line_id,
                receiving_item_id, quantity, unit_cost, line_total, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {LINE_ITEM_COLUMNS}
            "#
        ))
        .bind(line_item_id)
        .bind(input.invoice_id)
        .bind(input.tenant_id)
        .bind(input.po_line_id)
        .bind(input.receiving_item_id)
        .bind(input.quantity)
        .bind(input.unit_cost)
        .bind(line_total)
        .bind(input.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add line item: {}", e)))?;

        Self::refresh_readiness(&mut tx, input.tenant_id, input.invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        info!(
            line_item_id = %item.line_item_id,
            invoice_id = %item.invoice_id,
            po_line_id = %item.po_line_id,
            quantity = %item.quantity,
            "Line item added"
        );

        Ok(item)
    }

    /// Void a line item. The ledger releases its quantity immediately.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, line_item_id = %line_item_id))]
    pub async fn void_line_item(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        line_item_id: Uuid,
    ) -> Result<InvoiceLineItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["void_line_item"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;

        let item = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            UPDATE invoice_line_items
            SET voided = true
            WHERE tenant_id = $1 AND invoice_id = $2 AND line_item_id = $3 AND voided = false
            RETURNING {LINE_ITEM_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(line_item_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to void line item: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Line item not found or already voided")))?;

        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        info!(line_item_id = %item.line_item_id, invoice_id = %invoice_id, "Line item voided");

        Ok(item)
    }

    // -------------------------------------------------------------------------
    // Cost Inputs
    // -------------------------------------------------------------------------

    /// Attach an additional cost to a material invoice.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, invoice_id = %input.invoice_id))]
    pub async fn add_additional_cost(
        &self,
        input: &CreateAdditionalCost,
    ) -> Result<AdditionalCost, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_additional_cost"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, input.tenant_id, input.invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;
        Self::ensure_material_invoice(&invoice)?;

        let cost_id = Uuid::new_v4();
        let cost = sqlx::query_as::<_, AdditionalCost>(
            r#"
            INSERT INTO additional_costs (cost_id, invoice_id, tenant_id, cost_type, amount, description, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING cost_id, invoice_id, tenant_id, cost_type, amount, description, created_by, created_utc
            "#,
        )
        .bind(cost_id)
        .bind(input.invoice_id)
        .bind(input.tenant_id)
        .bind(input.cost_type.as_str())
        .bind(input.amount)
        .bind(&input.description)
        .bind(input.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to add additional cost: {}", e))
        })?;

        self.commit_tx(tx).await?;
        timer.observe_duration();

        info!(
            cost_id = %cost.cost_id,
            invoice_id = %cost.invoice_id,
            cost_type = %cost.cost_type,
            amount = %cost.amount,
            "Additional cost attached"
        );

        Ok(cost)
    }

    /// Remove an additional cost from a material invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, cost_id = %cost_id))]
    pub async fn remove_additional_cost(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        cost_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_additional_cost"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;

        let result = sqlx::query(
            r#"
            DELETE FROM additional_costs
            WHERE tenant_id = $1 AND invoice_id = $2 AND cost_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(cost_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to remove additional cost: {}", e))
        })?;

        self.commit_tx(tx).await?;
        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Link a freight invoice into a material invoice's allocation pool. A
    /// freight invoice can feed at most one pool at a time.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, invoice_id = %input.material_invoice_id))]
    pub async fn add_freight_link(&self, input: &CreateFreightLink) -> Result<FreightLink, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_freight_link"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice =
            Self::fetch_invoice(&mut tx, input.tenant_id, input.material_invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;
        Self::ensure_material_invoice(&invoice)?;

        let freight_invoice =
            Self::fetch_invoice(&mut tx, input.tenant_id, input.freight_invoice_id, false).await?;
        if InvoiceType::from_string(&freight_invoice.invoice_type) != InvoiceType::Freight {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice {} is not a freight invoice",
                input.freight_invoice_id
            )));
        }

        let link_id = Uuid::new_v4();
        let link = sqlx::query_as::<_, FreightLink>(
            r#"
            INSERT INTO freight_links (link_id, material_invoice_id, freight_invoice_id, tenant_id, allocation_amount)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING link_id, material_invoice_id, freight_invoice_id, tenant_id, allocation_amount, created_utc
            "#,
        )
        .bind(link_id)
        .bind(input.material_invoice_id)
        .bind(input.freight_invoice_id)
        .bind(input.tenant_id)
        .bind(input.allocation_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                self.reject(CostingError::FreightLinkTaken {
                    freight_invoice_id: input.freight_invoice_id,
                })
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to add freight link: {}", e)),
        })?;

        Self::refresh_readiness(&mut tx, input.tenant_id, input.material_invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        info!(
            link_id = %link.link_id,
            material_invoice_id = %link.material_invoice_id,
            freight_invoice_id = %link.freight_invoice_id,
            "Freight link added"
        );

        Ok(link)
    }

    /// Remove a freight link.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, link_id = %link_id))]
    pub async fn remove_freight_link(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        link_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remove_freight_link"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, false).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;

        let result = sqlx::query(
            r#"
            DELETE FROM freight_links
            WHERE tenant_id = $1 AND material_invoice_id = $2 AND link_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(link_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to remove freight link: {}", e))
        })?;

        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Finalization State Machine
    // -------------------------------------------------------------------------

    /// Submit an invoice for approval. The only precondition is having at
    /// least one non-voided line item.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn submit_for_approval(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["submit_for_approval"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        invoice.ensure_submittable().map_err(|e| self.reject(e))?;

        let line_count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM invoice_line_items
            WHERE tenant_id = $1 AND invoice_id = $2 AND voided = false
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count line items: {}", e)))?;

        if line_count == 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Cannot submit an invoice without line items"
            )));
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET approval_status = 'pending'
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to submit invoice: {}", e)))?;

        self.commit_tx(tx).await?;
        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, "Invoice submitted for approval");

        Ok(invoice)
    }

    /// Approve an invoice and run the allocation engine in the same
    /// transaction: either both the approval and the allocation rows commit,
    /// or neither does.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn approve_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        approved_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_invoice"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;
        Self::ensure_material_invoice(&invoice)?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET approval_status = 'approved'
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to approve invoice: {}", e)))?;

        let rows = self
            .run_allocation(&mut tx, tenant_id, invoice_id, approved_by, true)
            .await?;
        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, false).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();
        ALLOCATION_RUNS_TOTAL.with_label_values(&["approve"]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            lot_count = rows.len(),
            "Invoice approved and allocations computed"
        );

        Ok(invoice)
    }

    /// Reject an invoice. Reversible via a new submit + approve cycle.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn reject_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reject_invoice"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET approval_status = 'rejected'
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reject invoice: {}", e)))?;

        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, "Invoice rejected");

        Ok(invoice)
    }

    /// Re-run the allocation engine on demand. Permitted any time before the
    /// invoice is closed; afterwards the allocations are frozen.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn recalculate_allocations(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<Vec<LandedCostAllocation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recalculate_allocations"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;
        Self::ensure_material_invoice(&invoice)?;

        let rows = self
            .run_allocation(&mut tx, tenant_id, invoice_id, requested_by, true)
            .await?;
        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();
        ALLOCATION_RUNS_TOTAL
            .with_label_values(&["recalculate"])
            .inc();

        info!(invoice_id = %invoice_id, lot_count = rows.len(), "Allocations recalculated");

        self.get_allocations(tenant_id, invoice_id).await
    }

    /// Record an operator attestation on the close checklist.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn attest_checklist(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        kind: AttestationKind,
        complete: bool,
        attested_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["attest_checklist"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        invoice.ensure_mutable().map_err(|e| self.reject(e))?;

        let sql = match kind {
            AttestationKind::Freight => format!(
                r#"
                UPDATE invoices
                SET freight_complete = $3,
                    freight_complete_by = CASE WHEN $3 THEN $4 ELSE NULL END,
                    freight_complete_utc = CASE WHEN $3 THEN NOW() ELSE NULL END
                WHERE tenant_id = $1 AND invoice_id = $2
                RETURNING {INVOICE_COLUMNS}
                "#
            ),
            AttestationKind::Financials => format!(
                r#"
                UPDATE invoices
                SET financials_complete = $3,
                    financials_complete_by = CASE WHEN $3 THEN $4 ELSE NULL END,
                    financials_complete_utc = CASE WHEN $3 THEN NOW() ELSE NULL END
                WHERE tenant_id = $1 AND invoice_id = $2
                RETURNING {INVOICE_COLUMNS}
                "#
            ),
        };

        sqlx::query_as::<_, Invoice>(&sql)
            .bind(tenant_id)
            .bind(invoice_id)
            .bind(complete)
            .bind(attested_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to record attestation: {}", e))
            })?;

        Self::refresh_readiness(&mut tx, tenant_id, invoice_id).await?;
        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, false).await?;
        self.commit_tx(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            attestation = kind.as_str(),
            complete = complete,
            "Checklist attestation recorded"
        );

        Ok(invoice)
    }

    /// Close an invoice: the only irreversible transition.
    ///
    /// The checklist, the final allocation recompute and the status change
    /// commit atomically. The lot cost lock then runs best-effort per lot;
    /// failures are reported in the outcome and alerted via metrics, never
    /// rolled back, so a checklist-complete invoice cannot get stuck on a
    /// secondary bookkeeping step.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn close_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        closed_by: Option<Uuid>,
    ) -> Result<CloseOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_invoice"])
            .start_timer();

        let mut tx = self.begin_tx().await?;

        let invoice = Self::fetch_invoice(&mut tx, tenant_id, invoice_id, true).await?;
        if invoice.is_closed() {
            // Lost a close race, or a repeated call: benign no-op.
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(CloseOutcome {
                invoice,
                lock_failures: Vec::new(),
                already_closed: true,
            });
        }
        Self::ensure_material_invoice(&invoice)?;

        let lines = Self::fetch_line_items(&mut tx, tenant_id, invoice_id).await?;
        let additional = Self::fetch_additional_costs(&mut tx, tenant_id, invoice_id).await?;
        let contributions = Self::fetch_freight_contributions(&mut *tx, tenant_id, invoice_id).await?;
        let pool = aggregate_costs(&invoice, &lines, &additional, &contributions);

        let checklist = evaluate_checklist(&invoice, &lines, pool.freight);
        if !checklist.is_satisfied() {
            return Err(self.reject(CostingError::ChecklistIncomplete {
                failed: checklist.failed_items(),
            }));
        }

        let rows = self
            .run_allocation(&mut tx, tenant_id, invoice_id, closed_by, false)
            .await?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET finalization_status = 'closed',
                closed_at = NOW(),
                closed_by = $3
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(closed_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to close invoice: {}", e)))?;

        self.commit_tx(tx).await?;

        // Best-effort lot cost lock. The close has committed; failures here
        // go to the outcome and the alert path.
        let mut lock_failures = Vec::new();
        for row in &rows {
            match self
                .lock_lot_cost(tenant_id, row.receiving_item_id, row.cost_per_base_unit)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        lot_id = %row.receiving_item_id,
                        invoice_id = %invoice_id,
                        "Lot already cost-locked; close committed without relocking"
                    );
                    LOT_LOCK_FAILURES_TOTAL.inc();
                    lock_failures.push(row.receiving_item_id);
                }
                Err(e) => {
                    warn!(
                        lot_id = %row.receiving_item_id,
                        invoice_id = %invoice_id,
                        error = %e,
                        "Failed to cost-lock lot after close"
                    );
                    LOT_LOCK_FAILURES_TOTAL.inc();
                    lock_failures.push(row.receiving_item_id);
                }
            }
        }

        timer.observe_duration();
        INVOICES_CLOSED_TOTAL.inc();
        ALLOCATION_RUNS_TOTAL.with_label_values(&["close"]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            lot_count = rows.len(),
            lock_failures = lock_failures.len(),
            "Invoice closed"
        );

        Ok(CloseOutcome {
            invoice,
            lock_failures,
            already_closed: false,
        })
    }

    // -------------------------------------------------------------------------
    // Lot Cost Lock
    // -------------------------------------------------------------------------

    /// Mark a receiving lot's cost as immutable. Returns false when the lot
    /// was already locked (by any invoice); the flag is never cleared.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, lot_id = %lot_id))]
    pub async fn lock_lot_cost(
        &self,
        tenant_id: Uuid,
        lot_id: Uuid,
        landed_cost_per_unit: Option<Decimal>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE receiving_lots
            SET cost_finalized = true,
                landed_cost_per_unit = $3,
                cost_finalized_utc = NOW()
            WHERE tenant_id = $1 AND receiving_item_id = $2 AND cost_finalized = false
            "#,
        )
        .bind(tenant_id)
        .bind(lot_id)
        .bind(landed_cost_per_unit)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock lot cost: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a receiving lot by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, lot_id = %lot_id))]
    pub async fn get_receiving_lot(
        &self,
        tenant_id: Uuid,
        lot_id: Uuid,
    ) -> Result<Option<ReceivingLot>, AppError> {
        let lot = sqlx::query_as::<_, ReceivingLot>(
            r#"
            SELECT receiving_item_id, tenant_id, po_line_id, lot_number, quantity_received,
                cost_finalized, landed_cost_per_unit, cost_finalized_utc, created_utc
            FROM receiving_lots
            WHERE tenant_id = $1 AND receiving_item_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(lot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get receiving lot: {}", e)))?;

        Ok(lot)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn begin_tx(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit_tx(&self, tx: Transaction<'_, Postgres>) -> Result<(), AppError> {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    /// Count a domain rejection and convert it for the HTTP layer.
    fn reject(&self, err: CostingError) -> AppError {
        let error_type = match &err {
            CostingError::OverInvoice { .. } => "over_invoice",
            CostingError::ChecklistIncomplete { .. } => "checklist_incomplete",
            CostingError::InvoiceClosed { .. } => "invoice_closed",
            CostingError::AlreadyApproved { .. } => "already_approved",
            CostingError::LotCostLocked { .. } => "lot_cost_locked",
            CostingError::UnresolvedReceiving { .. } => "unresolved_receiving",
            CostingError::FreightLinkTaken { .. } => "freight_link_taken",
            CostingError::LotClaimed { .. } => "lot_claimed",
        };
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();
        err.into()
    }

    async fn fetch_invoice(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
        for_update: bool,
    ) -> Result<Invoice, AppError> {
        let lock_clause = if for_update { "FOR UPDATE" } else { "" };
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            {lock_clause}
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    async fn fetch_line_items(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItem>, AppError> {
        sqlx::query_as::<_, InvoiceLineItem>(&format!(
            r#"
            SELECT {LINE_ITEM_COLUMNS}
            FROM invoice_line_items
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))
    }

    async fn fetch_additional_costs(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<AdditionalCost>, AppError> {
        sqlx::query_as::<_, AdditionalCost>(
            r#"
            SELECT cost_id, invoice_id, tenant_id, cost_type, amount, description, created_by, created_utc
            FROM additional_costs
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get additional costs: {}", e))
        })
    }

    async fn fetch_freight_contributions<'e, E>(
        executor: E,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<FreightContribution>, AppError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, FreightContribution>(
            r#"
            SELECT fl.freight_invoice_id, fl.allocation_amount, i.total_amount
            FROM freight_links fl
            JOIN invoices i ON i.invoice_id = fl.freight_invoice_id AND i.tenant_id = fl.tenant_id
            WHERE fl.tenant_id = $1 AND fl.material_invoice_id = $2
            ORDER BY fl.created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(executor)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get freight contributions: {}", e))
        })
    }

    fn ensure_material_invoice(invoice: &Invoice) -> Result<(), AppError> {
        if InvoiceType::from_string(&invoice.invoice_type) != InvoiceType::Material {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Operation only applies to material invoices"
            )));
        }
        Ok(())
    }

    async fn check_lot_claim(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateLineItem,
        lot_id: Uuid,
    ) -> Result<(), AppError> {
        let lot = sqlx::query_as::<_, ReceivingLot>(
            r#"
            SELECT receiving_item_id, tenant_id, po_line_id, lot_number, quantity_received,
                cost_finalized, landed_cost_per_unit, cost_finalized_utc, created_utc
            FROM receiving_lots
            WHERE tenant_id = $1 AND receiving_item_id = $2
            "#,
        )
        .bind(input.tenant_id)
        .bind(lot_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get receiving lot: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receiving lot not found")))?;

        if lot.po_line_id != input.po_line_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Receiving lot {} does not belong to purchase order line {}",
                lot_id,
                input.po_line_id
            )));
        }

        // A finalized lot's cost can no longer absorb this invoice's
        // allocation, so reject the claim up front.
        lot.ensure_cost_mutable().map_err(|e| {
            ERRORS_TOTAL.with_label_values(&["lot_cost_locked"]).inc();
            AppError::from(e)
        })?;

        // One authoritative invoicing claim per lot.
        let claimant = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT invoice_id
            FROM invoice_line_items
            WHERE tenant_id = $1 AND receiving_item_id = $2 AND voided = false AND invoice_id <> $3
            LIMIT 1
            "#,
        )
        .bind(input.tenant_id)
        .bind(lot_id)
        .bind(input.invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check lot claim: {}", e)))?;

        if let Some(invoice_id) = claimant {
            ERRORS_TOTAL.with_label_values(&["lot_claimed"]).inc();
            return Err(CostingError::LotClaimed { lot_id, invoice_id }.into());
        }

        Ok(())
    }

    /// Run the allocation engine over the invoice's current snapshot and
    /// replace its allocation rows. When `strict_lot_writes` is set, hitting
    /// an already-locked lot fails the run; during close the lock step
    /// reports such lots instead.
    async fn run_allocation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
        created_by: Option<Uuid>,
        strict_lot_writes: bool,
    ) -> Result<Vec<LotAllocation>, AppError> {
        let invoice = Self::fetch_invoice(tx, tenant_id, invoice_id, false).await?;
        let lines = Self::fetch_line_items(tx, tenant_id, invoice_id).await?;
        let additional = Self::fetch_additional_costs(tx, tenant_id, invoice_id).await?;
        let contributions = Self::fetch_freight_contributions(&mut **tx, tenant_id, invoice_id).await?;
        let pool = aggregate_costs(&invoice, &lines, &additional, &contributions);

        let alloc_lines = Self::fetch_allocation_lines(tx, tenant_id, invoice_id).await?;
        let input = AllocationInput {
            lines: alloc_lines,
            pool: pool.clone(),
        };
        let rows = allocate(&input).map_err(|e| self.reject(e))?;

        // Full replace: allocation is an idempotent recompute, not a patch.
        sqlx::query(
            r#"
            DELETE FROM landed_cost_allocations
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to clear allocations: {}", e))
        })?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO landed_cost_allocations (allocation_id, invoice_id, receiving_item_id, tenant_id,
                    quantity_in_base_unit, material_cost, freight_allocated, duty_allocated,
                    other_costs_allocated, total_landed_cost, cost_per_base_unit, created_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(row.receiving_item_id)
            .bind(tenant_id)
            .bind(row.quantity_in_base_unit)
            .bind(row.material_cost)
            .bind(row.freight_allocated)
            .bind(row.duty_allocated)
            .bind(row.other_costs_allocated)
            .bind(row.total_landed_cost)
            .bind(row.cost_per_base_unit)
            .bind(created_by)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert allocation: {}", e))
            })?;

            // Annotate the lot with its current per-unit landed cost. The
            // cost lock is the final arbiter across invoices.
            let updated = sqlx::query(
                r#"
                UPDATE receiving_lots
                SET landed_cost_per_unit = $3
                WHERE tenant_id = $1 AND receiving_item_id = $2 AND cost_finalized = false
                "#,
            )
            .bind(tenant_id)
            .bind(row.receiving_item_id)
            .bind(row.cost_per_base_unit)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to write lot cost: {}", e))
            })?;

            if strict_lot_writes && updated.rows_affected() == 0 {
                return Err(self.reject(CostingError::LotCostLocked {
                    lot_id: row.receiving_item_id,
                }));
            }
        }

        if let Some(freight) = pool.freight.to_f64() {
            ALLOCATED_COST_TOTAL
                .with_label_values(&["freight"])
                .inc_by(freight);
        }
        if let Some(duty) = pool.duty.to_f64() {
            ALLOCATED_COST_TOTAL.with_label_values(&["duty"]).inc_by(duty);
        }
        if let Some(other) = pool.other.to_f64() {
            ALLOCATED_COST_TOTAL
                .with_label_values(&["other"])
                .inc_by(other);
        }

        Ok(rows)
    }

    async fn fetch_allocation_lines(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<AllocationLine>, AppError> {
        let rows = sqlx::query_as::<_, AllocationLineRow>(
            r#"
            SELECT li.line_item_id, li.receiving_item_id, li.quantity, li.line_total,
                pol.usage_unit_conversion,
                COALESCE(lots.ids, ARRAY[]::uuid[]) AS candidate_lots
            FROM invoice_line_items li
            JOIN purchase_order_lines pol ON pol.po_line_id = li.po_line_id AND pol.tenant_id = li.tenant_id
            LEFT JOIN LATERAL (
                SELECT array_agg(rl.receiving_item_id ORDER BY rl.created_utc) AS ids
                FROM receiving_lots rl
                WHERE rl.po_line_id = li.po_line_id AND rl.tenant_id = li.tenant_id
            ) lots ON true
            WHERE li.tenant_id = $1 AND li.invoice_id = $2 AND li.voided = false
            ORDER BY li.created_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load allocation lines: {}", e))
        })?;

        Ok(rows.into_iter().map(AllocationLine::from).collect())
    }

    /// Recompute the derived checklist state after a checklist-affecting
    /// write: `receiving_complete` and the incomplete/ready_to_close status.
    /// Never touches a closed invoice.
    async fn refresh_readiness(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<(), AppError> {
        let invoice = Self::fetch_invoice(tx, tenant_id, invoice_id, false).await?;
        if invoice.is_closed() {
            return Ok(());
        }

        let lines = Self::fetch_line_items(tx, tenant_id, invoice_id).await?;
        let additional = Self::fetch_additional_costs(tx, tenant_id, invoice_id).await?;
        let contributions = Self::fetch_freight_contributions(&mut **tx, tenant_id, invoice_id).await?;
        let pool = aggregate_costs(&invoice, &lines, &additional, &contributions);

        let checklist = evaluate_checklist(&invoice, &lines, pool.freight);
        let status = if checklist.is_satisfied() {
            "ready_to_close"
        } else {
            "incomplete"
        };

        sqlx::query(
            r#"
            UPDATE invoices
            SET receiving_complete = $3,
                finalization_status = $4
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(checklist.receiving_linked)
        .bind(status)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to refresh readiness: {}", e))
        })?;

        Ok(())
    }
}

/// Aggregated display summary of an invoice's cost state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CostSummary {
    pub pool: CostPool,
    pub total_costs_to_allocate: Decimal,
    pub grand_total: Decimal,
    pub ready_to_close: bool,
    pub failed_checklist_items: Vec<crate::costing::ChecklistItem>,
}

impl CostSummary {
    /// Build the summary from a fresh snapshot; both sums come from source
    /// records, never cached totals.
    pub fn build(
        invoice: &Invoice,
        lines: &[InvoiceLineItem],
        additional: &[AdditionalCost],
        contributions: &[FreightContribution],
    ) -> Self {
        let pool = aggregate_costs(invoice, lines, additional, contributions);
        let checklist = evaluate_checklist(invoice, lines, pool.freight);
        CostSummary {
            total_costs_to_allocate: pool.total_costs_to_allocate(),
            grand_total: pool.grand_total(),
            ready_to_close: checklist.is_satisfied(),
            failed_checklist_items: checklist.failed_items(),
            pool,
        }
    }
}

//! Database service for finance-service.
//!
//! All writes that touch an invoice's balance run inside a single
//! transaction: the invoice row is locked with `SELECT .. FOR UPDATE`,
//! the payment is written, and `paid_amount` is recomputed from the full
//! payment set before commit. Recomputation (rather than incremental
//! increments) makes reconciliation idempotent: replaying a status write
//! can never double-book an amount.

use crate::models::{
    derive_invoice_status, format_document_number, CreateFeeStructure, CreateInvoice,
    CreatePayment, DocumentKind, FeeStructure, Invoice, InvoiceStatus, ListInvoicesFilter,
    ListPaymentsFilter, Payment, PaymentStatus, UpdateFeeStructure,
};
use crate::services::metrics::{DB_QUERY_DURATION, INVOICES_TOTAL, PAYMENTS_TOTAL};
use chrono::Datelike;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, institution_id, invoice_number, student_id, \
     academic_year_id, issue_date, due_date, total_amount, paid_amount, status, \
     created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_id, institution_id, payment_number, student_id, \
     invoice_id, payment_mode, payment_date, reference_number, amount, amount_paid, \
     status, remarks, created_utc, updated_utc";

const FEE_STRUCTURE_COLUMNS: &str = "fee_structure_id, institution_id, name, \
     academic_year_id, class_name, amount, active, created_utc, updated_utc";

/// Aggregate payment totals for a student or an institution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentTotals {
    pub total: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "finance-service"))]
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
    // Sequential numbering
    // -------------------------------------------------------------------------

    /// Advance the per-(institution, kind, month) sequence atomically and
    /// return the formatted document number.
    ///
    /// The upsert is a single statement, so two concurrent creations can
    /// never observe the same sequence value.
    async fn next_document_number(
        tx: &mut Transaction<'_, Postgres>,
        institution_id: Uuid,
        kind: DocumentKind,
    ) -> Result<String, AppError> {
        let today = chrono::Utc::now().date_naive();
        let year = today.year();
        let month = today.month();

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO number_sequences (institution_id, kind, year, month, last_value)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (institution_id, kind, year, month)
            DO UPDATE SET last_value = number_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(institution_id)
        .bind(kind.as_str())
        .bind(year)
        .bind(month as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance sequence: {}", e))
        })?;

        Ok(format_document_number(kind, year, month, sequence))
    }

    // -------------------------------------------------------------------------
    // Fee Structure Operations
    // -------------------------------------------------------------------------

    /// Create a new fee structure.
    #[instrument(skip(self, input), fields(institution_id = %input.institution_id))]
    pub async fn create_fee_structure(
        &self,
        input: &CreateFeeStructure,
    ) -> Result<FeeStructure, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_fee_structure"])
            .start_timer();

        let fee_structure_id = Uuid::new_v4();
        let fee_structure = sqlx::query_as::<_, FeeStructure>(&format!(
            r#"
            INSERT INTO fee_structures (fee_structure_id, institution_id, name, academic_year_id, class_name, amount, active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            RETURNING {FEE_STRUCTURE_COLUMNS}
            "#,
        ))
        .bind(fee_structure_id)
        .bind(input.institution_id)
        .bind(&input.name)
        .bind(input.academic_year_id)
        .bind(&input.class_name)
        .bind(input.amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A fee structure already exists for class '{}' in this academic year",
                    input.class_name
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create fee structure: {}", e)),
        })?;

        timer.observe_duration();

        info!(
            fee_structure_id = %fee_structure.fee_structure_id,
            name = %fee_structure.name,
            "Fee structure created"
        );

        Ok(fee_structure)
    }

    /// Get a fee structure by ID.
    #[instrument(skip(self), fields(institution_id = %institution_id, fee_structure_id = %fee_structure_id))]
    pub async fn get_fee_structure(
        &self,
        institution_id: Uuid,
        fee_structure_id: Uuid,
    ) -> Result<Option<FeeStructure>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_fee_structure"])
            .start_timer();

        let fee_structure = sqlx::query_as::<_, FeeStructure>(&format!(
            r#"
            SELECT {FEE_STRUCTURE_COLUMNS}
            FROM fee_structures
            WHERE institution_id = $1 AND fee_structure_id = $2
            "#,
        ))
        .bind(institution_id)
        .bind(fee_structure_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get fee structure: {}", e))
        })?;

        timer.observe_duration();

        Ok(fee_structure)
    }

    /// List fee structures for an institution.
    #[instrument(skip(self), fields(institution_id = %institution_id))]
    pub async fn list_fee_structures(
        &self,
        institution_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<FeeStructure>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_fee_structures"])
            .start_timer();

        let fee_structures = sqlx::query_as::<_, FeeStructure>(&format!(
            r#"
            SELECT {FEE_STRUCTURE_COLUMNS}
            FROM fee_structures
            WHERE institution_id = $1
              AND ($2::bool = FALSE OR active = TRUE)
            ORDER BY name, class_name
            "#,
        ))
        .bind(institution_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list fee structures: {}", e))
        })?;

        timer.observe_duration();

        Ok(fee_structures)
    }

    /// Update a fee structure.
    #[instrument(skip(self, input), fields(institution_id = %institution_id, fee_structure_id = %fee_structure_id))]
    pub async fn update_fee_structure(
        &self,
        institution_id: Uuid,
        fee_structure_id: Uuid,
        input: &UpdateFeeStructure,
    ) -> Result<Option<FeeStructure>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_fee_structure"])
            .start_timer();

        let fee_structure = sqlx::query_as::<_, FeeStructure>(&format!(
            r#"
            UPDATE fee_structures
            SET name = COALESCE($3, name),
                amount = COALESCE($4, amount),
                active = COALESCE($5, active),
                updated_utc = NOW()
            WHERE institution_id = $1 AND fee_structure_id = $2
            RETURNING {FEE_STRUCTURE_COLUMNS}
            "#,
        ))
        .bind(institution_id)
        .bind(fee_structure_id)
        .bind(&input.name)
        .bind(input.amount)
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update fee structure: {}", e))
        })?;

        timer.observe_duration();

        Ok(fee_structure)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create an invoice, assigning its number inside the same transaction.
    #[instrument(skip(self, input), fields(institution_id = %input.institution_id, student_id = %input.student_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice_number =
            Self::next_document_number(&mut tx, input.institution_id, DocumentKind::Invoice)
                .await?;

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, institution_id, invoice_number, student_id, academic_year_id,
                issue_date, due_date, total_amount, paid_amount, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(input.institution_id)
        .bind(&invoice_number)
        .bind(input.student_id)
        .bind(input.academic_year_id)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(input.total_amount)
        .bind(input.status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} already exists",
                    invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&[&invoice.status]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(institution_id = %institution_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        institution_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE institution_id = $1 AND invoice_id = $2
            "#,
        ))
        .bind(institution_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices for an institution.
    #[instrument(skip(self, filter), fields(institution_id = %institution_id))]
    pub async fn list_invoices(
        &self,
        institution_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(&format!(
                r#"
                SELECT {INVOICE_COLUMNS}
                FROM invoices
                WHERE institution_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR student_id = $3)
                  AND ($4::date IS NULL OR issue_date >= $4)
                  AND ($5::date IS NULL OR issue_date <= $5)
                  AND invoice_id > $6
                ORDER BY invoice_id
                LIMIT $7
                "#,
            ))
            .bind(institution_id)
            .bind(&status_str)
            .bind(filter.student_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(&format!(
                r#"
                SELECT {INVOICE_COLUMNS}
                FROM invoices
                WHERE institution_id = $1
                  AND ($2::varchar IS NULL OR status = $2)
                  AND ($3::uuid IS NULL OR student_id = $3)
                  AND ($4::date IS NULL OR issue_date >= $4)
                  AND ($5::date IS NULL OR issue_date <= $5)
                ORDER BY invoice_id
                LIMIT $6
                "#,
            ))
            .bind(institution_id)
            .bind(&status_str)
            .bind(filter.student_id)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Cancel an invoice. Paid invoices cannot be cancelled.
    #[instrument(skip(self), fields(institution_id = %institution_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        institution_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = Self::lock_invoice(&mut tx, institution_id, invoice_id).await?;
        let existing = match existing {
            Some(inv) => inv,
            None => return Ok(None),
        };

        match InvoiceStatus::from_string(&existing.status) {
            InvoiceStatus::Paid => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Paid invoices cannot be cancelled"
                )))
            }
            InvoiceStatus::Cancelled => return Ok(Some(existing)),
            _ => {}
        }

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'cancelled',
                updated_utc = NOW()
            WHERE institution_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(institution_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&["cancelled"]).inc();

        info!(invoice_id = %invoice.invoice_id, "Invoice cancelled");

        Ok(Some(invoice))
    }

    /// Delete a draft invoice. Invoices with payments are never deleted.
    #[instrument(skip(self), fields(institution_id = %institution_id, invoice_id = %invoice_id))]
    pub async fn delete_invoice(
        &self,
        institution_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = Self::lock_invoice(&mut tx, institution_id, invoice_id).await?;
        match existing {
            Some(inv) if inv.status == "draft" => {}
            Some(_) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Only draft invoices can be deleted"
                )))
            }
            None => return Ok(false),
        };

        let payment_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM payments
            WHERE institution_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(institution_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count payments: {}", e)))?;

        if payment_count > 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoices with recorded payments cannot be deleted"
            )));
        }

        let result = sqlx::query(
            r#"
            DELETE FROM invoices
            WHERE institution_id = $1 AND invoice_id = $2 AND status = 'draft'
            "#,
        )
        .bind(institution_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(invoice_id = %invoice_id, "Draft invoice deleted");
        }

        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Payment Operations
    // -------------------------------------------------------------------------

    /// Record a payment, updating the linked invoice's balance in the same
    /// transaction.
    #[instrument(skip(self, input), fields(institution_id = %input.institution_id))]
    pub async fn record_payment(&self, input: &CreatePayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Lock the invoice first so the balance check and the later
        // recomputation see a stable row.
        let locked_invoice = match input.invoice_id {
            Some(invoice_id) => {
                let invoice =
                    Self::lock_invoice(&mut tx, input.institution_id, invoice_id).await?;
                let invoice = invoice.ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Invoice not found"))
                })?;
                if InvoiceStatus::from_string(&invoice.status) == InvoiceStatus::Cancelled {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Cannot record payments against a cancelled invoice"
                    )));
                }
                Some(invoice)
            }
            None => None,
        };

        // Expected amount defaults to the invoice's outstanding balance.
        let amount = input.amount.unwrap_or_else(|| match &locked_invoice {
            Some(invoice) => invoice.balance(),
            None => input.amount_paid,
        });

        if input.amount_paid > amount {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Amount paid {} cannot be greater than total amount {}",
                input.amount_paid,
                amount
            )));
        }

        if let Some(invoice) = &locked_invoice {
            let balance = invoice.balance();
            if amount > balance {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Payment amount {} exceeds invoice balance {}",
                    amount,
                    balance
                )));
            }
        }

        let student_id = input
            .student_id
            .or_else(|| locked_invoice.as_ref().map(|invoice| invoice.student_id));

        let payment_number =
            Self::next_document_number(&mut tx, input.institution_id, DocumentKind::Payment)
                .await?;

        let payment_id = Uuid::new_v4();
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (
                payment_id, institution_id, payment_number, student_id, invoice_id,
                payment_mode, payment_date, reference_number, amount, amount_paid,
                status, remarks
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(payment_id)
        .bind(input.institution_id)
        .bind(&payment_number)
        .bind(student_id)
        .bind(input.invoice_id)
        .bind(input.payment_mode.as_str())
        .bind(input.payment_date)
        .bind(&input.reference_number)
        .bind(amount)
        .bind(input.amount_paid)
        .bind(input.status.as_str())
        .bind(&input.remarks)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment number {} already exists",
                    payment_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)),
        })?;

        if let Some(invoice) = &locked_invoice {
            Self::reconcile_invoice(&mut tx, invoice).await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        PAYMENTS_TOTAL
            .with_label_values(&[&payment.payment_mode])
            .inc();

        info!(
            payment_id = %payment.payment_id,
            payment_number = %payment.payment_number,
            amount_paid = %payment.amount_paid,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Get a payment by ID.
    #[instrument(skip(self), fields(institution_id = %institution_id, payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        institution_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE institution_id = $1 AND payment_id = $2
            "#,
        ))
        .bind(institution_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// List payments for an institution.
    #[instrument(skip(self, filter), fields(institution_id = %institution_id))]
    pub async fn list_payments(
        &self,
        institution_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let payments = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Payment>(&format!(
                r#"
                SELECT {PAYMENT_COLUMNS}
                FROM payments
                WHERE institution_id = $1
                  AND ($2::uuid IS NULL OR invoice_id = $2)
                  AND ($3::uuid IS NULL OR student_id = $3)
                  AND ($4::varchar IS NULL OR status = $4)
                  AND ($5::date IS NULL OR payment_date >= $5)
                  AND ($6::date IS NULL OR payment_date <= $6)
                  AND payment_id > $7
                ORDER BY payment_id
                LIMIT $8
                "#,
            ))
            .bind(institution_id)
            .bind(filter.invoice_id)
            .bind(filter.student_id)
            .bind(&status_str)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Payment>(&format!(
                r#"
                SELECT {PAYMENT_COLUMNS}
                FROM payments
                WHERE institution_id = $1
                  AND ($2::uuid IS NULL OR invoice_id = $2)
                  AND ($3::uuid IS NULL OR student_id = $3)
                  AND ($4::varchar IS NULL OR status = $4)
                  AND ($5::date IS NULL OR payment_date >= $5)
                  AND ($6::date IS NULL OR payment_date <= $6)
                ORDER BY payment_id
                LIMIT $7
                "#,
            ))
            .bind(institution_id)
            .bind(filter.invoice_id)
            .bind(filter.student_id)
            .bind(&status_str)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Update a payment's status and re-reconcile the linked invoice.
    ///
    /// Runs the same lock-validate-recompute sequence as `record_payment`:
    /// the linked invoice is locked before the payment row changes, and a
    /// transition into a counting status is rejected when the payment's
    /// amount no longer fits the outstanding balance. Transitions out of a
    /// terminal status are rejected; writing the same terminal status again
    /// is a no-op and leaves the invoice unchanged (reconciliation is a
    /// recomputation, so replays cannot double-book).
    #[instrument(skip(self), fields(institution_id = %institution_id, payment_id = %payment_id))]
    pub async fn update_payment_status(
        &self,
        institution_id: Uuid,
        payment_id: Uuid,
        new_status: PaymentStatus,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment_status"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE institution_id = $1 AND payment_id = $2
            FOR UPDATE
            "#,
        ))
        .bind(institution_id)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payment: {}", e)))?;

        let existing = match existing {
            Some(payment) => payment,
            None => return Ok(None),
        };

        let current = PaymentStatus::from_string(&existing.status);
        if !current.can_transition_to(new_status) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot change payment status from {} to {}",
                current.as_str(),
                new_status.as_str()
            )));
        }

        let locked_invoice = match existing.invoice_id {
            Some(invoice_id) => Self::lock_invoice(&mut tx, institution_id, invoice_id).await?,
            None => None,
        };

        // A payment that starts counting toward the balance must still fit
        // the outstanding balance; other payments may have consumed it since
        // the record-time check.
        if let Some(invoice) = &locked_invoice {
            if new_status.counts_toward_balance() && !current.counts_toward_balance() {
                let balance = invoice.balance();
                if existing.amount_paid > balance {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Amount paid {} exceeds invoice balance {}",
                        existing.amount_paid,
                        balance
                    )));
                }
            }
        }

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = $3,
                updated_utc = NOW()
            WHERE institution_id = $1 AND payment_id = $2
            RETURNING {PAYMENT_COLUMNS}
            "#,
        ))
        .bind(institution_id)
        .bind(payment_id)
        .bind(new_status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update payment status: {}", e))
        })?;

        if let Some(invoice) = &locked_invoice {
            Self::reconcile_invoice(&mut tx, invoice).await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            payment_id = %payment.payment_id,
            status = %payment.status,
            "Payment status updated"
        );

        Ok(Some(payment))
    }

    // -------------------------------------------------------------------------
    // Reconciliation helpers
    // -------------------------------------------------------------------------

    /// Fetch an invoice with an exclusive row lock.
    async fn lock_invoice(
        tx: &mut Transaction<'_, Postgres>,
        institution_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE institution_id = $1 AND invoice_id = $2
            FOR UPDATE
            "#,
        ))
        .bind(institution_id)
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))
    }

    /// Recompute `paid_amount` from the full payment set and derive the
    /// invoice status. The caller must hold the row lock.
    async fn reconcile_invoice(
        tx: &mut Transaction<'_, Postgres>,
        invoice: &Invoice,
    ) -> Result<Invoice, AppError> {
        let paid_amount: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_paid), 0)
            FROM payments
            WHERE institution_id = $1
              AND invoice_id = $2
              AND status IN ('completed', 'paid', 'partially_paid')
            "#,
        )
        .bind(invoice.institution_id)
        .bind(invoice.invoice_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e))
        })?;

        let status = derive_invoice_status(
            paid_amount,
            invoice.total_amount,
            InvoiceStatus::from_string(&invoice.status),
        );

        let updated = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET paid_amount = $3,
                status = $4,
                updated_utc = NOW()
            WHERE institution_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice.institution_id)
        .bind(invoice.invoice_id)
        .bind(paid_amount)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice balance: {}", e))
        })?;

        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Report Operations
    // -------------------------------------------------------------------------

    /// Payment totals for one student.
    #[instrument(skip(self), fields(institution_id = %institution_id, student_id = %student_id))]
    pub async fn student_totals(
        &self,
        institution_id: Uuid,
        student_id: Uuid,
    ) -> Result<PaymentTotals, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["student_totals"])
            .start_timer();

        let (total, paid): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(amount_paid), 0)
            FROM payments
            WHERE institution_id = $1 AND student_id = $2
            "#,
        )
        .bind(institution_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to total student payments: {}", e))
        })?;

        timer.observe_duration();

        Ok(PaymentTotals {
            total,
            paid,
            balance: total - paid,
        })
    }

    /// Payment totals across an institution.
    #[instrument(skip(self), fields(institution_id = %institution_id))]
    pub async fn institution_totals(
        &self,
        institution_id: Uuid,
    ) -> Result<PaymentTotals, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["institution_totals"])
            .start_timer();

        let (total, paid): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(amount_paid), 0)
            FROM payments
            WHERE institution_id = $1
            "#,
        )
        .bind(institution_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to total institution payments: {}",
                e
            ))
        })?;

        timer.observe_duration();

        Ok(PaymentTotals {
            total,
            paid,
            balance: total - paid,
        })
    }
}

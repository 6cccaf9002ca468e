use async_trait::async_trait;
use chrono::NaiveDate;
use lettrage_core::{
    DateRange, GatewayError, Invoice, InvoiceProvider, Match, MatchRecordId, Money, PersistenceGateway,
};

use crate::db::DbPool;

/// SQLite-backed invoice provider and persistence gateway.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: DbPool,
}

impl SqliteGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub invoice: Invoice,
    pub reconciled: bool,
}

/// Amounts are stored as whole cents; sub-cent amounts are refused rather
/// than rounded.
fn to_cents(amount: Money, operation: &'static str) -> Result<i64, GatewayError> {
    amount.to_cents().ok_or_else(|| {
        GatewayError::storage(
            operation,
            format!("amount {} is not a whole number of cents", amount.as_decimal()),
        )
    })
}

fn row_to_invoice(
    row: (String, Option<i64>, String, Option<String>),
    operation: &'static str,
) -> Result<Invoice, GatewayError> {
    let document_date = NaiveDate::parse_from_str(&row.2, "%Y-%m-%d")
        .map_err(|e| GatewayError::storage(operation, format!("invoice {}: {e}", row.0)))?;
    Ok(Invoice {
        id: row.0,
        amount: row.1.map(Money::from_cents),
        document_date,
        label: row.3,
    })
}

/// Adds or replaces an invoice of `tenant_id`. The reconciled flag of an
/// existing invoice is preserved.
pub async fn upsert_invoice(pool: &DbPool, tenant_id: &str, invoice: &Invoice) -> Result<(), GatewayError> {
    const OP: &str = "save invoice";
    let amount_cents = invoice.amount.map(|a| to_cents(a, OP)).transpose()?;
    sqlx::query(
        r#"
        INSERT INTO invoices (tenant_id, id, amount_cents, document_date, label)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            amount_cents = excluded.amount_cents,
            document_date = excluded.document_date,
            label = excluded.label
        "#,
    )
    .bind(tenant_id)
    .bind(&invoice.id)
    .bind(amount_cents)
    .bind(invoice.document_date.to_string())
    .bind(&invoice.label)
    .execute(pool)
    .await
    .map_err(|e| GatewayError::storage(OP, e))?;
    Ok(())
}

/// Every invoice of `tenant_id`, reconciled or not, by date then id.
pub async fn list_invoices(pool: &DbPool, tenant_id: &str) -> Result<Vec<InvoiceRecord>, GatewayError> {
    const OP: &str = "list invoices";
    let rows = sqlx::query_as::<_, (String, Option<i64>, String, Option<String>, i64)>(
        "SELECT id, amount_cents, document_date, label, reconciled FROM invoices WHERE tenant_id = ? ORDER BY document_date, id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::storage(OP, e))?;

    rows.into_iter()
        .map(|r| {
            let reconciled = r.4 != 0;
            Ok(InvoiceRecord {
                invoice: row_to_invoice((r.0, r.1, r.2, r.3), OP)?,
                reconciled,
            })
        })
        .collect()
}

#[async_trait]
impl InvoiceProvider for SqliteGateway {
    async fn unmatched_invoices(
        &self,
        tenant_id: &str,
        period: DateRange,
    ) -> Result<Vec<Invoice>, GatewayError> {
        const OP: &str = "load unmatched invoices";
        let rows = sqlx::query_as::<_, (String, Option<i64>, String, Option<String>)>(
            r#"
            SELECT id, amount_cents, document_date, label
            FROM invoices
            WHERE tenant_id = ?
              AND reconciled = 0
              AND amount_cents IS NOT NULL
              AND document_date >= ? AND document_date <= ?
            ORDER BY document_date, id
            "#,
        )
        .bind(tenant_id)
        .bind(period.start.to_string())
        .bind(period.end.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::storage(OP, e))?;

        rows.into_iter().map(|r| row_to_invoice(r, OP)).collect()
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn commit_match(
        &self,
        m: &Match,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<MatchRecordId, GatewayError> {
        const OP: &str = "commit match";
        let map_err = |e: sqlx::Error| GatewayError::storage(OP, e);
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let updated = sqlx::query(
            "UPDATE invoices SET reconciled = 1 WHERE tenant_id = ? AND id = ? AND reconciled = 0",
        )
        .bind(tenant_id)
        .bind(&m.invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?
        .rows_affected();

        if updated == 0 {
            let existing = sqlx::query_as::<_, (i64,)>(
                "SELECT reconciled FROM invoices WHERE tenant_id = ? AND id = ?",
            )
            .bind(tenant_id)
            .bind(&m.invoice_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?;
            return Err(match existing {
                Some(_) => GatewayError::DuplicateCommit {
                    invoice_id: m.invoice_id.clone(),
                },
                None => GatewayError::UnknownInvoice(m.invoice_id.clone()),
            });
        }

        let (record_id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO lettrage_matches (
                match_id, tenant_id, user_id, invoice_id, payment_id,
                invoice_amount_cents, payment_amount_cents, difference_cents,
                is_automatic, matched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(m.id.to_string())
        .bind(tenant_id)
        .bind(user_id)
        .bind(&m.invoice_id)
        .bind(&m.payment_id)
        .bind(to_cents(m.invoice_amount, OP)?)
        .bind(to_cents(m.payment_amount, OP)?)
        .bind(to_cents(m.difference, OP)?)
        .bind(m.is_automatic)
        .bind(m.created_at.to_rfc3339())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        tracing::debug!(record_id, invoice = %m.invoice_id, "match committed");
        Ok(MatchRecordId(record_id))
    }

    async fn cancel_match(&self, record_id: MatchRecordId, invoice_id: &str) -> Result<(), GatewayError> {
        const OP: &str = "cancel match";
        let map_err = |e: sqlx::Error| GatewayError::storage(OP, e);
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let deleted = sqlx::query_as::<_, (String,)>(
            "DELETE FROM lettrage_matches WHERE id = ? AND invoice_id = ? RETURNING tenant_id",
        )
        .bind(record_id.0)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;

        let Some((tenant_id,)) = deleted else {
            return Err(GatewayError::RecordNotFound(record_id));
        };

        sqlx::query("UPDATE invoices SET reconciled = 0 WHERE tenant_id = ? AND id = ?")
            .bind(&tenant_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        tracing::debug!(record_id = record_id.0, invoice = invoice_id, "match cancelled");
        Ok(())
    }

    async fn save_project_state(&self, project_id: &str, state: &str) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO lettrage_projects (project_id, state) VALUES (?, ?)
            ON CONFLICT (project_id) DO UPDATE SET
                state = excluded.state,
                updated_at = datetime('now')
            "#,
        )
        .bind(project_id)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::storage("save project", e))?;
        Ok(())
    }

    async fn load_project_state(&self, project_id: &str) -> Result<Option<String>, GatewayError> {
        let row = sqlx::query_as::<_, (String,)>("SELECT state FROM lettrage_projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::storage("load project", e))?;
        Ok(row.map(|r| r.0))
    }
}

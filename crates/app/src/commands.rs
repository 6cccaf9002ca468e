use anyhow::{bail, Context as _};
use chrono::NaiveDate;
use lettrage_core::{DateRange, Invoice, Money};
use lettrage_engine::{AutoMatchEngine, LettrageSession};
use lettrage_import::import::import_statement;
use lettrage_import::CsvColumnMapping;
use lettrage_storage::{create_db, list_invoices, upsert_invoice, SqliteGateway};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;

/// How a command ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Some matches could not be committed.
    PartialValidation,
}

/// Everything a command works on. The database is opened on first use.
pub struct Context {
    pub config: Config,
    pub session: LettrageSession,
    gateway: Option<SqliteGateway>,
    dirty: bool,
}

impl Context {
    pub fn new(config: Config, session: LettrageSession) -> Self {
        Self {
            config,
            session,
            gateway: None,
            dirty: false,
        }
    }

    /// Whether the session changed and must be written back.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    async fn gateway(&mut self) -> anyhow::Result<SqliteGateway> {
        if let Some(gateway) = &self.gateway {
            return Ok(gateway.clone());
        }
        let path = &self.config.database;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let pool = create_db(path)
            .await
            .with_context(|| format!("cannot open database {}", path.display()))?;
        let gateway = SqliteGateway::new(pool);
        self.gateway = Some(gateway.clone());
        Ok(gateway)
    }

    fn touch(&mut self) {
        self.dirty = true;
    }
}

// ── Statement ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnArgs {
    pub date: Option<usize>,
    pub amount: Option<usize>,
    pub description: Option<usize>,
}

pub fn import(
    ctx: &mut Context,
    out: &mut dyn Write,
    file: &Path,
    delimiter: Option<u8>,
    columns: ColumnArgs,
) -> anyhow::Result<Outcome> {
    let mapping = match (columns.date, columns.amount) {
        (Some(date), Some(amount)) => Some(
            CsvColumnMapping::new(date, amount, columns.description)
                .with_date_policy(ctx.config.unparseable_dates),
        ),
        (None, None) if columns.description.is_none() => None,
        _ => bail!("--date-column and --amount-column must be given together, and --description-column needs both"),
    };

    let reader = std::fs::File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
    let outcome = import_statement(
        reader,
        delimiter.unwrap_or(ctx.config.delimiter),
        mapping.as_ref(),
        ctx.config.unparseable_dates,
    )
    .with_context(|| format!("cannot import {}", file.display()))?;

    let imported = outcome.payments.len();
    ctx.session.import_payments(outcome.payments);
    ctx.touch();

    writeln!(out, "{imported} payments imported, {} rows skipped", outcome.skipped.len())?;
    for skipped in &outcome.skipped {
        writeln!(out, "  row {}: {}", skipped.row, skipped.reason)?;
    }
    Ok(Outcome::Done)
}

// ── Invoices ──────────────────────────────────────────────────────────────────

pub async fn invoice_add(
    ctx: &mut Context,
    out: &mut dyn Write,
    id: &str,
    amount: Option<Money>,
    date: NaiveDate,
    label: Option<String>,
) -> anyhow::Result<Outcome> {
    let mut invoice = Invoice::new(id, amount.map(Money::abs), date);
    if let Some(label) = label {
        invoice = invoice.with_label(label);
    }
    let gateway = ctx.gateway().await?;
    upsert_invoice(gateway.pool(), &ctx.config.tenant_id, &invoice).await?;
    writeln!(out, "invoice {id} saved")?;
    Ok(Outcome::Done)
}

pub async fn invoice_list(ctx: &mut Context, out: &mut dyn Write) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    let records = list_invoices(gateway.pool(), &ctx.config.tenant_id).await?;
    if records.is_empty() {
        writeln!(out, "no invoices")?;
    }
    for record in records {
        let state = if record.reconciled { "reconciled" } else { "open" };
        writeln!(out, "{}  {}", format_invoice(&record.invoice), state)?;
    }
    Ok(Outcome::Done)
}

/// Replaces the session's invoice pool with the store's open invoices of the
/// selected period.
pub async fn invoice_load(ctx: &mut Context, out: &mut dyn Write) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    let tenant_id = ctx.config.tenant_id.clone();
    let count = ctx.session.load_invoices(&gateway, &tenant_id).await?;
    ctx.touch();
    writeln!(out, "{count} invoices loaded for {}", ctx.session.selected_period())?;
    Ok(Outcome::Done)
}

pub async fn period(
    ctx: &mut Context,
    out: &mut dyn Write,
    range: Option<(NaiveDate, NaiveDate)>,
) -> anyhow::Result<Outcome> {
    let Some((start, end)) = range else {
        writeln!(out, "{}", ctx.session.selected_period())?;
        return Ok(Outcome::Done);
    };
    if end < start {
        bail!("period end {end} is before its start {start}");
    }
    ctx.session.set_selected_period(DateRange::new(start, end));
    ctx.touch();
    invoice_load(ctx, out).await
}

// ── Matching ──────────────────────────────────────────────────────────────────

pub fn auto_match(ctx: &mut Context, out: &mut dyn Write, tolerance: Option<Money>) -> anyhow::Result<Outcome> {
    let engine = AutoMatchEngine::new(tolerance.unwrap_or(ctx.config.tolerance));
    let found = ctx.session.run_automatic_matching(&engine);
    for m in found {
        writeln!(out, "{}", format_match(m))?;
    }
    writeln!(out, "{} new matches", found.len())?;
    ctx.touch();
    Ok(Outcome::Done)
}

pub fn link(ctx: &mut Context, out: &mut dyn Write, invoice_id: &str, payment_id: &str) -> anyhow::Result<Outcome> {
    let m = ctx.session.add_manual_match(invoice_id, payment_id)?;
    writeln!(out, "{}", format_match(m))?;
    ctx.touch();
    Ok(Outcome::Done)
}

pub fn unlink(ctx: &mut Context, out: &mut dyn Write, match_id: Uuid) -> anyhow::Result<Outcome> {
    let removed = ctx.session.remove_match(match_id)?;
    ctx.touch();
    writeln!(
        out,
        "match {} removed, {} and {} are unmatched again",
        removed.id, removed.invoice_id, removed.payment_id
    )?;
    Ok(Outcome::Done)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Matched,
    Unmatched,
}

pub fn list(ctx: &Context, out: &mut dyn Write, filter: ListFilter) -> anyhow::Result<Outcome> {
    let session = &ctx.session;
    if filter != ListFilter::Unmatched {
        writeln!(out, "Matches ({}):", session.matches().len())?;
        for m in session.matches() {
            writeln!(out, "  {}", format_match(m))?;
        }
    }
    if filter != ListFilter::Matched {
        let invoices = session.unmatched_invoices();
        writeln!(out, "Unmatched invoices ({}):", invoices.len())?;
        for invoice in invoices {
            writeln!(out, "  {}", format_invoice(invoice))?;
        }
        let payments = session.unmatched_payments();
        writeln!(out, "Unmatched payments ({}):", payments.len())?;
        for p in payments {
            writeln!(out, "  {}  {}  {}  {}", p.id, p.date, p.amount, p.description)?;
        }
    }
    Ok(Outcome::Done)
}

pub fn stats(ctx: &Context, out: &mut dyn Write, json: bool) -> anyhow::Result<Outcome> {
    let stats = ctx.session.stats();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        return Ok(Outcome::Done);
    }
    writeln!(
        out,
        "Invoices:  {} total, {} matched, {} unmatched",
        stats.total_invoices, stats.matched_invoices, stats.unmatched_invoices
    )?;
    writeln!(
        out,
        "Payments:  {} total, {} matched, {} unmatched",
        stats.total_payments, stats.matched_payments, stats.unmatched_payments
    )?;
    writeln!(out, "Invoiced:  {}", stats.total_invoice_amount)?;
    writeln!(out, "Received:  {}", stats.total_payment_amount)?;
    writeln!(out, "Matched:   {}", stats.matched_amount)?;
    writeln!(out, "Open:      {}", stats.unmatched_invoice_amount)?;
    writeln!(out, "Rate:      {:.1} %", stats.matching_rate)?;
    Ok(Outcome::Done)
}

// ── Persistence ───────────────────────────────────────────────────────────────

pub async fn validate(ctx: &mut Context, out: &mut dyn Write) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    let (tenant_id, user_id) = (ctx.config.tenant_id.clone(), ctx.config.user_id.clone());
    let report = ctx.session.validate_all(&gateway, &tenant_id, &user_id).await;
    ctx.touch();

    writeln!(out, "{report}")?;
    for (match_id, err) in &report.failed {
        writeln!(out, "  {match_id}: {err}")?;
    }
    Ok(if report.is_complete() {
        Outcome::Done
    } else {
        Outcome::PartialValidation
    })
}

pub async fn cancel(ctx: &mut Context, out: &mut dyn Write, match_id: Uuid) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    let removed = ctx.session.cancel_match(&gateway, match_id).await?;
    ctx.touch();
    writeln!(out, "validated match {} cancelled, invoice {} is open again", removed.id, removed.invoice_id)?;
    Ok(Outcome::Done)
}

pub async fn save(ctx: &mut Context, out: &mut dyn Write, project_id: &str) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    ctx.session.save_project(&gateway, project_id).await?;
    writeln!(out, "project {project_id} saved")?;
    Ok(Outcome::Done)
}

pub async fn load(ctx: &mut Context, out: &mut dyn Write, project_id: &str) -> anyhow::Result<Outcome> {
    let gateway = ctx.gateway().await?;
    if ctx.session.load_project(&gateway, project_id).await? {
        ctx.touch();
        writeln!(out, "project {project_id} loaded")?;
    } else {
        writeln!(out, "no saved project {project_id}")?;
    }
    Ok(Outcome::Done)
}

pub fn reset(ctx: &mut Context, out: &mut dyn Write) -> anyhow::Result<Outcome> {
    ctx.session.reset();
    ctx.touch();
    writeln!(out, "session reset, period {}", ctx.session.selected_period())?;
    Ok(Outcome::Done)
}

fn format_invoice(invoice: &Invoice) -> String {
    let amount = invoice.amount.map_or_else(|| "-".to_string(), |a| a.to_string());
    format!(
        "{}  {}  {}  {}",
        invoice.id,
        invoice.document_date,
        amount,
        invoice.label.as_deref().unwrap_or("")
    )
}

fn format_match(m: &lettrage_core::Match) -> String {
    format!(
        "{}  {} <-> {}  {} / {}  diff {}  {}  {}",
        m.id,
        m.invoice_id,
        m.payment_id,
        m.invoice_amount,
        m.payment_amount,
        m.difference,
        if m.is_automatic { "auto" } else { "manual" },
        m.status(),
    )
}

mod commands;
mod config;
mod workspace;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use lettrage_core::Money;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use commands::{ColumnArgs, Context, ListFilter, Outcome};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "lettrage")]
#[command(about = "Reconcile bank statement payments against invoices")]
#[command(version)]
struct Cli {
    /// Configuration file (default: lettrage.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a CSV bank statement, replacing the current payments
    #[command(after_help = "\
Without --date-column/--amount-column the columns are found from the header row.

Examples:
  lettrage import releve.csv
  lettrage import export.csv --delimiter ';' --date-column 0 --amount-column 3 --description-column 1")]
    Import {
        file: PathBuf,

        /// Field delimiter (overrides the configured one)
        #[arg(long)]
        delimiter: Option<char>,

        /// Zero-based index of the date column
        #[arg(long, requires = "amount_column")]
        date_column: Option<usize>,

        /// Zero-based index of the amount column
        #[arg(long, requires = "date_column")]
        amount_column: Option<usize>,

        /// Zero-based index of the description column
        #[arg(long, requires = "date_column")]
        description_column: Option<usize>,
    },

    /// Manage invoices in the store
    #[command(subcommand)]
    Invoice(InvoiceCommand),

    /// Show the selected period, or set it and reload its open invoices
    Period {
        #[arg(requires = "end")]
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },

    /// Run automatic matching over unmatched invoices and payments
    Match {
        /// Maximum amount difference (overrides the configured tolerance)
        #[arg(long)]
        tolerance: Option<Money>,
    },

    /// Match an invoice with a payment by hand
    Link { invoice_id: String, payment_id: String },

    /// Remove a proposed match
    Unlink { match_id: Uuid },

    /// List matches and unmatched invoices and payments
    List(ListArgs),

    /// Show reconciliation statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Commit every proposed match to the store
    Validate,

    /// Reverse a validated match
    Cancel { match_id: Uuid },

    /// Save the session as a named project
    Save { project_id: String },

    /// Replace the session with a saved project
    Load { project_id: String },

    /// Clear the session
    Reset,
}

#[derive(Subcommand)]
enum InvoiceCommand {
    /// Add or update an invoice
    Add {
        id: String,

        /// Document date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Invoice amount; omit for invoices without one
        #[arg(long)]
        amount: Option<Money>,

        #[arg(long)]
        label: Option<String>,
    },
    /// List every invoice in the store
    List,
    /// Reload the open invoices of the selected period into the session
    Load,
}

#[derive(Args)]
struct ListArgs {
    /// Only matches
    #[arg(long, conflicts_with = "unmatched")]
    matched: bool,

    /// Only unmatched invoices and payments
    #[arg(long)]
    unmatched: bool,
}

impl ListArgs {
    fn filter(&self) -> ListFilter {
        match (self.matched, self.unmatched) {
            (true, _) => ListFilter::Matched,
            (_, true) => ListFilter::Unmatched,
            _ => ListFilter::All,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,lettrage=info,lettrage_core=info,lettrage_import=info,lettrage_engine=info,lettrage_storage=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Argument errors exit with clap's usage code (2).
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(Outcome::Done) => ExitCode::from(EXIT_SUCCESS),
        Ok(Outcome::PartialValidation) => ExitCode::from(EXIT_PARTIAL),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Outcome> {
    let dirs = directories::ProjectDirs::from("org", "lettrage", "Lettrage")
        .ok_or_else(|| anyhow::anyhow!("cannot determine a home directory"))?;
    let config = config::load(cli.config.as_deref(), dirs.config_dir(), dirs.data_dir())?;

    let scope = format!("{}/cli", config.tenant_id);
    let session = workspace::load(&config.session_file, &scope, config.event_throttle)?;
    let _events = session.events().subscribe(|event| {
        tracing::info!(?event, "session event");
    });

    let mut ctx = Context::new(config, session);
    let mut stdout = std::io::stdout().lock();
    let out = &mut stdout;

    let outcome = match cli.command {
        Command::Import {
            file,
            delimiter,
            date_column,
            amount_column,
            description_column,
        } => {
            let delimiter = delimiter.map(ascii_delimiter).transpose()?;
            let columns = ColumnArgs {
                date: date_column,
                amount: amount_column,
                description: description_column,
            };
            commands::import(&mut ctx, out, &file, delimiter, columns)?
        }
        Command::Invoice(InvoiceCommand::Add { id, date, amount, label }) => {
            commands::invoice_add(&mut ctx, out, &id, amount, date, label).await?
        }
        Command::Invoice(InvoiceCommand::List) => commands::invoice_list(&mut ctx, out).await?,
        Command::Invoice(InvoiceCommand::Load) => commands::invoice_load(&mut ctx, out).await?,
        Command::Period { start, end } => {
            commands::period(&mut ctx, out, start.zip(end)).await?
        }
        Command::Match { tolerance } => commands::auto_match(&mut ctx, out, tolerance)?,
        Command::Link { invoice_id, payment_id } => commands::link(&mut ctx, out, &invoice_id, &payment_id)?,
        Command::Unlink { match_id } => commands::unlink(&mut ctx, out, match_id)?,
        Command::List(args) => commands::list(&ctx, out, args.filter())?,
        Command::Stats { json } => commands::stats(&ctx, out, json)?,
        Command::Validate => commands::validate(&mut ctx, out).await?,
        Command::Cancel { match_id } => commands::cancel(&mut ctx, out, match_id).await?,
        Command::Save { project_id } => commands::save(&mut ctx, out, &project_id).await?,
        Command::Load { project_id } => commands::load(&mut ctx, out, &project_id).await?,
        Command::Reset => commands::reset(&mut ctx, out)?,
    };

    ctx.session.flush_events();
    if ctx.is_dirty() {
        workspace::save(&ctx.config.session_file, &ctx.session)?;
    }
    Ok(outcome)
}

fn ascii_delimiter(c: char) -> anyhow::Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        anyhow::bail!("delimiter must be a single ASCII character, got {c:?}")
    }
}

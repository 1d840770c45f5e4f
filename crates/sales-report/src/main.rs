//! Point-of-sale sales consultation
//!
//! Queries facts (sales invoices) from the REST API for a date range,
//! computes sale, cost-basis and profit figures, and prints or exports the
//! filtered table.

mod config;
mod constants;
mod consult;
mod costs;
mod engine;
mod error;
mod export;
mod gateway;
mod records;
mod state;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, FileConfig};
use consult::{ConsultSession, ConsultView, ListingSource};
use costs::{CostReport, CostTotal};
use engine::{derive_view, AreaFilter, SortOrder, SortSpec, View, ViewQuery};
use error::ConsultError;
use gateway::HttpGateway;
use records::{FactField, NormalizedRecord};
use state::{AggregationStatus, DateRange};

/// Load config file or exit with helpful message
fn load_config_file(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        anyhow::bail!(
            "Config file '{}' not found.\n\n\
            To get started:\n\
            1. Copy config.toml.example to config.toml\n\
            2. Fill in the API URL and token\n\n\
            See config.toml.example for the required format.",
            path.display()
        );
    }

    FileConfig::load(path)
}

/// Diagnostics go to stderr so reports on stdout stay clean
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "sales_report=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "sales-report")]
#[command(about = "Sales consultation and profit reports for the point-of-sale API")]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = constants::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// API base URL (overrides config.toml)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Output directory for exported CSV files
    #[arg(short, long, default_value = "./output", global = true)]
    output_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consult sales in a date range with cost and profit figures
    Consult {
        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        #[command(flatten)]
        table: TableArgs,

        /// Only show these area ids (default: the user's own area)
        #[arg(long = "area")]
        areas: Vec<String>,

        /// Show every area
        #[arg(long, conflicts_with = "areas")]
        all_areas: bool,

        /// Flip one area's checkbox after the defaults are applied
        #[arg(long = "toggle-area")]
        toggles: Vec<String>,
    },

    /// List facts without cost figures
    List {
        /// List removed facts instead of active ones
        #[arg(long)]
        removed: bool,

        #[command(flatten)]
        table: TableArgs,
    },

    /// List areas and which ones are checked by default
    Areas,
}

#[derive(clap::Args, Debug)]
struct TableArgs {
    /// Page number (1-based)
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Sort field: cod_fact, createdAt, client, user, area, payment_type,
    /// way_to_pay, subtotal, discount, status, customer_payment
    #[arg(long)]
    sort: Option<FactField>,

    /// Sort order
    #[arg(long, value_enum, default_value_t = SortOrder::Asc)]
    order: SortOrder,

    /// Export the full filtered set to CSV in the output directory
    #[arg(long)]
    export: bool,
}

impl TableArgs {
    fn sort_spec(&self) -> Option<SortSpec> {
        self.sort.map(|field| SortSpec {
            field,
            order: self.order,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let file_config = load_config_file(&args.config)?;
    let config = Config::from_file(&file_config, args.api_url)?;
    debug!(api = %config.api_url, token = %config.masked_token(), "loaded config");

    let gateway = HttpGateway::new(&config)?;

    match args.command {
        Command::Consult {
            start,
            end,
            table,
            areas,
            all_areas,
            toggles,
        } => {
            let range = parse_range(&start, &end)?;
            let selection = AreaSelection {
                only: areas,
                all: all_areas,
                toggles,
            };
            run_consult(gateway, &config, range, &table, &selection, &args.output_dir).await
        }
        Command::List { removed, table } => {
            let source = if removed {
                ListingSource::Removed
            } else {
                ListingSource::Active
            };
            run_listing(&gateway, &config, source, &table, &args.output_dir).await
        }
        Command::Areas => run_areas(gateway, &config).await,
    }
}

/// Validate both bounds as YYYY-MM-DD and in order
fn parse_range(start: &str, end: &str) -> Result<DateRange> {
    let parse = |date: &str| {
        NaiveDate::parse_from_str(date, constants::DATE_FORMAT)
            .with_context(|| format!("Invalid date: '{}' - must be YYYY-MM-DD", date))
    };
    let (from, to) = (parse(start)?, parse(end)?);
    if from > to {
        anyhow::bail!("Start date {} is after end date {}", start, end);
    }

    Ok(DateRange {
        start: start.to_string(),
        end: end.to_string(),
    })
}

// =============================================================================
// Consultation
// =============================================================================

/// Area checkboxes requested on the command line
struct AreaSelection {
    only: Vec<String>,
    all: bool,
    toggles: Vec<String>,
}

async fn run_consult(
    gateway: HttpGateway,
    config: &Config,
    range: DateRange,
    table: &TableArgs,
    selection: &AreaSelection,
    output_dir: &Path,
) -> Result<()> {
    println!("Consulta de ventas");
    println!("==================\n");
    println!("API: {}", config.api_url);

    let mut session = ConsultSession::new(
        gateway,
        config.can_read,
        config.user_area.clone(),
        constants::CONSULT_PAGE_SIZE,
    );

    session.load_areas_or_unfiltered().await;
    if selection.all {
        session.check_all_areas();
    } else if !selection.only.is_empty() {
        session.check_only_areas(&selection.only);
    }
    for area_id in &selection.toggles {
        if !session.toggle_area(area_id) {
            warn!(area = %area_id, "unknown area, ignoring toggle");
        }
    }
    session.set_sort(table.sort_spec());

    println!("Fetching facts...");
    match session.search(range).await {
        Ok(()) => {}
        Err(e) if is_permission_denied(&e) => {
            println!("{}", constants::ACCESS_DENIED_MESSAGE);
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    session.set_page(table.page);

    if let Some(range) = session.state().range() {
        println!("Range: {} to {}", range.start, range.end);
    }
    let costs = session.state().costs();
    if let Some(report) = costs.filter(|r| !r.is_empty()) {
        println!("Cost lookups settled for {} facts", report.len());
    }

    let view = session.view();
    print_totals(&view, costs.map_or(0, |c| c.missing_cost_lines));
    print_page_info(&view.table);
    print_area_filters(&session.state().query().areas);
    print_facts(&view.table, costs);

    if table.export {
        export_view(
            &view.table,
            output_dir,
            constants::CONSULT_EXPORT_FILENAME,
        )?;
    }

    Ok(())
}

fn is_permission_denied(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ConsultError>(),
        Some(ConsultError::PermissionDenied)
    )
}

fn print_totals(view: &ConsultView, missing_cost_lines: usize) {
    let totals = &view.totals;
    println!("\n=============================================");
    println!("Total de precio venta    S/ {:>12.2}", totals.sale_total);

    match &totals.cost_total {
        Some(cost) => {
            println!("Inversión a precio costo S/ {:>12}", cost.to_string());
        }
        None => println!("Inversión a precio costo S/ {:>12}", "-"),
    }

    match (view.status, totals.profit()) {
        (AggregationStatus::Computing, _) => println!("{}", view.status.note()),
        (_, Some(profit)) => {
            let marker = if profit <= 0.0 { "LOSS" } else { "OK" };
            println!("Ganancia es de           S/ {:>12.2}  [{}]", profit, marker);
        }
        (_, None) => {
            if let Some(CostTotal::Indeterminate { failures }) = &totals.cost_total {
                println!("Ganancia: indeterminada");
                println!(
                    "  Cost lookups failed for {} fact(s): {}",
                    failures.len(),
                    failures.join(", ")
                );
            }
        }
    }

    if missing_cost_lines > 0 {
        warn!(missing_cost_lines, "line items without cost price counted as zero");
        println!(
            "  Note: {} line item(s) have no cost price and count as zero cost",
            missing_cost_lines
        );
    }
    println!("=============================================\n");
}

// =============================================================================
// Listing
// =============================================================================

async fn run_listing(
    gateway: &HttpGateway,
    config: &Config,
    source: ListingSource,
    table: &TableArgs,
    output_dir: &Path,
) -> Result<()> {
    let title = match source {
        ListingSource::Active => "Ventas",
        ListingSource::Removed => "Ventas eliminadas",
    };
    println!("{}", title);
    println!("{}\n", "=".repeat(title.chars().count()));

    if !config.can_read {
        println!("{}", constants::ACCESS_DENIED_MESSAGE);
        return Ok(());
    }

    let records = consult::load_listing(gateway, source).await?;

    let query = ViewQuery {
        sort: table.sort_spec(),
        page: table.page,
        ..ViewQuery::new(constants::LISTING_PAGE_SIZE)
    };
    let view = derive_view(&records, &query, config.can_read);

    print_page_info(&view);
    print_facts(&view, None);

    if table.export {
        export_view(&view, output_dir, constants::LISTING_EXPORT_FILENAME)?;
    }

    Ok(())
}

// =============================================================================
// Areas
// =============================================================================

async fn run_areas(gateway: HttpGateway, config: &Config) -> Result<()> {
    let mut session = ConsultSession::new(
        gateway,
        config.can_read,
        config.user_area.clone(),
        constants::CONSULT_PAGE_SIZE,
    );
    let areas = session.load_areas().await?;

    if areas.is_empty() {
        println!("No areas defined. Consultations show every fact.");
    } else {
        print_area_filters(areas);
    }
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

#[derive(Tabled)]
struct FactRow {
    #[tabled(rename = "#")]
    item: usize,
    #[tabled(rename = "Cod")]
    code: String,
    #[tabled(rename = "Fecha")]
    date: String,
    #[tabled(rename = "Cliente")]
    client: String,
    #[tabled(rename = "Vendedor")]
    user: String,
    #[tabled(rename = "Tipo de pago")]
    payment_type: String,
    #[tabled(rename = "Forma de pago")]
    way_to_pay: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Costo")]
    cost: String,
    #[tabled(rename = "Estado")]
    status: String,
}

impl FactRow {
    fn new(item: usize, record: &NormalizedRecord, costs: Option<&CostReport>) -> Self {
        let cost = match costs.and_then(|report| report.cost_of(&record.id)) {
            Some(Ok(cost)) => format!("{:.2}", cost),
            Some(Err(_)) => "error".to_string(),
            None => "-".to_string(),
        };

        Self {
            item,
            code: record.code.clone(),
            date: record.created_at.format("%Y-%m-%d %H:%M").to_string(),
            client: truncate(&record.client, 24),
            user: truncate(&record.user, 24),
            payment_type: record.payment_type.clone(),
            way_to_pay: record.way_to_pay.clone(),
            total: format!("{:.2}", record.net_amount()),
            cost,
            status: record.status.clone(),
        }
    }
}

fn print_facts(view: &View, costs: Option<&CostReport>) {
    if view.denied {
        println!("{}", constants::ACCESS_DENIED_MESSAGE);
        return;
    }
    if view.page.is_empty() {
        println!("No facts on this page.");
        return;
    }

    let first = view.first_item();
    let rows: Vec<FactRow> = view
        .page
        .iter()
        .enumerate()
        .map(|(i, record)| FactRow::new(first + i, record, costs))
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn print_page_info(view: &View) {
    println!(
        "Se encontraron un total de {} registros (página {} de {})",
        view.total_items(),
        view.page_number,
        view.page_count.max(1)
    );
}

fn print_area_filters(areas: &[AreaFilter]) {
    if areas.is_empty() {
        return;
    }
    println!("\nAreas:");
    for area in areas {
        let mark = if area.checked { "x" } else { " " };
        println!("  [{}] {} ({})", mark, area.name, area.id);
    }
    println!();
}

fn export_view(view: &View, output_dir: &Path, filename: &str) -> Result<()> {
    view.check_access()?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let path = output_dir.join(filename);
    export::write_csv_file(&path, &view.filtered, &export::fact_headers())?;

    println!("\nExported {} facts to {}", view.total_items(), path.display());
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

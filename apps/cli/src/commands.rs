//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use pubharvest_assets::{AssetStore, MemoryAssetStore, S3AssetStore};
use pubharvest_core::{HarvestOutcome, Harvester, ProgressReporter};
use pubharvest_shared::{
    AppConfig, HarvestConfig, RecordHandoff, init_config, load_config, load_config_from,
    validate_config,
};
use pubharvest_warehouse::Warehouse;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pubharvest — harvest research publications into a warehouse.
#[derive(Parser)]
#[command(
    name = "pubharvest",
    version,
    about = "Harvest a paginated publications listing into an object store and warehouse.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a config file (defaults to ~/.pubharvest/pubharvest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scrape the listing and write the record handoff file.
    Scrape {
        /// Where to write the handoff JSON.
        #[arg(short, long, default_value = "var/publications.json")]
        out: PathBuf,

        /// Also write the records as CSV to this path.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Number of listing pages to visit (overrides config).
        #[arg(long)]
        pages: Option<u32>,

        /// Keep assets in memory instead of uploading to the object store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Load a previously written handoff file into the warehouse.
    Load {
        /// Handoff JSON produced by `scrape`.
        #[arg(short, long, default_value = "var/publications.json")]
        input: PathBuf,
    },

    /// Scrape and load in one pass, without an intermediate file.
    Run {
        /// Number of listing pages to visit (overrides config).
        #[arg(long)]
        pages: Option<u32>,

        /// Keep assets in memory instead of uploading to the object store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pubharvest=info",
        1 => "pubharvest=debug",
        _ => "pubharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Scrape {
            out,
            csv,
            pages,
            dry_run,
        } => cmd_scrape(&config, &out, csv.as_deref(), pages, dry_run).await,
        Command::Load { input } => cmd_load(&config, &input).await,
        Command::Run { pages, dry_run } => cmd_run(&config, pages, dry_run).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    validate_config(&config)?;
    Ok(config)
}

/// Cancellation token wired to ctrl-C. The first signal requests a clean
/// stop at the next page/item boundary.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current item");
            child.cancel();
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_scrape(
    config: &AppConfig,
    out: &Path,
    csv_out: Option<&Path>,
    pages: Option<u32>,
    dry_run: bool,
) -> Result<()> {
    let outcome = harvest(config, pages, dry_run).await?;

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let handoff = RecordHandoff::new(outcome.records.clone());
    let json = serde_json::to_string_pretty(&handoff)?;
    std::fs::write(out, json)?;

    if let Some(csv_path) = csv_out {
        write_csv(csv_path, &handoff.publications_data)?;
    }

    print_outcome(&outcome);
    println!("  Handoff: {}", out.display());
    if let Some(csv_path) = csv_out {
        println!("  CSV:     {}", csv_path.display());
    }
    println!();

    Ok(())
}

async fn cmd_load(config: &AppConfig, input: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .map_err(|e| eyre!("cannot read handoff file '{}': {e}", input.display()))?;
    let handoff: RecordHandoff = serde_json::from_str(&content)
        .map_err(|e| eyre!("malformed handoff file '{}': {e}", input.display()))?;

    let count = handoff.publications_data.len();
    info!(records = count, input = %input.display(), "loading handoff into warehouse");

    let warehouse = open_warehouse(config).await?;
    warehouse.upsert(&handoff.publications_data).await?;
    let stats = serde_json::json!({ "source": input.display().to_string() });
    let run_id = warehouse.record_run(count, &stats.to_string()).await?;

    println!();
    println!("  Loaded {count} records into the warehouse.");
    println!("  Run ID: {run_id}");
    println!();

    Ok(())
}

async fn cmd_run(config: &AppConfig, pages: Option<u32>, dry_run: bool) -> Result<()> {
    let outcome = harvest(config, pages, dry_run).await?;

    let warehouse = open_warehouse(config).await?;
    warehouse.upsert(&outcome.records).await?;
    let stats = serde_json::json!({
        "pages_visited": outcome.pages_visited,
        "items_skipped": outcome.items_skipped,
        "errors": outcome.errors.len(),
    });
    let run_id = warehouse
        .record_run(outcome.records.len(), &stats.to_string())
        .await?;

    print_outcome(&outcome);
    println!("  Run ID:  {run_id}");
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared harvest plumbing
// ---------------------------------------------------------------------------

async fn harvest(
    config: &AppConfig,
    pages: Option<u32>,
    dry_run: bool,
) -> Result<HarvestOutcome> {
    let mut harvest_config = HarvestConfig::from(config);
    if let Some(pages) = pages {
        harvest_config.page_count = pages;
    }

    info!(
        base_url = %harvest_config.base_url,
        pages = harvest_config.page_count,
        dry_run,
        "starting harvest"
    );

    let harvester = Harvester::new(harvest_config, &config.assets.prefix)?;
    let store: Box<dyn AssetStore> = if dry_run {
        Box::new(MemoryAssetStore::new("mem://assets"))
    } else {
        Box::new(S3AssetStore::new(&config.assets).await?)
    };

    let cancel = cancel_on_ctrl_c();
    let reporter = CliProgress::new();

    let outcome = harvester.run(store.as_ref(), &cancel, &reporter).await?;
    Ok(outcome)
}

async fn open_warehouse(config: &AppConfig) -> Result<Warehouse> {
    match &config.warehouse.url {
        Some(url) => {
            let token = std::env::var(&config.warehouse.auth_token_env).map_err(|_| {
                eyre!(
                    "warehouse.url is set but ${} is not in the environment",
                    config.warehouse.auth_token_env
                )
            })?;
            Ok(Warehouse::open_remote(url, &token).await?)
        }
        None => Ok(Warehouse::open(Path::new(&config.warehouse.path)).await?),
    }
}

/// Write records as CSV with the loader-facing column headers.
fn write_csv(path: &Path, records: &[pubharvest_shared::PublicationRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Title", "Summary", "PDF Link", "Image URL"])?;
    for record in records {
        writer.write_record([
            record.title.as_str(),
            record.summary.as_str(),
            record.document_ref.as_deref().unwrap_or(""),
            record.image_ref.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_outcome(outcome: &HarvestOutcome) {
    println!();
    println!("  Harvest complete!");
    println!("  Records: {}", outcome.records.len());
    println!("  Pages:   {}", outcome.pages_visited);
    println!("  Skipped: {}", outcome.items_skipped);
    if !outcome.errors.is_empty() {
        println!("  Errors:  {}", outcome.errors.len());
        for (source, message) in &outcome.errors {
            println!("    {source}: {message}");
        }
    }
    println!("  Time:    {:.1}s", outcome.duration.as_secs_f64());
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_scanned(&self, page_index: u32, stubs: usize) {
        self.spinner
            .set_message(format!("Page {} scanned ({stubs} items)", page_index + 1));
    }

    fn item_harvested(&self, title: &str, total: usize) {
        self.spinner
            .set_message(format!("Harvested [{total}] {title}"));
    }

    fn done(&self, _outcome: &HarvestOutcome) {
        self.spinner.finish_and_clear();
    }
}

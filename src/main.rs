// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ibsg::{
    default_output, generate_building_stock, ingest_postcode_bers, Aggregation, Config, Fetcher,
    GenerateReport, Granularity, NamedFilter, Selections, Workspace,
};

#[derive(Debug, Parser)]
#[command(name = "ibsg", version, about = "Irish building stock generator")]
struct Cli {
    /// JSON config overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where downloads are saved and extracted
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Where row stores live (defaults to <data-dir>/stores)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate a building stock without the interactive form
    Generate {
        /// Output file; .csv, .csv.gz or .parquet
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "postcode")]
        granularity: Granularity,

        /// Fill census buildings with BER attributes
        #[arg(long)]
        census: bool,

        /// Postcode / county to keep (repeatable); all when omitted
        #[arg(long = "county")]
        counties: Vec<String>,

        /// Filter to apply (repeatable); all when omitted
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Apply no range filters at all
        #[arg(long, conflicts_with = "filters")]
        no_filters: bool,

        /// How BERs sharing a key are combined: mean or first
        #[arg(long, default_value = "mean")]
        aggregation: Aggregation,

        /// Local zipped small-area extract
        #[arg(long)]
        small_area_bers: Option<PathBuf>,
    },
    /// Download and ingest today's BER register without exporting
    Ingest,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    let mut workspace = Workspace::new(&cli.data_dir);
    if let Some(store_dir) = &cli.store_dir {
        workspace = workspace.with_store_dir(store_dir);
    }
    let fetcher = Fetcher::new(Duration::from_secs(config.http_timeout_secs))?;

    match cli.command {
        Some(Commands::Generate {
            output,
            granularity,
            census,
            counties,
            filters,
            no_filters,
            aggregation,
            small_area_bers,
        }) => {
            let filters = if no_filters {
                Vec::new()
            } else if filters.is_empty() {
                NamedFilter::ALL.to_vec()
            } else {
                filters
                    .iter()
                    .map(|f| NamedFilter::parse(f))
                    .collect::<Result<Vec<_>, _>>()?
            };

            let selections = Selections {
                granularity,
                countyname: if counties.is_empty() { config.countyname.clone() } else { counties },
                filters,
                census,
                aggregation,
                small_area_bers,
                output: output.unwrap_or_else(|| default_output(&config, census)),
                ..Selections::from_config(&config)
            };
            run_generate(&config, &workspace, &selections, &fetcher)?;
        }
        Some(Commands::Ingest) => run_ingest(&config, &workspace, &fetcher)?,
        None => run_ui_mode(&config, &workspace, &fetcher)?,
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_generate(
    config: &Config,
    workspace: &Workspace,
    selections: &Selections,
    fetcher: &Fetcher,
) -> Result<GenerateReport> {
    println!("🏠 Irish Building Stock Generator v{}", ibsg::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Granularity: {}", selections.granularity);
    println!("   Counties:    {}/{}", selections.countyname.len(), config.countyname.len());
    println!("   Filters:     {}", selections.filters.len());
    println!("   Census:      {}", if selections.census { "yes" } else { "no" });

    println!("\n⚙️  Generating...");
    let report = generate_building_stock(config, workspace, selections, fetcher)?;

    if let Some(ingest) = report.ingest {
        if ingest.skipped {
            println!("✓ Reused existing row store");
        } else {
            println!("✓ Ingested {} BERs in {} chunks", ingest.rows, ingest.chunks);
        }
    }
    println!("✓ {} BERs passed the filters", report.bers_kept);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Wrote {} rows to {}", report.rows, report.output.display());

    Ok(report)
}

fn run_ingest(config: &Config, workspace: &Workspace, fetcher: &Fetcher) -> Result<()> {
    println!("🗄️  BER register → SQLite row store");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (store, report) = ingest_postcode_bers(config, workspace, fetcher)?;
    let count = store.count()?;

    if report.skipped {
        println!("✓ Store already populated");
    } else {
        println!("✓ Ingested {} rows in {} chunks", report.rows, report.chunks);
    }
    if let Some(path) = store.path() {
        println!("✓ {} contains {} BERs", path.display(), count);
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config, workspace: &Workspace, fetcher: &Fetcher) -> Result<()> {
    match ui::run_ui(config)? {
        Some(selections) => {
            run_generate(config, workspace, &selections, fetcher)?;
        }
        None => println!("Cancelled, nothing generated"),
    }
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config, _workspace: &Workspace, _fetcher: &Fetcher) -> Result<()> {
    eprintln!("❌ Interactive mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or run: ibsg generate --help");
    std::process::exit(1);
}

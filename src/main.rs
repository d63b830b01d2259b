use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rent_scout::browser::ChromeSession;
use rent_scout::catalog::CatalogStore;
use rent_scout::config::{BrowserConfig, CollectorConfig, ImagePolicy, ScrapeConfig, SiteProfile};
use rent_scout::images::ImageFetcher;
use rent_scout::orchestrator::{ChromeUnitRunner, CrawlOrchestrator};
use rent_scout::pacing::{DelayRange, Pacing};
use rent_scout::progress::{self, FrontierFile, ProgressStore};
use rent_scout::scrapers::UrlCollector;

#[derive(Parser)]
#[command(name = "rent-scout", version, about = "Apartment-listing scrape pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect listing URLs from the region search indexes into the frontier file
    Collect(CollectArgs),
    /// Scrape every frontier listing not already recorded
    Scrape(ScrapeArgs),
    /// Download listing photos for scraped records
    Images(ImagesArgs),
    /// Import scraped records into the catalog database
    Import(ImportArgs),
}

#[derive(Args)]
struct CollectArgs {
    /// Regions to paginate, comma separated
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Pagination cap per region
    #[arg(long, default_value_t = 10)]
    max_pages: u32,

    /// Where the frontier file goes
    #[arg(long, default_value = "listing_urls.json")]
    frontier: PathBuf,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,
}

#[derive(Args)]
struct ScrapeArgs {
    /// Frontier file produced by `collect`
    #[arg(long, default_value = "listing_urls.json")]
    frontier: PathBuf,

    /// Progress file, rewritten after every scraped listing
    #[arg(long, default_value = "scraped_apartments.json")]
    progress: PathBuf,

    /// Failure list for this run
    #[arg(long, default_value = "failed_urls.json")]
    failures: PathBuf,

    /// Directory for diagnostic screenshots
    #[arg(long, default_value = "snapshots")]
    snapshots: PathBuf,

    /// Minimum seconds between listings
    #[arg(long, env = "RENT_SCOUT_MIN_DELAY", default_value_t = 30)]
    min_delay: u64,

    /// Maximum seconds between listings
    #[arg(long, env = "RENT_SCOUT_MAX_DELAY", default_value_t = 90)]
    max_delay: u64,

    /// Extended break after this many listings (0 disables)
    #[arg(long, env = "RENT_SCOUT_BREAK_EVERY", default_value_t = 10)]
    break_every: usize,

    /// Minimum seconds for the extended break
    #[arg(long, default_value_t = 180)]
    break_min: u64,

    /// Maximum seconds for the extended break
    #[arg(long, default_value_t = 300)]
    break_max: u64,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,
}

#[derive(Args)]
struct ImagesArgs {
    /// Progress file produced by `scrape`
    #[arg(long, default_value = "scraped_apartments.json")]
    progress: PathBuf,

    /// Directory for downloaded photos
    #[arg(long, default_value = "apartment_images")]
    out: PathBuf,

    /// Photos per listing
    #[arg(long, default_value_t = 5)]
    max_per_listing: usize,

    /// Concurrent downloads
    #[arg(long, default_value_t = 5)]
    concurrency: usize,
}

#[derive(Args)]
struct ImportArgs {
    /// Progress file produced by `scrape`
    #[arg(long, default_value = "scraped_apartments.json")]
    progress: PathBuf,

    /// Catalog database path
    #[arg(long, default_value = "apartments.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Collect(args) => collect(args).await,
        Command::Scrape(args) => scrape(args).await,
        Command::Images(args) => images(args).await,
        Command::Import(args) => import(args).await,
    }
}

async fn collect(args: CollectArgs) -> Result<()> {
    info!("🏙️ Rent Scout - collecting listing URLs");

    let mut config = CollectorConfig {
        max_pages_per_region: args.max_pages,
        ..CollectorConfig::default()
    };
    if !args.regions.is_empty() {
        config.regions = args.regions;
    }

    let browser = BrowserConfig {
        headless: !args.headed,
        ..BrowserConfig::default()
    };
    let session = ChromeSession::launch(&browser)?;
    let page = session.page()?;

    let frontier = UrlCollector::new(&config).run(&page, &args.frontier).await?;
    info!(
        "💾 saved {} listing URLs to {}",
        frontier.total_count,
        args.frontier.display()
    );
    Ok(())
}

async fn scrape(args: ScrapeArgs) -> Result<()> {
    info!("🏙️ Rent Scout - scraping listings");

    let frontier = FrontierFile::load(&args.frontier)
        .await
        .context("no frontier file - run `rent-scout collect` first")?;
    info!(
        "loaded {} URLs from {}",
        frontier.total_count,
        args.frontier.display()
    );

    let scrape_config = ScrapeConfig {
        snapshot_dir: args.snapshots,
        ..ScrapeConfig::default()
    };
    let browser = BrowserConfig {
        headless: !args.headed,
        ..BrowserConfig::default()
    };
    let pacing = Pacing {
        unit_delay: DelayRange::new(args.min_delay, args.max_delay),
        break_every: args.break_every,
        break_delay: DelayRange::new(args.break_min, args.break_max),
    };

    let runner = ChromeUnitRunner::new(browser, scrape_config);
    let store = ProgressStore::new(args.progress.clone(), args.failures.clone());
    let summary = CrawlOrchestrator::new(&runner, store, pacing)
        .run(&frontier)
        .await?;

    info!("💾 progress saved to {}", args.progress.display());
    if summary.failed > 0 {
        info!(
            "⚠️ {} failed URLs saved to {} for inspection",
            summary.failed,
            args.failures.display()
        );
    }
    Ok(())
}

async fn images(args: ImagesArgs) -> Result<()> {
    info!("🏙️ Rent Scout - downloading listing photos");

    let records = progress::load_records(&args.progress)
        .await
        .context("no progress file - run `rent-scout scrape` first")?;
    info!(
        "loaded {} apartments from {}",
        records.len(),
        args.progress.display()
    );

    let policy = ImagePolicy {
        max_per_listing: args.max_per_listing,
        concurrency: args.concurrency,
        ..ImagePolicy::default()
    };
    let fetcher = ImageFetcher::new(SiteProfile::default(), policy)?;
    let stats = fetcher.fetch_all(&records, &args.out).await?;

    info!(
        "💾 saved {} photos to {}",
        stats.downloaded,
        args.out.display()
    );
    Ok(())
}

async fn import(args: ImportArgs) -> Result<()> {
    info!("🏙️ Rent Scout - importing into the catalog");

    let records = progress::load_records(&args.progress)
        .await
        .context("no progress file - run `rent-scout scrape` first")?;
    info!(
        "loaded {} apartments from {}",
        records.len(),
        args.progress.display()
    );

    let store = CatalogStore::open(&args.db).await?;
    let stats = store.import_all(&records).await?;

    info!(
        "💾 catalog {} now holds {} apartments ({} inserted, {} skipped)",
        args.db.display(),
        store.count().await?,
        stats.inserted,
        stats.skipped
    );
    Ok(())
}

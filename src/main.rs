//! Tour Loader - Command Line Entry Point
//!
//! Seeds a SQLite tour database and pages through it with the loader.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use futures::executor::block_on;
use futures::future::join_all;

use tour_loader::config::LoaderConfig;
use tour_loader::domain::{RecordId, RowPosition, TourRecord};
use tour_loader::loader::{Loader, LoaderEvent};
use tour_loader::query::{FilterKind, SortDirection};
use tour_loader::store::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "tour-loader", version, about)]
struct Args {
    /// Loader config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a database filled with generated tours
    Seed(SeedArgs),
    /// Print a window of rows for a sort and filter
    Show(ShowArgs),
}

#[derive(Parser, Debug)]
struct SeedArgs {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// Number of tours to generate
    #[arg(long, default_value_t = 5_000)]
    tours: i64,

    /// Number of distinct tags
    #[arg(long, default_value_t = 8)]
    tags: i64,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// Sort columns, e.g. `distance:desc,title`
    #[arg(long, value_delimiter = ',')]
    sort: Vec<String>,

    /// Only show these tour ids
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude")]
    include: Option<Vec<i64>>,

    /// Hide these tour ids
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<i64>,

    /// First row position to print
    #[arg(long, default_value_t = 0)]
    from: usize,

    /// Number of rows to print
    #[arg(long, default_value_t = 20)]
    rows: usize,

    /// Tour ids whose row positions should be reported
    #[arg(long, value_delimiter = ',')]
    find: Vec<i64>,

    /// Seconds to wait for a page before giving up
    #[arg(long, default_value_t = 10)]
    wait: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => LoaderConfig::default_path()?,
    };
    let config = LoaderConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match args.cmd {
        Command::Seed(seed_args) => seed(seed_args),
        Command::Show(show_args) => show(show_args, config),
    }
}

fn seed(args: SeedArgs) -> anyhow::Result<()> {
    if args.tags < 1 {
        bail!("--tags must be at least 1");
    }

    let store = SqliteStore::open(&args.db)?;
    store.init_schema()?;

    let tours: Vec<TourRecord> = (1..=args.tours)
        .map(|id| generated_tour(id, args.tours, args.tags))
        .collect();
    store.insert_tours(&tours)?;

    tracing::info!(db = ?args.db, tours = tours.len(), "Seeded tour database");
    Ok(())
}

/// Deterministic tour whose start times are scattered over the id range
fn generated_tour(id: i64, total: i64, tags: i64) -> TourRecord {
    const BASE_MS: i64 = 1_577_836_800_000; // 2020-01-01
    const HOUR_MS: i64 = 3_600_000;

    let slot = (id * 7_919) % total.max(1);
    let start_time = DateTime::from_timestamp_millis(BASE_MS + slot * HOUR_MS).unwrap_or_default();

    let mut tour = TourRecord::new(id, start_time);
    let moving_time = 1_800 + (id * 13) % 7_200;
    tour.title = Some(format!("Tour {id}"));
    tour.distance = Some(((id * 37) % 500) as f64 * 100.0);
    tour.moving_time = Some(moving_time);
    tour.elapsed_time = Some(moving_time + id % 600);
    tour.avg_pulse = (id % 4 != 0).then(|| 110.0 + (id % 60) as f64);
    tour.calories = Some(200 + (id * 11) % 900);
    tour.tour_type_id = Some(id % 4);
    tour.tag_ids.push(id % tags);
    if id % 3 == 0 && tags > 1 {
        tour.tag_ids.push((id + 1) % tags);
    }
    if id % 5 == 0 {
        tour.marker_ids = vec![id * 10, id * 10 + 1];
    }
    tour
}

fn show(args: ShowArgs, config: LoaderConfig) -> anyhow::Result<()> {
    let store = SqliteStore::open(&args.db)?;
    let mut loader = Loader::new(Arc::new(store), config)?;

    let columns = args
        .sort
        .iter()
        .map(|column| parse_sort_column(column))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if !columns.is_empty() {
        loader.set_sort_columns(columns);
    }
    match args.include {
        Some(ids) => loader.set_filter(FilterKind::IncludeOnly, ids.into_iter().map(RecordId)),
        None if !args.exclude.is_empty() => {
            loader.set_filter(FilterKind::Exclude, args.exclude.into_iter().map(RecordId))
        }
        None => {}
    }

    let counts = loader.count();
    println!("{}", serde_json::to_string(&counts)?);

    let end = (args.from + args.rows).min(counts.filtered as usize);
    let timeout = Duration::from_secs(args.wait);
    for position in args.from..end {
        let Some(record) = wait_for_record(&loader, position, timeout) else {
            tracing::warn!(position, "Row did not load in time");
            break;
        };
        println!("{}", serde_json::to_string(record.as_ref())?);
    }

    if !args.find.is_empty() {
        let ids: Vec<RecordId> = args.find.into_iter().map(RecordId).collect();
        let lookups = ids
            .iter()
            .map(|id| loader.row_positions(std::slice::from_ref(id)));
        for (id, positions) in ids.iter().zip(block_on(join_all(lookups))) {
            match positions.first() {
                Some(position) => println!("{id} -> {position}"),
                None => println!("{id} -> not in view"),
            }
        }
    }

    loader.shutdown();
    Ok(())
}

/// `column` or `column:asc|desc|none`
fn parse_sort_column(value: &str) -> anyhow::Result<(String, SortDirection)> {
    let (column, direction) = value.split_once(':').unwrap_or((value, "asc"));
    let direction = match direction.to_ascii_lowercase().as_str() {
        "asc" => SortDirection::Asc,
        "desc" => SortDirection::Desc,
        "none" => SortDirection::None,
        other => bail!("unknown sort direction `{other}` for column `{column}`"),
    };
    Ok((column.trim().to_string(), direction))
}

/// Block until the row at `position` is loaded, retrying failed pages
fn wait_for_record(
    loader: &Loader,
    position: RowPosition,
    timeout: Duration,
) -> Option<Arc<TourRecord>> {
    let events = loader.events();
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(record) = loader.record(position) {
            return Some(record);
        }
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match events.recv_timeout(remaining) {
            Ok(LoaderEvent::PageFailed { page, transient }) => {
                tracing::debug!(page, transient, "Page failed, retrying");
            }
            Ok(LoaderEvent::PageLoaded { .. }) => {}
            Err(_) => return None,
        }
    }
}

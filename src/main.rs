use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weekly_charts::api::LastFmClient;
use weekly_charts::config::Settings;
use weekly_charts::ingest::{fetch_pages, ingest_all, load_tracklists, ChartDump};
use weekly_charts::models::{ChartKind, ChartMetric, ChartSnapshot};
use weekly_charts::records::WeeklyRecordKind;
use weekly_charts::repository::{AlbumCatalog, ChartLibrary, ChartStore};
use weekly_charts::session::ChartSession;

#[derive(Parser)]
#[command(name = "weekly-charts")]
#[command(about = "Weekly listening charts, histories and records from Last.fm scrobbles", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chart dump written by `fetch`
    #[arg(long, global = true, default_value = "charts.json")]
    dump: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every weekly chart and album tracklist into a dump file
    Fetch {
        #[arg(long)]
        out: PathBuf,
    },
    /// List chart weeks and years
    Weeks {
        #[arg(long, default_value = "track")]
        kind: ChartKind,
        #[arg(long)]
        year: Option<i32>,
    },
    /// History of one entry: a single week with --week, otherwise its full run
    History {
        #[arg(long)]
        kind: ChartKind,
        #[arg(long)]
        id: String,
        #[arg(long)]
        year: Option<i32>,
        /// Any date (YYYY-MM-DD) inside the chart week
        #[arg(long)]
        week: Option<NaiveDate>,
    },
    /// Year-end chart
    YearEnd {
        #[arg(long)]
        kind: ChartKind,
        #[arg(long)]
        year: i32,
        #[arg(long, default_value = "total-units")]
        metric: ChartMetric,
    },
    /// All-time chart
    AllTime {
        #[arg(long)]
        kind: ChartKind,
        #[arg(long, default_value = "total-units")]
        metric: ChartMetric,
        /// Keep at most this many entries per artist
        #[arg(long)]
        artist_limit: Option<usize>,
    },
    /// Weekly leaderboards
    Records {
        #[arg(long)]
        kind: ChartKind,
        #[arg(long, default_value = "most-weekly-units", value_parser = parse_record)]
        record: WeeklyRecordKind,
        #[arg(long, default_value = "total-units")]
        metric: ChartMetric,
    },
    /// Fastest entries to reach a running total
    Fastest {
        #[arg(long)]
        kind: ChartKind,
        #[arg(long, default_value = "total-units")]
        metric: ChartMetric,
        #[arg(long)]
        value: u64,
    },
}

fn parse_record(s: &str) -> std::result::Result<WeeklyRecordKind, String> {
    match s.to_lowercase().replace('_', "-").as_str() {
        "most-weekly-units" | "units" => Ok(WeeklyRecordKind::MostWeeklyUnits),
        "biggest-debuts" | "debuts" => Ok(WeeklyRecordKind::BiggestDebuts),
        "biggest-peaks" | "peaks" => Ok(WeeklyRecordKind::BiggestPeaks),
        other => Err(format!("unknown record `{other}`")),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)))
        .try_init()
        .context("failed to install the log subscriber")?;

    match cli.command {
        Commands::Fetch { out } => fetch(&settings, &out).await?,
        Commands::Weeks { kind, year } => {
            let library = open_library(&settings, &cli.dump).await?;
            let store = library.repository(kind).store();
            let weeks: Vec<_> = store
                .weeks()
                .into_iter()
                .enumerate()
                .filter(|(_, week)| year.map_or(true, |year| week.is_in_year(year)))
                .map(|(index, week)| serde_json::json!({ "number": store.week_number(index), "week": week }))
                .collect();
            print_json(&serde_json::json!({ "years": store.years(), "weeks": weeks }))?;
        }
        Commands::History { kind, id, year, week } => {
            let library = open_library(&settings, &cli.dump).await?;
            let store = library.repository(kind).store();
            match week {
                Some(date) => {
                    let timestamp = date.and_hms_opt(12, 0, 0).context("invalid date")?.and_utc().timestamp();
                    let Some(week) = store.week_containing(timestamp) else {
                        bail!("no {kind} chart covers {date}");
                    };
                    let entry = store.entry_at(&id, &week)?;
                    print_json(&serde_json::json!({
                        "entry": entry,
                        "history": library.snapshot_history(entry)?,
                    }))?;
                }
                None => {
                    let entry = store.find_entry(&id)?;
                    print_json(&*library.overall_history(entry, year)?)?;
                }
            }
        }
        Commands::YearEnd { kind, year, metric } => {
            let library = open_library(&settings, &cli.dump).await?;
            print_json(library.repository(kind).year_end_chart(year, metric).as_slice())?;
        }
        Commands::AllTime { kind, metric, artist_limit } => {
            let library = open_library(&settings, &cli.dump).await?;
            print_json(library.repository(kind).all_time_chart(metric, artist_limit).as_slice())?;
        }
        Commands::Records { kind, record, metric } => {
            let library = open_library(&settings, &cli.dump).await?;
            print_json(library.repository(kind).weekly_record(record, metric).as_slice())?;
        }
        Commands::Fastest { kind, metric, value } => {
            let library = open_library(&settings, &cli.dump).await?;
            print_json(library.repository(kind).fastest_to_milestone(metric, value).as_slice())?;
        }
    }

    Ok(())
}

async fn fetch(settings: &Settings, out: &Path) -> Result<()> {
    let client = LastFmClient::new(settings.lastfm.clone())?;
    let calendar = settings.charts.calendar()?;
    let concurrency = settings.ingest.max_concurrent_requests;

    let registered = client.registered_at().await.context("failed to read the Last.fm profile")?;
    let weeks = calendar.weeks(registered, Utc::now(), None);
    tracing::info!(user = client.user(), %registered, weeks = weeks.len(), "fetching listening history");

    let mut dump = ChartDump::default();
    for kind in ChartKind::ALL {
        let pages = fetch_pages(&client, kind, &weeks, concurrency)
            .await
            .with_context(|| format!("failed to fetch {kind} charts"))?;
        *dump.pages_mut(kind) = pages;
    }

    // Validates the pages and gives the album store to look tracklists up from.
    let albums = dump
        .albums
        .iter()
        .cloned()
        .map(|page| ChartSnapshot::from_raw(ChartKind::Album, page))
        .collect::<weekly_charts::Result<Vec<_>>>()?;
    let album_store = ChartStore::new(ChartKind::Album, albums)?;
    let catalog = AlbumCatalog::new();
    let loaded = load_tracklists(&catalog, &album_store, &client, concurrency).await;
    tracing::info!(loaded, "album tracklists fetched");
    dump.albums_info = catalog.albums();

    dump.save(out).with_context(|| format!("failed to write {}", out.display()))?;
    tracing::info!(path = %out.display(), "dump written");
    Ok(())
}

async fn open_library(settings: &Settings, dump_path: &Path) -> Result<Arc<ChartLibrary>> {
    let dump = ChartDump::load(dump_path).with_context(|| format!("failed to read {}", dump_path.display()))?;
    let catalog = Arc::new(AlbumCatalog::new());
    dump.fill_catalog(&catalog);

    let session = ChartSession::with_catalog(settings.charts.clone(), catalog);
    ingest_all(&session, &dump, &dump.weeks(), settings.ingest.max_concurrent_requests).await?;
    Ok(session.library().await?)
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use activity_cache::cache::{ActivityId, EntityStore, ListWindow, OwnerId, ResourceKind};
use activity_cache::config::Config;
use activity_cache::event::{progress_channel, BatchPhase, ProgressReceiver};
use activity_cache::{
  logging, BatchOptions, CachedActivityClient, GetOptions, RateLimitTracker, StravaClient,
};

#[derive(Parser, Debug)]
#[command(name = "activity-cache")]
#[command(about = "Quota-aware incremental cache for Strava activities")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/activity-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Athlete id, overriding strava.athlete_id
  #[arg(short, long, global = true)]
  athlete: Option<OwnerId>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch activities by id
  Fetch {
    #[arg(required = true)]
    ids: Vec<ActivityId>,
    #[command(flatten)]
    batch: BatchArgs,
  },
  /// List activity summaries in a time window
  List {
    #[command(flatten)]
    window: WindowArgs,
    /// Bypass the cached listing
    #[arg(long)]
    refresh: bool,
  },
  /// List a time window and fetch every activity in it
  Sync {
    #[command(flatten)]
    window: WindowArgs,
    #[command(flatten)]
    batch: BatchArgs,
  },
  /// Print one cached activity
  Show { id: ActivityId },
  /// Summarize the cache
  Status,
  /// Remove one cached activity
  Delete { id: ActivityId },
  /// Remove every cached record
  Clear,
}

#[derive(ClapArgs, Debug)]
struct BatchArgs {
  /// Sub-resources to require (default from config)
  #[arg(short, long, value_delimiter = ',')]
  kinds: Vec<ResourceKind>,
  /// Refetch even if cached
  #[arg(short, long)]
  force: bool,
  /// Ids fetched concurrently
  #[arg(long)]
  concurrency: Option<usize>,
  /// Keep going when the quota is nearly spent
  #[arg(long)]
  ignore_rate_limits: bool,
}

#[derive(ClapArgs, Debug)]
struct WindowArgs {
  /// Only activities after this epoch second
  #[arg(long)]
  after: Option<i64>,
  /// Only activities before this epoch second
  #[arg(long)]
  before: Option<i64>,
}

impl From<&WindowArgs> for ListWindow {
  fn from(args: &WindowArgs) -> Self {
    ListWindow {
      after: args.after,
      before: args.before,
    }
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
  data_dir: PathBuf,
  required_kinds: Vec<ResourceKind>,
  #[serde(flatten)]
  stats: activity_cache::cache::CacheStats,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = logging::init(&config.logging, &data_dir.join("logs"), args.verbose)?;

  let store = config.open_store()?;

  match &args.command {
    Command::Show { id } => match store.get(*id)? {
      Some(entity) => print_json(&entity)?,
      None => return Err(eyre!("activity {} is not cached", id)),
    },
    Command::Status => print_json(&StatusReport {
      data_dir,
      required_kinds: config.batch.required_kinds.clone(),
      stats: store.stats(&config.batch.required_kinds)?,
    })?,
    Command::Delete { id } => {
      if !store.delete(*id)? {
        return Err(eyre!("activity {} is not cached", id));
      }
      info!(id, "Deleted cached activity");
    }
    Command::Clear => {
      let removed = store.clear()?;
      info!(removed, "Cleared cache");
      println!("removed {} records", removed);
    }
    Command::Fetch { ids, batch } => {
      let client = connect(&args, &config, store)?;
      let kinds = required_kinds(&config, batch);
      if let [id] = ids.as_slice() {
        let outcome = client
          .get_entity(
            *id,
            &kinds,
            GetOptions {
              force_refresh: batch.force,
            },
          )
          .await
          .wrap_err_with(|| format!("failed to fetch activity {}", id))?;
        for failure in &outcome.failures {
          warn!(id, kind = %failure.kind, error = %failure.error, "Sub-resource missing");
        }
        print_json(&outcome.entity)?;
      } else {
        let (options, progress) = batch_options(&config, batch);
        let outcome = client.batch_fetch(ids, &kinds, &options).await;
        finish_progress(options, progress).await;
        print_json(&outcome)?;
      }
    }
    Command::List { window, refresh } => {
      let client = connect(&args, &config, store)?;
      let listing = client.list_activities(window.into(), *refresh).await?;
      info!(source = ?listing.source, count = listing.data.total_count, "Listed activities");
      print_json(&listing.data.entities)?;
    }
    Command::Sync { window, batch } => {
      let client = connect(&args, &config, store)?;
      let kinds = required_kinds(&config, batch);
      let (options, progress) = batch_options(&config, batch);
      let outcome = client.sync(window.into(), &kinds, &options).await;
      finish_progress(options, progress).await;
      print_json(&outcome?)?;
    }
  }

  Ok(())
}

fn connect(
  args: &Args,
  config: &Config,
  store: EntityStore,
) -> Result<CachedActivityClient<StravaClient>> {
  let owner_id = args
    .athlete
    .or(config.strava.athlete_id)
    .ok_or_else(|| eyre!("no athlete id: pass --athlete or set strava.athlete_id"))?;
  let token = Config::get_access_token()?;
  let remote = StravaClient::new(&config.strava, token)?;
  let tracker = Arc::new(RateLimitTracker::new(config.pacing));
  Ok(CachedActivityClient::new(remote, store, tracker, owner_id))
}

fn required_kinds(config: &Config, batch: &BatchArgs) -> Vec<ResourceKind> {
  if batch.kinds.is_empty() {
    config.batch.required_kinds.clone()
  } else {
    batch.kinds.clone()
  }
}

/// Batch options with a progress receiver that logs every report.
fn batch_options(config: &Config, batch: &BatchArgs) -> (BatchOptions, JoinHandle<usize>) {
  let (tx, rx) = progress_channel();
  let progress = tokio::spawn(log_progress(rx));

  let options = BatchOptions {
    max_concurrency: batch.concurrency.unwrap_or(config.batch.max_concurrency),
    respect_rate_limits: config.batch.respect_rate_limits && !batch.ignore_rate_limits,
    force_refresh: batch.force,
    progress: Some(tx),
  };
  (options, progress)
}

/// Log reports until the sender side closes. Returns how many were logged.
async fn log_progress(mut rx: ProgressReceiver) -> usize {
  let mut logged = 0;
  while let Some(progress) = rx.recv().await {
    let usage = progress.rate_limit_info;
    if progress.phase == BatchPhase::RateLimited {
      warn!(
        remaining = progress.remaining,
        short_term = usage.short_term_usage,
        daily = usage.daily_usage,
        "Stopped for rate limit, rerun later to resume"
      );
    } else {
      info!(
        phase = ?progress.phase,
        total = progress.total,
        cached = progress.cached,
        fetched = progress.fetched,
        remaining = progress.remaining,
        "Batch progress"
      );
    }
    logged += 1;
  }
  logged
}

/// Close the progress channel and wait until every report is logged.
async fn finish_progress(options: BatchOptions, progress: JoinHandle<usize>) -> usize {
  drop(options);
  match progress.await {
    Ok(logged) => logged,
    Err(e) => {
      warn!(error = %e, "Progress logger stopped early");
      0
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

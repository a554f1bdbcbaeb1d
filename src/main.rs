use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use folio_feed::config::Config;
use folio_feed::feed::{FeedClient, FeedError, Post, Refresh};
use folio_feed::output;
use folio_feed::storage::{CacheStore, FileStore};

/// Get the config directory path (~/.config/folio-feed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("folio-feed");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(
    name = "folio-feed",
    about = "Fetch a blog feed through fallback relays, with a local cache"
)]
struct Args {
    /// Config file (default: ~/.config/folio-feed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skip the warm cache and fetch from the network
    #[arg(long)]
    force: bool,

    /// Keep running and refresh on an interval
    #[arg(long)]
    watch: bool,

    /// Print posts as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Delete the cached feed before fetching
    #[arg(long)]
    clear_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let store = FileStore::new(config.cache_path_in(&config_dir));

    if args.clear_cache {
        store
            .clear()
            .with_context(|| format!("Failed to delete {}", store.path().display()))?;
        eprintln!("Cache cleared: {}", store.path().display());
    }

    let settings = config.feed_settings().context("Invalid configuration")?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("folio-feed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let client = FeedClient::new(http, settings, store);

    tracing::info!(
        feed = %client.settings().feed_url,
        relays = client.settings().relays.len(),
        cache = %client.store().path().display(),
        "Starting"
    );

    // Paint whatever is cached, fresh or not, before touching the network
    let mut shown: Option<Arc<Vec<Post>>> = None;
    let initial = client.state();
    if !args.json && !args.force && !initial.posts.is_empty() {
        output::write_text(&mut std::io::stdout().lock(), &initial.posts)?;
        eprintln!("{}", output::status_line(&initial, Utc::now()));
        shown = Some(initial.posts);
    }

    if args.watch {
        watch(&client, &args, config.refresh_interval(), shown).await
    } else {
        run_once(&client, &args, shown).await
    }
}

/// One refresh, printed. Ctrl-C cancels a pending retry.
async fn run_once(
    client: &FeedClient<FileStore>,
    args: &Args,
    mut shown: Option<Arc<Vec<Post>>>,
) -> Result<()> {
    let result = tokio::select! {
        result = fetch(client, args.force) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelled.");
            return Ok(());
        }
    };

    match result {
        Ok(refresh) => emit(client, &refresh, args.json, &mut shown),
        Err(e) => Err(anyhow::Error::new(e).context("Could not load the feed")),
    }
}

/// Prints the feed, then refreshes every `interval` until Ctrl-C.
async fn watch(
    client: &FeedClient<FileStore>,
    args: &Args,
    interval: std::time::Duration,
    mut shown: Option<Arc<Vec<Post>>>,
) -> Result<()> {
    let mut force = args.force;

    loop {
        let result = tokio::select! {
            result = fetch(client, force) => result,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };

        match result {
            Ok(refresh) => emit(client, &refresh, args.json, &mut shown)?,
            Err(e) => eprintln!("Could not load the feed: {e}"),
        }
        eprintln!("{}", output::status_line(&client.state(), Utc::now()));

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        // Later rounds honour the TTL
        force = false;
    }
}

/// Prints `refresh` unless the same posts are already on screen.
fn emit(
    client: &FeedClient<FileStore>,
    refresh: &Refresh,
    json: bool,
    shown: &mut Option<Arc<Vec<Post>>>,
) -> Result<()> {
    let unchanged = shown
        .as_ref()
        .is_some_and(|prev| prev.as_slice() == refresh.posts().as_slice());

    if unchanged {
        if let Some(error) = refresh.error() {
            eprintln!("Refresh failed, showing cached posts: {error}");
        }
        return Ok(());
    }

    print_refresh(client, refresh, json)?;
    *shown = Some(Arc::clone(refresh.posts()));
    Ok(())
}

async fn fetch(client: &FeedClient<FileStore>, force: bool) -> Result<Refresh, FeedError> {
    if force {
        // A forced fetch that fails with nothing cached still falls into the retry loop
        match client.refresh(true).await {
            Err(_) => client.load().await,
            ok => ok,
        }
    } else {
        client.load().await
    }
}

fn print_refresh(client: &FeedClient<FileStore>, refresh: &Refresh, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let error = refresh.error().map(ToString::to_string);

    if json {
        output::write_json(
            &mut out,
            refresh.posts(),
            client.state().fetched_at,
            error.as_deref(),
        )?;
    } else {
        if let Some(error) = &error {
            writeln!(out, "Showing cached posts; refresh failed: {error}\n")?;
        }
        output::write_text(&mut out, refresh.posts())?;
    }
    out.flush()?;
    Ok(())
}

//! VWorld CLI - address search, geocoding and layer helpers
//!
//! A command-line front end for the VWorld geospatial API. Results are printed
//! as text (or GeoJSON for point mapping); logs go to stderr.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info};

use vworld::api::VWorldClient;
use vworld::cache::CacheStore;
use vworld::cli::{
    log_level, CacheAction, Cli, Command, ConfigAction, FavoritesAction, RecentAction,
    StartupConfig,
};
use vworld::config::{data_dir, ClientConfig, Settings};
use vworld::error::{Result, VWorldError};
use vworld::history::{Favorites, RecentSearch, RecentSearches};
use vworld::validate::{
    parse_coordinates, points_to_geojson, validate_api_key, validate_layer_name,
};
use vworld::worker::{
    spawn_geocoding, spawn_search, GeocodeRecord, GeocodeStatus, WorkerEvent, WorkerHandle,
};

/// Sets up the stderr logger; `RUST_LOG` wins over the `-v` count
fn init_tracing(verbose: u8) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(cli.command, startup).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Opens the cache unless disabled
fn open_cache(startup: &StartupConfig) -> Option<Arc<CacheStore>> {
    if !startup.use_cache {
        return None;
    }
    let ttl = startup.settings.cache_ttl();
    let store = match &startup.cache_dir {
        Some(dir) => Some(CacheStore::with_dir(dir.clone(), ttl)),
        None => CacheStore::new(ttl),
    };
    store.map(Arc::new)
}

fn build_client(startup: &StartupConfig) -> Result<VWorldClient> {
    let config = ClientConfig::from_settings(&startup.settings, startup.api_key.clone());
    let client = VWorldClient::new(config)?;
    Ok(match open_cache(startup) {
        Some(cache) => client.with_cache(cache),
        None => client,
    })
}

fn history_path(file: &str) -> Result<PathBuf> {
    data_dir()
        .map(|dir| dir.join(file))
        .ok_or_else(|| VWorldError::ResourceFailure("no data directory available".to_string()))
}

fn check_layer_name(name: &str) -> Result<()> {
    if validate_layer_name(name) {
        Ok(())
    } else {
        Err(VWorldError::ValidationFailure(format!("invalid layer name: '{}'", name)))
    }
}

async fn run(command: Command, startup: StartupConfig) -> Result<()> {
    match command {
        Command::Search { query, crs, remember } => {
            let client = Arc::new(build_client(&startup)?);
            client.api_key().ok_or(VWorldError::Unauthenticated)?;
            let candidates = match spawn_search(client, query, crs.clone()).wait().await {
                Some(WorkerEvent::Finished(candidates)) => candidates,
                Some(WorkerEvent::Failed(e)) => return Err(e),
                _ => Vec::new(),
            };

            if candidates.is_empty() {
                println!("no results");
                return Ok(());
            }
            for (i, c) in candidates.iter().enumerate() {
                println!("{:>2}. [{}] {}\t{}\t{}", i + 1, c.kind.as_str(), c.address, c.x, c.y);
            }

            if let Some(n) = remember {
                let picked = n
                    .checked_sub(1)
                    .and_then(|i| candidates.get(i))
                    .ok_or_else(|| {
                        VWorldError::ValidationFailure(format!("no result number {}", n))
                    })?;
                let mut recent = RecentSearches::load(history_path("recent_searches.json")?);
                recent.add(RecentSearch {
                    address: picked.address.clone(),
                    x: picked.x,
                    y: picked.y,
                    crs,
                })?;
                info!(address = %picked.address, "saved to recent searches");
            }
            Ok(())
        }

        Command::Geocode { addresses, file, crs } => {
            let mut addresses = addresses;
            if let Some(path) = file {
                let text = fs::read_to_string(&path).map_err(|e| {
                    VWorldError::ResourceFailure(format!("{}: {}", path.display(), e))
                })?;
                addresses.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            if addresses.is_empty() {
                return Err(VWorldError::ValidationFailure(
                    "give at least one address or --file".to_string(),
                ));
            }

            let client = Arc::new(build_client(&startup)?);
            client.api_key().ok_or(VWorldError::Unauthenticated)?;
            let handle = spawn_geocoding(client, addresses, crs);
            let mut interrupts = forward_interrupts();
            if drain_geocoding(handle, &mut interrupts).await? == BatchEnd::Aborted {
                std::process::exit(130);
            }
            Ok(())
        }

        Command::Reverse { coordinates, crs } => {
            let points = parse_coordinates(&coordinates.join(" "))?;
            let client = build_client(&startup)?;

            let lookups = points.iter().map(|p| client.reverse_geocode(*p, &crs));
            for (point, result) in points.iter().zip(join_all(lookups).await) {
                match result? {
                    Some(address) => println!(
                        "{} {}\tparcel: {}\troad: {}",
                        point.x,
                        point.y,
                        address.parcel.as_deref().unwrap_or("-"),
                        address.road.as_deref().unwrap_or("-"),
                    ),
                    None => println!("{} {}\tno address found", point.x, point.y),
                }
            }
            Ok(())
        }

        Command::Layers { filter, favorites } => {
            let client = build_client(&startup)?;
            let saved = Favorites::load(history_path("wfs_favorites.json")?);
            let filter = filter.map(|f| f.to_lowercase());

            for layer in client.wfs_layers().await? {
                let is_favorite = saved.contains(&layer.name);
                if favorites && !is_favorite {
                    continue;
                }
                if let Some(f) = &filter {
                    if !layer.to_string().to_lowercase().contains(f.as_str()) {
                        continue;
                    }
                }
                println!("{} {}", if is_favorite { "*" } else { " " }, layer);
            }
            Ok(())
        }

        Command::WfsUrl { layer, crs, bbox, max_features } => {
            check_layer_name(&layer)?;
            let client = build_client(&startup)?;
            let max_features = max_features.unwrap_or(startup.settings.max_features);
            println!("{}", client.wfs_feature_url(&layer, &crs, max_features, bbox.as_deref())?);
            Ok(())
        }

        Command::Wmts { kind } => {
            let client = build_client(&startup)?;
            println!("{}", client.wmts_layer_source(kind)?);
            Ok(())
        }

        Command::Points { text, crs } => {
            let points = parse_coordinates(&text)?;
            let geojson = points_to_geojson(&points, &crs);
            let pretty = serde_json::to_string_pretty(&geojson)
                .map_err(|e| VWorldError::InvalidResponse(e.to_string()))?;
            println!("{}", pretty);
            Ok(())
        }

        Command::Cache { action } => {
            let ttl = startup.settings.cache_ttl();
            let cache = match &startup.cache_dir {
                Some(dir) => CacheStore::with_dir(dir.clone(), ttl),
                None => CacheStore::new(ttl).ok_or_else(|| {
                    VWorldError::ResourceFailure("no cache directory available".to_string())
                })?,
            };
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats();
                    println!("directory: {}", cache.dir().display());
                    println!("files:     {}", stats.file_count);
                    println!(
                        "size:      {} bytes ({:.2} MB)",
                        stats.total_bytes,
                        stats.total_bytes as f64 / (1024.0 * 1024.0)
                    );
                }
                CacheAction::Clear => {
                    cache.clear();
                    println!("cache cleared");
                }
            }
            Ok(())
        }

        Command::Config { action } => {
            // Changes start from the stored file so per-run flags are not persisted.
            let mut stored = Settings::load(&startup.config_path);
            match action {
                ConfigAction::Show => {
                    let settings = &startup.settings;
                    println!("settings:     {}", startup.config_path.display());
                    println!(
                        "api key:      {}",
                        if startup.api_key.is_some() { "set" } else { "not set" }
                    );
                    println!("protocol:     {}", settings.protocol.as_str());
                    println!("search size:  {}", settings.search_size);
                    println!("max features: {}", settings.max_features);
                    println!("timeout:      {}s", settings.timeout_secs);
                    println!("cache ttl:    {}s", settings.cache_ttl_secs);
                }
                ConfigAction::SetKey { key } => {
                    let key = key.trim().to_string();
                    if !validate_api_key(&key) {
                        return Err(VWorldError::ValidationFailure(
                            "API keys are at least 32 letters, digits or hyphens".to_string(),
                        ));
                    }
                    stored.api_key = Some(key);
                    stored.save(&startup.config_path)?;
                    println!("API key saved");
                }
                ConfigAction::SetProtocol { protocol } => {
                    stored.protocol = protocol;
                    stored.save(&startup.config_path)?;
                    println!("protocol set to {}", protocol.as_str());
                }
            }
            Ok(())
        }

        Command::Recent { action } => {
            let mut recent = RecentSearches::load(history_path("recent_searches.json")?);
            match action {
                RecentAction::List => {
                    for entry in recent.entries() {
                        println!("{}\t{}\t{}\t{}", entry.address, entry.x, entry.y, entry.crs);
                    }
                }
                RecentAction::Clear => {
                    recent.clear()?;
                    println!("recent searches cleared");
                }
            }
            Ok(())
        }

        Command::Favorites { action } => {
            let mut favorites = Favorites::load(history_path("wfs_favorites.json")?);
            match action {
                FavoritesAction::List => {
                    for (name, title) in favorites.iter() {
                        println!("{}[{}]", title, name);
                    }
                }
                FavoritesAction::Add { name, title } => {
                    check_layer_name(&name)?;
                    favorites.add(&name, &title)?;
                    println!("added {}", name);
                }
                FavoritesAction::Remove { name } => {
                    if favorites.remove(&name)? {
                        println!("removed {}", name);
                    } else {
                        println!("{} is not a favorite", name);
                    }
                }
            }
            Ok(())
        }
    }
}

/// How a batch geocoding run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
    Finished,
    Cancelled,
    /// A second interrupt arrived before the worker stopped
    Aborted,
}

/// Forwards Ctrl-C presses to a channel for the lifetime of the process
fn forward_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Prints geocoding rows as they complete
///
/// The first interrupt cancels between addresses and the rows already printed
/// stay valid; a second one gives up without waiting.
async fn drain_geocoding(
    mut handle: WorkerHandle<Vec<GeocodeRecord>, GeocodeRecord>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<BatchEnd> {
    let mut interrupted = false;
    let mut interrupts_open = true;

    loop {
        tokio::select! {
            biased;

            signal = interrupts.recv(), if interrupts_open => {
                if signal.is_none() {
                    interrupts_open = false;
                    continue;
                }
                if interrupted {
                    eprintln!();
                    return Ok(BatchEnd::Aborted);
                }
                interrupted = true;
                eprintln!("\rcancelling; press Ctrl-C again to quit");
                handle.cancel();
            }
            event = handle.receiver.recv() => {
                let Some(event) = event else { return Ok(BatchEnd::Finished) };
                match event {
                    WorkerEvent::Status(message) => debug!("{}", message),
                    WorkerEvent::Progress(p) => eprint!("\r{:>3}%", p),
                    WorkerEvent::ItemCompleted { item, .. } => {
                        let (x, y) = item.point.map(|p| (p.x, p.y)).unwrap_or((0.0, 0.0));
                        let status = match &item.status {
                            GeocodeStatus::Found => "ok".to_string(),
                            GeocodeStatus::NotFound(reason) => format!("not found: {}", reason),
                            GeocodeStatus::Failed(message) => format!("error: {}", message),
                        };
                        println!("{}\t{}\t{}\t{}", item.address, x, y, status);
                    }
                    WorkerEvent::ItemFailed { .. } => {}
                    WorkerEvent::Finished(records) => {
                        eprintln!();
                        let found = records.iter().filter(|r| r.status == GeocodeStatus::Found).count();
                        info!(found, total = records.len(), "geocoding completed");
                        return Ok(BatchEnd::Finished);
                    }
                    WorkerEvent::Cancelled(records) => {
                        eprintln!();
                        eprintln!("cancelled after {} addresses", records.len());
                        return Ok(BatchEnd::Cancelled);
                    }
                    WorkerEvent::Failed(e) => return Err(e),
                }
            }
        }
    }
}

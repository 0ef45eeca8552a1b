//! Command-line interface parsing for the VWorld CLI
//!
//! This module defines the clap argument tree and folds global flags over the
//! stored settings into a `StartupConfig`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::api::MapKind;
use crate::config::{Protocol, Settings};
use crate::validate::validate_crs;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The CRS is not an `EPSG:<code>` identifier
    #[error("Invalid CRS: '{0}'. Expected EPSG:<code>, e.g. EPSG:4326")]
    InvalidCrs(String),

    /// No settings path was given and none could be derived
    #[error("Could not determine a settings location; pass --config")]
    NoConfigPath,
}

/// VWorld CLI - address search, geocoding and layer helpers for api.vworld.kr
#[derive(Parser, Debug)]
#[command(name = "vworld")]
#[command(about = "Address search, geocoding and map layer helpers for the VWorld API")]
#[command(version)]
pub struct Cli {
    /// API key (overrides VWORLD_API_KEY and the stored key)
    #[arg(long, global = true, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Call method for this run
    #[arg(long, global = true, value_enum)]
    pub protocol: Option<Protocol>,

    /// Path to options.json
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for cached responses
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write the response cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search addresses by free text
    Search {
        /// Text to search for
        query: String,
        /// Coordinate system of the returned points
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
        /// Save the N-th result (1-based) to recent searches
        #[arg(long, value_name = "N")]
        remember: Option<usize>,
    },
    /// Resolve addresses to coordinates
    Geocode {
        /// Addresses to resolve
        addresses: Vec<String>,
        /// Read addresses from a file, one per line
        #[arg(long, short, value_name = "FILE")]
        file: Option<PathBuf>,
        /// Coordinate system of the returned points
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
    },
    /// Find the addresses nearest to coordinates
    Reverse {
        /// Pairs of "x y" values
        #[arg(required = true, num_args = 2.., allow_negative_numbers = true)]
        coordinates: Vec<String>,
        /// Coordinate system of the input
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
    },
    /// List WFS layers offered by the service
    Layers {
        /// Only show layers whose name or title contains this text
        #[arg(long)]
        filter: Option<String>,
        /// Only show favorites
        #[arg(long)]
        favorites: bool,
    },
    /// Print a WFS GetFeature URL for a layer
    WfsUrl {
        /// Layer type name, e.g. lt_c_adsido
        layer: String,
        /// Output coordinate system
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
        /// Bounding box as minx,miny,maxx,maxy
        #[arg(long)]
        bbox: Option<String>,
        /// Feature limit (defaults to the stored setting)
        #[arg(long)]
        max_features: Option<u32>,
    },
    /// Print the WMTS source for a basemap
    Wmts {
        /// Basemap flavour
        #[arg(value_enum)]
        kind: MapKind,
    },
    /// Turn "x y" pairs into a GeoJSON point collection
    Points {
        /// Whitespace-separated coordinates
        text: String,
        /// Coordinate system of the input
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
    },
    /// Inspect or empty the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Recent searches
    Recent {
        #[command(subcommand)]
        action: RecentAction,
    },
    /// Favorite WFS layers
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show cache size
    Stats,
    /// Remove every cached response
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the stored settings
    Show,
    /// Store the API key
    SetKey { key: String },
    /// Store the call method
    SetProtocol {
        #[arg(value_enum)]
        protocol: Protocol,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecentAction {
    /// List recent searches
    List,
    /// Forget recent searches
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum FavoritesAction {
    /// List favorite layers
    List,
    /// Add a layer
    Add { name: String, title: String },
    /// Remove a layer
    Remove { name: String },
}

/// Settings for this run after applying command-line overrides
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Where `options.json` lives
    pub config_path: PathBuf,
    /// Stored settings with `--protocol` applied
    pub settings: Settings,
    /// Resolved API key
    pub api_key: Option<String>,
    /// Whether responses are cached
    pub use_cache: bool,
    /// Cache directory override
    pub cache_dir: Option<PathBuf>,
}

impl StartupConfig {
    /// Loads stored settings and applies global flags
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with overrides applied
    /// * `Err(CliError)` if a CRS argument is invalid or no settings path exists
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if let Some(crs) = cli.command.crs() {
            if !validate_crs(crs) {
                return Err(CliError::InvalidCrs(crs.to_string()));
            }
        }

        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => Settings::default_path().ok_or(CliError::NoConfigPath)?,
        };

        let mut settings = Settings::load(&config_path);
        if let Some(protocol) = cli.protocol {
            settings.protocol = protocol;
        }
        let api_key = settings.resolve_api_key(cli.api_key.as_deref());

        Ok(StartupConfig {
            config_path,
            settings,
            api_key,
            use_cache: !cli.no_cache,
            cache_dir: cli.cache_dir.clone(),
        })
    }
}

impl Command {
    /// CRS argument of the command, if it takes one
    pub fn crs(&self) -> Option<&str> {
        match self {
            Command::Search { crs, .. }
            | Command::Geocode { crs, .. }
            | Command::Reverse { crs, .. }
            | Command::WfsUrl { crs, .. }
            | Command::Points { crs, .. } => Some(crs),
            _ => None,
        }
    }
}

/// Default log filter for a `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parse_search() {
        let cli = Cli::parse_from(["vworld", "search", "종로구 세종대로"]);
        match cli.command {
            Command::Search { query, crs, remember } => {
                assert_eq!(query, "종로구 세종대로");
                assert_eq!(crs, "EPSG:4326");
                assert!(remember.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "vworld",
            "geocode",
            "서울특별시 종로구 1",
            "--api-key",
            "KEY",
            "--protocol",
            "https-insecure",
            "-vv",
        ]);
        assert_eq!(cli.api_key.as_deref(), Some("KEY"));
        assert_eq!(cli.protocol, Some(Protocol::HttpsInsecure));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_parse_reverse_pairs() {
        let cli = Cli::parse_from(["vworld", "reverse", "126.97", "37.56", "127.0", "37.5"]);
        match cli.command {
            Command::Reverse { coordinates, .. } => assert_eq!(coordinates.len(), 4),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_wmts_kind() {
        let cli = Cli::parse_from(["vworld", "wmts", "satellite"]);
        assert!(matches!(cli.command, Command::Wmts { kind: MapKind::Satellite }));
    }

    #[test]
    fn test_cli_rejects_unknown_protocol() {
        let result = Cli::try_parse_from(["vworld", "--protocol", "ftp", "cache", "stats"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), "warn");
        assert_eq!(log_level(1), "info");
        assert_eq!(log_level(5), "debug");
    }

    #[test]
    fn test_startup_config_applies_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        let cli = Cli::parse_from([
            "vworld",
            "--config",
            path.to_str().unwrap(),
            "--protocol",
            "http",
            "--api-key",
            "FLAGKEY",
            "--no-cache",
            "cache",
            "stats",
        ]);

        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.settings.protocol, Protocol::Http);
        assert_eq!(config.api_key.as_deref(), Some("FLAGKEY"));
        assert!(!config.use_cache);
    }

    #[test]
    fn test_startup_config_rejects_invalid_crs() {
        let cli = Cli::parse_from(["vworld", "search", "x", "--crs", "WGS84"]);
        let result = StartupConfig::from_cli(&cli);
        assert!(matches!(result, Err(CliError::InvalidCrs(_))));
    }
}

//! Recent searches and WFS favorites
//!
//! Both are small JSON documents read and written wholesale. A missing or
//! unreadable document is treated as empty; failing to write one is an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VWorldError};

/// Maximum number of remembered searches
pub const MAX_RECENT_SEARCHES: usize = 10;

/// Reads a JSON document, returning `T::default()` if it is missing or invalid
pub fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to read JSON file");
            }
            return T::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid JSON file; ignoring");
        T::default()
    })
}

/// Writes a JSON document, creating the parent directory
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| VWorldError::resource(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| VWorldError::resource(path, e))?;
    fs::write(path, json).map_err(|e| VWorldError::resource(path, e))?;
    info!(path = %path.display(), "JSON file saved");
    Ok(())
}

/// A remembered search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub address: String,
    pub x: f64,
    pub y: f64,
    /// CRS the coordinates are expressed in
    pub crs: String,
}

/// Most-recent-first list of searches, persisted to `recent_searches.json`
#[derive(Debug)]
pub struct RecentSearches {
    path: PathBuf,
    entries: Vec<RecentSearch>,
}

impl RecentSearches {
    /// Loads the list from disk
    pub fn load(path: PathBuf) -> Self {
        let mut entries: Vec<RecentSearch> = read_json(&path);
        entries.truncate(MAX_RECENT_SEARCHES);
        Self { path, entries }
    }

    /// Entries, newest first
    pub fn entries(&self) -> &[RecentSearch] {
        &self.entries
    }

    /// Puts a search at the front and saves
    ///
    /// An existing entry for the same address moves to the front. Past the
    /// capacity, the oldest entry is dropped.
    pub fn add(&mut self, search: RecentSearch) -> Result<()> {
        self.entries.retain(|e| e.address != search.address);
        self.entries.insert(0, search);
        self.entries.truncate(MAX_RECENT_SEARCHES);
        write_json(&self.path, &self.entries)
    }

    /// Forgets every entry and saves
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        write_json(&self.path, &self.entries)
    }
}

/// Favorite WFS layers (type name to title), persisted to `wfs_favorites.json`
#[derive(Debug)]
pub struct Favorites {
    path: PathBuf,
    layers: BTreeMap<String, String>,
}

impl Favorites {
    /// Loads favorites from disk
    pub fn load(path: PathBuf) -> Self {
        let layers = read_json(&path);
        Self { path, layers }
    }

    /// Favorite layers as `(name, title)`, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether a layer is a favorite
    pub fn contains(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    /// Adds or renames a favorite and saves
    pub fn add(&mut self, name: &str, title: &str) -> Result<()> {
        self.layers.insert(name.to_string(), title.to_string());
        write_json(&self.path, &self.layers)
    }

    /// Removes a favorite and saves; returns whether it existed
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.layers.remove(name).is_none() {
            return Ok(false);
        }
        write_json(&self.path, &self.layers)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn search(address: &str) -> RecentSearch {
        RecentSearch {
            address: address.to_string(),
            x: 126.97,
            y: 37.56,
            crs: "EPSG:4326".to_string(),
        }
    }

    #[test]
    fn test_read_json_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let value: Vec<RecentSearch> = read_json(&temp_dir.path().join("none.json"));
        assert!(value.is_empty());
    }

    #[test]
    fn test_read_json_corrupt_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "[{").unwrap();

        let value: BTreeMap<String, String> = read_json(&path);
        assert!(value.is_empty());
    }

    #[test]
    fn test_write_json_fails_when_parent_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let err = write_json(&blocker.join("x.json"), &1).unwrap_err();
        assert!(matches!(err, VWorldError::ResourceFailure(_)));
    }

    #[test]
    fn test_recent_searches_newest_first_and_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("recent_searches.json");

        let mut recent = RecentSearches::load(path.clone());
        recent.add(search("first")).unwrap();
        recent.add(search("second")).unwrap();

        let reloaded = RecentSearches::load(path);
        let addresses: Vec<&str> = reloaded.entries().iter().map(|e| e.address.as_str()).collect();
        assert_eq!(addresses, vec!["second", "first"]);
    }

    #[test]
    fn test_recent_searches_evicts_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let mut recent = RecentSearches::load(temp_dir.path().join("recent.json"));

        for i in 0..=MAX_RECENT_SEARCHES {
            recent.add(search(&format!("addr {}", i))).unwrap();
        }

        assert_eq!(recent.entries().len(), MAX_RECENT_SEARCHES);
        assert_eq!(recent.entries()[0].address, format!("addr {}", MAX_RECENT_SEARCHES));
        assert!(
            !recent.entries().iter().any(|e| e.address == "addr 0"),
            "Oldest entry should be evicted"
        );
    }

    #[test]
    fn test_recent_searches_readding_moves_to_front() {
        let temp_dir = TempDir::new().unwrap();
        let mut recent = RecentSearches::load(temp_dir.path().join("recent.json"));
        recent.add(search("a")).unwrap();
        recent.add(search("b")).unwrap();
        recent.add(search("a")).unwrap();

        let addresses: Vec<&str> = recent.entries().iter().map(|e| e.address.as_str()).collect();
        assert_eq!(addresses, vec!["a", "b"]);
    }

    #[test]
    fn test_recent_searches_clear() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("recent.json");
        let mut recent = RecentSearches::load(path.clone());
        recent.add(search("a")).unwrap();

        recent.clear().unwrap();

        assert!(RecentSearches::load(path).entries().is_empty());
    }

    #[test]
    fn test_favorites_add_remove() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wfs_favorites.json");

        let mut favorites = Favorites::load(path.clone());
        favorites.add("lt_c_adsido", "광역시도").unwrap();
        favorites.add("lp_pa_cbnd_bubun", "연속지적도").unwrap();
        assert!(favorites.contains("lt_c_adsido"));

        assert!(favorites.remove("lt_c_adsido").unwrap());
        assert!(!favorites.remove("lt_c_adsido").unwrap());

        let reloaded = Favorites::load(path);
        let items: Vec<(&str, &str)> = reloaded.iter().collect();
        assert_eq!(items, vec![("lp_pa_cbnd_bubun", "연속지적도")]);
    }
}

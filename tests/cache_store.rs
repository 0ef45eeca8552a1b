//! Integration tests for the response cache through its public API

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use vworld::cache::{fingerprint, CacheStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Coord {
    x: f64,
    y: f64,
}

#[test]
fn test_entry_expires_after_ttl() {
    let temp_dir = TempDir::new().unwrap();
    let cache = CacheStore::with_dir(temp_dir.path().to_path_buf(), Duration::from_secs(1));
    let coord = Coord { x: 126.97, y: 37.56 };

    cache.set("geocode:EPSG:4326:세종대로 175", &coord);
    assert_eq!(cache.get::<Coord>("geocode:EPSG:4326:세종대로 175"), Some(coord));

    std::thread::sleep(Duration::from_millis(1100));

    assert_eq!(cache.get::<Coord>("geocode:EPSG:4326:세종대로 175"), None);
    let file = temp_dir
        .path()
        .join(format!("{}.cache", fingerprint("geocode:EPSG:4326:세종대로 175")));
    assert!(!file.exists(), "Expired file should be deleted on read");
}

#[tokio::test]
async fn test_store_is_shared_across_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(CacheStore::with_dir(
        temp_dir.path().to_path_buf(),
        Duration::from_secs(3600),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.set(&format!("key-{}", i), &i);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.file_count, 8);
    assert_eq!(stats.memory_entry_count, 8);
    assert_eq!(cache.get::<i32>("key-5"), Some(5));
}

//! Input validation and point-mapping helpers

use serde_json::{json, Value};
use tracing::warn;

use crate::api::Point;
use crate::error::{Result, VWorldError};

/// Minimum length of a VWorld API key
const MIN_API_KEY_LEN: usize = 32;

/// Characters that cannot appear in a layer name
const INVALID_LAYER_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Rough bounding box of South Korea in WGS84 (lon, lat)
const KOREA_LON: (f64, f64) = (124.0, 132.0);
const KOREA_LAT: (f64, f64) = (33.0, 39.0);

/// Checks that an API key has the shape VWorld issues
///
/// At least 32 ASCII letters, digits or hyphens.
pub fn validate_api_key(api_key: &str) -> bool {
    api_key.len() >= MIN_API_KEY_LEN
        && api_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Parses whitespace-separated `lon lat` pairs
///
/// Pairs outside the Korean bounding box are accepted with a warning, since
/// they may be in a projected CRS.
pub fn parse_coordinates(text: &str) -> Result<Vec<Point>> {
    let parts: Vec<&str> = text.split_whitespace().collect();

    if parts.is_empty() {
        return Err(VWorldError::ValidationFailure(
            "enter at least one coordinate pair".to_string(),
        ));
    }
    if parts.len() % 2 != 0 {
        return Err(VWorldError::ValidationFailure(
            "coordinates must come in pairs (longitude latitude)".to_string(),
        ));
    }

    parts
        .chunks(2)
        .map(|pair| {
            let x = parse_number(pair[0])?;
            let y = parse_number(pair[1])?;
            if !(KOREA_LON.0..=KOREA_LON.1).contains(&x) || !(KOREA_LAT.0..=KOREA_LAT.1).contains(&y)
            {
                warn!(x, y, "coordinate is outside the Korean WGS84 range");
            }
            Ok(Point { x, y })
        })
        .collect()
}

fn parse_number(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| VWorldError::ValidationFailure(format!("invalid coordinate value: {}", s)))
}

/// Checks for an `EPSG:<digits>` code
pub fn validate_crs(crs: &str) -> bool {
    crs.strip_prefix("EPSG:")
        .is_some_and(|code| !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()))
}

/// Checks that a layer name is non-empty and free of path-like characters
pub fn validate_layer_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(INVALID_LAYER_CHARS)
}

/// Point mapping output: a GeoJSON FeatureCollection with one feature per point
pub fn points_to_geojson(points: &[Point], crs: &str) -> Value {
    let features: Vec<Value> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [p.x, p.y] },
                "properties": { "id": i + 1 },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": crs } },
        "features": features,
    })
}

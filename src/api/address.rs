//! Address search, geocoding and reverse geocoding
//!
//! Each call fixes the endpoint and parameter shape, then interprets the
//! response envelope. Results are cached when the client has a cache attached.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiStatus, Point, VWorldClient};
use crate::error::Result;

const SEARCH_ENDPOINT: &str = "/req/search";
const ADDRESS_ENDPOINT: &str = "/req/address";

/// Message used when the service gives no reason for a failed lookup
const NOT_FOUND_REASON: &str = "address not found";

/// Which address system a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// Lot-number (jibun) address
    Parcel,
    /// Road-name address
    Road,
}

impl AddressKind {
    /// Value of the `category` parameter on `/req/search`
    fn search_category(self) -> &'static str {
        match self {
            AddressKind::Parcel => "PARCEL",
            AddressKind::Road => "ROAD",
        }
    }

    /// Value of the `type` parameter on `/req/address`
    pub fn as_str(self) -> &'static str {
        match self {
            AddressKind::Parcel => "parcel",
            AddressKind::Road => "road",
        }
    }

    fn other(self) -> Self {
        match self {
            AddressKind::Parcel => AddressKind::Road,
            AddressKind::Road => AddressKind::Parcel,
        }
    }
}

/// One address search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCandidate {
    /// Full address text
    pub address: String,
    /// X coordinate (longitude in EPSG:4326)
    pub x: f64,
    /// Y coordinate (latitude in EPSG:4326)
    pub y: f64,
    /// Address system of `address`
    pub kind: AddressKind,
}

/// Result of a forward geocoding lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GeocodeOutcome {
    /// The address resolved to a point
    Found {
        point: Point,
        /// Address system that matched
        kind: AddressKind,
    },
    /// Neither address system matched
    NotFound {
        /// Reason reported by the service
        reason: String,
    },
}

/// Addresses nearest to a point
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReverseAddress {
    /// Lot-number address
    pub parcel: Option<String>,
    /// Road-name address
    pub road: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    address: SearchItemAddress,
    point: Point,
}

#[derive(Debug, Deserialize)]
struct SearchItemAddress {
    #[serde(default)]
    road: Option<String>,
    #[serde(default)]
    parcel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoordResult {
    point: Point,
}

#[derive(Debug, Deserialize)]
struct ReverseItem {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

impl VWorldClient {
    /// Searches for addresses matching free text
    ///
    /// Lot-number addresses are tried first; if none match, the same query is
    /// repeated against road-name addresses.
    ///
    /// # Returns
    /// * `Ok(Vec<AddressCandidate>)` - Ranked candidates, empty when nothing matched
    /// * `Err(VWorldError)` - Transport failures or a service `ERROR` status
    pub async fn search_addresses(&self, query: &str, crs: &str) -> Result<Vec<AddressCandidate>> {
        let cache_key = format!("search:{}:{}", crs, query);
        if let Some(cached) = self.cache().and_then(|c| c.get(&cache_key)) {
            return Ok(cached);
        }

        let mut candidates = self.search_category(query, crs, AddressKind::Parcel).await?;
        if candidates.is_empty() {
            debug!(query, "no parcel matches; searching road addresses");
            candidates = self.search_category(query, crs, AddressKind::Road).await?;
        }

        if !candidates.is_empty() {
            if let Some(cache) = self.cache() {
                cache.set(&cache_key, &candidates);
            }
        }
        info!(query, count = candidates.len(), "address search completed");
        Ok(candidates)
    }

    async fn search_category(
        &self,
        query: &str,
        crs: &str,
        kind: AddressKind,
    ) -> Result<Vec<AddressCandidate>> {
        let size = self.search_size().to_string();
        let params = [
            ("request", "search"),
            ("format", "json"),
            ("size", size.as_str()),
            ("page", "1"),
            ("query", query),
            ("type", "ADDRESS"),
            ("category", kind.search_category()),
            ("crs", crs),
        ];

        let response = self
            .request_json(SEARCH_ENDPOINT, &params)
            .await?
            .into_checked()?;
        if response.status == ApiStatus::NotFound || response.result.is_none() {
            return Ok(Vec::new());
        }

        let result: SearchResult = response.result_as()?;
        Ok(result
            .items
            .into_iter()
            .filter_map(|item| {
                let address = match kind {
                    AddressKind::Parcel => item.address.parcel,
                    AddressKind::Road => item.address.road,
                }?;
                Some(AddressCandidate {
                    address,
                    x: item.point.x,
                    y: item.point.y,
                    kind,
                })
            })
            .collect())
    }

    /// Resolves one address to a point
    ///
    /// Looks the address up as a road-name address first and, if that is not
    /// `OK`, once more as a lot-number address.
    ///
    /// # Returns
    /// * `Ok(GeocodeOutcome::Found)` - Point and the address system that matched
    /// * `Ok(GeocodeOutcome::NotFound)` - Both lookups failed; carries the service reason
    /// * `Err(VWorldError)` - Transport failures
    pub async fn geocode(&self, address: &str, crs: &str) -> Result<GeocodeOutcome> {
        let cache_key = format!("geocode:{}:{}", crs, address);
        if let Some(cached) = self.cache().and_then(|c| c.get(&cache_key)) {
            return Ok(cached);
        }

        let primary = AddressKind::Road;
        let outcome = match self.geocode_as(address, crs, primary).await? {
            found @ GeocodeOutcome::Found { .. } => found,
            GeocodeOutcome::NotFound { .. } => {
                debug!(address, "road lookup failed; retrying as parcel");
                self.geocode_as(address, crs, primary.other()).await?
            }
        };

        if let (GeocodeOutcome::Found { .. }, Some(cache)) = (&outcome, self.cache()) {
            cache.set(&cache_key, &outcome);
        }
        Ok(outcome)
    }

    async fn geocode_as(&self, address: &str, crs: &str, kind: AddressKind) -> Result<GeocodeOutcome> {
        let params = [
            ("service", "address"),
            ("request", "getcoord"),
            ("crs", crs),
            ("address", address),
            ("format", "json"),
            ("type", kind.as_str()),
        ];

        let response = self.request_json(ADDRESS_ENDPOINT, &params).await?;
        if response.status != ApiStatus::Ok {
            return Ok(GeocodeOutcome::NotFound {
                reason: response.reason(NOT_FOUND_REASON),
            });
        }

        let result: CoordResult = response.result_as()?;
        Ok(GeocodeOutcome::Found {
            point: result.point,
            kind,
        })
    }

    /// Finds the lot-number and road-name addresses nearest to a point
    ///
    /// # Returns
    /// * `Ok(Some(ReverseAddress))` - At least one address was found
    /// * `Ok(None)` - The service reported `NOT_FOUND`
    /// * `Err(VWorldError)` - Transport failures or a service `ERROR` status
    pub async fn reverse_geocode(&self, point: Point, crs: &str) -> Result<Option<ReverseAddress>> {
        let cache_key = format!("reverse:{}:{},{}", crs, point.x, point.y);
        if let Some(cached) = self.cache().and_then(|c| c.get(&cache_key)) {
            return Ok(Some(cached));
        }

        let coordinate = format!("{},{}", point.x, point.y);
        let params = [
            ("service", "address"),
            ("request", "getAddress"),
            ("format", "json"),
            ("crs", crs),
            ("point", coordinate.as_str()),
            ("type", "both"),
        ];

        let response = self
            .request_json(ADDRESS_ENDPOINT, &params)
            .await?
            .into_checked()?;
        if response.status == ApiStatus::NotFound {
            return Ok(None);
        }

        let items: Vec<ReverseItem> = response.result_as()?;
        let mut address = ReverseAddress::default();
        for item in items {
            match item.kind.as_str() {
                "parcel" if address.parcel.is_none() => address.parcel = Some(item.text),
                "road" if address.road.is_none() => address.road = Some(item.text),
                _ => {}
            }
        }

        if address.parcel.is_none() && address.road.is_none() {
            return Ok(None);
        }
        if let Some(cache) = self.cache() {
            cache.set(&cache_key, &address);
        }
        Ok(Some(address))
    }
}

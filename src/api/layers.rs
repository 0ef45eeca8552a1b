//! WFS and WMTS layer helpers
//!
//! The layers themselves are drawn by whatever map client consumes these
//! URLs; this module only lists WFS feature types and builds source strings.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::VWorldClient;
use crate::error::{Result, VWorldError};

const WFS_ENDPOINT: &str = "/req/wfs";

/// Tile matrix set used by every VWorld WMTS layer
pub const TILE_MATRIX_SET: &str = "GoogleMapsCompatible";

/// A WFS feature type offered by the service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WfsLayer {
    /// Display title
    pub title: String,
    /// Type name used in `GetFeature` requests
    pub name: String,
}

impl fmt::Display for WfsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.title, self.name)
    }
}

/// VWorld basemap flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MapKind {
    /// General map
    Base,
    /// Aerial imagery
    Satellite,
    /// Labels and roads over imagery
    Hybrid,
}

impl MapKind {
    /// Layer identifier in the WMTS capabilities
    pub fn layer_name(self) -> &'static str {
        match self {
            MapKind::Base => "Base",
            MapKind::Satellite => "Satellite",
            MapKind::Hybrid => "Hybrid",
        }
    }

    /// Tile image format
    pub fn image_format(self) -> &'static str {
        match self {
            MapKind::Satellite => "image/jpeg",
            MapKind::Base | MapKind::Hybrid => "image/png",
        }
    }
}

impl VWorldClient {
    /// Fetches the WFS capabilities and lists the offered feature types
    ///
    /// Layers are sorted by title.
    pub async fn wfs_layers(&self) -> Result<Vec<WfsLayer>> {
        let body = self.wfs_capabilities().await?;
        let mut layers = parse_feature_types(&body);
        if layers.is_empty() {
            return Err(VWorldError::InvalidResponse(
                "capabilities document lists no feature types".to_string(),
            ));
        }
        layers.sort();
        info!(count = layers.len(), "WFS layers loaded");
        Ok(layers)
    }

    /// Raw WFS 1.1.0 `GetCapabilities` document
    pub async fn wfs_capabilities(&self) -> Result<String> {
        let params = [
            ("service", "WFS"),
            ("request", "GetCapabilities"),
            ("version", "1.1.0"),
        ];
        self.request(WFS_ENDPOINT, &params).await
    }

    /// URL of the WMTS capabilities document, which embeds the key in its path
    pub fn wmts_capabilities_url(&self) -> Result<String> {
        let key = self.require_key()?;
        Ok(format!(
            "{}/req/wmts/1.0.0/{}/WMTSCapabilities.xml",
            self.base_url(),
            key
        ))
    }

    /// WMTS source string for a basemap, in the `key=value&...` form map clients accept
    pub fn wmts_layer_source(&self, kind: MapKind) -> Result<String> {
        Ok(format!(
            "crs=EPSG:3857&dpiMode=7&format={}&layers={}&styles=default&tileMatrixSet={}&url={}",
            kind.image_format(),
            kind.layer_name(),
            TILE_MATRIX_SET,
            self.wmts_capabilities_url()?
        ))
    }

    /// WFS `GetFeature` URL for one feature type
    ///
    /// # Arguments
    /// * `type_name` - Feature type, e.g. `lp_pa_cbnd_bubun`
    /// * `crs` - Output SRS, e.g. `EPSG:4326`
    /// * `max_features` - Feature limit
    /// * `bbox` - Optional `minx,miny,maxx,maxy` filter
    pub fn wfs_feature_url(
        &self,
        type_name: &str,
        crs: &str,
        max_features: u32,
        bbox: Option<&str>,
    ) -> Result<String> {
        let key = self.require_key()?;
        let max_features = max_features.to_string();
        let mut params = vec![
            ("key", key),
            ("service", "WFS"),
            ("version", "1.1.0"),
            ("request", "GetFeature"),
            ("typename", type_name),
            ("srsname", crs),
            ("maxfeatures", max_features.as_str()),
            ("output", "application/json"),
        ];
        if let Some(bbox) = bbox {
            params.push(("bbox", bbox));
        }

        let url = Url::parse_with_params(&format!("{}{}", self.base_url(), WFS_ENDPOINT), &params)
            .map_err(|e| VWorldError::ValidationFailure(format!("invalid WFS URL: {}", e)))?;
        Ok(url.to_string())
    }
}

/// Pulls `Name`/`Title` pairs out of every `FeatureType` element
///
/// Only this narrow, flat structure is needed, so the document is scanned
/// rather than fully parsed. Namespace prefixes on the tags are ignored.
pub fn parse_feature_types(xml: &str) -> Vec<WfsLayer> {
    let mut layers = Vec::new();
    let mut rest = xml;

    while let Some((block, after)) = next_element(rest, "FeatureType") {
        let name = next_element(block, "Name")
            .map(|(text, _)| text.trim())
            .filter(|text| !text.is_empty());
        let title = next_element(block, "Title").map(|(text, _)| text.trim());
        if let (Some(name), Some(title)) = (name, title) {
            layers.push(WfsLayer {
                title: title.to_string(),
                name: name.to_string(),
            });
        }
        rest = after;
    }
    layers
}

/// Finds the next `<[prefix:]tag ...>...</[prefix:]tag>` and returns its inner
/// text and the remainder after the closing tag
///
/// A self-closing `<tag/>` has empty content.
fn next_element<'a>(xml: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let mut search = 0;
    loop {
        let open = search + xml[search..].find('<')?;
        let after_lt = &xml[open + 1..];
        let name_end = after_lt.find(|c: char| c == '>' || c == '/' || c.is_whitespace())?;
        let name = &after_lt[..name_end];
        let local = name.rsplit(':').next().unwrap_or(name);

        if local == tag && !name.starts_with('/') && !name.is_empty() {
            let tag_end = open + 1 + after_lt.find('>')?;
            if xml[..tag_end].ends_with('/') {
                return Some(("", &xml[tag_end + 1..]));
            }
            let content_start = tag_end + 1;
            let close = format!("</{}>", name);
            let content_len = xml[content_start..].find(&close)?;
            let content = &xml[content_start..content_start + content_len];
            let rest = &xml[content_start + content_len + close.len()..];
            return Some((content, rest));
        }
        search = open + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities xmlns:wfs="http://www.opengis.net/wfs" version="1.1.0">
  <FeatureTypeList>
    <FeatureType>
      <Name>lp_pa_cbnd_bubun</Name>
      <Title>연속지적도(부번)</Title>
      <DefaultSRS>EPSG:4326</DefaultSRS>
    </FeatureType>
    <FeatureType>
      <Name>lt_c_adsido</Name>
      <Title>광역시도</Title>
    </FeatureType>
    <FeatureType>
      <Title>no name here</Title>
    </FeatureType>
  </FeatureTypeList>
</wfs:WFS_Capabilities>"#;

    fn client_with_key() -> VWorldClient {
        VWorldClient::new(ClientConfig::default().with_api_key("TESTKEY")).unwrap()
    }

    #[test]
    fn test_parse_feature_types() {
        let layers = parse_feature_types(CAPABILITIES);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].name, "lp_pa_cbnd_bubun");
        assert_eq!(layers[0].title, "연속지적도(부번)");
        assert_eq!(layers[1].to_string(), "광역시도[lt_c_adsido]");
    }

    #[test]
    fn test_parse_feature_types_with_namespace_prefix() {
        let xml = "<wfs:FeatureType><wfs:Name>a</wfs:Name><wfs:Title>A</wfs:Title></wfs:FeatureType>";
        let layers = parse_feature_types(xml);
        assert_eq!(layers, vec![WfsLayer { title: "A".into(), name: "a".into() }]);
    }

    #[test]
    fn test_self_closing_elements_do_not_borrow_from_next_layer() {
        let xml = "<FeatureTypeList>\
            <FeatureType/>\
            <FeatureType><Name/><Title>empty</Title></FeatureType>\
            <FeatureType><Name>lt_c_adsido</Name><Title>광역시도</Title></FeatureType>\
            </FeatureTypeList>";
        let layers = parse_feature_types(xml);
        assert_eq!(
            layers,
            vec![WfsLayer { title: "광역시도".into(), name: "lt_c_adsido".into() }]
        );
    }

    #[test]
    fn test_feature_type_list_is_not_mistaken_for_feature_type() {
        let xml = "<FeatureTypeList></FeatureTypeList>";
        assert!(parse_feature_types(xml).is_empty());
    }

    #[test]
    fn test_map_kind_formats() {
        assert_eq!(MapKind::Satellite.image_format(), "image/jpeg");
        assert_eq!(MapKind::Base.image_format(), "image/png");
        assert_eq!(MapKind::Hybrid.layer_name(), "Hybrid");
    }

    #[test]
    fn test_wmts_capabilities_url_embeds_key() {
        let url = client_with_key().wmts_capabilities_url().unwrap();
        assert_eq!(
            url,
            "https://api.vworld.kr/req/wmts/1.0.0/TESTKEY/WMTSCapabilities.xml"
        );
    }

    #[test]
    fn test_wmts_layer_source() {
        let source = client_with_key().wmts_layer_source(MapKind::Satellite).unwrap();
        assert!(source.starts_with("crs=EPSG:3857&"));
        assert!(source.contains("format=image/jpeg"));
        assert!(source.contains("layers=Satellite"));
        assert!(source.contains("tileMatrixSet=GoogleMapsCompatible"));
        assert!(source.ends_with("TESTKEY/WMTSCapabilities.xml"));
    }

    #[test]
    fn test_wfs_feature_url() {
        let url = client_with_key()
            .wfs_feature_url("lt_c_adsido", "EPSG:4326", 1000, Some("126,37,127,38"))
            .unwrap();
        assert!(url.starts_with("https://api.vworld.kr/req/wfs?"));
        assert!(url.contains("key=TESTKEY"));
        assert!(url.contains("typename=lt_c_adsido"));
        assert!(url.contains("srsname=EPSG%3A4326"));
        assert!(url.contains("maxfeatures=1000"));
        assert!(url.contains("bbox=126%2C37%2C127%2C38"));
    }

    #[test]
    fn test_url_builders_require_key() {
        let client = VWorldClient::new(ClientConfig::default()).unwrap();
        assert!(matches!(
            client.wmts_capabilities_url(),
            Err(VWorldError::Unauthenticated)
        ));
        assert!(client.wfs_feature_url("x", "EPSG:4326", 1, None).is_err());
    }
}

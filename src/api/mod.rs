//! VWorld API client
//!
//! Builds authenticated GET requests against the VWorld host and maps
//! transport failures onto `VWorldError`. Endpoint-specific calls live in the
//! `address` and `layers` submodules and go through [`VWorldClient::request`].

pub mod address;
pub mod layers;

use std::error::Error as StdError;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::error::{Result, VWorldError};

pub use address::{AddressCandidate, AddressKind, GeocodeOutcome, ReverseAddress};
pub use layers::{MapKind, WfsLayer};

const USER_AGENT_VALUE: &str = concat!("vworld-cli/", env!("CARGO_PKG_VERSION"));

/// A coordinate pair in whatever CRS the request asked for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(deserialize_with = "number_or_string")]
    pub x: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub y: f64,
}

/// Status field of the response envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiStatus {
    Ok,
    NotFound,
    Error,
}

impl<'de> Deserialize<'de> for ApiStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let status = String::deserialize(deserializer)?;
        Ok(match status.as_str() {
            "OK" => ApiStatus::Ok,
            "NOT_FOUND" => ApiStatus::NotFound,
            _ => ApiStatus::Error,
        })
    }
}

/// `{ "response": { status, result | error } }`
#[derive(Debug, Deserialize)]
struct Envelope {
    response: EnvelopeBody,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    status: ApiStatus,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ServiceErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// A decoded response envelope
#[derive(Debug)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub result: Option<Value>,
    pub error_code: Option<String>,
    pub error_text: Option<String>,
}

impl ApiResponse {
    /// Parses the standard envelope from a response body
    pub fn parse(body: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| VWorldError::InvalidResponse(format!("unexpected envelope: {}", e)))?;
        let body = envelope.response;
        let error = body.error.unwrap_or_default();
        Ok(Self {
            status: body.status,
            result: body.result,
            error_code: error.code,
            error_text: error.text,
        })
    }

    /// Turns an `ERROR` status into `ServiceError`, passing `OK`/`NOT_FOUND` through
    pub fn into_checked(self) -> Result<Self> {
        if self.status == ApiStatus::Error {
            return Err(VWorldError::ServiceError {
                code: self.error_code,
                text: self
                    .error_text
                    .unwrap_or_else(|| "unknown service error".to_string()),
            });
        }
        Ok(self)
    }

    /// Decodes the `result` member into `T`
    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let result = self
            .result
            .clone()
            .ok_or_else(|| VWorldError::InvalidResponse("missing result".to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| VWorldError::InvalidResponse(format!("unexpected result: {}", e)))
    }

    /// Error text from the envelope, or a fallback
    pub fn reason(&self, fallback: &str) -> String {
        self.error_text
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Client for the VWorld REST API
#[derive(Debug, Clone)]
pub struct VWorldClient {
    /// HTTP client for making requests
    http_client: Client,
    /// `<scheme><host>` or an override
    base_url: String,
    /// Key merged into every request
    api_key: Option<String>,
    /// Candidates per address search
    search_size: u32,
    /// Optional response cache
    cache: Option<Arc<CacheStore>>,
}

impl VWorldClient {
    /// Creates a client from an explicit configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let verify_tls = config.protocol.verify_tls();
        if !verify_tls {
            warn!(
                "TLS certificate verification is DISABLED; responses from {} cannot be trusted",
                config.base_url()
            );
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| VWorldError::RequestFailure {
                status: None,
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            base_url: config.base_url(),
            api_key: config.api_key.filter(|k| !k.trim().is_empty()),
            search_size: config.search_size,
            cache: None,
        })
    }

    /// Attaches a response cache
    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The configured API key, if any
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub(crate) fn require_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or(VWorldError::Unauthenticated)
    }

    pub(crate) fn search_size(&self) -> u32 {
        self.search_size
    }

    pub(crate) fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_deref()
    }

    /// Sends an authenticated GET and returns the raw body
    ///
    /// # Arguments
    /// * `endpoint` - Path such as `/req/search`
    /// * `params` - Query parameters; `key` is added automatically
    ///
    /// # Returns
    /// * `Ok(String)` - Response body of a 2xx response
    /// * `Err(VWorldError)` - `Unauthenticated` without a key (no request is
    ///   sent), `TransportFailure` on TLS errors, `Timeout`, or `RequestFailure`
    pub async fn request(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let key = self.require_key()?;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, ?params, "sending request");

        let response = self
            .http_client
            .get(&url)
            .query(params)
            .query(&[("key", key)])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match body.trim() {
                "" => status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
                text => text.chars().take(200).collect(),
            };
            return Err(VWorldError::RequestFailure {
                status: Some(status.as_u16()),
                message,
            });
        }

        response.text().await.map_err(map_transport_error)
    }

    /// Sends a request and parses the JSON envelope
    pub async fn request_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<ApiResponse> {
        let body = self.request(endpoint, params).await?;
        ApiResponse::parse(&body)
    }
}

/// Maps a reqwest error onto the crate taxonomy
///
/// The URL is stripped first: it carries the API key and the user's query.
fn map_transport_error(err: reqwest::Error) -> VWorldError {
    let err = err.without_url();
    if err.is_timeout() {
        return VWorldError::Timeout;
    }
    if err.is_connect() && is_tls_failure(&err) {
        let message = error_chain(&err);
        warn!(error = %message, "TLS failure");
        return VWorldError::TransportFailure(message);
    }
    VWorldError::RequestFailure {
        status: err.status().map(|s| s.as_u16()),
        message: error_chain(&err),
    }
}

/// Phrases rustls uses in handshake and certificate errors
const TLS_MARKERS: [&str; 5] = [
    "certificate",
    "handshake",
    "corrupt message",
    "fatal alert",
    "tls",
];

/// Whether the causes of an error carry a TLS handshake or certificate failure
///
/// Only the sources are inspected; the outer message is the client's own
/// summary. TLS stacks surface as `io::Error` of kind `InvalidData`, or name
/// the failure in their message.
pub(crate) fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = err.source();
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::InvalidData {
                return true;
            }
        }
        let message = e.to_string().to_lowercase();
        if TLS_MARKERS.iter().any(|marker| message.contains(marker)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Joins an error and its sources into one line
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

/// Accepts coordinates sent either as JSON numbers or as numeric strings
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped {
        message: &'static str,
        source: Option<Box<dyn StdError + 'static>>,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_deref()
        }
    }

    #[test]
    fn test_tls_failure_detected_from_io_kind() {
        let err = Wrapped {
            message: "error sending request",
            source: Some(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid peer certificate: UnknownIssuer",
            ))),
        };
        assert!(is_tls_failure(&err));
    }

    #[test]
    fn test_tls_failure_detected_from_message() {
        let err = Wrapped {
            message: "client error (Connect)",
            source: Some(Box::new(Wrapped {
                message: "received fatal alert: HandshakeFailure",
                source: None,
            })),
        };
        assert!(is_tls_failure(&err));
    }

    #[test]
    fn test_connection_refused_is_not_tls() {
        let err = Wrapped {
            message: "error sending request",
            source: Some(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Connection refused (os error 111)",
            ))),
        };
        assert!(!is_tls_failure(&err));
    }

    #[test]
    fn test_outer_message_is_not_inspected_for_tls() {
        let err = Wrapped {
            message: "error sending request for url (http://host/req/search?query=tls+alert)",
            source: Some(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "tcp connect error: Connection refused (os error 111)",
            ))),
        };
        assert!(!is_tls_failure(&err));
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let err = Wrapped {
            message: "outer",
            source: Some(Box::new(Wrapped {
                message: "inner",
                source: None,
            })),
        };
        assert_eq!(error_chain(&err), "outer: inner");
    }

    #[test]
    fn test_parse_envelope_ok() {
        let body = r#"{"response":{"status":"OK","result":{"point":{"x":"126.97","y":"37.56"}}}}"#;
        let response = ApiResponse::parse(body).unwrap();
        assert_eq!(response.status, ApiStatus::Ok);

        #[derive(Deserialize)]
        struct Located {
            point: Point,
        }
        let located: Located = response.result_as().unwrap();
        assert!((located.point.x - 126.97).abs() < 1e-9);
    }

    #[test]
    fn test_parse_envelope_not_found() {
        let body = r#"{"response":{"status":"NOT_FOUND"}}"#;
        let response = ApiResponse::parse(body).unwrap().into_checked().unwrap();
        assert_eq!(response.status, ApiStatus::NotFound);
        assert_eq!(response.reason("no match"), "no match");
    }

    #[test]
    fn test_error_envelope_becomes_service_error() {
        let body = r#"{"response":{"status":"ERROR","error":{"code":"INVALID_KEY","text":"bad key"}}}"#;
        let err = ApiResponse::parse(body).unwrap().into_checked().unwrap_err();
        match err {
            VWorldError::ServiceError { code, text } => {
                assert_eq!(code.as_deref(), Some("INVALID_KEY"));
                assert_eq!(text, "bad key");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_envelope_body_is_invalid_response() {
        let err = ApiResponse::parse("<html>oops</html>").unwrap_err();
        assert!(matches!(err, VWorldError::InvalidResponse(_)));
    }

    #[test]
    fn test_point_accepts_numbers_and_strings() {
        let a: Point = serde_json::from_str(r#"{"x": 1.5, "y": "2.5"}"#).unwrap();
        assert_eq!(a, Point { x: 1.5, y: 2.5 });
        assert!(serde_json::from_str::<Point>(r#"{"x": "east", "y": 1}"#).is_err());
    }

    #[test]
    fn test_blank_api_key_is_treated_as_missing() {
        let client = VWorldClient::new(ClientConfig::default().with_api_key("  ")).unwrap();
        assert!(client.api_key().is_none());
        assert!(matches!(client.require_key(), Err(VWorldError::Unauthenticated)));
    }
}

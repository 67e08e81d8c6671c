//! HTTP client for a Mapbox/OSRM-style map-matching endpoint.
//!
//! One GET per anchor pair:
//! `{base_url}/{profile}/{lng},{lat};{lng},{lat}?geometries=polyline&overview=full`
//!
//! - Connection pooling via a shared `reqwest::Client`
//! - Request timeout (default 10s)
//! - Retry with exponential backoff on 429 and transport errors
//!
//! Every failure maps to `MatchingServiceFailure` or
//! `MatchingServiceMalformedResponse`, which the snap pipeline turns into a
//! straight segment.

use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result, TrackError};
use crate::snap::MatchService;
use crate::{codec, GpsPoint};

/// Configuration for the HTTP matching client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpMatchConfig {
    /// Endpoint prefix. Default: "https://api.mapbox.com/matching/v5"
    pub base_url: String,
    /// Routing profile appended to the base URL. Default: "mapbox/walking"
    pub profile: String,
    /// Sent as the `access_token` query parameter when present
    pub access_token: Option<String>,
    /// Whole-request timeout. Default: 10 seconds
    pub timeout_secs: u64,
    /// Retries on 429 or transport errors. Default: 1
    pub max_retries: u32,
}

impl Default for HttpMatchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mapbox.com/matching/v5".to_string(),
            profile: "mapbox/walking".to_string(),
            access_token: None,
            timeout_secs: 10,
            max_retries: 1,
        }
    }
}

/// Map-matching response body. Matching endpoints answer with `matchings`,
/// routing endpoints with `routes`; both carry an encoded geometry.
#[derive(Debug, Deserialize)]
struct MatchApiResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    matchings: Vec<ApiGeometry>,
    #[serde(default)]
    routes: Vec<ApiGeometry>,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    geometry: Option<String>,
}

/// Parse a matching response body into coordinates.
///
/// Multiple matchings are concatenated in order.
pub fn parse_match_response(body: &str) -> Result<Vec<GpsPoint>> {
    let response: MatchApiResponse =
        serde_json::from_str(body).map_err(|e| TrackError::MatchingServiceMalformedResponse {
            message: format!("Parse error: {}", e),
        })?;

    if response.code != "Ok" {
        return Err(TrackError::MatchingServiceFailure {
            message: match response.message {
                Some(message) => format!("{}: {}", response.code, message),
                None => response.code,
            },
            status_code: None,
        });
    }

    let parts = if response.matchings.is_empty() {
        response.routes
    } else {
        response.matchings
    };
    if parts.is_empty() {
        return Err(TrackError::MatchingServiceMalformedResponse {
            message: "no matchings in response".to_string(),
        });
    }

    let mut points = Vec::new();
    for part in parts {
        let encoded = part.geometry.ok_or_malformed("matching without geometry")?;
        let decoded =
            codec::decode(&encoded).map_err(|e| TrackError::MatchingServiceMalformedResponse {
                message: e.to_string(),
            })?;
        points.extend(decoded);
    }
    Ok(points)
}

/// Exponential backoff, capped at 16x the base delay.
fn backoff_delay(base_ms: u64, retries: u32) -> Duration {
    Duration::from_millis(base_ms << retries.min(4))
}

/// [`MatchService`] backed by an HTTP map-matching API.
pub struct HttpMatchService {
    client: Client,
    config: HttpMatchConfig,
}

impl HttpMatchService {
    pub fn new(config: HttpMatchConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpMatchConfig {
        &self.config
    }

    /// Request URL for one anchor pair (coordinates in longitude-first order).
    pub fn segment_url(&self, start: GpsPoint, end: GpsPoint) -> String {
        format!(
            "{}/{}/{:.6},{:.6};{:.6},{:.6}",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            start.longitude,
            start.latitude,
            end.longitude,
            end.latitude
        )
    }

    async fn fetch_segment(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<GpsPoint>> {
        let url = self.segment_url(start, end);
        let mut query: Vec<(&str, &str)> = vec![("geometries", "polyline"), ("overview", "full")];
        if let Some(token) = &self.config.access_token {
            query.push(("access_token", token.as_str()));
        }

        let started = Instant::now();
        let mut retries = 0;

        loop {
            let response = self.client.get(&url).query(&query).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS && retries < self.config.max_retries {
                        retries += 1;
                        let backoff = backoff_delay(1000, retries);
                        warn!(
                            "[HttpMatch] 429 from matching service, retry {} after {:?}",
                            retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = resp.text().await.map_err(|e| TrackError::MatchingServiceFailure {
                        message: format!("Body read error: {}", e),
                        status_code: Some(status.as_u16()),
                    })?;

                    if !status.is_success() {
                        return Err(TrackError::MatchingServiceFailure {
                            message: format!("HTTP {}", status),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    let points = parse_match_response(&body)?;
                    debug!(
                        "[HttpMatch] Matched segment: {} points in {:?}",
                        points.len(),
                        started.elapsed()
                    );
                    return Ok(points);
                }
                Err(e) => {
                    if e.is_timeout() || retries >= self.config.max_retries {
                        return Err(TrackError::MatchingServiceFailure {
                            message: if e.is_timeout() {
                                format!("Request timed out: {}", e)
                            } else {
                                format!("Request error: {}", e)
                            },
                            status_code: None,
                        });
                    }

                    retries += 1;
                    let backoff = backoff_delay(500, retries);
                    warn!(
                        "[HttpMatch] Request error: {}, retry {} after {:?}",
                        e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

impl MatchService for HttpMatchService {
    async fn match_segment(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<GpsPoint>> {
        self.fetch_segment(start, end).await
    }
}

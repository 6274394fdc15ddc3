//! Google Directions web-service client.
//!
//! Requests one route per call (no alternatives), biased to the configured
//! region and avoiding highways. The overview polyline is decoded into the
//! segment path and leg totals are summed.

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use super::{DirectionsProvider, DirectionsRequest, DirectionsResponse, DirectionsStatus};
use crate::config::DirectionsConfig;
use crate::error::{Result, TrekRouteError};
use crate::LatLng;

/// Coordinate precision of the encoded polyline format.
const POLYLINE_FACTOR: f64 = 1e5;

#[derive(Debug, Deserialize)]
struct DirectionsPayload {
    status: DirectionsStatus,
    #[serde(default)]
    routes: Vec<RoutePayload>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoutePayload {
    overview_polyline: Option<EncodedPolyline>,
    #[serde(default)]
    legs: Vec<LegPayload>,
}

#[derive(Debug, Deserialize)]
struct EncodedPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct LegPayload {
    distance: Option<TextValue>,
    duration: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: f64,
}

/// [`DirectionsProvider`] backed by the Google Directions API.
pub struct GoogleDirections {
    client: Client,
    config: DirectionsConfig,
    api_key: String,
}

impl GoogleDirections {
    /// Build a client. Fails with a configuration error when no API key is
    /// set, so callers can fall back to a static route.
    pub fn new(config: &DirectionsConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                TrekRouteError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&DirectionsConfig::from_env())
    }

    fn query(&self, request: &DirectionsRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("origin", format_point(&request.origin)),
            ("destination", format_point(&request.destination)),
            ("mode", request.mode.as_str().to_lowercase()),
            ("region", self.config.region.clone()),
        ];
        if self.config.avoid_highways {
            query.push(("avoid", "highways".to_string()));
        }
        query.push(("key", self.api_key.clone()));
        query
    }

    async fn fetch(&self, request: &DirectionsRequest) -> Result<DirectionsResponse> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&self.query(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TrekRouteError::Timeout {
                        operation: format!("{} directions", request.mode),
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    TrekRouteError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrekRouteError::http_status(
                status.as_u16(),
                format!("directions request failed: HTTP {}", status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TrekRouteError::network(e.to_string()))?;
        let parsed = parse_directions_payload(&body)?;
        debug!(
            "[Directions] {} {} -> {} ({} points)",
            request.mode,
            format_point(&request.origin),
            parsed.status,
            parsed.path.len()
        );
        Ok(parsed)
    }
}

impl DirectionsProvider for GoogleDirections {
    fn route<'a>(
        &'a self,
        request: &'a DirectionsRequest,
    ) -> BoxFuture<'a, Result<DirectionsResponse>> {
        self.fetch(request).boxed()
    }
}

fn format_point(p: &LatLng) -> String {
    format!("{},{}", p.lat, p.lng)
}

/// Decode a Directions API JSON body.
///
/// A non-OK status is returned as-is (with an empty path); only malformed
/// JSON or a corrupt polyline is an error.
pub fn parse_directions_payload(body: &str) -> Result<DirectionsResponse> {
    let payload: DirectionsPayload = serde_json::from_str(body)?;

    if !payload.status.is_ok() {
        if let Some(message) = &payload.error_message {
            warn!("[Directions] {}: {}", payload.status, message);
        }
        return Ok(DirectionsResponse::status_only(payload.status));
    }

    let Some(route) = payload.routes.into_iter().next() else {
        return Ok(DirectionsResponse::status_only(DirectionsStatus::ZeroResults));
    };

    let path = match &route.overview_polyline {
        Some(encoded) => decode_polyline(&encoded.points)?,
        None => Vec::new(),
    };
    let distance_meters = route
        .legs
        .iter()
        .filter_map(|leg| leg.distance.as_ref())
        .map(|d| d.value)
        .sum();
    let duration_seconds = route
        .legs
        .iter()
        .filter_map(|leg| leg.duration.as_ref())
        .map(|d| d.value)
        .sum();

    Ok(DirectionsResponse::ok(path, distance_meters, duration_seconds))
}

/// Decode an encoded polyline (precision 5) into coordinates.
pub fn decode_polyline(encoded: &str) -> Result<Vec<LatLng>> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut path = Vec::new();

    while index < bytes.len() {
        lat = accumulate(lat, next_delta(bytes, &mut index)?, index)?;
        lng = accumulate(lng, next_delta(bytes, &mut index)?, index)?;
        path.push(LatLng::new(
            lat as f64 / POLYLINE_FACTOR,
            lng as f64 / POLYLINE_FACTOR,
        ));
    }

    Ok(path)
}

fn accumulate(total: i64, delta: i64, index: usize) -> Result<i64> {
    total
        .checked_add(delta)
        .ok_or_else(|| TrekRouteError::Decode {
            message: format!("polyline coordinate overflow at byte {}", index),
        })
}

fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift = 0;

    loop {
        let byte = match bytes.get(*index) {
            Some(&b) if (63..127).contains(&b) && shift < 64 => i64::from(b) - 63,
            _ => {
                return Err(TrekRouteError::Decode {
                    message: format!("corrupt polyline at byte {}", index),
                })
            }
        };
        *index += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }

    Ok(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

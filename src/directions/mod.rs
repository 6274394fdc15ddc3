//! Directions provider seam.
//!
//! The route synthesis engine only needs "give me a path from A to B for this
//! travel mode". Anything that can answer that implements
//! [`DirectionsProvider`]; the `http` feature ships a Google Directions
//! client, and tests use in-memory stubs.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TrekRouteError};
use crate::LatLng;

#[cfg(feature = "http")]
pub mod google;

/// Travel mode requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelMode {
    Walking,
    Driving,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "WALKING",
            TravelMode::Driving => "DRIVING",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionsRequest {
    pub origin: LatLng,
    pub destination: LatLng,
    pub mode: TravelMode,
}

/// Provider status codes. Anything unknown decodes as `UnknownError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectionsStatus {
    Ok,
    ZeroResults,
    NotFound,
    OverQueryLimit,
    RequestDenied,
    InvalidRequest,
    MaxRouteLengthExceeded,
    #[serde(other)]
    UnknownError,
}

impl DirectionsStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DirectionsStatus::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionsStatus::Ok => "OK",
            DirectionsStatus::ZeroResults => "ZERO_RESULTS",
            DirectionsStatus::NotFound => "NOT_FOUND",
            DirectionsStatus::OverQueryLimit => "OVER_QUERY_LIMIT",
            DirectionsStatus::RequestDenied => "REQUEST_DENIED",
            DirectionsStatus::InvalidRequest => "INVALID_REQUEST",
            DirectionsStatus::MaxRouteLengthExceeded => "MAX_ROUTE_LENGTH_EXCEEDED",
            DirectionsStatus::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for DirectionsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider answer. `path` and the totals are only meaningful when
/// `status` is OK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionsResponse {
    pub status: DirectionsStatus,
    pub path: Vec<LatLng>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

impl DirectionsResponse {
    pub fn ok(path: Vec<LatLng>, distance_meters: f64, duration_seconds: f64) -> Self {
        Self {
            status: DirectionsStatus::Ok,
            path,
            distance_meters,
            duration_seconds,
        }
    }

    pub fn status_only(status: DirectionsStatus) -> Self {
        Self {
            status,
            path: Vec::new(),
            distance_meters: 0.0,
            duration_seconds: 0.0,
        }
    }

    /// Convert a non-OK status (or an OK status without geometry) into
    /// [`TrekRouteError::NoRouteFound`].
    pub fn into_route(self, mode: TravelMode) -> Result<Self> {
        if self.status.is_ok() && !self.path.is_empty() {
            Ok(self)
        } else {
            Err(TrekRouteError::NoRouteFound {
                mode: mode.to_string(),
                status: self.status.to_string(),
            })
        }
    }
}

/// External directions service.
pub trait DirectionsProvider: Send + Sync {
    /// Resolve one origin/destination pair for one travel mode.
    ///
    /// A "no route" answer may come back either as `Ok` with a non-OK
    /// status or as an error; the engine treats both as a failed mode.
    fn route<'a>(&'a self, request: &'a DirectionsRequest)
        -> BoxFuture<'a, Result<DirectionsResponse>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_decoding() {
        let status: DirectionsStatus = serde_json::from_str("\"ZERO_RESULTS\"").unwrap();
        assert_eq!(status, DirectionsStatus::ZeroResults);
        let unknown: DirectionsStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(unknown, DirectionsStatus::UnknownError);
        assert_eq!(DirectionsStatus::OverQueryLimit.to_string(), "OVER_QUERY_LIMIT");
    }

    #[test]
    fn test_travel_mode_wire_name() {
        assert_eq!(serde_json::to_string(&TravelMode::Walking).unwrap(), "\"WALKING\"");
        assert_eq!(TravelMode::Driving.to_string(), "DRIVING");
    }

    #[test]
    fn test_into_route() {
        let ok = DirectionsResponse::ok(vec![LatLng::new(27.8, 86.7)], 10.0, 5.0);
        assert!(ok.into_route(TravelMode::Walking).is_ok());

        let empty = DirectionsResponse::ok(Vec::new(), 0.0, 0.0);
        assert!(empty.into_route(TravelMode::Walking).is_err());

        let zero = DirectionsResponse::status_only(DirectionsStatus::ZeroResults);
        assert_eq!(
            zero.into_route(TravelMode::Driving),
            Err(TrekRouteError::NoRouteFound {
                mode: "DRIVING".to_string(),
                status: "ZERO_RESULTS".to_string(),
            })
        );
    }
}

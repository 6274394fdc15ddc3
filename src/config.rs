//! Configuration for the cache, service, routing and directions components.
//!
//! Durations are stored as plain milliseconds so configs can be loaded from
//! JSON; accessor methods hand out `Duration`s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::directions::TravelMode;
use crate::error::{Result, TrekRouteError};

/// Default time-to-live for generic reads (5 minutes).
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Environment variable holding the directions API key.
pub const DIRECTIONS_API_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";

/// Configuration for [`crate::CacheManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one. Default: 300000 (5 min)
    pub default_ttl_ms: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

/// Configuration for [`crate::BaseService`] and its HTTP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the REST backend, e.g. `https://api.example.com/api`
    pub base_url: String,
    /// Request timeout. Default: 30000
    pub timeout_ms: u64,
    /// Retries on connection errors and HTTP 429. Default: 3
    pub max_retries: u32,
    /// TTL for cached reads. Default: 300000 (5 min)
    pub default_ttl_ms: u64,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 30_000,
            max_retries: 3,
            default_ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

/// Configuration for [`crate::RouteSynthesisEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Minimum spacing between consecutive upstream calls while stitching.
    /// Default: 500
    pub rate_limit_ms: u64,

    /// Join points closer than this are treated as the same point.
    /// Default: 1.0 meter
    pub join_epsilon_meters: f64,

    /// Limit for a single directions call before it counts as failed.
    /// Default: 15000
    pub provider_timeout_ms: u64,

    /// Modes tried in order before falling back to a straight line.
    /// Default: [WALKING, DRIVING]
    pub travel_modes: Vec<TravelMode>,

    /// Speed used to estimate the duration of a straight-line segment.
    /// Default: 0.8 m/s (loaded trekking pace on mountain trails)
    pub fallback_speed_mps: f64,

    /// Maximum number of resolved segments kept in the segment cache.
    /// Default: 512
    pub segment_cache_capacity: usize,
}

impl RouteConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 500,
            join_epsilon_meters: 1.0,
            provider_timeout_ms: 15_000,
            travel_modes: vec![TravelMode::Walking, TravelMode::Driving],
            fallback_speed_mps: 0.8,
            segment_cache_capacity: 512,
        }
    }
}

/// Configuration for the Google Directions web-service client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionsConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    /// Region bias (ccTLD). Default: "np"
    pub region: String,
    pub avoid_highways: bool,
    pub timeout_ms: u64,
}

impl DirectionsConfig {
    /// Build a config from the environment (`GOOGLE_MAPS_API_KEY`).
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(DIRECTIONS_API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
            ..Self::default()
        }
    }

    /// The API key, or a configuration error when none is set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                TrekRouteError::configuration(format!(
                    "directions API key missing (set {})",
                    DIRECTIONS_API_KEY_ENV
                ))
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DirectionsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            region: "np".to_string(),
            avoid_highways: true,
            timeout_ms: 15_000,
        }
    }
}

//! # Trek Route
//!
//! Request caching, in-flight request deduplication and multi-day trek
//! route synthesis.
//!
//! This library provides:
//! - A TTL cache with canonical request keys and pattern invalidation
//! - A deduplicator that collapses concurrent identical fetches into one call
//! - A base service composing both over a pluggable HTTP transport
//! - A route synthesis engine that stitches day-by-day waypoints into one path
//!   using an external directions provider with a walking → driving →
//!   straight-line fallback chain
//! - GPX, JSON and GeoJSON export of a synthesized route
//!
//! ## Features
//!
//! - **`http`** - Enable the `reqwest` transport and the Google Directions client
//!
//! ## Quick Start
//!
//! ```rust
//! use trek_route::{LatLng, Waypoint};
//! use trek_route::geo_utils::haversine_distance;
//!
//! let lukla = Waypoint::new(1, "Lukla", 27.6869, 86.7314);
//! let phakding = Waypoint::new(2, "Phakding", 27.7410, 86.7127);
//!
//! let km = haversine_distance(&lukla.position, &phakding.position) / 1000.0;
//! assert!(km > 6.0 && km < 7.0);
//! assert!(LatLng::new(27.7, 86.7).is_valid());
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrekRouteError};

// Configuration structs for every component
pub mod config;
pub use config::{CacheConfig, DirectionsConfig, RouteConfig, ServiceConfig};

// Geographic utilities (distance, bounds, formatting)
pub mod geo_utils;
pub use geo_utils::{haversine_distance, path_distance, Bounds};

// TTL cache with canonical keys
pub mod cache;
pub use cache::{CacheManager, CacheStats};

// In-flight request deduplication
pub mod dedup;
pub use dedup::RequestDeduplicator;

// Base service: cache-then-dedup-then-fetch reads, fetch-then-invalidate writes
pub mod service;
pub use service::{
    normalize_array, ApiRequest, BaseService, BatchResult, GetOptions, Method, ResponseShape,
    Transport,
};
#[cfg(feature = "http")]
pub use service::http::HttpTransport;

// Geometry cache for resolved segments
pub mod segment_cache;
pub use segment_cache::{CachedSegment, RouteSegmentCache, SegmentKey};

// Directions provider seam
pub mod directions;
pub use directions::{
    DirectionsProvider, DirectionsRequest, DirectionsResponse, DirectionsStatus, TravelMode,
};
#[cfg(feature = "http")]
pub use directions::google::GoogleDirections;

// Route synthesis engine
pub mod engine;
pub use engine::{
    skip_acclimatization_days, straight_line_route, ResolutionMode, RouteSegment, RouteSource,
    RouteSynthesisEngine, StitchedRoute,
};

// GPX / JSON / GeoJSON export
pub mod export;
pub use export::{export_route, ExportFormat, ExportedFile, TrekMetadata};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate in decimal degrees.
///
/// # Example
/// ```
/// use trek_route::LatLng;
/// let kathmandu = LatLng::new(27.7172, 85.3240);
/// assert!(kathmandu.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Create a new coordinate.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }
}

impl From<LatLng> for geo::Coord<f64> {
    fn from(p: LatLng) -> Self {
        geo::Coord { x: p.lng, y: p.lat }
    }
}

impl From<geo::Coord<f64>> for LatLng {
    fn from(c: geo::Coord<f64>) -> Self {
        LatLng::new(c.y, c.x)
    }
}

/// One day of a trek itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Day number
    pub ordinal: u32,
    pub title: String,
    pub position: LatLng,
}

impl Waypoint {
    pub fn new(ordinal: u32, title: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            ordinal,
            title: title.into(),
            position: LatLng::new(lat, lng),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.position.is_valid()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every guarded map in this crate is left consistent between statements,
/// so a poisoned guard still holds usable state.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latlng_validation() {
        assert!(LatLng::new(27.8, 86.7).is_valid());
        assert!(LatLng::new(-90.0, 180.0).is_valid());
        assert!(!LatLng::new(91.0, 0.0).is_valid());
        assert!(!LatLng::new(0.0, 181.0).is_valid());
        assert!(!LatLng::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_coord_conversion_swaps_axes() {
        let coord: geo::Coord<f64> = LatLng::new(27.8, 86.7).into();
        assert_eq!(coord.x, 86.7);
        assert_eq!(coord.y, 27.8);
        assert_eq!(LatLng::from(coord), LatLng::new(27.8, 86.7));
    }

    #[test]
    fn test_waypoint_roundtrips_through_json() {
        let wp = Waypoint::new(3, "Namche Bazaar", 27.8057, 86.7142);
        let json = serde_json::to_string(&wp).unwrap();
        assert!(json.contains("\"ordinal\":3"));
        let back: Waypoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wp);
    }

    #[test]
    fn test_lock_unpoisoned_recovers() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let cloned = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(mutex.is_poisoned());
        *lock_unpoisoned(&mutex) += 1;
        assert_eq!(*lock_unpoisoned(&mutex), 2);
    }
}

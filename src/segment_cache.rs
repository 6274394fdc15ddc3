//! # Route Segment Cache
//!
//! Resolved path geometry between two points, keyed by the rounded
//! coordinate pair rather than by trek, so treks sharing a sub-path reuse
//! each other's segments.
//!
//! Keys round both endpoints to 4 decimal places (about 11 m) and are
//! directional: A→B and B→A are different entries. Only real routed
//! geometry (walking or driving) is stored; degraded straight lines are
//! never cached so they are retried on the next request.

use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Mutex;

use crate::directions::TravelMode;
use crate::error::{Result, TrekRouteError};
use crate::{lock_unpoisoned, LatLng};

/// Decimal places kept in a segment key.
pub const KEY_PRECISION: i32 = 4;

const SCALE: f64 = 10_000.0;

/// Used when a capacity of zero is requested.
const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

fn quantize(degrees: f64) -> i64 {
    (degrees * SCALE).round() as i64
}

fn dequantize(units: i64) -> f64 {
    units as f64 / SCALE
}

/// Directional cache key for the segment between two points.
///
/// Coordinates are stored as integer units of 1e-4 degree so equality and
/// hashing are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    from_lat: i64,
    from_lng: i64,
    to_lat: i64,
    to_lng: i64,
}

impl SegmentKey {
    pub fn between(from: &LatLng, to: &LatLng) -> Self {
        Self {
            from_lat: quantize(from.lat),
            from_lng: quantize(from.lng),
            to_lat: quantize(to.lat),
            to_lng: quantize(to.lng),
        }
    }

    /// Key of the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            from_lat: self.to_lat,
            from_lng: self.to_lng,
            to_lat: self.from_lat,
            to_lng: self.from_lng,
        }
    }

    /// Both endpoints round to the same coordinate (a rest day).
    pub fn is_stationary(&self) -> bool {
        self.from_lat == self.to_lat && self.from_lng == self.to_lng
    }

    pub fn from_point(&self) -> LatLng {
        LatLng::new(dequantize(self.from_lat), dequantize(self.from_lng))
    }

    pub fn to_point(&self) -> LatLng {
        LatLng::new(dequantize(self.to_lat), dequantize(self.to_lng))
    }
}

impl fmt::Display for SegmentKey {
    /// `"27.8000,86.7000->27.9000,86.7200"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from_point();
        let to = self.to_point();
        write!(
            f,
            "{:.4},{:.4}->{:.4},{:.4}",
            from.lat, from.lng, to.lat, to.lng
        )
    }
}

impl FromStr for SegmentKey {
    type Err = TrekRouteError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TrekRouteError::Decode {
            message: format!("invalid segment key '{}'", s),
        };
        let parse_point = |part: &str| -> Result<LatLng> {
            let (lat, lng) = part.split_once(',').ok_or_else(invalid)?;
            let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
            let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
            let point = LatLng::new(lat, lng);
            if point.is_valid() {
                Ok(point)
            } else {
                Err(invalid())
            }
        };

        let (from, to) = s.split_once("->").ok_or_else(invalid)?;
        Ok(Self::between(&parse_point(from)?, &parse_point(to)?))
    }
}

/// Resolved geometry for one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSegment {
    pub path: Vec<LatLng>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub mode: TravelMode,
}

/// Wire form of one entry in [`RouteSegmentCache::export_json`].
#[derive(Debug, Serialize, Deserialize)]
struct SegmentRecord {
    key: String,
    #[serde(flatten)]
    segment: CachedSegment,
}

/// Bounded LRU cache of resolved segments, shared between concurrent
/// stitching operations.
///
/// Writes are idempotent overwrites, so two views resolving the same pair at
/// once need no coordination beyond the internal lock.
pub struct RouteSegmentCache {
    entries: Mutex<LruCache<SegmentKey, CachedSegment>>,
}

impl RouteSegmentCache {
    /// Create a cache holding at most `capacity` segments (512 if zero).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a segment, marking it recently used.
    pub fn get(&self, key: &SegmentKey) -> Option<CachedSegment> {
        lock_unpoisoned(&self.entries).get(key).cloned()
    }

    /// Store a resolved segment.
    pub fn insert(&self, key: SegmentKey, segment: CachedSegment) {
        debug!(
            "[SegmentCache] Caching {} ({} points, {})",
            key,
            segment.path.len(),
            segment.mode
        );
        lock_unpoisoned(&self.entries).put(key, segment);
    }

    /// Check for a segment without touching its recency.
    pub fn contains(&self, key: &SegmentKey) -> bool {
        lock_unpoisoned(&self.entries).contains(key)
    }

    pub fn remove(&self, key: &SegmentKey) -> Option<CachedSegment> {
        lock_unpoisoned(&self.entries).pop(key)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock_unpoisoned(&self.entries).cap().get()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }

    /// Serialize every entry, least recently used first, so that importing
    /// the result restores the same recency order.
    pub fn export_json(&self) -> Result<String> {
        let entries = lock_unpoisoned(&self.entries);
        let records: Vec<SegmentRecord> = entries
            .iter()
            .rev()
            .map(|(key, segment)| SegmentRecord {
                key: key.to_string(),
                segment: segment.clone(),
            })
            .collect();
        drop(entries);
        Ok(serde_json::to_string(&records)?)
    }

    /// Load entries produced by [`export_json`](Self::export_json), e.g. a
    /// pre-computed route table. Returns the number of segments imported.
    ///
    /// The whole document is validated before anything is inserted.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let records: Vec<SegmentRecord> = serde_json::from_str(json)?;
        let parsed = records
            .into_iter()
            .map(|record| Ok((record.key.parse::<SegmentKey>()?, record.segment)))
            .collect::<Result<Vec<_>>>()?;

        let count = parsed.len();
        let mut entries = lock_unpoisoned(&self.entries);
        for (key, segment) in parsed {
            entries.put(key, segment);
        }
        debug!("[SegmentCache] Imported {} segments", count);
        Ok(count)
    }
}

impl Default for RouteSegmentCache {
    fn default() -> Self {
        Self::new(FALLBACK_CAPACITY.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(mode: TravelMode) -> CachedSegment {
        CachedSegment {
            path: vec![
                LatLng::new(27.8, 86.7),
                LatLng::new(27.85, 86.71),
                LatLng::new(27.9, 86.72),
            ],
            distance_meters: 11_500.0,
            duration_seconds: 14_400.0,
            mode,
        }
    }

    #[test]
    fn test_key_rounds_to_four_places() {
        let a = SegmentKey::between(&LatLng::new(27.80001, 86.70004), &LatLng::new(27.9, 86.72));
        let b = SegmentKey::between(&LatLng::new(27.79999, 86.69996), &LatLng::new(27.9, 86.72));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "27.8000,86.7000->27.9000,86.7200");

        let c = SegmentKey::between(&LatLng::new(27.8002, 86.7), &LatLng::new(27.9, 86.72));
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_is_directional() {
        let forward = SegmentKey::between(&LatLng::new(27.8, 86.7), &LatLng::new(27.9, 86.72));
        let backward = SegmentKey::between(&LatLng::new(27.9, 86.72), &LatLng::new(27.8, 86.7));
        assert_ne!(forward, backward);
        assert_eq!(forward.reversed(), backward);
    }

    #[test]
    fn test_stationary_key() {
        let p = LatLng::new(27.8057, 86.7142);
        assert!(SegmentKey::between(&p, &p).is_stationary());
        assert!(SegmentKey::between(&p, &LatLng::new(27.80571, 86.71421)).is_stationary());
        assert!(!SegmentKey::between(&p, &LatLng::new(27.81, 86.7142)).is_stationary());
    }

    #[test]
    fn test_key_parse() {
        let key: SegmentKey = "27.8000,86.7000->27.9000,86.7200".parse().unwrap();
        assert_eq!(key.from_point(), LatLng::new(27.8, 86.7));
        assert_eq!(key.to_point(), LatLng::new(27.9, 86.72));

        assert!("27.8,86.7".parse::<SegmentKey>().is_err());
        assert!("a,b->c,d".parse::<SegmentKey>().is_err());
        assert!("95.0,86.7->27.9,86.72".parse::<SegmentKey>().is_err());
    }

    #[test]
    fn test_insert_get_and_overwrite() {
        let cache = RouteSegmentCache::new(8);
        let key = SegmentKey::between(&LatLng::new(27.8, 86.7), &LatLng::new(27.9, 86.72));

        assert!(cache.get(&key).is_none());
        cache.insert(key, segment(TravelMode::Walking));
        cache.insert(key, segment(TravelMode::Walking));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(segment(TravelMode::Walking)));
        assert!(!cache.contains(&key.reversed()));
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = RouteSegmentCache::new(2);
        let keys: Vec<SegmentKey> = (0..3)
            .map(|i| {
                SegmentKey::between(
                    &LatLng::new(27.0 + i as f64 * 0.1, 86.0),
                    &LatLng::new(28.0, 86.0),
                )
            })
            .collect();

        cache.insert(keys[0], segment(TravelMode::Walking));
        cache.insert(keys[1], segment(TravelMode::Driving));
        cache.get(&keys[0]);
        cache.insert(keys[2], segment(TravelMode::Walking));

        assert!(cache.contains(&keys[0]));
        assert!(!cache.contains(&keys[1]));
        assert!(cache.contains(&keys[2]));
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        assert_eq!(RouteSegmentCache::new(0).capacity(), 512);
    }

    #[test]
    fn test_export_import() {
        let source = RouteSegmentCache::new(8);
        let k1 = SegmentKey::between(&LatLng::new(27.8, 86.7), &LatLng::new(27.9, 86.72));
        let k2 = k1.reversed();
        source.insert(k1, segment(TravelMode::Walking));
        source.insert(k2, segment(TravelMode::Driving));

        let json = source.export_json().unwrap();
        assert!(json.contains("\"key\":\"27.8000,86.7000->27.9000,86.7200\""));
        assert!(json.contains("\"mode\":\"DRIVING\""));

        let target = RouteSegmentCache::new(8);
        assert_eq!(target.import_json(&json).unwrap(), 2);
        assert_eq!(target.get(&k1), source.get(&k1));
        assert_eq!(target.get(&k2).map(|s| s.mode), Some(TravelMode::Driving));
    }

    #[test]
    fn test_import_rejects_bad_key_atomically() {
        let cache = RouteSegmentCache::new(8);
        let json = r#"[
            {"key": "27.8000,86.7000->27.9000,86.7200", "path": [], "distance_meters": 1.0, "duration_seconds": 1.0, "mode": "WALKING"},
            {"key": "garbage", "path": [], "distance_meters": 1.0, "duration_seconds": 1.0, "mode": "WALKING"}
        ]"#;
        assert!(matches!(
            cache.import_json(json),
            Err(TrekRouteError::Decode { .. })
        ));
        assert!(cache.is_empty());
    }
}

//! # Route Synthesis Engine
//!
//! Turns an ordered list of day waypoints into one continuous path.
//!
//! ## Algorithm
//!
//! Each consecutive waypoint pair is resolved in order; the first step that
//! succeeds wins:
//! 1. **Skip**: both points round to the same coordinate (a rest day). The
//!    segment is tagged `ACCLIMATIZATION_SKIP` and never routed.
//! 2. **Cache**: the directional segment key is in the [`RouteSegmentCache`].
//! 3. **Provider**: each configured travel mode in turn (walking, then
//!    driving). A success is cached.
//! 4. **Straight line**: a two-point great-circle segment, counted as
//!    failed and never cached.
//!
//! Segments are concatenated into `full_path`, dropping the first point of a
//! segment when it lies within `join_epsilon_meters` of the path so far.
//! Upstream calls are paced by `rate_limit_ms`; cache hits and skips never
//! wait. A [`CancellationToken`] is checked between segments and raced
//! against every provider call and pacing delay.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RouteConfig;
use crate::directions::{DirectionsProvider, DirectionsRequest, DirectionsResponse, TravelMode};
use crate::error::{OptionExt, Result, TrekRouteError};
use crate::geo_utils::{format_distance, format_duration, haversine_distance, path_distance, Bounds};
use crate::segment_cache::{CachedSegment, RouteSegmentCache, SegmentKey};
use crate::{LatLng, Waypoint};

/// Maximum per-axis difference (degrees) for two consecutive itinerary
/// points to count as the same place.
pub const SAME_PLACE_DEGREES: f64 = 0.001;

// ============================================================================
// Result Types
// ============================================================================

/// How a segment was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionMode {
    Walking,
    Driving,
    StraightLine,
    AcclimatizationSkip,
}

impl From<TravelMode> for ResolutionMode {
    fn from(mode: TravelMode) -> Self {
        match mode {
            TravelMode::Walking => ResolutionMode::Walking,
            TravelMode::Driving => ResolutionMode::Driving,
        }
    }
}

/// The resolved path between two consecutive waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub from: Waypoint,
    pub to: Waypoint,
    pub path: Vec<LatLng>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub resolution: ResolutionMode,
    /// Served from the segment cache without an upstream call
    pub from_cache: bool,
}

impl RouteSegment {
    fn skip(from: &Waypoint, to: &Waypoint) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            path: Vec::new(),
            distance_meters: 0.0,
            duration_seconds: 0.0,
            resolution: ResolutionMode::AcclimatizationSkip,
            from_cache: false,
        }
    }

    fn straight_line(from: &Waypoint, to: &Waypoint, speed_mps: f64) -> Self {
        let distance_meters = haversine_distance(&from.position, &to.position);
        let duration_seconds = if speed_mps > 0.0 {
            distance_meters / speed_mps
        } else {
            0.0
        };
        Self {
            from: from.clone(),
            to: to.clone(),
            path: vec![from.position, to.position],
            distance_meters,
            duration_seconds,
            resolution: ResolutionMode::StraightLine,
            from_cache: false,
        }
    }

    fn from_cached(from: &Waypoint, to: &Waypoint, cached: CachedSegment) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            path: cached.path,
            distance_meters: cached.distance_meters,
            duration_seconds: cached.duration_seconds,
            resolution: cached.mode.into(),
            from_cache: true,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.resolution == ResolutionMode::AcclimatizationSkip
    }

    pub fn is_degraded(&self) -> bool {
        self.resolution == ResolutionMode::StraightLine
    }
}

/// Overall quality of a stitched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Every routed segment came from the directions provider
    FullRoute,
    /// Some segments fell back to straight lines
    MixedRouting,
    /// No segment could be routed
    StraightLineFallback,
}

/// A complete multi-day route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedRoute {
    /// Routed segments in waypoint order; rest-day skips are left out.
    pub segments: Vec<RouteSegment>,
    pub full_path: Vec<LatLng>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub failed_segment_count: usize,
    pub skipped_segment_count: usize,
    pub cache_hits: usize,
    pub upstream_calls: usize,
}

impl StitchedRoute {
    pub fn source(&self) -> RouteSource {
        if self.failed_segment_count == 0 {
            RouteSource::FullRoute
        } else if self.failed_segment_count == self.segments.len() {
            RouteSource::StraightLineFallback
        } else {
            RouteSource::MixedRouting
        }
    }

    /// At least one segment is a straight-line placeholder.
    pub fn is_degraded(&self) -> bool {
        self.failed_segment_count > 0
    }

    pub fn point_count(&self) -> usize {
        self.full_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full_path.is_empty()
    }

    pub fn distance_text(&self) -> String {
        format_distance(self.total_distance_meters)
    }

    pub fn duration_text(&self) -> String {
        format_duration(self.total_duration_seconds)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.full_path)
    }
}

// ============================================================================
// Stitching Helpers
// ============================================================================

/// Accumulates resolved segments into a [`StitchedRoute`].
struct RouteAccumulator {
    join_epsilon_meters: f64,
    route: StitchedRoute,
}

impl RouteAccumulator {
    fn new(join_epsilon_meters: f64, capacity: usize) -> Self {
        Self {
            join_epsilon_meters,
            route: StitchedRoute {
                segments: Vec::with_capacity(capacity),
                full_path: Vec::new(),
                total_distance_meters: 0.0,
                total_duration_seconds: 0.0,
                failed_segment_count: 0,
                skipped_segment_count: 0,
                cache_hits: 0,
                upstream_calls: 0,
            },
        }
    }

    fn push(&mut self, segment: RouteSegment) {
        let route = &mut self.route;
        if segment.is_skip() {
            route.skipped_segment_count += 1;
            return;
        }
        if segment.is_degraded() {
            route.failed_segment_count += 1;
        }
        if segment.from_cache {
            route.cache_hits += 1;
        }

        // Adjacent segments share their boundary point
        let duplicate_join = match (route.full_path.last(), segment.path.first()) {
            (Some(last), Some(first)) => {
                haversine_distance(last, first) <= self.join_epsilon_meters
            }
            _ => false,
        };
        let start = usize::from(duplicate_join);
        route.full_path.extend_from_slice(&segment.path[start..]);

        route.total_distance_meters += segment.distance_meters;
        route.total_duration_seconds += segment.duration_seconds;
        route.segments.push(segment);
    }

    fn finish(mut self, upstream_calls: usize) -> StitchedRoute {
        self.route.upstream_calls = upstream_calls;
        self.route
    }
}

/// Enforces a minimum interval between consecutive upstream calls.
struct Pacer {
    interval: Duration,
    last_call: Option<Instant>,
    calls: usize,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: None,
            calls: 0,
        }
    }

    async fn ready(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(last) = self.last_call else {
            return Ok(());
        };
        let deadline = last + self.interval;
        if Instant::now() >= deadline {
            return Ok(());
        }

        debug!(
            "[RouteSynthesis] Pacing {:?} before next call",
            deadline - Instant::now()
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrekRouteError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }

    fn record_call(&mut self) {
        self.last_call = Some(Instant::now());
        self.calls += 1;
    }
}

fn validate_waypoints(waypoints: &[Waypoint]) -> Result<()> {
    waypoints.get(1).ok_or_invalid_waypoints(&format!(
        "need at least 2 waypoints, got {}",
        waypoints.len()
    ))?;
    if let Some(bad) = waypoints.iter().find(|wp| !wp.is_valid()) {
        return Err(TrekRouteError::InvalidWaypoints {
            message: format!(
                "day {} ({}) has out-of-range coordinates {},{}",
                bad.ordinal, bad.title, bad.position.lat, bad.position.lng
            ),
        });
    }
    Ok(())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(TrekRouteError::Cancelled)
    } else {
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Resolves waypoint pairs through a [`DirectionsProvider`] and stitches
/// them into routes.
///
/// The segment cache is shared (`Arc`) so several engines, or several
/// concurrent stitching operations on one engine, reuse each other's work.
pub struct RouteSynthesisEngine<P: DirectionsProvider + ?Sized = dyn DirectionsProvider> {
    provider: Arc<P>,
    cache: Arc<RouteSegmentCache>,
    config: RouteConfig,
}

impl<P: DirectionsProvider + ?Sized> RouteSynthesisEngine<P> {
    pub fn new(provider: Arc<P>, cache: Arc<RouteSegmentCache>, config: RouteConfig) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Engine with its own segment cache sized from `config`.
    pub fn with_config(provider: Arc<P>, config: RouteConfig) -> Self {
        let cache = Arc::new(RouteSegmentCache::new(config.segment_cache_capacity));
        Self::new(provider, cache, config)
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn segment_cache(&self) -> &Arc<RouteSegmentCache> {
        &self.cache
    }

    /// Resolve a single pair without pacing.
    pub async fn resolve_segment(
        &self,
        from: &Waypoint,
        to: &Waypoint,
        cancel: &CancellationToken,
    ) -> Result<RouteSegment> {
        validate_waypoints(&[from.clone(), to.clone()])?;

        let mut pacer = Pacer::new(Duration::ZERO);
        self.resolve(from, to, &mut pacer, cancel, (1, 1)).await
    }

    /// Route between two waypoints as a one-segment [`StitchedRoute`].
    pub async fn route_between(
        &self,
        from: &Waypoint,
        to: &Waypoint,
        cancel: &CancellationToken,
    ) -> Result<StitchedRoute> {
        let pair = [from.clone(), to.clone()];
        validate_waypoints(&pair)?;

        let mut pacer = Pacer::new(Duration::ZERO);
        let segment = self.resolve(from, to, &mut pacer, cancel, (1, 1)).await?;

        let mut acc = RouteAccumulator::new(self.config.join_epsilon_meters, 1);
        acc.push(segment);
        Ok(acc.finish(pacer.calls))
    }

    /// Stitch a full itinerary.
    ///
    /// Segments are resolved strictly in order. A segment that cannot be
    /// routed degrades to a straight line; only an invalid waypoint list or
    /// cancellation fails the whole operation.
    pub async fn stitch(
        &self,
        waypoints: &[Waypoint],
        cancel: &CancellationToken,
    ) -> Result<StitchedRoute> {
        validate_waypoints(waypoints)?;

        let total = waypoints.len() - 1;
        let started = Instant::now();
        info!(
            "[RouteSynthesis] Stitching {} segments from {} waypoints",
            total,
            waypoints.len()
        );

        let mut pacer = Pacer::new(self.config.rate_limit());
        let mut acc = RouteAccumulator::new(self.config.join_epsilon_meters, total);

        for (i, pair) in waypoints.windows(2).enumerate() {
            if let Err(e) = check_cancelled(cancel) {
                info!(
                    "[RouteSynthesis] Cancelled before segment {}/{}",
                    i + 1,
                    total
                );
                return Err(e);
            }
            let segment = self
                .resolve(&pair[0], &pair[1], &mut pacer, cancel, (i + 1, total))
                .await?;
            acc.push(segment);
        }

        let route = acc.finish(pacer.calls);
        info!(
            "[RouteSynthesis] Stitched {} points, {} ({} failed, {} skipped, {} cached, {} calls) in {:.2}s",
            route.point_count(),
            route.distance_text(),
            route.failed_segment_count,
            route.skipped_segment_count,
            route.cache_hits,
            route.upstream_calls,
            started.elapsed().as_secs_f64()
        );
        Ok(route)
    }

    async fn resolve(
        &self,
        from: &Waypoint,
        to: &Waypoint,
        pacer: &mut Pacer,
        cancel: &CancellationToken,
        (index, total): (usize, usize),
    ) -> Result<RouteSegment> {
        let key = SegmentKey::between(&from.position, &to.position);

        if key.is_stationary() {
            debug!(
                "[RouteSynthesis] Segment {}/{} is a rest day at {}",
                index, total, from.title
            );
            return Ok(RouteSegment::skip(from, to));
        }

        if let Some(cached) = self.cache.get(&key) {
            debug!("[RouteSynthesis] Segment {}/{} (CACHED)", index, total);
            return Ok(RouteSegment::from_cached(from, to, cached));
        }

        for &mode in &self.config.travel_modes {
            pacer.ready(cancel).await?;
            let request = DirectionsRequest {
                origin: from.position,
                destination: to.position,
                mode,
            };
            let outcome = self.attempt(&request, cancel).await;
            pacer.record_call();

            match outcome {
                Ok(response) => {
                    let distance_meters = if response.distance_meters > 0.0 {
                        response.distance_meters
                    } else {
                        path_distance(&response.path)
                    };
                    let cached = CachedSegment {
                        path: response.path,
                        distance_meters,
                        duration_seconds: response.duration_seconds,
                        mode,
                    };
                    self.cache.insert(key, cached.clone());
                    debug!(
                        "[RouteSynthesis] {} route for segment {}/{}",
                        mode, index, total
                    );
                    let mut segment = RouteSegment::from_cached(from, to, cached);
                    segment.from_cache = false;
                    return Ok(segment);
                }
                Err(TrekRouteError::Cancelled) => return Err(TrekRouteError::Cancelled),
                Err(e) => {
                    warn!(
                        "[RouteSynthesis] {} failed for segment {}/{}: {}",
                        mode, index, total, e
                    );
                }
            }
        }

        warn!(
            "[RouteSynthesis] No route found, using straight line for segment {}/{} ({} -> {})",
            index, total, from.title, to.title
        );
        Ok(RouteSegment::straight_line(
            from,
            to,
            self.config.fallback_speed_mps,
        ))
    }

    /// One provider call, bounded by the provider timeout and the token.
    async fn attempt(
        &self,
        request: &DirectionsRequest,
        cancel: &CancellationToken,
    ) -> Result<DirectionsResponse> {
        let timeout = self.config.provider_timeout();
        let call = tokio::time::timeout(timeout, self.provider.route(request));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrekRouteError::Cancelled),
            outcome = call => match outcome {
                Ok(response) => response.and_then(|r| r.into_route(request.mode)),
                Err(_) => Err(TrekRouteError::Timeout {
                    operation: format!("{} directions", request.mode),
                    timeout_ms: self.config.provider_timeout_ms,
                }),
            },
        }
    }
}

/// Route connecting every waypoint directly, for when no provider is
/// available (e.g. missing credentials). Every non-rest-day segment counts
/// as failed.
pub fn straight_line_route(waypoints: &[Waypoint], config: &RouteConfig) -> Result<StitchedRoute> {
    validate_waypoints(waypoints)?;

    let mut acc = RouteAccumulator::new(config.join_epsilon_meters, waypoints.len() - 1);
    for pair in waypoints.windows(2) {
        let key = SegmentKey::between(&pair[0].position, &pair[1].position);
        let segment = if key.is_stationary() {
            RouteSegment::skip(&pair[0], &pair[1])
        } else {
            RouteSegment::straight_line(&pair[0], &pair[1], config.fallback_speed_mps)
        };
        acc.push(segment);
    }
    Ok(acc.finish(0))
}

/// Drop itinerary points that sit at the same place as the next one, so a
/// multi-night stay shows as a single marker. The last point is always kept.
pub fn skip_acclimatization_days(points: &[Waypoint]) -> Vec<Waypoint> {
    points
        .iter()
        .enumerate()
        .filter(|(i, point)| match points.get(i + 1) {
            None => true,
            Some(next) => {
                (point.position.lat - next.position.lat).abs() > SAME_PLACE_DEGREES
                    || (point.position.lng - next.position.lng).abs() > SAME_PLACE_DEGREES
            }
        })
        .map(|(_, point)| point.clone())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

//! # Route Export
//!
//! Pure serializers for a [`StitchedRoute`]: GPX 1.1 for GPS devices, a JSON
//! summary document, and a GeoJSON FeatureCollection for web maps. None of
//! them touch the network or mutate the route; the export time is passed in
//! so output is reproducible.

use chrono::{DateTime, SecondsFormat, Utc};
use gpx::{Gpx, GpxVersion, Metadata, Track, TrackSegment};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::engine::{RouteSegment, RouteSource, StitchedRoute};
use crate::error::{Result, TrekRouteError};
use crate::{LatLng, Waypoint};

/// Written to the GPX `creator` attribute.
pub const GPX_CREATOR: &str = "trek-route";

/// Window the synthetic track timestamps are spread over (12 hours).
const TRACK_WINDOW_MS: i64 = 12 * 60 * 60 * 1000;

/// Descriptive data about the trek being exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrekMetadata {
    pub title: String,
    /// URL slug; derived from the title when empty.
    pub slug: String,
    pub region_name: String,
    /// Free-form, e.g. "14 days"
    pub duration: String,
    pub trip_grade: String,
    pub max_altitude: Option<String>,
}

impl TrekMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Trek"
        } else {
            &self.title
        }
    }

    /// File-name stem: the slug, or the title lowercased with every
    /// non-alphanumeric character replaced by `-`.
    pub fn file_stem(&self) -> String {
        let source = if self.slug.trim().is_empty() {
            self.display_title()
        } else {
            self.slug.trim()
        };
        source
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect()
    }

    fn description(&self) -> String {
        let or_na = |s: &str| {
            if s.trim().is_empty() {
                "N/A".to_string()
            } else {
                s.to_string()
            }
        };
        format!(
            "{} | {} | Difficulty: {} | Max Altitude: {}",
            or_na(&self.region_name),
            or_na(&self.duration),
            or_na(&self.trip_grade),
            or_na(self.max_altitude.as_deref().unwrap_or_default())
        )
    }
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Gpx,
    Json,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::Json => "json",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "application/gpx+xml",
            ExportFormat::Json => "application/json",
            ExportFormat::GeoJson => "application/geo+json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = TrekRouteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpx" => Ok(ExportFormat::Gpx),
            "json" => Ok(ExportFormat::Json),
            "geojson" => Ok(ExportFormat::GeoJson),
            other => Err(TrekRouteError::Export {
                message: format!("unsupported format '{}'", other),
            }),
        }
    }
}

/// A serialized route ready to be written or downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub content: String,
}

impl ExportedFile {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Serialize `route` in `format`, named `{stem}-{YYYY-MM-DD}.{ext}`.
pub fn export_route(
    route: &StitchedRoute,
    metadata: &TrekMetadata,
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> Result<ExportedFile> {
    let content = match format {
        ExportFormat::Gpx => to_gpx(route, metadata, exported_at)?,
        ExportFormat::Json => pretty(&to_json(route, metadata, exported_at)?)?,
        ExportFormat::GeoJson => pretty(&to_geojson(route, metadata)?)?,
    };

    Ok(ExportedFile {
        filename: format!(
            "{}-{}.{}",
            metadata.file_stem(),
            exported_at.format("%Y-%m-%d"),
            format.extension()
        ),
        mime_type: format.mime_type(),
        content,
    })
}

fn pretty(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| TrekRouteError::Export {
        message: e.to_string(),
    })
}

fn ensure_exportable(route: &StitchedRoute) -> Result<()> {
    if route.is_empty() {
        return Err(TrekRouteError::Export {
            message: "route has no points".to_string(),
        });
    }
    Ok(())
}

/// Day stops in order: the start of the first segment, then every segment end.
fn day_stops(route: &StitchedRoute) -> Vec<&Waypoint> {
    let mut stops: Vec<&Waypoint> = route.segments.iter().take(1).map(|s| &s.from).collect();
    stops.extend(route.segments.iter().map(|s| &s.to));
    stops
}

// ============================================================================
// GPX
// ============================================================================

fn gpx_time(at: DateTime<Utc>) -> Result<gpx::Time> {
    let nanos = i128::from(at.timestamp_millis()) * 1_000_000;
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map(gpx::Time::from)
        .map_err(|e| TrekRouteError::Export {
            message: format!("timestamp out of range: {}", e),
        })
}

fn gpx_point(p: &LatLng) -> gpx::Waypoint {
    gpx::Waypoint::new(geo::Point::new(p.lng, p.lat))
}

/// GPX 1.1 document: one waypoint per day stop and one track whose points
/// follow `full_path`, labelled `Point N` with timestamps spread over 12 hours
/// from `exported_at`.
pub fn to_gpx(
    route: &StitchedRoute,
    metadata: &TrekMetadata,
    exported_at: DateTime<Utc>,
) -> Result<String> {
    ensure_exportable(route)?;

    let mut meta = Metadata::default();
    meta.name = Some(metadata.display_title().to_string());
    meta.description = Some(metadata.description());
    meta.time = Some(gpx_time(exported_at)?);

    let waypoints = day_stops(route)
        .into_iter()
        .map(|stop| {
            let mut wpt = gpx_point(&stop.position);
            wpt.name = Some(format!("Day {}: {}", stop.ordinal, stop.title));
            wpt
        })
        .collect();

    let total = route.full_path.len() as i64;
    let mut segment = TrackSegment::new();
    for (i, point) in route.full_path.iter().enumerate() {
        let offset = chrono::Duration::milliseconds(TRACK_WINDOW_MS * i as i64 / total);
        let mut trkpt = gpx_point(point);
        trkpt.name = Some(format!("Point {}", i + 1));
        trkpt.time = Some(gpx_time(exported_at + offset)?);
        segment.points.push(trkpt);
    }

    let mut track = Track::new();
    track.name = Some(format!("{} - Complete Route", metadata.display_title()));
    track.description = Some(metadata.region_name.clone()).filter(|r| !r.is_empty());
    track.type_ = Some("Trekking".to_string());
    track.segments.push(segment);

    let mut doc = Gpx::default();
    doc.version = GpxVersion::Gpx11;
    doc.creator = Some(GPX_CREATOR.to_string());
    doc.metadata = Some(meta);
    doc.waypoints = waypoints;
    doc.tracks.push(track);

    let mut buffer = Vec::new();
    gpx::write(&doc, &mut buffer).map_err(|e| TrekRouteError::Export {
        message: format!("GPX write failed: {}", e),
    })?;
    String::from_utf8(buffer).map_err(|e| TrekRouteError::Export {
        message: e.to_string(),
    })
}

// ============================================================================
// JSON
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteSummary<'a> {
    points: &'a [LatLng],
    distance: f64,
    duration: f64,
    distance_text: String,
    duration_text: String,
    point_count: usize,
    failed_segments: usize,
    source: RouteSource,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    trek: &'a TrekMetadata,
    route: RouteSummary<'a>,
    export_date: String,
}

/// `{ trek, route: { points, distance, duration, distanceText, durationText,
/// pointCount, failedSegments, source }, exportDate }`
pub fn to_json(
    route: &StitchedRoute,
    metadata: &TrekMetadata,
    exported_at: DateTime<Utc>,
) -> Result<Value> {
    ensure_exportable(route)?;

    let document = JsonExport {
        trek: metadata,
        route: RouteSummary {
            points: &route.full_path,
            distance: route.total_distance_meters,
            duration: route.total_duration_seconds,
            distance_text: route.distance_text(),
            duration_text: route.duration_text(),
            point_count: route.point_count(),
            failed_segments: route.failed_segment_count,
            source: route.source(),
        },
        export_date: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    Ok(serde_json::to_value(document)?)
}

// ============================================================================
// GeoJSON
// ============================================================================

fn line_coordinates(path: &[LatLng]) -> Vec<[f64; 2]> {
    path.iter().map(|p| [p.lng, p.lat]).collect()
}

fn segment_feature(segment: &RouteSegment) -> Value {
    json!({
        "type": "Feature",
        "id": format!("segment-day-{}", segment.from.ordinal),
        "geometry": {
            "type": "LineString",
            "coordinates": line_coordinates(&segment.path),
        },
        "properties": {
            "name": format!("Day {}: {} → {}", segment.from.ordinal, segment.from.title, segment.to.title),
            "day": segment.from.ordinal,
            "from": segment.from.title,
            "to": segment.to.title,
            "distance": segment.distance_meters.round(),
            "resolution": segment.resolution,
            "type": "segment",
        },
    })
}

/// FeatureCollection with the full route, one point per day stop and one
/// line per routed segment. Coordinates are `[lng, lat]`.
pub fn to_geojson(route: &StitchedRoute, metadata: &TrekMetadata) -> Result<Value> {
    ensure_exportable(route)?;
    let title = metadata.display_title();

    let mut features = vec![json!({
        "type": "Feature",
        "id": "full-route",
        "geometry": {
            "type": "LineString",
            "coordinates": line_coordinates(&route.full_path),
        },
        "properties": {
            "name": format!("{} - Full Route", title),
            "distance": route.total_distance_meters.round(),
            "duration": route.total_duration_seconds,
            "source": route.source(),
            "type": "route",
        },
    })];

    features.extend(day_stops(route).into_iter().enumerate().map(|(i, stop)| {
        json!({
            "type": "Feature",
            "id": format!("waypoint-{}", i),
            "geometry": {
                "type": "Point",
                "coordinates": [stop.position.lng, stop.position.lat],
            },
            "properties": {
                "name": stop.title,
                "day": stop.ordinal,
                "type": "waypoint",
            },
        })
    }));

    features.extend(route.segments.iter().map(segment_feature));

    Ok(json!({
        "type": "FeatureCollection",
        "name": title,
        "features": features,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::engine::straight_line_route;
    use chrono::TimeZone;

    fn sample_route() -> StitchedRoute {
        straight_line_route(
            &[
                Waypoint::new(1, "Lukla", 27.6869, 86.7314),
                Waypoint::new(2, "Phakding", 27.7410, 86.7127),
                Waypoint::new(3, "Namche Bazaar", 27.8057, 86.7142),
            ],
            &RouteConfig::default(),
        )
        .unwrap()
    }

    fn metadata() -> TrekMetadata {
        TrekMetadata {
            title: "Everest Base Camp Trek".to_string(),
            slug: String::new(),
            region_name: "Khumbu".to_string(),
            duration: "14 days".to_string(),
            trip_grade: "Strenuous".to_string(),
            max_altitude: Some("5545m".to_string()),
        }
    }

    fn exported_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap()
    }

    fn empty_route() -> StitchedRoute {
        let mut route = sample_route();
        route.full_path.clear();
        route
    }

    #[test]
    fn test_gpx_is_valid_and_complete() {
        let route = sample_route();
        let content = to_gpx(&route, &metadata(), exported_at()).unwrap();
        assert!(content.contains("version=\"1.1\""));

        let parsed = gpx::read(content.as_bytes()).unwrap();
        assert_eq!(parsed.version, GpxVersion::Gpx11);
        assert_eq!(parsed.waypoints.len(), 3);
        assert_eq!(parsed.tracks.len(), 1);

        let points = &parsed.tracks[0].segments[0].points;
        assert_eq!(points.len(), route.full_path.len());
        assert_eq!(points[0].name.as_deref(), Some("Point 1"));
        assert!((points[0].point().y() - 27.6869).abs() < 1e-9);
        assert!((points[0].point().x() - 86.7314).abs() < 1e-9);

        let description = parsed.metadata.unwrap().description.unwrap();
        assert_eq!(
            description,
            "Khumbu | 14 days | Difficulty: Strenuous | Max Altitude: 5545m"
        );
    }

    #[test]
    fn test_gpx_escapes_markup() {
        let meta = TrekMetadata::new("Annapurna <Circuit> & Tilicho");
        let content = to_gpx(&sample_route(), &meta, exported_at()).unwrap();
        assert!(!content.contains("<Circuit>"));
        let parsed = gpx::read(content.as_bytes()).unwrap();
        assert_eq!(
            parsed.metadata.unwrap().name.as_deref(),
            Some("Annapurna <Circuit> & Tilicho")
        );
    }

    #[test]
    fn test_json_shape() {
        let route = sample_route();
        let doc = to_json(&route, &metadata(), exported_at()).unwrap();

        assert_eq!(doc["trek"]["title"], "Everest Base Camp Trek");
        assert_eq!(doc["trek"]["regionName"], "Khumbu");
        assert_eq!(doc["trek"]["tripGrade"], "Strenuous");
        assert_eq!(doc["trek"]["maxAltitude"], "5545m");
        assert!(doc["trek"].get("region_name").is_none());
        assert_eq!(doc["route"]["pointCount"], 3);
        assert_eq!(doc["route"]["points"][0]["lat"], 27.6869);
        assert_eq!(doc["route"]["points"][0]["lng"], 86.7314);
        assert_eq!(doc["route"]["distanceText"], route.distance_text());
        assert_eq!(doc["route"]["source"], "straight_line_fallback");
        assert_eq!(doc["exportDate"], "2024-03-15T06:00:00.000Z");
    }

    #[test]
    fn test_geojson_features() {
        let route = sample_route();
        let doc = to_geojson(&route, &metadata()).unwrap();
        let features = doc["features"].as_array().unwrap();

        // Full route + 3 stops + 2 segments
        assert_eq!(features.len(), 6);
        assert_eq!(features[0]["id"], "full-route");
        assert_eq!(features[0]["geometry"]["coordinates"][0], json!([86.7314, 27.6869]));
        assert_eq!(features[1]["geometry"]["type"], "Point");
        assert_eq!(features[4]["id"], "segment-day-1");
        assert_eq!(features[5]["properties"]["resolution"], "STRAIGHT_LINE");
    }

    #[test]
    fn test_export_route_envelope() {
        let file = export_route(&sample_route(), &metadata(), ExportFormat::Gpx, exported_at())
            .unwrap();
        assert_eq!(file.filename, "everest-base-camp-trek-2024-03-15.gpx");
        assert_eq!(file.mime_type, "application/gpx+xml");
        assert!(file.size() > 0);

        let meta = TrekMetadata {
            slug: "ebc".to_string(),
            ..metadata()
        };
        let file = export_route(&sample_route(), &meta, ExportFormat::GeoJson, exported_at())
            .unwrap();
        assert_eq!(file.filename, "ebc-2024-03-15.geojson");
        let parsed: Value = serde_json::from_str(&file.content).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
    }

    #[test]
    fn test_empty_route_is_rejected() {
        for format in [ExportFormat::Gpx, ExportFormat::Json, ExportFormat::GeoJson] {
            assert!(matches!(
                export_route(&empty_route(), &metadata(), format, exported_at()),
                Err(TrekRouteError::Export { .. })
            ));
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("GPX".parse::<ExportFormat>().unwrap(), ExportFormat::Gpx);
        assert_eq!("geojson".parse::<ExportFormat>().unwrap(), ExportFormat::GeoJson);
        assert!("kml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_untitled_trek_stem() {
        assert_eq!(TrekMetadata::default().file_stem(), "trek");
    }
}

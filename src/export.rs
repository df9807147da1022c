//! # Exporter
//!
//! Serializes every persisted track and asset into one downloadable file:
//! pretty JSON, a two-section CSV, or a GeoJSON `FeatureCollection`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{FieldError, Result};
use crate::geodesy::{to_line_string, Bounds};
use crate::types::{Asset, Track};

const FILE_STEM: &str = "road-infrastructure-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    GeoJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::GeoJson => "geojson",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::GeoJson => "application/geo+json",
        }
    }

    /// `road-infrastructure-data-YYYY-MM-DD.<ext>`
    pub fn filename(&self, date: DateTime<Utc>) -> String {
        format!("{}-{}.{}", FILE_STEM, date.format("%Y-%m-%d"), self.extension())
    }
}

/// Everything being exported, stamped with the export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub roads: Vec<Track>,
    pub infrastructure: Vec<Asset>,
    pub export_date: DateTime<Utc>,
    pub total_records: usize,
}

impl ExportBundle {
    /// Fails with [`FieldError::NothingToExport`] when both collections are empty.
    pub fn new(roads: Vec<Track>, infrastructure: Vec<Asset>, export_date: DateTime<Utc>) -> Result<Self> {
        let total_records = roads.len() + infrastructure.len();
        if total_records == 0 {
            return Err(FieldError::NothingToExport);
        }
        Ok(Self {
            roads,
            infrastructure,
            export_date,
            total_records,
        })
    }
}

/// A rendered export ready to hand to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub contents: String,
}

pub fn render(bundle: &ExportBundle, format: ExportFormat) -> Result<ExportFile> {
    let contents = match format {
        ExportFormat::Json => to_json(bundle)?,
        ExportFormat::Csv => to_csv(bundle),
        ExportFormat::GeoJson => serde_json::to_string_pretty(&to_geojson(bundle)).map_err(config_error)?,
    };
    Ok(ExportFile {
        filename: format.filename(bundle.export_date),
        mime_type: format.mime_type(),
        contents,
    })
}

pub fn to_json(bundle: &ExportBundle) -> Result<String> {
    serde_json::to_string_pretty(bundle).map_err(config_error)
}

// ============================================================================
// CSV
// ============================================================================

const ROAD_HEADER: &str =
    "TYPE,NAME,ROAD_TYPE,DISTANCE_KM,CONDITION,START_TIME,END_TIME,COORDINATES_COUNT,NOTES";
const ASSET_HEADER: &str = "TYPE,NAME,INFRASTRUCTURE_TYPE,STATUS,PRIORITY,LATITUDE,LONGITUDE,DESCRIPTION,CONTACT,CREATED_AT,UPDATED_AT,NOTES";

/// Roads section, blank line, then infrastructure section. Empty sections are omitted.
pub fn to_csv(bundle: &ExportBundle) -> String {
    let mut csv = String::new();

    if !bundle.roads.is_empty() {
        csv.push_str(ROAD_HEADER);
        csv.push('\n');
        for road in &bundle.roads {
            let row = [
                "ROAD".to_string(),
                quote(&road.name),
                quote(road.road_class.as_str()),
                format!("{:.2}", road.distance_km()),
                quote(road.condition.as_str()),
                quote(&timestamp(road.start_time)),
                quote(&road.end_time.map(timestamp).unwrap_or_default()),
                road.points.len().to_string(),
                quote(&road.notes),
            ];
            csv.push_str(&row.join(","));
            csv.push('\n');
        }
        csv.push('\n');
    }

    if !bundle.infrastructure.is_empty() {
        csv.push_str(ASSET_HEADER);
        csv.push('\n');
        for item in &bundle.infrastructure {
            let row = [
                "INFRASTRUCTURE".to_string(),
                quote(&item.name),
                quote(item.category.as_str()),
                quote(item.status.as_str()),
                quote(item.priority.as_str()),
                item.location.latitude.to_string(),
                item.location.longitude.to_string(),
                quote(&item.description),
                quote(&item.contact),
                quote(&timestamp(item.created_at)),
                quote(&timestamp(item.updated_at)),
                quote(&item.notes),
            ];
            csv.push_str(&row.join(","));
            csv.push('\n');
        }
    }

    csv
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// GeoJSON
// ============================================================================

/// Tracks with at least two points become `LineString`s, assets become `Point`s.
pub fn to_geojson(bundle: &ExportBundle) -> Value {
    let roads = bundle
        .roads
        .iter()
        .filter(|road| road.points.len() > 1)
        .map(road_feature);
    let assets = bundle.infrastructure.iter().map(asset_feature);

    json!({
        "type": "FeatureCollection",
        "features": roads.chain(assets).collect::<Vec<_>>(),
        "metadata": {
            "exportDate": bundle.export_date,
            "totalRecords": bundle.total_records,
            "roads": bundle.roads.len(),
            "infrastructure": bundle.infrastructure.len(),
        }
    })
}

fn road_feature(road: &Track) -> Value {
    let line = to_line_string(&road.points);
    let coordinates: Vec<[f64; 2]> = line.coords().map(|c| [c.x, c.y]).collect();

    let mut feature = json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates,
        },
        "properties": {
            "type": "road",
            "name": road.name,
            "roadType": road.road_class,
            "distance": road.cumulative_distance_meters,
            "condition": road.condition,
            "startTime": road.start_time,
            "endTime": road.end_time,
            "notes": road.notes,
        }
    });
    if let Some(bounds) = Bounds::from_points(&road.points) {
        feature["bbox"] = json!(bounds.to_bbox());
    }
    feature
}

fn asset_feature(item: &Asset) -> Value {
    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": [item.location.longitude, item.location.latitude],
        },
        "properties": {
            "type": "infrastructure",
            "name": item.name,
            "infrastructureType": item.category,
            "status": item.status,
            "priority": item.priority,
            "description": item.description,
            "contact": item.contact,
            "createdAt": item.created_at,
            "updatedAt": item.updated_at,
            "notes": item.notes,
        }
    })
}

fn config_error(err: serde_json::Error) -> FieldError {
    FieldError::Config {
        message: format!("export serialization failed: {}", err),
    }
}

//! Entity types shared by the recorder, the store and the exporter.
//!
//! Field names on the wire follow the client's storage format, so collections
//! written by earlier builds load without migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

// ============================================================================
// Position Fixes
// ============================================================================

/// One instantaneous positioning reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time in milliseconds since the Unix epoch
    #[serde(rename = "timestamp")]
    pub capture_time_millis: i64,
    /// Horizontal accuracy radius in meters, when the source reports one
    #[serde(rename = "accuracy", default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, capture_time_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            capture_time_millis,
            accuracy_meters: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }
}

/// A bare latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the location has valid WGS84 coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(ValidationError::InvalidCoordinates.into())
        }
    }
}

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadClass {
    Highway,
    Main,
    Secondary,
    Residential,
}

impl RoadClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadClass::Highway => "highway",
            RoadClass::Main => "main",
            RoadClass::Secondary => "secondary",
            RoadClass::Residential => "residential",
        }
    }

    /// Parse the lowercase form used in storage and forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "highway" => Some(RoadClass::Highway),
            "main" => Some(RoadClass::Main),
            "secondary" => Some(RoadClass::Secondary),
            "residential" => Some(RoadClass::Residential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadCondition {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
}

impl RoadCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadCondition::Excellent => "excellent",
            RoadCondition::Good => "good",
            RoadCondition::Fair => "fair",
            RoadCondition::Poor => "poor",
        }
    }
}

/// A road-path recording: ordered fixes plus survey metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub road_class: RoadClass,
    #[serde(default)]
    pub condition: RoadCondition,
    /// Chronological fixes, append-only while recording
    #[serde(rename = "coordinates")]
    pub points: Vec<PositionFix>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Running haversine sum over consecutive points, in meters
    #[serde(rename = "distance")]
    pub cumulative_distance_meters: f64,
    #[serde(default)]
    pub notes: String,
}

impl Track {
    pub fn distance_km(&self) -> f64 {
        self.cumulative_distance_meters / 1000.0
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

// ============================================================================
// Assets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Building,
    Worksite,
    Bridge,
    Utility,
    Sign,
    Light,
    Drain,
}

impl AssetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Building => "building",
            AssetCategory::Worksite => "worksite",
            AssetCategory::Bridge => "bridge",
            AssetCategory::Utility => "utility",
            AssetCategory::Sign => "sign",
            AssetCategory::Light => "light",
            AssetCategory::Drain => "drain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Planned,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "active",
            AssetStatus::Inactive => "inactive",
            AssetStatus::Maintenance => "maintenance",
            AssetStatus::Planned => "planned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl AssetPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetPriority::Low => "low",
            AssetPriority::Medium => "medium",
            AssetPriority::High => "high",
            AssetPriority::Critical => "critical",
        }
    }
}

/// A point-of-interest infrastructure record.
///
/// `updated_at >= created_at` holds for every asset the registry produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub category: AssetCategory,
    #[serde(rename = "coordinates")]
    pub location: Location,
    #[serde(default)]
    pub status: AssetStatus,
    #[serde(default)]
    pub priority: AssetPriority,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_validation() {
        assert!(Location::new(40.0, -74.0).is_valid());
        assert!(Location::new(-90.0, 180.0).is_valid());
        assert!(!Location::new(90.5, 0.0).is_valid());
        assert!(!Location::new(0.0, -181.0).is_valid());
        assert!(!Location::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_track_wire_format() {
        let json = r#"{
            "id": "1714557600000",
            "name": "Main Street",
            "type": "main",
            "coordinates": [
                {"latitude": 40.0, "longitude": -74.0, "timestamp": 1714557600000, "accuracy": 5.0}
            ],
            "startTime": "2024-05-01T10:00:00.000Z",
            "distance": 0,
            "notes": "",
            "condition": "fair"
        }"#;

        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.road_class, RoadClass::Main);
        assert_eq!(track.condition, RoadCondition::Fair);
        assert_eq!(track.points[0].accuracy_meters, Some(5.0));
        assert!(track.end_time.is_none());

        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["type"], "main");
        assert!(value.get("endTime").is_none());
        assert_eq!(value["coordinates"][0]["timestamp"], 1714557600000_i64);
    }

    #[test]
    fn test_asset_defaults() {
        let json = r#"{
            "id": "a1",
            "name": "Culvert 12",
            "type": "drain",
            "coordinates": {"latitude": 40.0, "longitude": -74.0},
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        }"#;

        let asset: Asset = serde_json::from_str(json).unwrap();
        assert_eq!(asset.status, AssetStatus::Active);
        assert_eq!(asset.priority, AssetPriority::Medium);
        assert!(asset.photos.is_empty());
    }

    #[test]
    fn test_road_class_parse() {
        assert_eq!(RoadClass::parse("highway"), Some(RoadClass::Highway));
        assert_eq!(RoadClass::parse(" residential "), Some(RoadClass::Residential));
        assert_eq!(RoadClass::parse(""), None);
        assert_eq!(RoadClass::parse("alley"), None);
    }
}

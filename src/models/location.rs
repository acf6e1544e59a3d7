use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::de::{flex_f64, flex_f64_opt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    #[serde(deserialize_with = "flex_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "flex_f64")]
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.point().is_valid()
    }
}

/// Wire form of a location where the server may send nulls for either coordinate.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawLocation {
    #[serde(default, deserialize_with = "flex_f64_opt")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawLocation {
    /// Missing or out-of-range coordinates mean "location unknown".
    pub fn into_location(self) -> Option<Location> {
        let location = Location {
            latitude: self.latitude?,
            longitude: self.longitude?,
            address: self.address,
            timestamp: self.timestamp,
        };
        location.is_valid().then_some(location)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Location gating: geofence distance and Wi-Fi BSSID allow-listing.
//!
//! No geo crate appears anywhere in the corpus this engine was grown
//! from, so distance is a hand-rolled pure function rather than an
//! imported dependency.

use serde::{Deserialize, Serialize};

use crate::domain::session::SessionConstraints;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Gps {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    Valid,
    GeofenceViolation,
    WifiViolation,
    MissingGps,
    MissingBssid,
}

/// Haversine great-circle distance in meters between two lat/lon points.
pub fn haversine_distance_meters(a: Gps, b: Gps) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let h = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Evaluate a scan's location against session constraints. No constraints
/// at all is always valid (pre-configured lenient mode); geofence and
/// Wi-Fi constraints combine conjunctively when both are present.
pub fn validate_location(
    constraints: Option<&SessionConstraints>,
    gps: Option<Gps>,
    bssid: Option<&str>,
) -> LocationOutcome {
    let Some(constraints) = constraints else {
        return LocationOutcome::Valid;
    };

    if let Some(geofence) = &constraints.geofence {
        let Some(gps) = gps else {
            return LocationOutcome::MissingGps;
        };
        let centre = Gps { lat: geofence.lat, lon: geofence.lon };
        if haversine_distance_meters(gps, centre) > geofence.radius_meters {
            return LocationOutcome::GeofenceViolation;
        }
    }

    if !constraints.wifi_allowlist.is_empty() {
        let Some(bssid) = bssid else {
            return LocationOutcome::MissingBssid;
        };
        let bssid_lower = bssid.to_lowercase();
        let matches = constraints
            .wifi_allowlist
            .iter()
            .any(|fragment| bssid_lower.contains(&fragment.to_lowercase()));
        if !matches {
            return LocationOutcome::WifiViolation;
        }
    }

    LocationOutcome::Valid
}

#[cfg(test)]
#[path = "geo_tests.rs"]
mod tests;

//! Spatial and calendar helpers
//!
//! Distances use the haversine formula on a spherical earth, which is accurate
//! to well under a meter at the neighbourhood scales the engine works with.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::types::GeoPoint;

/// Mean earth radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Minutes in a day
pub const MINUTES_PER_DAY: u16 = 1440;

/// Flat-earth approximation of meters per degree of latitude
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Great-circle distance between two points in meters
pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Larger of the north-south and east-west separations in meters.
///
/// Treats the neighbourhood of a point as a square box on the local grid, so two
/// points are within `d` of each other when neither axis differs by more than `d`.
pub fn grid_separation_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let north_south = (a.lat - b.lat).abs() * METERS_PER_DEGREE;
    let east_west = (a.lng - b.lng).abs() * METERS_PER_DEGREE * mean_lat.cos();
    north_south.max(east_west)
}

/// Circular distance between two days of the week (Saturday and Sunday are adjacent)
pub fn day_distance(a: u8, b: u8) -> u8 {
    let diff = (a as i16 - b as i16).rem_euclid(7) as u8;
    diff.min(7 - diff)
}

/// Circular distance between two minute-of-day values (23:50 and 00:10 are 20 apart)
pub fn minute_distance(a: u16, b: u16) -> u16 {
    let diff = (a as i32 - b as i32).rem_euclid(MINUTES_PER_DAY as i32) as u16;
    diff.min(MINUTES_PER_DAY - diff)
}

/// Local day of week (0 = Sunday) and minute of day for a timestamp
pub fn local_slot(at: DateTime<Utc>, utc_offset_minutes: i32) -> (u8, u16) {
    let local = at + Duration::minutes(utc_offset_minutes as i64);
    let day = local.weekday().num_days_from_sunday() as u8;
    let minute = (local.hour() * 60 + local.minute()) as u16;
    (day, minute)
}

/// Local hour of day for a timestamp
pub fn local_hour(at: DateTime<Utc>, utc_offset_minutes: i32) -> u8 {
    (local_slot(at, utc_offset_minutes).1 / 60) as u8
}

/// Weighted mean of points; `None` when the total weight is not positive
pub fn weighted_centroid<'a, I>(points: I) -> Option<GeoPoint>
where
    I: IntoIterator<Item = (&'a GeoPoint, f64)>,
{
    let mut lat = 0.0;
    let mut lng = 0.0;
    let mut total = 0.0;

    for (point, weight) in points {
        if weight <= 0.0 || !weight.is_finite() {
            continue;
        }
        lat += point.lat * weight;
        lng += point.lng * weight;
        total += weight;
    }

    if total > 0.0 {
        Some(GeoPoint::new(lat / total, lng / total))
    } else {
        None
    }
}

/// Largest distance between any two of the points
pub fn max_pairwise_distance(points: &[GeoPoint]) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            max = max.max(haversine_meters(a, b));
        }
    }
    max
}

/// Walking time in whole minutes, rounded up
pub fn walk_minutes(distance_meters: f64, walking_speed_m_per_min: f64) -> u32 {
    if distance_meters <= 0.0 || walking_speed_m_per_min <= 0.0 {
        return 0;
    }
    (distance_meters / walking_speed_m_per_min).ceil() as u32
}

/// Snap a coordinate to a grid with the given number of decimals
pub fn quantize(value: f64, decimals: u32) -> i64 {
    let scale = 10_f64.powi(decimals as i32);
    (value * scale).round() as i64
}

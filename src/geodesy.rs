// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::Point;

/// Radius of Earth used by all distance computations, in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Diameter of Earth matching [EARTH_RADIUS], in meters.
const EARTH_DIAMETER: f64 = EARTH_RADIUS + EARTH_RADIUS;

/// Calculates the great-circle distance between two lat-lon positions
/// on Earth using the [haversine formula](https://en.wikipedia.org/wiki/Haversine_formula).
/// Returns the result in meters.
pub fn earth_distance(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lon1 = a.lon.to_radians();
    let lat2 = b.lat.to_radians();
    let lon2 = b.lon.to_radians();

    let sin_dlat_half = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon_half = ((lon2 - lon1) * 0.5).sin();

    let h = sin_dlat_half * sin_dlat_half + lat1.cos() * lat2.cos() * sin_dlon_half * sin_dlon_half;

    // Rounding may push h slightly above 1 for antipodal points
    EARTH_DIAMETER * h.min(1.0).sqrt().asin()
}

/// Calculates the initial forward azimuth when travelling from `from` to `to`.
/// Returns the result in degrees, in the `[0, 360)` range, where 0 is north.
pub fn bearing(from: Point, to: Point) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlon = (to.lon - from.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Vertex of a polyline closest to some position, as returned by
/// [nearest_point_on_polyline] and [nearest_point_from].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Index of the vertex in the polyline.
    pub index: usize,

    /// Position of the vertex.
    pub point: Point,

    /// Distance from the searched position to the vertex, in meters.
    pub distance: f64,
}

/// Finds the vertex of `polyline` closest to `point`.
///
/// This function requires computing the distance to every vertex,
/// which is fine for routes consisting of hundreds of points.
/// Returns [None] only if the polyline is empty.
pub fn nearest_point_on_polyline(polyline: &[Point], point: Point) -> Option<Nearest> {
    nearest_point_from(polyline, point, 0)
}

/// Finds the vertex of `polyline[start..]` closest to `point`.
/// The returned [Nearest::index] is relative to the start of the whole `polyline`.
///
/// Ties are resolved in favor of the earlier vertex.
pub fn nearest_point_from(polyline: &[Point], point: Point, start: usize) -> Option<Nearest> {
    polyline
        .iter()
        .enumerate()
        .skip(start)
        .map(|(index, &vertex)| Nearest {
            index,
            point: vertex,
            distance: earth_distance(point, vertex),
        })
        .fold(None, |best: Option<Nearest>, candidate| match best {
            Some(b) if b.distance <= candidate.distance => Some(b),
            _ => Some(candidate),
        })
}

/// Applies an exponential moving average to a coordinate stream:
/// returns `previous + alpha * (next - previous)`.
///
/// `alpha` must be in the `(0, 1]` range, where 1 disables smoothing.
/// Values outside of that range are clamped.
pub fn smooth(previous: Point, next: Point, alpha: f64) -> Point {
    let alpha = if alpha.is_finite() {
        alpha.clamp(f64::EPSILON, 1.0)
    } else {
        1.0
    };

    if alpha >= 1.0 {
        return next;
    }

    Point {
        lat: previous.lat + alpha * (next.lat - previous.lat),
        lon: previous.lon + alpha * (next.lon - previous.lon),
    }
}

/// Returns the total length of a polyline, in meters.
pub fn polyline_length(points: &[Point]) -> f64 {
    points
        .windows(2)
        .map(|w| earth_distance(w[0], w[1]))
        .sum()
}

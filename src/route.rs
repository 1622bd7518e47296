// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use crate::geodesy::polyline_length;
use crate::provider::RouteCalculationError;
use crate::Point;

/// A single turn-by-turn instruction of a [Route].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Maneuver {
    /// Human-readable instruction, e.g. "Turn left onto Main Street."
    pub instruction: String,

    /// Instruction phrased for text-to-speech, announced before the maneuver.
    pub verbal_instruction: Option<String>,

    /// Maneuver type code, as reported by the routing service.
    pub kind: u8,

    /// Names of the streets the maneuver leads onto.
    pub street_names: Vec<String>,

    /// Length of the maneuver, in meters.
    pub length: f64,

    /// Estimated duration of the maneuver, in seconds.
    pub time: f64,

    /// Index into [Route::coordinates] at which this maneuver begins.
    pub begin_shape_index: usize,

    /// Index into [Route::coordinates] at which this maneuver ends.
    pub end_shape_index: usize,
}

/// A route computed by a [RouteProvider](crate::provider::RouteProvider).
///
/// Routes are read-only once built. Every maneuver is guaranteed to
/// begin at a valid index into [Route::coordinates], and the coordinates
/// are never empty. Recalculating a route produces a new Route object.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    coordinates: Vec<Point>,
    maneuvers: Vec<Maneuver>,
    total_distance: f64,
    total_time: f64,
}

impl Route {
    /// Builds a new route, checking that `coordinates` is not empty
    /// and that all maneuvers point into `coordinates`.
    ///
    /// `end_shape_index` values past the end of `coordinates` are clamped.
    /// A first maneuver not anchored at the route start is tolerated, but logged,
    /// as shape index conventions vary between routing backends.
    pub fn new(
        coordinates: Vec<Point>,
        mut maneuvers: Vec<Maneuver>,
        total_distance: f64,
        total_time: f64,
    ) -> Result<Self, RouteCalculationError> {
        if coordinates.is_empty() {
            return Err(RouteCalculationError::EmptyRoute);
        }

        let last = coordinates.len() - 1;
        for (index, m) in maneuvers.iter_mut().enumerate() {
            if m.begin_shape_index > last {
                return Err(RouteCalculationError::InvalidManeuver {
                    index,
                    begin_shape_index: m.begin_shape_index,
                    len: coordinates.len(),
                });
            }
            m.end_shape_index = m.end_shape_index.clamp(m.begin_shape_index, last);
        }

        if let Some(first) = maneuvers.first() {
            if first.begin_shape_index != 0 {
                log::warn!(
                    "first maneuver begins at shape index {} instead of 0",
                    first.begin_shape_index
                );
            }
        }

        Ok(Self {
            coordinates,
            maneuvers,
            total_distance,
            total_time,
        })
    }

    /// Builds a route without any maneuvers, using the polyline length as
    /// total distance and deriving the total time from `speed` in meters per second.
    pub fn from_coordinates(
        coordinates: Vec<Point>,
        speed: f64,
    ) -> Result<Self, RouteCalculationError> {
        let total_distance = polyline_length(&coordinates);
        let total_time = if speed > 0.0 {
            total_distance / speed
        } else {
            0.0
        };
        Self::new(coordinates, Vec::new(), total_distance, total_time)
    }

    /// Returns the ordered positions describing the route geometry.
    pub fn coordinates(&self) -> &[Point] {
        &self.coordinates
    }

    /// Returns the turn-by-turn instructions of the route.
    pub fn maneuvers(&self) -> &[Maneuver] {
        &self.maneuvers
    }

    /// Returns the total length of the route, in meters.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Returns the estimated duration of the route, in seconds.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Returns the first position of the route.
    pub fn start(&self) -> Point {
        self.coordinates[0]
    }

    /// Returns the last position of the route.
    pub fn end(&self) -> Point {
        self.coordinates[self.coordinates.len() - 1]
    }

    /// Returns the position at which a maneuver begins.
    pub fn maneuver_position(&self, m: &Maneuver) -> Point {
        self.coordinates[m.begin_shape_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Vec<Point> {
        vec![
            Point::new(10.2490, 123.7980),
            Point::new(10.2485, 123.7978),
            Point::new(10.2481, 123.7976),
        ]
    }

    fn maneuver(begin: usize, end: usize) -> Maneuver {
        Maneuver {
            instruction: format!("maneuver at {}", begin),
            begin_shape_index: begin,
            end_shape_index: end,
            ..Default::default()
        }
    }

    #[test]
    fn valid_route() {
        let r = Route::new(line(), vec![maneuver(0, 2), maneuver(2, 2)], 120.0, 90.0).unwrap();
        assert_eq!(r.coordinates().len(), 3);
        assert_eq!(r.maneuvers().len(), 2);
        assert_eq!(r.start(), line()[0]);
        assert_eq!(r.end(), line()[2]);
        assert_eq!(r.maneuver_position(&r.maneuvers()[1]), line()[2]);
        assert_eq!(r.total_distance(), 120.0);
        assert_eq!(r.total_time(), 90.0);
    }

    #[test]
    fn empty_route_is_rejected() {
        assert!(matches!(
            Route::new(vec![], vec![], 0.0, 0.0),
            Err(RouteCalculationError::EmptyRoute)
        ));
    }

    #[test]
    fn out_of_range_maneuver_is_rejected() {
        let err = Route::new(line(), vec![maneuver(0, 1), maneuver(3, 3)], 0.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            RouteCalculationError::InvalidManeuver {
                index: 1,
                begin_shape_index: 3,
                len: 3
            }
        ));
    }

    #[test]
    fn end_shape_index_is_clamped() {
        let r = Route::new(line(), vec![maneuver(1, 10)], 0.0, 0.0).unwrap();
        assert_eq!(r.maneuvers()[0].end_shape_index, 2);
    }

    #[test]
    fn route_from_coordinates() {
        let r = Route::from_coordinates(line(), 1.25).unwrap();
        assert!(r.maneuvers().is_empty());
        assert!(r.total_distance() > 100.0 && r.total_distance() < 120.0);
        assert!((r.total_time() - r.total_distance() / 1.25).abs() < 1e-9);
    }
}

// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::polyline::PolylineError;
use crate::route::Route;
use crate::Point;

mod valhalla;

pub use valhalla::ValhallaClient;

/// Travel mode used to parametrize a routing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Walking.
    #[default]
    Pedestrian,

    /// Motor vehicles.
    Vehicle,

    /// Bicycles.
    Bicycle,
}

impl Profile {
    /// Returns the [costing model](https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/#costing-models)
    /// name understood by the routing service.
    pub fn costing(self) -> &'static str {
        match self {
            Self::Pedestrian => "pedestrian",
            Self::Vehicle => "auto",
            Self::Bicycle => "bicycle",
        }
    }

    /// Returns a typical travel speed for this profile, in meters per second.
    /// Used to estimate durations when the routing service doesn't provide them.
    pub fn typical_speed(self) -> f64 {
        match self {
            Self::Pedestrian => 1.4,
            Self::Vehicle => 11.0,
            Self::Bicycle => 4.5,
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pedestrian => write!(f, "pedestrian"),
            Self::Vehicle => write!(f, "vehicle"),
            Self::Bicycle => write!(f, "bicycle"),
        }
    }
}

/// Error returned when a string doesn't name any [Profile].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile: {0:?} (expected pedestrian, vehicle or bicycle)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pedestrian" | "foot" | "walk" => Ok(Self::Pedestrian),
            "vehicle" | "auto" | "car" => Ok(Self::Vehicle),
            "bicycle" | "bike" => Ok(Self::Bicycle),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// Error conditions which may occur when requesting a [Route].
///
/// Route requests are never retried internally; whoever issued
/// the request decides whether to try again.
#[derive(Debug, thiserror::Error)]
pub enum RouteCalculationError {
    /// The routing service could not be reached, or the response could not be read.
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    /// The routing service responded with an error.
    #[error("routing service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// The routing service could not find any path between the locations.
    #[error("no route found")]
    NoRoute,

    /// The response was not valid JSON or didn't contain a trip.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The route shape could not be decoded.
    #[error("shape: {0}")]
    Shape(#[from] PolylineError),

    /// The route shape had no coordinates.
    #[error("route has no coordinates")]
    EmptyRoute,

    /// The route provider crashed while computing the route.
    #[error("route provider panicked")]
    Panicked,

    /// A maneuver pointed outside of the route shape.
    #[error("maneuver {index} begins at shape index {begin_shape_index}, but the route has {len} points")]
    InvalidManeuver {
        index: usize,
        begin_shape_index: usize,
        len: usize,
    },
}

/// An external service able to compute [Routes](Route) between two positions.
pub trait RouteProvider: Send + Sync + 'static {
    /// Computes a route from `origin` to `destination` for the given travel [Profile].
    fn request_route(
        &self,
        origin: Point,
        destination: Point,
        profile: Profile,
    ) -> impl Future<Output = Result<Route, RouteCalculationError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn costing_names() {
        assert_eq!(Profile::Pedestrian.costing(), "pedestrian");
        assert_eq!(Profile::Vehicle.costing(), "auto");
        assert_eq!(Profile::Bicycle.costing(), "bicycle");
    }

    #[test]
    fn parse_profile() {
        assert_eq!("pedestrian".parse(), Ok(Profile::Pedestrian));
        assert_eq!("Auto".parse(), Ok(Profile::Vehicle));
        assert_eq!("bike".parse(), Ok(Profile::Bicycle));
        assert_eq!(
            "boat".parse::<Profile>(),
            Err(UnknownProfile("boat".to_string()))
        );
    }

    #[test]
    fn default_profile_is_pedestrian() {
        assert_eq!(Profile::default(), Profile::Pedestrian);
    }
}

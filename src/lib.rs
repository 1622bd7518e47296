// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Real-time pedestrian navigation over an external routing service.
//!
//! The crate tracks the user's position through a [PositionSource](tracker::PositionSource),
//! requests routes from a [Valhalla](https://valhalla.github.io/valhalla/)-compatible service,
//! follows the user's progress along the returned polyline, and automatically
//! reroutes when the user strays from the route - debounced, and up to a retry ceiling.
//!
//! The navigation rules live in a pure state machine ([NavigationSession]), driven by
//! an asynchronous orchestrator ([Navigator]) which performs the network requests and
//! starts or stops position tracking.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use routenav::{Config, LocationTracker, Navigator, Point, RouteDestination, ValhallaClient};
//! use routenav::source::NmeaSource;
//!
//! let config = Config::load("routenav.toml")?;
//! let tracker = LocationTracker::new(NmeaSource::new("/dev/serial0"), config.tracker.clone());
//! let provider = ValhallaClient::from_config(&config.routing)?;
//! let navigator = Navigator::new(tracker, provider, config.navigation.clone());
//!
//! navigator
//!     .start_navigation(RouteDestination::new(Point::new(10.2481, 123.7976)))
//!     .await?;
//!
//! let session = navigator.session();
//! if let Some(m) = session.current_maneuver() {
//!     println!("{}", m.instruction);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod geodesy;
mod navigator;
pub mod policy;
pub mod polyline;
pub mod provider;
mod route;
mod session;
pub mod source;
pub mod tracker;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{Config, NavigationConfig, RoutingConfig, TrackerConfig};
pub use geodesy::earth_distance;
pub use navigator::{NavigationError, Navigator};
pub use provider::{Profile, RouteCalculationError, RouteProvider, ValhallaClient};
pub use route::{Maneuver, Route};
pub use session::{Effect, Event, NavigationSession, Phase, RequestId};
pub use tracker::{LocationError, LocationTracker, UserLocation};

/// A position on Earth, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// The place a navigation session leads to.
///
/// A destination stays fixed for the whole session; rerouting after
/// leaving the route recomputes the path, but never the destination.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteDestination {
    pub point: Point,
    pub name: Option<String>,
}

impl RouteDestination {
    pub fn new(point: Point) -> Self {
        Self { point, name: None }
    }

    pub fn named<N: Into<String>>(point: Point, name: N) -> Self {
        Self {
            point,
            name: Some(name.into()),
        }
    }
}

/// Locks a mutex, recovering the guard if the mutex was poisoned.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

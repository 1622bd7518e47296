// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::config::NavigationConfig;
use crate::geodesy::{earth_distance, nearest_point_from, polyline_length};
use crate::policy::{self, RerouteDecision};
use crate::provider::RouteCalculationError;
use crate::route::{Maneuver, Route};
use crate::tracker::{LocationError, UserLocation};
use crate::{Point, RouteDestination};

/// Identifies a single route request made on behalf of a [NavigationSession].
///
/// Ids are allocated in increasing order. An outcome carrying an id different
/// from [NavigationSession::pending_request] is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestId(pub u64);

impl RequestId {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle phase of a [NavigationSession].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No navigation was started, or the initial route request failed.
    #[default]
    Idle,

    /// Waiting for the initial route.
    Calculating,

    /// Following a route.
    Navigating,

    /// Following a route, while a replacement is being calculated.
    Rerouting,

    /// The user reached the destination.
    Arrived,

    /// Navigation was cancelled by the caller.
    Cancelled,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Calculating => write!(f, "calculating"),
            Self::Navigating => write!(f, "navigating"),
            Self::Rerouting => write!(f, "rerouting"),
            Self::Arrived => write!(f, "arrived"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Input of [NavigationSession::apply].
#[derive(Debug)]
pub enum Event {
    /// Begin navigating from `origin` to `destination`, discarding any previous session.
    Start {
        origin: Point,
        destination: RouteDestination,
    },

    /// A route request completed successfully.
    RouteReady {
        request: RequestId,
        route: Arc<Route>,
    },

    /// A route request failed.
    RouteFailed {
        request: RequestId,
        error: RouteCalculationError,
    },

    /// The tracker accepted a new location sample.
    Location(UserLocation),

    /// The tracker failed and stopped delivering locations.
    LocationFailed(LocationError),

    /// The caller gave up on navigation.
    Cancel,
}

/// Side effect requested by [NavigationSession::apply], to be performed by the caller.
#[derive(Debug)]
pub enum Effect {
    /// Ask the routing service for a route, and report back with
    /// [Event::RouteReady] or [Event::RouteFailed] carrying the same `request`.
    RequestRoute {
        request: RequestId,
        origin: Point,
        destination: Point,
    },

    /// Drop the in-flight request, if it is still running.
    AbortRequest(RequestId),

    StartTracking,
    StopTracking,

    /// The initial route was installed - the caller who started navigation may proceed.
    Started,

    /// The initial route request failed.
    StartFailed(RouteCalculationError),
}

/// State of a single navigation towards a [RouteDestination].
///
/// A session is an immutable value: [NavigationSession::apply] consumes it
/// together with an [Event], and returns the next session plus the [Effects](Effect)
/// which must be performed. All navigation rules live here; no I/O happens
/// during a transition.
///
/// The route, the progress index and the maneuver index always change together,
/// so a session never describes a new route with indices into an old one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavigationSession {
    phase: Phase,
    origin: Option<Point>,
    destination: Option<RouteDestination>,
    route: Option<Arc<Route>>,
    progress_index: usize,
    maneuver_index: usize,
    reroute_count: u32,
    last_reroute_ms: Option<u64>,
    pending_request: Option<RequestId>,
    last_request: RequestId,
    location: Option<UserLocation>,
    location_error: Option<LocationError>,
    off_route: bool,
}

impl NavigationSession {
    /// Creates an [Idle](Phase::Idle) session.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn origin(&self) -> Option<Point> {
        self.origin
    }

    pub fn destination(&self) -> Option<&RouteDestination> {
        self.destination.as_ref()
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Index into the route coordinates of the point the user has progressed to.
    pub fn progress_index(&self) -> usize {
        self.progress_index
    }

    pub fn maneuver_index(&self) -> usize {
        self.maneuver_index
    }

    /// Number of automatic reroutes made towards the current destination.
    pub fn reroute_count(&self) -> u32 {
        self.reroute_count
    }

    /// Sample timestamp of the most recent reroute.
    pub fn last_reroute_ms(&self) -> Option<u64> {
        self.last_reroute_ms
    }

    /// Id of the route request in flight, if any.
    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending_request
    }

    /// Last location received while navigation was active.
    pub fn location(&self) -> Option<&UserLocation> {
        self.location.as_ref()
    }

    /// Last tracker failure, cleared by the next location.
    /// Without a new [Effect::StartTracking] no further locations arrive.
    pub fn location_error(&self) -> Option<&LocationError> {
        self.location_error.as_ref()
    }

    /// Whether the last location was away from the route.
    pub fn is_off_route(&self) -> bool {
        self.off_route
    }

    /// Whether a route is being followed, including while a replacement is calculated.
    pub fn is_navigating(&self) -> bool {
        matches!(self.phase, Phase::Navigating | Phase::Rerouting)
    }

    /// Route coordinates from the current progress point to the end.
    pub fn remaining_coordinates(&self) -> &[Point] {
        match &self.route {
            Some(route) => &route.coordinates()[self.progress_index..],
            None => &[],
        }
    }

    pub fn current_maneuver(&self) -> Option<&Maneuver> {
        self.route.as_ref()?.maneuvers().get(self.maneuver_index)
    }

    pub fn next_maneuver(&self) -> Option<&Maneuver> {
        self.route.as_ref()?.maneuvers().get(self.maneuver_index + 1)
    }

    pub fn total_distance(&self) -> Option<f64> {
        self.route.as_ref().map(|r| r.total_distance())
    }

    pub fn total_time(&self) -> Option<f64> {
        self.route.as_ref().map(|r| r.total_time())
    }

    /// Length of [NavigationSession::remaining_coordinates], in meters.
    pub fn remaining_distance(&self) -> Option<f64> {
        self.route
            .as_ref()
            .map(|_| polyline_length(self.remaining_coordinates()))
    }

    /// Computes the next session, given an event.
    pub fn apply(self, event: Event, config: &NavigationConfig) -> (Self, Vec<Effect>) {
        match event {
            Event::Start {
                origin,
                destination,
            } => self.start(origin, destination),
            Event::RouteReady { request, route } => self.route_ready(request, route, config),
            Event::RouteFailed { request, error } => self.route_failed(request, error),
            Event::Location(location) => self.location_update(location, config),
            Event::LocationFailed(error) => self.location_failed(error),
            Event::Cancel => self.cancel(),
        }
    }

    fn start(self, origin: Point, destination: RouteDestination) -> (Self, Vec<Effect>) {
        let mut effects = Vec::with_capacity(2);
        if let Some(previous) = self.pending_request {
            effects.push(Effect::AbortRequest(previous));
        }

        let request = self.last_request.next();
        log::info!(
            "calculating route {} from {} to {}",
            request,
            origin,
            destination.point
        );
        effects.push(Effect::RequestRoute {
            request,
            origin,
            destination: destination.point,
        });

        let next = Self {
            phase: Phase::Calculating,
            origin: Some(origin),
            destination: Some(destination),
            pending_request: Some(request),
            last_request: request,
            ..Self::default()
        };
        (next, effects)
    }

    fn route_ready(
        self,
        request: RequestId,
        route: Arc<Route>,
        config: &NavigationConfig,
    ) -> (Self, Vec<Effect>) {
        if self.pending_request != Some(request) {
            log::debug!("ignoring stale route {}", request);
            return (self, Vec::new());
        }

        match self.phase {
            Phase::Calculating => {
                log::info!(
                    "route {} ready: {:.0} m, {} maneuvers",
                    request,
                    route.total_distance(),
                    route.maneuvers().len()
                );
                let next = Self {
                    phase: Phase::Navigating,
                    route: Some(route),
                    progress_index: 0,
                    maneuver_index: 0,
                    reroute_count: 0,
                    last_reroute_ms: None,
                    pending_request: None,
                    off_route: false,
                    ..self
                };
                (next, vec![Effect::StartTracking, Effect::Started])
            }

            Phase::Rerouting => {
                log::info!(
                    "reroute {} ready: {:.0} m, {} maneuvers",
                    request,
                    route.total_distance(),
                    route.maneuvers().len()
                );
                let off_route = self.location.is_some_and(|l| {
                    policy::is_off_route(&route, l.point(), config.off_route_threshold_meters)
                });
                let next = Self {
                    phase: Phase::Navigating,
                    route: Some(route),
                    progress_index: 0,
                    maneuver_index: 0,
                    pending_request: None,
                    off_route,
                    ..self
                };
                (next, Vec::new())
            }

            _ => (self, Vec::new()),
        }
    }

    fn route_failed(self, request: RequestId, error: RouteCalculationError) -> (Self, Vec<Effect>) {
        if self.pending_request != Some(request) {
            log::debug!("ignoring stale failure of route {}: {}", request, error);
            return (self, Vec::new());
        }

        match self.phase {
            Phase::Calculating => {
                log::warn!("route {} failed: {}", request, error);
                let next = Self {
                    last_request: self.last_request,
                    ..Self::default()
                };
                (next, vec![Effect::StopTracking, Effect::StartFailed(error)])
            }

            Phase::Rerouting => {
                log::warn!("reroute {} failed, keeping the previous route: {}", request, error);
                let next = Self {
                    phase: Phase::Navigating,
                    pending_request: None,
                    ..self
                };
                (next, Vec::new())
            }

            _ => (self, Vec::new()),
        }
    }

    fn location_update(
        mut self,
        location: UserLocation,
        config: &NavigationConfig,
    ) -> (Self, Vec<Effect>) {
        match self.phase {
            Phase::Idle | Phase::Arrived | Phase::Cancelled => return (self, Vec::new()),
            Phase::Calculating => {
                self.location = Some(location);
                self.location_error = None;
                return (self, Vec::new());
            }
            Phase::Navigating | Phase::Rerouting => {}
        }

        let point = location.point();
        self.location = Some(location);
        self.location_error = None;

        let Some(destination) = self.destination.as_ref().map(|d| d.point) else {
            return (self, Vec::new());
        };

        let to_destination = earth_distance(point, destination);
        if to_destination < config.destination_threshold_meters {
            log::info!("arrived, {:.1} m from {}", to_destination, destination);
            let mut effects = vec![Effect::StopTracking];
            if let Some(request) = self.pending_request.take() {
                effects.push(Effect::AbortRequest(request));
            }
            self.phase = Phase::Arrived;
            self.off_route = false;
            return (self, effects);
        }

        let Some(route) = self.route.clone() else {
            return (self, Vec::new());
        };

        self.advance_progress(&route, point, config);
        self.advance_maneuver(&route, point, config);
        self.off_route =
            policy::is_off_route(&route, point, config.off_route_threshold_meters);

        match policy::evaluate(&self, &location, config) {
            RerouteDecision::Reroute => {
                let request = self.last_request.next();
                self.phase = Phase::Rerouting;
                self.reroute_count += 1;
                self.last_reroute_ms = Some(location.timestamp_ms);
                self.pending_request = Some(request);
                self.last_request = request;

                log::info!(
                    "off route at {}, requesting reroute {} ({}/{})",
                    point,
                    request,
                    self.reroute_count,
                    config.max_reroutes
                );
                let effect = Effect::RequestRoute {
                    request,
                    origin: point,
                    destination,
                };
                (self, vec![effect])
            }

            RerouteDecision::Suppressed(reason) => {
                if self.off_route {
                    log::debug!("off route at {}, reroute suppressed: {:?}", point, reason);
                }
                (self, Vec::new())
            }
        }
    }

    fn location_failed(mut self, error: LocationError) -> (Self, Vec<Effect>) {
        match self.phase {
            Phase::Calculating | Phase::Navigating | Phase::Rerouting => {
                log::warn!("navigation lost the location: {}", error);
                self.location_error = Some(error);
            }
            _ => log::debug!("ignoring location error: {}", error),
        }
        (self, Vec::new())
    }

    /// Moves the progress index to the route point nearest to the user,
    /// searching from a few points behind the current one. Never moves backwards.
    fn advance_progress(&mut self, route: &Route, point: Point, config: &NavigationConfig) {
        let start = self.progress_index.saturating_sub(config.progress_window_back);
        if let Some(nearest) = nearest_point_from(route.coordinates(), point, start) {
            if nearest.index > self.progress_index {
                log::debug!("progress {} -> {}", self.progress_index, nearest.index);
                self.progress_index = nearest.index;
            }
        }
    }

    fn advance_maneuver(&mut self, route: &Route, point: Point, config: &NavigationConfig) {
        let start = self.maneuver_index.saturating_sub(config.maneuver_window_back);
        let closest = route
            .maneuvers()
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, m)| (i, earth_distance(point, route.maneuver_position(m))))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((index, _)) = closest {
            if index != self.maneuver_index {
                log::debug!("maneuver {} -> {}", self.maneuver_index, index);
                self.maneuver_index = index;
            }
        }
    }

    fn cancel(self) -> (Self, Vec<Effect>) {
        let mut effects = vec![Effect::StopTracking];
        if let Some(request) = self.pending_request {
            effects.push(Effect::AbortRequest(request));
        }

        if self.phase != Phase::Cancelled {
            log::info!("navigation cancelled");
        }

        let next = Self {
            phase: Phase::Cancelled,
            last_request: self.last_request,
            ..Self::default()
        };
        (next, effects)
    }
}

// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Off-route detection and the automatic rerouting policy.

use crate::config::NavigationConfig;
use crate::geodesy::nearest_point_on_polyline;
use crate::route::Route;
use crate::session::{NavigationSession, Phase};
use crate::tracker::UserLocation;
use crate::Point;

/// Reason for not rerouting, as returned by [evaluate].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// There is no active navigation session with a route and a destination.
    Inactive,

    /// Another route request is still in flight.
    InFlight,

    /// Automatic rerouting is disabled in the [NavigationConfig].
    Disabled,

    /// [NavigationConfig::max_reroutes] reroutes were already made for this destination.
    CeilingReached,

    /// The previous reroute happened less than [NavigationConfig::reroute_debounce_ms] ago.
    Debounced,

    /// The user is close enough to the route.
    OnRoute,
}

/// Outcome of the rerouting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerouteDecision {
    Reroute,
    Suppressed(SuppressReason),
}

/// Checks whether `point` is at least `threshold` meters away from every point of the `route`.
pub fn is_off_route(route: &Route, point: Point, threshold: f64) -> bool {
    nearest_point_on_polyline(route.coordinates(), point)
        .map(|nearest| nearest.distance >= threshold)
        .unwrap_or(false)
}

/// Decides whether a new route should be requested after the `session`
/// received the `location` sample.
///
/// A reroute is permitted only if the session is actively navigating towards a destination,
/// no request is in flight, automatic rerouting is enabled, the reroute ceiling has not been
/// reached, the debounce interval has elapsed since the previous reroute, and
/// the user is off-route. The conditions are checked in that order, and the first failing
/// one is reported.
///
/// Time is measured using the sample timestamps.
pub fn evaluate(
    session: &NavigationSession,
    location: &UserLocation,
    config: &NavigationConfig,
) -> RerouteDecision {
    use SuppressReason::*;

    let route = match (session.phase(), session.destination(), session.route()) {
        (Phase::Navigating | Phase::Rerouting, Some(_), Some(route)) => route,
        _ => return RerouteDecision::Suppressed(Inactive),
    };

    if session.phase() == Phase::Rerouting || session.pending_request().is_some() {
        return RerouteDecision::Suppressed(InFlight);
    }

    if !config.auto_reroute {
        return RerouteDecision::Suppressed(Disabled);
    }

    if session.reroute_count() >= config.max_reroutes {
        return RerouteDecision::Suppressed(CeilingReached);
    }

    if let Some(last) = session.last_reroute_ms() {
        if location.timestamp_ms.saturating_sub(last) < config.reroute_debounce_ms {
            return RerouteDecision::Suppressed(Debounced);
        }
    }

    if !is_off_route(route, location.point(), config.off_route_threshold_meters) {
        return RerouteDecision::Suppressed(OnRoute);
    }

    RerouteDecision::Reroute
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::Event;
    use crate::RouteDestination;

    fn route() -> Route {
        Route::from_coordinates(
            (0..5)
                .map(|i| Point::new(10.0 + i as f64 * 0.0001, 20.0))
                .collect(),
            1.4,
        )
        .unwrap()
    }

    /// A point `meters` east of the route's third point.
    fn beside_route(meters: f64) -> Point {
        Point::new(10.0002, 20.0 + meters / (111_194.93 * 10.0002_f64.to_radians().cos()))
    }

    fn navigating() -> NavigationSession {
        let config = NavigationConfig::default();
        let (s, effects) = NavigationSession::new().apply(
            Event::Start {
                origin: Point::new(10.0, 20.0),
                destination: RouteDestination::new(Point::new(10.0004, 20.0)),
            },
            &config,
        );
        let request = s.pending_request().unwrap();
        assert!(!effects.is_empty());

        let (s, _) = s.apply(
            Event::RouteReady {
                request,
                route: Arc::new(route()),
            },
            &config,
        );
        assert_eq!(s.phase(), Phase::Navigating);
        s
    }

    fn at(point: Point, timestamp_ms: u64) -> UserLocation {
        UserLocation::new(point.lat, point.lon, timestamp_ms)
    }

    #[test]
    fn off_route_threshold() {
        let r = route();
        assert!(!is_off_route(&r, beside_route(10.0), 25.0));
        assert!(is_off_route(&r, beside_route(60.0), 25.0));
        assert!(is_off_route(&r, beside_route(25.5), 25.0));
    }

    #[test]
    fn permits_reroute_when_off_route() {
        let config = NavigationConfig::default();
        assert_eq!(
            evaluate(&navigating(), &at(beside_route(60.0), 5000), &config),
            RerouteDecision::Reroute
        );
    }

    #[test]
    fn suppressed_when_on_route() {
        let config = NavigationConfig::default();
        assert_eq!(
            evaluate(&navigating(), &at(beside_route(5.0), 5000), &config),
            RerouteDecision::Suppressed(SuppressReason::OnRoute)
        );
    }

    #[test]
    fn suppressed_when_inactive() {
        let config = NavigationConfig::default();
        assert_eq!(
            evaluate(&NavigationSession::new(), &at(beside_route(60.0), 5000), &config),
            RerouteDecision::Suppressed(SuppressReason::Inactive)
        );
    }

    #[test]
    fn suppressed_when_disabled() {
        let config = NavigationConfig {
            auto_reroute: false,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&navigating(), &at(beside_route(60.0), 5000), &config),
            RerouteDecision::Suppressed(SuppressReason::Disabled)
        );
    }

    #[test]
    fn suppressed_when_in_flight_or_debounced() {
        let config = NavigationConfig::default();
        let (rerouting, _) = navigating().apply(Event::Location(at(beside_route(60.0), 5000)), &config);
        assert_eq!(rerouting.phase(), Phase::Rerouting);
        assert_eq!(
            evaluate(&rerouting, &at(beside_route(70.0), 9000), &config),
            RerouteDecision::Suppressed(SuppressReason::InFlight)
        );

        let request = rerouting.pending_request().unwrap();
        let (navigating, _) = rerouting.apply(
            Event::RouteReady {
                request,
                route: Arc::new(route()),
            },
            &config,
        );
        assert_eq!(
            evaluate(&navigating, &at(beside_route(70.0), 7999), &config),
            RerouteDecision::Suppressed(SuppressReason::Debounced)
        );
        assert_eq!(
            evaluate(&navigating, &at(beside_route(70.0), 8000), &config),
            RerouteDecision::Reroute
        );
    }

    #[test]
    fn suppressed_at_ceiling() {
        let config = NavigationConfig {
            max_reroutes: 0,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&navigating(), &at(beside_route(60.0), 5000), &config),
            RerouteDecision::Suppressed(SuppressReason::CeilingReached)
        );
    }
}

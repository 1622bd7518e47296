// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Profile, RouteCalculationError, RouteProvider};
use crate::config::RoutingConfig;
use crate::polyline::{self, VALHALLA_PRECISION};
use crate::route::{Maneuver, Route};
use crate::Point;

/// Valhalla error code for "No path could be found for input".
const NO_PATH_ERROR_CODE: i64 = 442;

/// Meters in a kilometer; all lengths are requested in kilometers.
const METERS_PER_KILOMETER: f64 = 1000.0;

/// Client for the [Valhalla](https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/)
/// turn-by-turn `/route` endpoint, or any service speaking the same protocol.
#[derive(Debug, Clone)]
pub struct ValhallaClient {
    http: reqwest::Client,
    endpoint: String,
    language: String,
}

impl ValhallaClient {
    /// Creates a client for a routing service at `base_url` (e.g. `http://localhost:8002`),
    /// aborting requests which take longer than `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouteCalculationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/route", base_url.trim_end_matches('/')),
            language: "en-US".to_string(),
        })
    }

    /// Creates a client as described by a [RoutingConfig].
    pub fn from_config(config: &RoutingConfig) -> Result<Self, RouteCalculationError> {
        let mut client = Self::new(&config.base_url, config.timeout())?;
        client.language = config.language.clone();
        Ok(client)
    }

    /// Returns the full URL to which route requests are sent.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RouteProvider for ValhallaClient {
    async fn request_route(
        &self,
        origin: Point,
        destination: Point,
        profile: Profile,
    ) -> Result<Route, RouteCalculationError> {
        let request = build_request(origin, destination, profile, &self.language);
        log::debug!(
            "requesting {} route {} -> {} from {}",
            profile,
            origin,
            destination,
            self.endpoint
        );

        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            decode_response(&body)
        } else {
            Err(decode_error(status.as_u16(), &body))
        }
    }
}

#[derive(Debug, Serialize)]
struct RouteRequest<'a> {
    locations: [Location; 2],
    costing: &'static str,
    directions_options: DirectionsOptions<'a>,
}

#[derive(Debug, Serialize)]
struct Location {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
struct DirectionsOptions<'a> {
    units: &'static str,
    language: &'a str,
}

fn build_request<'a>(
    origin: Point,
    destination: Point,
    profile: Profile,
    language: &'a str,
) -> RouteRequest<'a> {
    RouteRequest {
        locations: [
            Location {
                lat: origin.lat,
                lon: origin.lon,
            },
            Location {
                lat: destination.lat,
                lon: destination.lon,
            },
        ],
        costing: profile.costing(),
        directions_options: DirectionsOptions {
            units: "kilometers",
            language,
        },
    }
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    #[serde(default)]
    legs: Vec<Leg>,
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Leg {
    shape: String,
    #[serde(default)]
    maneuvers: Vec<RawManeuver>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    length: f64,
    time: f64,
}

#[derive(Debug, Deserialize)]
struct RawManeuver {
    #[serde(rename = "type", default)]
    kind: u8,
    instruction: String,
    #[serde(default)]
    verbal_pre_transition_instruction: Option<String>,
    #[serde(default)]
    street_names: Vec<String>,
    #[serde(default)]
    length: f64,
    #[serde(default)]
    time: f64,
    begin_shape_index: usize,
    #[serde(default)]
    end_shape_index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// Converts a successful `/route` response body into a [Route].
fn decode_response(body: &str) -> Result<Route, RouteCalculationError> {
    let response: RouteResponse = serde_json::from_str(body)?;
    let leg = response
        .trip
        .legs
        .into_iter()
        .next()
        .ok_or(RouteCalculationError::NoRoute)?;

    let coordinates = polyline::decode(&leg.shape, VALHALLA_PRECISION)?;
    let maneuvers = leg
        .maneuvers
        .into_iter()
        .map(|m| Maneuver {
            instruction: m.instruction,
            verbal_instruction: m.verbal_pre_transition_instruction,
            kind: m.kind,
            street_names: m.street_names,
            length: m.length * METERS_PER_KILOMETER,
            time: m.time,
            begin_shape_index: m.begin_shape_index,
            end_shape_index: m.end_shape_index,
        })
        .collect();

    Route::new(
        coordinates,
        maneuvers,
        response.trip.summary.length * METERS_PER_KILOMETER,
        response.trip.summary.time,
    )
}

/// Converts an unsuccessful `/route` response into a [RouteCalculationError].
fn decode_error(status: u16, body: &str) -> RouteCalculationError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error_code: Some(NO_PATH_ERROR_CODE),
            ..
        }) => RouteCalculationError::NoRoute,

        Ok(ErrorResponse {
            error: Some(message),
            ..
        }) => RouteCalculationError::Service { status, message },

        _ => RouteCalculationError::Service {
            status,
            message: body.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "trip": {
            "locations": [
                {"type": "break", "lat": 10.249, "lon": 123.798},
                {"type": "break", "lat": 10.2481, "lon": 123.7976}
            ],
            "legs": [{
                "maneuvers": [
                    {
                        "type": 2,
                        "instruction": "Walk south.",
                        "verbal_pre_transition_instruction": "Walk south for 100 meters.",
                        "street_names": ["Cemetery Path"],
                        "time": 72.5,
                        "length": 0.101,
                        "begin_shape_index": 0,
                        "end_shape_index": 2,
                        "travel_mode": "pedestrian"
                    },
                    {
                        "type": 4,
                        "instruction": "You have arrived at your destination.",
                        "time": 0.0,
                        "length": 0.0,
                        "begin_shape_index": 2,
                        "end_shape_index": 2
                    }
                ],
                "summary": {"length": 0.101, "time": 72.5},
                "shape": "SHAPE"
            }],
            "summary": {"length": 0.101, "time": 72.5},
            "status_message": "Found route between points",
            "status": 0,
            "units": "kilometers",
            "language": "en-US"
        }
    }"#;

    fn shape() -> Vec<Point> {
        vec![
            Point::new(10.2490, 123.7980),
            Point::new(10.2485, 123.7978),
            Point::new(10.2481, 123.7976),
        ]
    }

    fn response_with_shape() -> String {
        RESPONSE.replace("SHAPE", &polyline::encode(&shape(), VALHALLA_PRECISION))
    }

    #[test]
    fn request_body() {
        let request = build_request(
            Point::new(10.2490, 123.7980),
            Point::new(10.2481, 123.7976),
            Profile::Pedestrian,
            "en-US",
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "locations": [
                    {"lat": 10.2490, "lon": 123.7980},
                    {"lat": 10.2481, "lon": 123.7976}
                ],
                "costing": "pedestrian",
                "directions_options": {"units": "kilometers", "language": "en-US"}
            })
        );
    }

    #[test]
    fn decode_route() {
        let route = decode_response(&response_with_shape()).unwrap();

        assert_eq!(route.coordinates().len(), 3);
        assert!((route.coordinates()[1].lat - 10.2485).abs() < 1e-9);
        assert!((route.total_distance() - 101.0).abs() < 1e-9);
        assert_eq!(route.total_time(), 72.5);

        let maneuvers = route.maneuvers();
        assert_eq!(maneuvers.len(), 2);
        assert_eq!(maneuvers[0].begin_shape_index, 0);
        assert_eq!(maneuvers[0].instruction, "Walk south.");
        assert_eq!(
            maneuvers[0].verbal_instruction.as_deref(),
            Some("Walk south for 100 meters.")
        );
        assert_eq!(maneuvers[0].street_names, vec!["Cemetery Path".to_string()]);
        assert_eq!(maneuvers[0].kind, 2);
        assert!((maneuvers[0].length - 101.0).abs() < 1e-9);
        assert_eq!(maneuvers[1].begin_shape_index, 2);
        assert!(maneuvers[1].street_names.is_empty());
    }

    #[test]
    fn decode_route_with_bad_maneuver() {
        let body = response_with_shape().replace(
            r#""begin_shape_index": 2,"#,
            r#""begin_shape_index": 7,"#,
        );
        assert!(matches!(
            decode_response(&body),
            Err(RouteCalculationError::InvalidManeuver {
                index: 1,
                begin_shape_index: 7,
                len: 3
            })
        ));
    }

    #[test]
    fn decode_route_with_empty_shape() {
        let body = RESPONSE.replace("SHAPE", "");
        assert!(matches!(
            decode_response(&body),
            Err(RouteCalculationError::EmptyRoute)
        ));
    }

    #[test]
    fn decode_route_without_legs() {
        let body = r#"{"trip": {"legs": [], "summary": {"length": 0, "time": 0}}}"#;
        assert!(matches!(
            decode_response(body),
            Err(RouteCalculationError::NoRoute)
        ));
    }

    #[test]
    fn decode_malformed() {
        assert!(matches!(
            decode_response("<html>502 Bad Gateway</html>"),
            Err(RouteCalculationError::Malformed(_))
        ));
    }

    #[test]
    fn decode_errors() {
        let no_path = r#"{"error_code": 442, "error": "No path could be found for input", "status_code": 400, "status": "Bad Request"}"#;
        assert!(matches!(
            decode_error(400, no_path),
            RouteCalculationError::NoRoute
        ));

        let other = r#"{"error_code": 171, "error": "No suitable edges near location", "status_code": 400}"#;
        match decode_error(400, other) {
            RouteCalculationError::Service { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "No suitable edges near location");
            }
            e => panic!("unexpected error: {}", e),
        }

        match decode_error(503, "  upstream unavailable\n") {
            RouteCalculationError::Service { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "upstream unavailable");
            }
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn endpoint_url() {
        let client = ValhallaClient::new("http://localhost:8002/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8002/route");
    }
}

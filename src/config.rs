// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::provider::Profile;

/// Error conditions which may occur when loading a [Config].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

/// All tunables of the navigation engine. Every section and every field is optional
/// when deserializing, falling back to the defaults documented on each field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub navigation: NavigationConfig,
    pub routing: RoutingConfig,
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses the configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Controls how raw position samples are turned into locations
/// by the [LocationTracker](crate::tracker::LocationTracker).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Samples closer than this to the last accepted sample are dropped (meters, default: 5).
    pub distance_filter_meters: f64,

    /// Ask the platform for the most accurate fix available (default: true).
    pub high_accuracy: bool,

    /// Maximum time to wait for a position (milliseconds, default: 10000).
    pub timeout_ms: u64,

    /// Maximum age of a cached position the platform may return (milliseconds, default: 0).
    pub maximum_age_ms: u64,

    /// Smoothing factor applied to positions before deriving a heading,
    /// in the `(0, 1]` range where 1 disables smoothing (default: 0.5).
    pub heading_smoothing: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_filter_meters: 5.0,
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 0,
            heading_smoothing: 0.5,
        }
    }
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age_ms)
    }
}

/// Controls progress tracking and the automatic rerouting policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Travel mode used for all route requests (default: pedestrian).
    pub profile: Profile,

    /// Distance to the destination below which the user has arrived (meters, default: 10).
    pub destination_threshold_meters: f64,

    /// Distance from the route above which the user is off-route (meters, default: 25).
    pub off_route_threshold_meters: f64,

    /// Automatically request a new route when off-route (default: true).
    pub auto_reroute: bool,

    /// Maximum number of automatic reroutes per destination (default: 5).
    pub max_reroutes: u32,

    /// Minimum time between two reroute attempts (milliseconds, default: 3000).
    pub reroute_debounce_ms: u64,

    /// How many route points behind the current progress are searched
    /// when locating the user on the route (default: 2).
    pub progress_window_back: usize,

    /// How many maneuvers behind the current one are considered
    /// when picking the current maneuver (default: 1).
    pub maneuver_window_back: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Pedestrian,
            destination_threshold_meters: 10.0,
            off_route_threshold_meters: 25.0,
            auto_reroute: true,
            max_reroutes: 5,
            reroute_debounce_ms: 3000,
            progress_window_back: 2,
            maneuver_window_back: 1,
        }
    }
}

/// Describes how to reach the routing service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Base URL of a Valhalla-compatible service (default: `http://localhost:8002`).
    pub base_url: String,

    /// Maximum time for a single route request (milliseconds, default: 15000).
    pub timeout_ms: u64,

    /// Language of maneuver instructions (default: `en-US`).
    pub language: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_ms: 15_000,
            language: "en-US".to_string(),
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

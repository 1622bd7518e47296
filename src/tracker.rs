// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Continuous position tracking on top of a platform [PositionSource].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::geodesy::{bearing, earth_distance, smooth};
use crate::{lock, Point};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single position fix of the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserLocation {
    pub latitude: f64,
    pub longitude: f64,

    /// Radius of the 68% confidence circle, in meters.
    pub accuracy: f64,

    /// Height above the WGS84 ellipsoid, in meters.
    pub altitude: Option<f64>,

    /// Direction of travel, in degrees clockwise from true north.
    pub heading: Option<f64>,

    /// Ground speed, in meters per second.
    pub speed: Option<f64>,

    /// Time of the fix, in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl UserLocation {
    /// Creates a location with only the position and time known.
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            altitude: None,
            heading: None,
            speed: None,
            timestamp_ms,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }
}

/// Kind of a [LocationError], numbered like the
/// [GeolocationPositionError](https://www.w3.org/TR/geolocation/#position_error_interface) codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationErrorCode {
    /// The platform has no location capability at all.
    NotSupported = 0,
    PermissionDenied = 1,
    PositionUnavailable = 2,
    Timeout = 3,
}

impl std::fmt::Display for LocationErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSupported => write!(f, "not supported"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::PositionUnavailable => write!(f, "position unavailable"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Failure to obtain the user's position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct LocationError {
    pub code: LocationErrorCode,
    pub message: String,
    pub timestamp_ms: u64,
}

impl LocationError {
    pub fn new<M: Into<String>>(code: LocationErrorCode, message: M) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// Identifies a continuous watch started with [PositionSource::watch_position].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hints passed to the platform when asking for positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl From<&TrackerConfig> for WatchOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            timeout: config.timeout(),
            maximum_age: config.maximum_age(),
        }
    }
}

/// A raw sample (or failure) produced by a [PositionSource].
pub type PositionUpdate = Result<UserLocation, LocationError>;

/// Platform capability producing the user's position.
///
/// Only the [LocationTracker] talks to a PositionSource; all other
/// components consume the tracker's filtered output instead.
pub trait PositionSource: Send + Sync + 'static {
    /// Starts pushing position updates into `sink`, until [PositionSource::clear_watch]
    /// is called with the returned id.
    fn watch_position(
        &self,
        options: &WatchOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> Result<WatchId, LocationError>;

    /// Stops a watch started by [PositionSource::watch_position].
    /// Unknown or already cleared ids must be ignored.
    fn clear_watch(&self, id: WatchId);

    /// Obtains a single position fix.
    fn current_position(
        &self,
        options: &WatchOptions,
    ) -> impl Future<Output = PositionUpdate> + Send;
}

/// Notification delivered to [LocationTracker] subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A sample passed the distance filter.
    Location(UserLocation),

    /// The platform reported an error; tracking has been stopped.
    Error(LocationError),
}

/// Converts the raw, noisy and possibly high-frequency stream of a [PositionSource]
/// into a filtered stream of [UserLocations](UserLocation).
///
/// Samples closer than [TrackerConfig::distance_filter_meters] to the last accepted
/// sample are dropped, except for the first sample of every watch. Samples without
/// a heading get one derived from successive smoothed positions.
///
/// Tracking requires a running Tokio runtime. The platform watch is released on
/// [LocationTracker::stop_tracking], on any platform error and when the tracker is dropped.
pub struct LocationTracker<S: PositionSource> {
    source: Arc<S>,
    config: TrackerConfig,
    inner: Arc<Mutex<Inner>>,
}

struct ActiveWatch {
    id: WatchId,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    watch: Option<ActiveWatch>,
    last_accepted: Option<Point>,
    smoothed: Option<Point>,
    location: Option<UserLocation>,
    error: Option<LocationError>,
    subscribers: Vec<mpsc::UnboundedSender<TrackerEvent>>,
}

impl<S: PositionSource> LocationTracker<S> {
    pub fn new(source: S, config: TrackerConfig) -> Self {
        Self::with_shared_source(Arc::new(source), config)
    }

    /// Creates a tracker over a source which is also accessed elsewhere
    /// (e.g. a simulated source fed by a test).
    pub fn with_shared_source(source: Arc<S>, config: TrackerConfig) -> Self {
        Self {
            source,
            config,
            inner: Arc::default(),
        }
    }

    /// Registers a new receiver of [TrackerEvents](TrackerEvent).
    /// Events are delivered in the order in which the platform produced the samples.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TrackerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner).subscribers.push(tx);
        rx
    }

    /// Returns the last platform error, cleared by the next accepted location.
    pub fn last_error(&self) -> Option<LocationError> {
        lock(&self.inner).error.clone()
    }

    pub fn is_tracking(&self) -> bool {
        lock(&self.inner).watch.is_some()
    }

    pub fn current_location(&self) -> Option<UserLocation> {
        lock(&self.inner).location
    }

    /// Begins continuous position observation. Does nothing if already tracking.
    ///
    /// If the platform refuses to start a watch, the error is recorded
    /// (see [LocationTracker::last_error]) and broadcast to subscribers instead of being returned.
    pub fn start_tracking(&self) {
        let mut inner = lock(&self.inner);
        if inner.watch.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = match self
            .source
            .watch_position(&WatchOptions::from(&self.config), tx)
        {
            Ok(id) => id,
            Err(e) => {
                log::warn!("failed to start tracking: {}", e);
                inner.error = Some(e.clone());
                inner.publish(TrackerEvent::Error(e));
                return;
            }
        };

        inner.last_accepted = None;
        inner.smoothed = None;
        inner.error = None;

        let shared = Arc::clone(&self.inner);
        let source = Arc::clone(&self.source);
        let config = self.config.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if !handle_update(&shared, source.as_ref(), &config, id, update) {
                    return;
                }
            }
            handle_closed(&shared, id);
        });

        inner.watch = Some(ActiveWatch { id, pump });
        log::info!("tracking started (watch {})", id);
    }

    /// Ends position observation. Safe to call when not tracking.
    pub fn stop_tracking(&self) {
        let watch = lock(&self.inner).watch.take();
        if let Some(watch) = watch {
            self.source.clear_watch(watch.id);
            watch.pump.abort();
            log::info!("tracking stopped (watch {})", watch.id);
        }
    }

    /// Obtains a single position fix, bounded by [TrackerConfig::timeout_ms].
    ///
    /// The fix bypasses the distance filter and is not broadcast to subscribers,
    /// but it does become the [current location](LocationTracker::current_location).
    pub async fn get_current_location_once(&self) -> Result<UserLocation, LocationError> {
        let options = WatchOptions::from(&self.config);
        let result =
            match tokio::time::timeout(options.timeout, self.source.current_position(&options))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LocationError::new(
                    LocationErrorCode::Timeout,
                    format!("no position fix within {} ms", options.timeout.as_millis()),
                )),
            };

        let mut inner = lock(&self.inner);
        match result {
            Ok(location) => {
                inner.location = Some(location);
                inner.error = None;
            }
            Err(ref e) => {
                log::warn!("failed to get current location: {}", e);
                inner.error = Some(e.clone());
            }
        }
        result
    }
}

impl<S: PositionSource> Drop for LocationTracker<S> {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

impl Inner {
    fn publish(&mut self, event: TrackerEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    /// Applies the distance filter and heading derivation to a raw sample.
    fn accept(&mut self, mut sample: UserLocation, config: &TrackerConfig) -> Option<UserLocation> {
        let position = sample.point();

        if let Some(last) = self.last_accepted {
            let moved = earth_distance(last, position);
            if moved < config.distance_filter_meters {
                log::debug!("dropping sample {:.1} m from the last accepted one", moved);
                return None;
            }
        }

        let smoothed = match self.smoothed {
            Some(previous) => smooth(previous, position, config.heading_smoothing),
            None => position,
        };
        if sample.heading.is_none() {
            if let Some(previous) = self.smoothed {
                if previous != smoothed {
                    sample.heading = Some(bearing(previous, smoothed));
                }
            }
        }

        self.smoothed = Some(smoothed);
        self.last_accepted = Some(position);
        Some(sample)
    }
}

/// Processes a single update of watch `id`. Returns `false` once the watch is over.
fn handle_update<S: PositionSource>(
    shared: &Mutex<Inner>,
    source: &S,
    config: &TrackerConfig,
    id: WatchId,
    update: PositionUpdate,
) -> bool {
    let mut inner = lock(shared);
    if inner.watch.as_ref().map(|w| w.id) != Some(id) {
        return false;
    }

    match update {
        Ok(sample) => {
            if let Some(location) = inner.accept(sample, config) {
                inner.location = Some(location);
                inner.error = None;
                inner.publish(TrackerEvent::Location(location));
            }
            true
        }

        Err(e) => {
            log::warn!("position watch {} failed: {}", id, e);
            // The pump is the caller - the task ends as soon as this returns false
            inner.watch = None;
            source.clear_watch(id);
            inner.error = Some(e.clone());
            inner.publish(TrackerEvent::Error(e));
            false
        }
    }
}

/// Handles a source which stopped producing updates without being asked to.
fn handle_closed(shared: &Mutex<Inner>, id: WatchId) {
    let mut inner = lock(shared);
    if inner.watch.as_ref().map(|w| w.id) != Some(id) {
        return;
    }

    let e = LocationError::new(
        LocationErrorCode::PositionUnavailable,
        "position stream ended",
    );
    log::warn!("position watch {} ended", id);
    inner.watch = None;
    inner.error = Some(e.clone());
    inner.publish(TrackerEvent::Error(e));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SimulatedSource;

    const BASE: Point = Point::new(10.2490, 123.7980);

    /// Returns a location `north` meters north and `east` meters east of [BASE].
    fn offset(north: f64, east: f64, timestamp_ms: u64) -> UserLocation {
        let dlat = north / 111_194.93;
        let dlon = east / (111_194.93 * BASE.lat.to_radians().cos());
        UserLocation::new(BASE.lat + dlat, BASE.lon + dlon, timestamp_ms)
    }

    fn tracker() -> (Arc<SimulatedSource>, LocationTracker<SimulatedSource>) {
        let source = Arc::new(SimulatedSource::new());
        let tracker =
            LocationTracker::with_shared_source(Arc::clone(&source), TrackerConfig::default());
        (source, tracker)
    }

    async fn next_location(rx: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> UserLocation {
        match rx.recv().await {
            Some(TrackerEvent::Location(l)) => l,
            other => panic!("expected a location, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stationary_samples_emit_one_update() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();
        tracker.start_tracking();

        assert!(source.push_location(offset(0.0, 0.0, 0)));
        for i in 1..10 {
            assert!(source.push_location(offset(1.0 + (i % 3) as f64, -1.5, i * 1000)));
        }
        // A sample far away marks the end of the stationary sequence
        assert!(source.push_location(offset(50.0, 0.0, 10_000)));

        assert_eq!(next_location(&mut rx).await.timestamp_ms, 0);
        assert_eq!(next_location(&mut rx).await.timestamp_ms, 10_000);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn first_sample_of_each_watch_is_accepted() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();

        tracker.start_tracking();
        source.push_location(offset(0.0, 0.0, 0));
        assert_eq!(next_location(&mut rx).await.timestamp_ms, 0);

        tracker.stop_tracking();
        tracker.start_tracking();
        source.push_location(offset(1.0, 0.0, 1000));
        assert_eq!(next_location(&mut rx).await.timestamp_ms, 1000);
    }

    #[tokio::test]
    async fn start_tracking_twice_is_noop() {
        let (source, tracker) = tracker();
        tracker.start_tracking();
        tracker.start_tracking();
        assert_eq!(source.watches_started(), 1);
        assert!(tracker.is_tracking());
    }

    #[tokio::test]
    async fn stop_tracking_is_idempotent() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();
        tracker.start_tracking();
        source.push_location(offset(0.0, 0.0, 0));
        next_location(&mut rx).await;

        tracker.stop_tracking();
        let once = (tracker.is_tracking(), tracker.current_location(), tracker.last_error());
        tracker.stop_tracking();
        let twice = (tracker.is_tracking(), tracker.current_location(), tracker.last_error());

        assert_eq!(once, twice);
        assert!(!tracker.is_tracking());
        assert!(!source.is_watching());
        assert!(!source.push_location(offset(100.0, 0.0, 5000)));

        // Stopping a tracker which never started is fine, too
        let (_, idle) = super::tests::tracker();
        idle.stop_tracking();
        assert!(!idle.is_tracking());
    }

    #[tokio::test]
    async fn platform_error_tears_down_watch() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();
        tracker.start_tracking();

        source.push(Err(LocationError::new(
            LocationErrorCode::PermissionDenied,
            "user denied geolocation",
        )));

        match rx.recv().await {
            Some(TrackerEvent::Error(e)) => assert_eq!(e.code, LocationErrorCode::PermissionDenied),
            other => panic!("expected an error, got {:?}", other),
        }

        assert!(!tracker.is_tracking());
        assert_eq!(
            tracker.last_error().map(|e| e.code),
            Some(LocationErrorCode::PermissionDenied)
        );
        assert!(!source.is_watching());
    }

    #[tokio::test]
    async fn unsupported_platform_sets_error_state() {
        let tracker = LocationTracker::new(SimulatedSource::unsupported(), TrackerConfig::default());
        let mut rx = tracker.subscribe();
        tracker.start_tracking();

        assert!(!tracker.is_tracking());
        assert_eq!(
            tracker.last_error().map(|e| e.code),
            Some(LocationErrorCode::NotSupported)
        );
        assert!(matches!(rx.try_recv(), Ok(TrackerEvent::Error(_))));
    }

    #[tokio::test]
    async fn heading_is_derived_from_movement() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();
        tracker.start_tracking();

        source.push_location(offset(0.0, 0.0, 0));
        source.push_location(offset(0.0, 20.0, 1000));

        assert_eq!(next_location(&mut rx).await.heading, None);
        let heading = next_location(&mut rx).await.heading.unwrap();
        assert!((heading - 90.0).abs() < 0.5, "heading {} is not east", heading);

        // Headings reported by the platform are preserved
        let mut sample = offset(0.0, 40.0, 2000);
        sample.heading = Some(123.0);
        source.push_location(sample);
        assert_eq!(next_location(&mut rx).await.heading, Some(123.0));
    }

    #[tokio::test]
    async fn current_location_once() {
        let (source, tracker) = tracker();
        source.set_fix(Some(offset(0.0, 0.0, 42)));

        let location = tracker.get_current_location_once().await.unwrap();
        assert_eq!(location.timestamp_ms, 42);
        assert_eq!(tracker.current_location(), Some(location));
        assert!(!tracker.is_tracking());
    }

    #[tokio::test(start_paused = true)]
    async fn current_location_once_times_out() {
        let (_, tracker) = tracker();
        let err = tracker.get_current_location_once().await.unwrap_err();
        assert_eq!(err.code, LocationErrorCode::Timeout);
        assert_eq!(tracker.last_error(), Some(err));
    }

    #[tokio::test]
    async fn ended_stream_is_reported() {
        let (source, tracker) = tracker();
        let mut rx = tracker.subscribe();
        tracker.start_tracking();

        source.end_stream();
        match rx.recv().await {
            Some(TrackerEvent::Error(e)) => {
                assert_eq!(e.code, LocationErrorCode::PositionUnavailable)
            }
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(!tracker.is_tracking());
    }
}

// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ::nmea::{Nmea, SentenceType};
use tokio::sync::mpsc;

use crate::lock;
use crate::tracker::{
    now_ms, LocationError, LocationErrorCode, PositionSource, PositionUpdate, UserLocation,
    WatchId, WatchOptions,
};

/// User equivalent range error of a typical consumer GNSS receiver, in meters.
/// Multiplied by HDOP to estimate the accuracy of a fix.
const UERE_METERS: f64 = 5.0;

/// Accuracy assumed for fixes without a reported HDOP, in meters.
const DEFAULT_ACCURACY_METERS: f64 = 25.0;

const METERS_PER_SECOND_PER_KNOT: f64 = 1852.0 / 3600.0;

/// A [PositionSource] reading [NMEA 0183](https://en.wikipedia.org/wiki/NMEA_0183) sentences
/// from a GNSS receiver's serial device (e.g. `/dev/serial0`) or from a recorded log file.
///
/// A location is produced for every RMC or GGA sentence carrying a position.
#[derive(Debug)]
pub struct NmeaSource {
    path: PathBuf,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    active: Option<(WatchId, Arc<AtomicBool>)>,
}

impl NmeaSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PositionSource for NmeaSource {
    fn watch_position(
        &self,
        _options: &WatchOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> Result<WatchId, LocationError> {
        let file = File::open(&self.path).map_err(|e| open_error(&self.path, e))?;

        let mut state = lock(&self.state);
        if let Some((_, stop)) = state.active.take() {
            stop.store(true, Ordering::Relaxed);
        }

        state.next_id += 1;
        let id = WatchId(state.next_id);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        // Serial reads block indefinitely, so a dedicated thread is used instead of the runtime's pool
        thread::Builder::new()
            .name(format!("nmea-watch-{}", id.0))
            .spawn(move || stream_sentences(BufReader::new(file), &sink, &thread_stop))
            .map_err(|e| {
                LocationError::new(
                    LocationErrorCode::PositionUnavailable,
                    format!("failed to spawn NMEA reader: {}", e),
                )
            })?;

        state.active = Some((id, stop));
        log::debug!("reading NMEA sentences from {}", self.path.display());
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        let mut state = lock(&self.state);
        if state.active.as_ref().map(|(active, _)| *active) == Some(id) {
            if let Some((_, stop)) = state.active.take() {
                stop.store(true, Ordering::Relaxed);
            }
        }
    }

    async fn current_position(&self, _options: &WatchOptions) -> PositionUpdate {
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || first_fix(&path)).await {
            Ok(result) => result,
            Err(e) => Err(LocationError::new(
                LocationErrorCode::PositionUnavailable,
                format!("NMEA reader failed: {}", e),
            )),
        }
    }
}

fn open_error(path: &Path, e: io::Error) -> LocationError {
    let code = match e.kind() {
        io::ErrorKind::PermissionDenied => LocationErrorCode::PermissionDenied,
        _ => LocationErrorCode::PositionUnavailable,
    };
    LocationError::new(code, format!("{}: {}", path.display(), e))
}

/// Forwards locations parsed from `reader` into `sink`, until the input ends,
/// the sink is closed or `stop` is set.
fn stream_sentences<R: BufRead>(
    reader: R,
    sink: &mpsc::UnboundedSender<PositionUpdate>,
    stop: &AtomicBool,
) {
    let mut nmea = Nmea::default();

    for line in reader.lines() {
        if stop.load(Ordering::Relaxed) || sink.is_closed() {
            return;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = sink.send(Err(LocationError::new(
                    LocationErrorCode::PositionUnavailable,
                    format!("reading NMEA stream: {}", e),
                )));
                return;
            }
        };

        if let Some(location) = parse_line(&mut nmea, &line) {
            if sink.send(Ok(location)).is_err() {
                return;
            }
        }
    }
}

/// Reads `path` until the first sentence with a position.
fn first_fix(path: &Path) -> PositionUpdate {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut nmea = Nmea::default();

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| open_error(path, e))?;
        if let Some(location) = parse_line(&mut nmea, &line) {
            return Ok(location);
        }
    }

    Err(LocationError::new(
        LocationErrorCode::PositionUnavailable,
        "NMEA stream ended without a position fix",
    ))
}

/// Feeds a single sentence into the accumulated receiver state, returning a location
/// if the sentence completes a fix.
fn parse_line(nmea: &mut Nmea, line: &str) -> Option<UserLocation> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match nmea.parse(trimmed) {
        Ok(SentenceType::RMC) | Ok(SentenceType::GGA) => location_from(nmea),
        Ok(_) => None,
        Err(e) => {
            log::debug!("skipping NMEA sentence {:?}: {:?}", trimmed, e);
            None
        }
    }
}

fn location_from(nmea: &Nmea) -> Option<UserLocation> {
    let latitude = nmea.latitude?;
    let longitude = nmea.longitude?;

    Some(UserLocation {
        latitude,
        longitude,
        accuracy: nmea
            .hdop
            .map(|hdop| hdop as f64 * UERE_METERS)
            .unwrap_or(DEFAULT_ACCURACY_METERS),
        altitude: nmea.altitude.map(f64::from),
        heading: nmea.true_course.map(f64::from),
        speed: nmea
            .speed_over_ground
            .map(|knots| knots as f64 * METERS_PER_SECOND_PER_KNOT),
        timestamp_ms: now_ms(),
    })
}

// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::lock;
use crate::tracker::{
    LocationError, LocationErrorCode, PositionSource, PositionUpdate, UserLocation, WatchId,
    WatchOptions,
};

/// A [PositionSource] fed programmatically, for replaying recorded tracks
/// and for exercising navigation without any positioning hardware.
///
/// At most one watch is active at a time; starting a new watch replaces the previous one.
#[derive(Debug, Default)]
pub struct SimulatedSource {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    unsupported: bool,
    next_id: u64,
    watches_started: usize,
    watch: Option<(WatchId, mpsc::UnboundedSender<PositionUpdate>)>,
    fix: Option<UserLocation>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source simulating a platform without any location capability.
    pub fn unsupported() -> Self {
        let source = Self::default();
        lock(&source.state).unsupported = true;
        source
    }

    /// Sets the fix returned by [PositionSource::current_position].
    /// Without a fix, one-shot requests never complete.
    pub fn set_fix(&self, fix: Option<UserLocation>) {
        lock(&self.state).fix = fix;
    }

    /// Delivers an update to the active watch.
    /// Returns `false` if there is no active watch.
    pub fn push(&self, update: PositionUpdate) -> bool {
        match &lock(&self.state).watch {
            Some((_, sink)) => sink.send(update).is_ok(),
            None => false,
        }
    }

    /// Shorthand for [SimulatedSource::push] with a successful update.
    /// The location also becomes the fix returned by one-shot requests.
    pub fn push_location(&self, location: UserLocation) -> bool {
        lock(&self.state).fix = Some(location);
        self.push(Ok(location))
    }

    /// Drops the active watch without being asked to,
    /// as if the underlying stream had ended.
    pub fn end_stream(&self) {
        lock(&self.state).watch = None;
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.state).watch.is_some()
    }

    /// Returns how many watches were ever started on this source.
    pub fn watches_started(&self) -> usize {
        lock(&self.state).watches_started
    }
}

impl PositionSource for SimulatedSource {
    fn watch_position(
        &self,
        _options: &WatchOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> Result<WatchId, LocationError> {
        let mut state = lock(&self.state);
        if state.unsupported {
            return Err(not_supported());
        }

        state.next_id += 1;
        state.watches_started += 1;
        let id = WatchId(state.next_id);
        state.watch = Some((id, sink));
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        let mut state = lock(&self.state);
        if state.watch.as_ref().map(|(active, _)| *active) == Some(id) {
            state.watch = None;
        }
    }

    async fn current_position(&self, _options: &WatchOptions) -> PositionUpdate {
        let (unsupported, fix) = {
            let state = lock(&self.state);
            (state.unsupported, state.fix)
        };

        match (unsupported, fix) {
            (true, _) => Err(not_supported()),
            (false, Some(fix)) => Ok(fix),
            (false, None) => std::future::pending().await,
        }
    }
}

fn not_supported() -> LocationError {
    LocationError::new(
        LocationErrorCode::NotSupported,
        "simulated platform has no location capability",
    )
}

// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::NavigationConfig;
use crate::provider::{RouteCalculationError, RouteProvider};
use crate::route::Route;
use crate::session::{Effect, Event, NavigationSession, RequestId};
use crate::tracker::{LocationError, LocationTracker, PositionSource, TrackerEvent};
use crate::{Point, RouteDestination};

/// Error conditions which may occur when starting navigation.
#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    /// The user's position could not be determined.
    #[error("location: {0}")]
    Location(#[from] LocationError),

    /// The initial route could not be calculated.
    #[error("route: {0}")]
    Route(#[from] RouteCalculationError),

    /// Navigation was cancelled, or started again, before the initial route was ready.
    #[error("navigation cancelled before a route was found")]
    Cancelled,

    /// The navigator was shut down.
    #[error("navigator is not running")]
    Stopped,
}

type StartReply = oneshot::Sender<Result<(), NavigationError>>;

enum Command {
    Start {
        origin: Point,
        destination: RouteDestination,
        reply: StartReply,
    },
    Cancel,
}

struct RouteOutcome {
    request: RequestId,
    result: Result<Route, RouteCalculationError>,
}

/// Drives a [NavigationSession] with live data.
///
/// A Navigator owns a background task, which feeds the session with locations
/// from a [LocationTracker], requests routes from a [RouteProvider], and
/// publishes every new session to [Navigator::watch] receivers. Exactly one route
/// request is in flight at a time.
///
/// Must be created inside a Tokio runtime. The background task, and with it position
/// tracking, ends when the Navigator is dropped.
pub struct Navigator<S: PositionSource> {
    tracker: Arc<LocationTracker<S>>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<NavigationSession>,
    worker: JoinHandle<()>,
}

impl<S: PositionSource> Navigator<S> {
    pub fn new<P: RouteProvider>(
        tracker: LocationTracker<S>,
        provider: P,
        config: NavigationConfig,
    ) -> Self {
        let tracker = Arc::new(tracker);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(NavigationSession::default());
        let events = tracker.subscribe();

        let worker = Worker {
            tracker: Arc::clone(&tracker),
            provider: Arc::new(provider),
            config,
            session: NavigationSession::default(),
            state: state_tx,
            outcomes: outcomes_tx,
            in_flight: None,
            start_reply: None,
        };

        Self {
            tracker,
            commands: commands_tx,
            state: state_rx,
            worker: tokio::spawn(worker.run(commands_rx, events, outcomes_rx)),
        }
    }

    pub fn tracker(&self) -> &LocationTracker<S> {
        &self.tracker
    }

    /// Starts navigating from the user's current position to `destination`.
    ///
    /// See [Navigator::start_navigation_from].
    pub async fn start_navigation(&self, destination: RouteDestination) -> Result<(), NavigationError> {
        let origin = self.tracker.get_current_location_once().await?;
        self.start_navigation_from(origin.point(), destination).await
    }

    /// Starts navigating from `origin` to `destination`, replacing any previous navigation.
    ///
    /// Resolves once the initial route is installed and position tracking has started,
    /// or with an error if the route could not be calculated. A call superseded by
    /// another start, or by [Navigator::cancel_navigation], resolves with
    /// [NavigationError::Cancelled].
    pub async fn start_navigation_from(
        &self,
        origin: Point,
        destination: RouteDestination,
    ) -> Result<(), NavigationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start {
                origin,
                destination,
                reply,
            })
            .map_err(|_| NavigationError::Stopped)?;

        match response.await {
            Ok(result) => result,
            Err(_) if self.commands.is_closed() => Err(NavigationError::Stopped),
            Err(_) => Err(NavigationError::Cancelled),
        }
    }

    /// Stops navigation. Position tracking stops before this returns;
    /// the session becomes [Cancelled](crate::Phase::Cancelled) shortly after.
    pub fn cancel_navigation(&self) {
        self.tracker.stop_tracking();
        let _ = self.commands.send(Command::Cancel);
    }

    /// Returns a snapshot of the current session.
    pub fn session(&self) -> NavigationSession {
        self.state.borrow().clone()
    }

    /// Returns a receiver notified about every session change.
    pub fn watch(&self) -> watch::Receiver<NavigationSession> {
        self.state.clone()
    }

    /// Stops the background task and position tracking. The Navigator can't be used afterwards.
    pub fn shutdown(&self) {
        self.worker.abort();
        self.tracker.stop_tracking();
    }
}

impl<S: PositionSource> Drop for Navigator<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State of the background task of a [Navigator].
struct Worker<S: PositionSource, P: RouteProvider> {
    tracker: Arc<LocationTracker<S>>,
    provider: Arc<P>,
    config: NavigationConfig,
    session: NavigationSession,
    state: watch::Sender<NavigationSession>,
    outcomes: mpsc::UnboundedSender<RouteOutcome>,
    in_flight: Option<(RequestId, AbortHandle)>,
    start_reply: Option<StartReply>,
}

impl<S: PositionSource, P: RouteProvider> Worker<S, P> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TrackerEvent>,
        mut outcomes: mpsc::UnboundedReceiver<RouteOutcome>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_tracker_event(event),
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
            }
        }

        self.abort_in_flight();
        self.tracker.stop_tracking();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                origin,
                destination,
                reply,
            } => {
                // Dropping the previous reply resolves its caller with NavigationError::Cancelled
                self.start_reply = Some(reply);
                self.dispatch(Event::Start {
                    origin,
                    destination,
                });
            }

            Command::Cancel => {
                self.start_reply = None;
                self.dispatch(Event::Cancel);
            }
        }
    }

    fn handle_tracker_event(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Location(location) => self.dispatch(Event::Location(location)),
            TrackerEvent::Error(e) => self.dispatch(Event::LocationFailed(e)),
        }
    }

    fn handle_outcome(&mut self, outcome: RouteOutcome) {
        if self.in_flight.as_ref().map(|(request, _)| *request) == Some(outcome.request) {
            self.in_flight = None;
        }

        let event = match outcome.result {
            Ok(route) => Event::RouteReady {
                request: outcome.request,
                route: Arc::new(route),
            },
            Err(error) => Event::RouteFailed {
                request: outcome.request,
                error,
            },
        };
        self.dispatch(event);
    }

    /// Runs the session transition for `event`, performs the resulting effects
    /// and publishes the new session.
    fn dispatch(&mut self, event: Event) {
        let previous = self.session.phase();
        let session = std::mem::take(&mut self.session);
        let (session, effects) = session.apply(event, &self.config);
        self.session = session;

        if self.session.phase() != previous {
            log::info!("navigation: {} -> {}", previous, self.session.phase());
        }

        // Replies go out last, so that a resumed caller observes the new session
        let (replies, actions): (Vec<_>, Vec<_>) = effects
            .into_iter()
            .partition(|e| matches!(e, Effect::Started | Effect::StartFailed(_)));

        for effect in actions {
            self.perform(effect);
        }
        self.state.send_replace(self.session.clone());
        for effect in replies {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::RequestRoute {
                request,
                origin,
                destination,
            } => self.request_route(request, origin, destination),

            Effect::AbortRequest(request) => {
                if self.in_flight.as_ref().map(|(r, _)| *r) == Some(request) {
                    self.abort_in_flight();
                }
            }

            Effect::StartTracking => self.tracker.start_tracking(),
            Effect::StopTracking => self.tracker.stop_tracking(),

            Effect::Started => {
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }

            Effect::StartFailed(error) => {
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Err(error.into()));
                }
            }
        }
    }

    fn request_route(&mut self, request: RequestId, origin: Point, destination: Point) {
        self.abort_in_flight();

        let provider = Arc::clone(&self.provider);
        let profile = self.config.profile;
        let task = tokio::spawn(async move {
            provider.request_route(origin, destination, profile).await
        });
        let abort = task.abort_handle();

        // A panicking provider still has to resolve the request; an aborted one stays silent
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(RouteCalculationError::Panicked),
                Err(_) => return,
            };
            let _ = outcomes.send(RouteOutcome { request, result });
        });

        log::debug!("route request {} in flight", request);
        self.in_flight = Some((request, abort));
    }

    fn abort_in_flight(&mut self) {
        if let Some((request, abort)) = self.in_flight.take() {
            abort.abort();
            log::debug!("route request {} aborted", request);
        }
    }
}

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use routenav::source::{NmeaSource, SimulatedSource};
use routenav::tracker::{now_ms, PositionSource};
use routenav::{
    Config, LocationTracker, NavigationSession, Navigator, Phase, Point, Profile, Route,
    RouteDestination, UserLocation, ValhallaClient,
};

#[derive(Debug, thiserror::Error)]
#[error("{0}: {1}")]
struct ConfigLoadError(PathBuf, #[source] routenav::config::ConfigError);

#[derive(Debug, thiserror::Error)]
enum TrackError {
    #[error("{0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{0}:{1}: expected \"lat,lon\", got {2:?}")]
    Syntax(PathBuf, usize, String),

    #[error("{0}: no positions")]
    Empty(PathBuf),
}

#[derive(Parser)]
struct Cli {
    /// The path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the Valhalla routing service
    #[arg(long)]
    url: Option<String>,

    /// Travel mode: pedestrian, vehicle or bicycle
    #[arg(long)]
    profile: Option<Profile>,

    /// Serial device (or recorded log) with NMEA sentences from a GNSS receiver
    #[arg(long, conflicts_with = "track", required_unless_present = "track")]
    nmea: Option<PathBuf>,

    /// File with "lat,lon" lines, replayed as the user's positions
    #[arg(long)]
    track: Option<PathBuf>,

    /// Delay between replayed track positions, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Latitude of the destination
    #[arg(allow_negative_numbers = true)]
    dest_lat: f64,

    /// Longitude of the destination
    #[arg(allow_negative_numbers = true)]
    dest_lon: f64,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result<(), Box<dyn Error>> {
    colog::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| ConfigLoadError(path.clone(), e))?,
        None => Config::default(),
    };
    if let Some(url) = cli.url {
        config.routing.base_url = url;
    }
    if let Some(profile) = cli.profile {
        config.navigation.profile = profile;
    }

    let provider = ValhallaClient::from_config(&config.routing)?;
    let destination = RouteDestination::new(Point::new(cli.dest_lat, cli.dest_lon));

    if let Some(device) = cli.nmea {
        let tracker = LocationTracker::new(NmeaSource::new(device), config.tracker.clone());
        let navigator = Navigator::new(tracker, provider, config.navigation.clone());
        navigator.start_navigation(destination).await?;
        follow(&navigator).await;
    } else if let Some(path) = cli.track {
        let track = load_track(&path)?;
        let source = Arc::new(SimulatedSource::new());
        source.set_fix(Some(UserLocation::new(track[0].lat, track[0].lon, now_ms())));

        let tracker =
            LocationTracker::with_shared_source(Arc::clone(&source), config.tracker.clone());
        let navigator = Navigator::new(tracker, provider, config.navigation.clone());
        navigator.start_navigation(destination).await?;

        tokio::select! {
            _ = follow(&navigator) => {}
            _ = replay(&source, &track, Duration::from_millis(cli.interval_ms)) => {
                log::warn!("track ended before reaching the destination");
            }
        }
    }

    Ok(())
}

fn load_track(path: &Path) -> Result<Vec<Point>, TrackError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| TrackError::Io(path.to_path_buf(), e))?;

    let mut track = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let syntax = || TrackError::Syntax(path.to_path_buf(), i + 1, line.to_string());
        let (lat, lon) = line.split_once(',').ok_or_else(syntax)?;
        let lat = lat.trim().parse().map_err(|_| syntax())?;
        let lon = lon.trim().parse().map_err(|_| syntax())?;
        track.push(Point::new(lat, lon));
    }

    if track.is_empty() {
        return Err(TrackError::Empty(path.to_path_buf()));
    }
    Ok(track)
}

async fn replay(source: &SimulatedSource, track: &[Point], interval: Duration) {
    for p in track {
        source.push_location(UserLocation::new(p.lat, p.lon, now_ms()));
        tokio::time::sleep(interval).await;
    }
}

/// Prints navigation updates until the session ends.
async fn follow<S: PositionSource>(navigator: &Navigator<S>) {
    let mut rx = navigator.watch();
    let mut shown_route: Option<Arc<Route>> = None;
    let mut shown_maneuver = None;
    let mut shown_off_route = false;
    let mut shown_error = None;

    loop {
        let session: NavigationSession = rx.borrow_and_update().clone();

        if let Some(route) = session.route() {
            if shown_route.as_ref().map_or(true, |r| !Arc::ptr_eq(r, route)) {
                println!(
                    "Route: {:.0} m, {:.0} min",
                    route.total_distance(),
                    route.total_time() / 60.0
                );
                shown_route = Some(Arc::clone(route));
                shown_maneuver = None;
            }
        }

        if session.location_error() != shown_error.as_ref() {
            shown_error = session.location_error().cloned();
            if let Some(e) = &shown_error {
                println!("Location unavailable: {}", e);
            }
        }

        if session.is_off_route() != shown_off_route {
            shown_off_route = session.is_off_route();
            if shown_off_route {
                println!("Off route (rerouted {} times)", session.reroute_count());
            } else {
                println!("Back on route");
            }
        }

        if shown_maneuver != Some(session.maneuver_index()) {
            if let Some(m) = session.current_maneuver() {
                let remaining = session.remaining_distance().unwrap_or_default();
                println!("{} ({:.0} m to go)", m.instruction, remaining);
                shown_maneuver = Some(session.maneuver_index());
            }
        }

        match session.phase() {
            Phase::Arrived => {
                match session.destination() {
                    Some(d) => println!("Arrived at {}", d.point),
                    None => println!("Arrived"),
                }
                return;
            }
            Phase::Idle | Phase::Cancelled => return,
            _ => {}
        }

        if rx.changed().await.is_err() {
            return;
        }
    }
}

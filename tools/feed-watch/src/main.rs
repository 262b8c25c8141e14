use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use livebus_core::motion::{FrameSource, IntervalFrames};
use livebus_core::transit::{RouteName, VehicleSnapshot};
use livebus_core::{AnimatedPose, FeedError, Tracker, TrackerConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "feed-watch",
    author,
    version,
    about = "Follow the vehicles of one bus route in the terminal",
    long_about = "Subscribes to the live feed of a route, animates every vehicle along \
                  the route geometry and prints the animated positions.\n\n\
                  Settings are read from an optional TOML file, then from LIVEBUS_* \
                  environment variables (a .env file is loaded first), then from flags."
)]
struct Args {
    /// Route label, e.g. 30
    route: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Live vehicle API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Static data base URL (route map and polylines)
    #[arg(long)]
    static_url: Option<String>,

    /// How often to print vehicle positions, in milliseconds
    #[arg(long, default_value = "1000")]
    print_every_ms: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

enum FeedEvent {
    Data(VehicleSnapshot),
    Error(FeedError),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,feed_watch={level},livebus_core={level},livebus_transit={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    let print_every = Duration::from_millis(args.print_every_ms.max(1));
    let frame_interval = config.motion.frame_interval();
    let tracker = Tracker::from_config(config).context("Failed to build tracker")?;

    let route = RouteName::new(args.route.trim());
    match tracker.route_info(route.as_str()).await? {
        Some(info) => info!(
            route = %route,
            feeds = info.feed_ids.len(),
            "Watching route"
        ),
        None => bail!("Route {route} is not in the route map"),
    }

    let (events, mut incoming) = mpsc::unbounded_channel();
    let error_events = events.clone();
    let subscription = tracker.subscribe(
        route.clone(),
        move |snapshot: &VehicleSnapshot| {
            let _ = events.send(FeedEvent::Data(snapshot.clone()));
        },
        move |error: Option<FeedError>| {
            if let Some(error) = error {
                let _ = error_events.send(FeedEvent::Error(error));
            }
        },
    );

    let mut frames = IntervalFrames::new(frame_interval);
    let mut printer = tokio::time::interval(print_every);
    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut caches_cleared = false;
    loop {
        tokio::select! {
            Some(event) = incoming.recv() => match event {
                FeedEvent::Data(snapshot) => {
                    let summary = tracker.ingest(&snapshot).await;
                    info!(
                        vehicles = snapshot.vehicles.len(),
                        added = summary.added,
                        moved = summary.retargeted,
                        dropped = summary.dropped,
                        "Poll"
                    );
                    if !caches_cleared {
                        caches_cleared = tracker.clear_other_caches(&route);
                    }
                }
                FeedEvent::Error(FeedError::NoneRunning) => info!("No vehicles running"),
                FeedEvent::Error(error) => warn!(error = %error, "Feed error"),
            },
            elapsed = frames.next_frame() => tracker.tick(elapsed),
            _ = printer.tick() => print_poses(&tracker.poses(&route)),
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
        }
    }

    // Releases the route's animation state as well.
    subscription.unsubscribe();
    info!("Stopped");
    Ok(())
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(url) = &args.api_url {
        config.live.base_url = url.clone();
    }
    if let Some(url) = &args.static_url {
        config.static_data.base_url = url.clone();
    }
    Ok(config)
}

fn print_poses(poses: &[AnimatedPose]) {
    for pose in poses {
        let direction = pose
            .direction
            .map_or_else(|| "?".to_owned(), |d| format!("{d:?}").to_lowercase());
        println!(
            "{:>10}  {:>11.6} {:>10.6}  {:>5.1}°  {:<4}  {:>3.0}%",
            pose.vehicle_id.as_str(),
            pose.position.y,
            pose.position.x,
            pose.heading,
            direction,
            pose.progress * 100.0
        );
    }
}

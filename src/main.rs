use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shuttletrack::{
    ActivityState, Config, LocationFix, LocationReporter, RestClient, TokenStore, Tracker,
    TrackerConfig,
};

#[derive(Parser)]
#[command(name = "shuttletrack", about = "Campus shuttle live-tracking client")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List buses known to the backend
    Buses,
    /// Follow one bus and log every activity change
    Track { bus_id: String },
    /// Publish GPS fixes for a bus, read from stdin as
    /// "lat lon [speed heading]" lines
    Report { bus_id: String },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).expect("Failed to load config");

    // The surrounding session owns the credential; seed it from the
    // environment when present.
    let tokens = match std::env::var("SHUTTLE_TOKEN") {
        Ok(token) if !token.is_empty() => TokenStore::with_token(token),
        _ => TokenStore::new(),
    };

    let rest = Arc::new(
        RestClient::new(
            &config.api_base_url,
            tokens.clone(),
            config.tracking.request_timeout(),
        )
        .expect("Failed to build REST client"),
    );

    match cli.command {
        Command::Buses => list_buses(&rest).await,
        Command::Track { bus_id } => track(rest, tokens, &config, bus_id).await,
        Command::Report { bus_id } => report(rest, bus_id).await,
    }
}

async fn list_buses(rest: &RestClient) {
    let buses = rest.list_buses().await.expect("Failed to list buses");
    if buses.is_empty() {
        println!("No buses registered.");
        return;
    }
    for bus in buses {
        println!("{:>4}  {}", bus.id, bus.label());
    }
}

async fn track(rest: Arc<RestClient>, tokens: TokenStore, config: &Config, bus_id: String) {
    if let Ok(detail) = rest.get_bus(&bus_id).await {
        let stops = detail.stop_labels();
        if !stops.is_empty() {
            tracing::info!(bus_id = %bus_id, route = %stops.join(" -> "), "tracking bus");
        }
    }

    let tracker = Tracker::spawn(rest, tokens, TrackerConfig::from_config(config));
    tracker.select(bus_id).await;

    let mut views = tracker.subscribe();
    loop {
        let view = views.borrow_and_update().clone();
        match view.state {
            ActivityState::Active => {
                if let Some(sample) = &view.sample {
                    tracing::info!(
                        lat = sample.latitude,
                        lon = sample.longitude,
                        current_stop = sample.current_stop.as_deref().unwrap_or("-"),
                        next_stop = sample.next_stop.as_deref().unwrap_or("-"),
                        eta = sample.eta.as_deref().unwrap_or("-"),
                        "bus active"
                    );
                }
            }
            ActivityState::Inactive => {
                tracing::info!("bus inactive, no live coordinates");
            }
            ActivityState::Unselected => {}
        }
        if views.changed().await.is_err() {
            return;
        }
    }
}

async fn report(rest: Arc<RestClient>, bus_id: String) {
    let reporter = LocationReporter::new(rest, bus_id);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Some(fix) = parse_fix(&line) else {
            tracing::warn!(line = %line.trim(), "ignoring malformed fix line");
            continue;
        };
        reporter.report(&fix).await;
    }
}

fn parse_fix(line: &str) -> Option<LocationFix> {
    let mut parts = line.split_whitespace();
    let latitude: f64 = parts.next()?.parse().ok()?;
    let longitude: f64 = parts.next()?.parse().ok()?;
    let mut fix = LocationFix::new(latitude, longitude);
    fix.speed = parts.next().and_then(|p| p.parse().ok());
    fix.heading = parts.next().and_then(|p| p.parse().ok());
    Some(fix)
}

//! Campus shuttle live-tracking client.
//!
//! Reconciles two sources of bus positions — a polling REST snapshot and a
//! per-bus WebSocket push feed — into one consistent "is this bus active,
//! and where is it" view. The push channel is unreliable on some deployment
//! targets, so polling is the backstop, not an optimization.

pub mod auth;
pub mod config;
pub mod providers;
pub mod reporter;
pub mod tracker;

pub use auth::TokenStore;
pub use config::{Config, ConfigError};
pub use providers::push::PushConfig;
pub use providers::rest::{Bus, BusDetail, LocationFix, RestClient, RestError};
pub use reporter::LocationReporter;
pub use tracker::types::{ActivityState, BusId, LocationSample, ReconciledView};
pub use tracker::{Reconciler, Tracker, TrackerConfig};

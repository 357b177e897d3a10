//! Type definitions for the tracker module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked bus.
///
/// Opaque from the tracker's point of view. The backend stores integer ids
/// but the wire formats mix numeric and string spellings, so it is carried
/// as a string everywhere.
pub type BusId = String;

/// Tri-state activity signal exposed to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// No bus selected.
    #[default]
    Unselected,
    /// A bus is selected but no current coordinate pair is known.
    Inactive,
    /// A bus is selected and a current coordinate pair exists.
    Active,
}

/// One coordinate observation with optional stop/ETA metadata.
///
/// Both coordinates are always present; a payload missing either collapses
/// to "no sample" before a `LocationSample` is ever constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSample {
    pub bus_id: BusId,
    pub latitude: f64,
    pub longitude: f64,
    pub current_stop: Option<String>,
    pub next_stop: Option<String>,
    pub eta: Option<String>,
    /// When the backend last saw the bus. Falls back to receive time when
    /// the payload carries no parseable timestamp.
    pub observed_at: DateTime<Utc>,
}

/// The single value consumers observe.
///
/// Owned and mutated only by the tracker; everyone else sees it through a
/// watch channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciledView {
    pub state: ActivityState,
    pub sample: Option<LocationSample>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Raw location payload as returned by `GET /buses/{id}/location` and as
/// embedded in `location_update` push frames.
///
/// The backend has shipped several key spellings over time; all of them are
/// accepted and coalesced here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLocation {
    pub latitude: Option<f64>,
    pub lat: Option<f64>,
    pub current_lat: Option<f64>,
    pub longitude: Option<f64>,
    pub lon: Option<f64>,
    pub current_lon: Option<f64>,
    pub current_stop: Option<String>,
    pub next_stop: Option<String>,
    pub eta: Option<String>,
    pub last_seen: Option<String>,
    pub timestamp: Option<String>,
}

impl RawLocation {
    /// Collapse the payload into a sample.
    ///
    /// Returns `None` unless both coordinates are present under some
    /// accepted spelling.
    pub fn into_sample(self, bus_id: &str, received_at: DateTime<Utc>) -> Option<LocationSample> {
        let latitude = self.latitude.or(self.lat).or(self.current_lat)?;
        let longitude = self.longitude.or(self.lon).or(self.current_lon)?;

        let observed_at = self
            .last_seen
            .as_deref()
            .or(self.timestamp.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(received_at);

        Some(LocationSample {
            bus_id: bus_id.to_string(),
            latitude,
            longitude,
            current_stop: self.current_stop,
            next_stop: self.next_stop,
            eta: self.eta,
            observed_at,
        })
    }
}

//! Driver-side location publishing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::providers::rest::{LocationFix, RestClient};

/// Publishes GPS fixes for one bus.
///
/// Failures are logged and swallowed so a flaky uplink never stops the fix
/// stream; the next fix simply tries again.
pub struct LocationReporter {
    rest: Arc<RestClient>,
    bus_id: String,
}

impl LocationReporter {
    pub fn new(rest: Arc<RestClient>, bus_id: impl Into<String>) -> Self {
        Self { rest, bus_id: bus_id.into() }
    }

    /// Post one fix. Returns whether the backend accepted it.
    pub async fn report(&self, fix: &LocationFix) -> bool {
        match self.rest.post_location(&self.bus_id, fix).await {
            Ok(()) => {
                debug!(
                    bus_id = %self.bus_id,
                    lat = fix.latitude,
                    lon = fix.longitude,
                    "published location fix"
                );
                true
            }
            Err(e) => {
                warn!(bus_id = %self.bus_id, error = %e, "failed to publish location fix");
                false
            }
        }
    }
}

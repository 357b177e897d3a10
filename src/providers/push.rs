//! Per-bus WebSocket push subscription.
//!
//! Connects to `{ws_base_url}/ws/subscribe/{bus_id}?token=...` and forwards
//! `location_update` frames to the tracker. The channel is known to be
//! unreliable on at least one deployment target, so this source is best
//! effort: it reconnects with exponential backoff and the snapshot poller
//! papers over any gap.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TokenStore;
use crate::tracker::types::RawLocation;
use crate::tracker::SourceEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for the push channel.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Base URL of the WebSocket endpoint, e.g. `ws://127.0.0.1:8000`.
    pub ws_base_url: String,
    /// First reconnect delay after an unexpected close.
    pub reconnect_initial: Duration,
    /// Cap on the reconnect delay.
    pub reconnect_max: Duration,
}

/// Inbound frame. Only `location_update` frames carry samples; everything
/// else on the feed is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PushFrame {
    LocationUpdate {
        bus_id: FrameId,
        #[serde(flatten)]
        location: RawLocation,
    },
    #[serde(other)]
    Other,
}

/// The backend has emitted `bus_id` both as a JSON number and as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrameId {
    Number(i64),
    Text(String),
}

impl FrameId {
    fn matches(&self, bus_id: &str) -> bool {
        match self {
            FrameId::Number(n) => n.to_string() == bus_id,
            FrameId::Text(s) => s == bus_id,
        }
    }
}

/// Next reconnect delay: doubles, capped.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Long-lived subscription scoped to one bus.
pub(crate) struct PushSubscriber {
    config: PushConfig,
    tokens: TokenStore,
    bus_id: String,
    tx: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
}

impl PushSubscriber {
    pub(crate) fn new(
        config: PushConfig,
        tokens: TokenStore,
        bus_id: String,
        tx: mpsc::Sender<SourceEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, tokens, bus_id, tx, cancel }
    }

    /// Subscription URL, rebuilt per attempt so the current token is used.
    /// The token travels as a query parameter; the browser WebSocket API the
    /// backend was built against cannot set headers.
    fn subscribe_url(&self) -> String {
        let base = self.config.ws_base_url.trim_end_matches('/');
        let mut url = format!("{}/ws/subscribe/{}", base, self.bus_id);
        if let Some(token) = self.tokens.get() {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(&token));
        }
        url
    }

    /// Connect and forward frames until cancelled.
    ///
    /// Reconnects with exponential backoff on unexpected close (1 s, 2 s,
    /// 4 s, ... capped at 30 s by default); the backoff resets after every
    /// successful open. Cancellation closes the connection and disables
    /// reconnection entirely.
    pub(crate) async fn run(self) {
        let mut backoff = self.config.reconnect_initial;

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = tokio_tungstenite::connect_async(self.subscribe_url()) => result,
            };

            match connected {
                Ok((stream, _response)) => {
                    info!(bus_id = %self.bus_id, "push channel connected");
                    backoff = self.config.reconnect_initial;
                    if self.listen(stream).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(bus_id = %self.bus_id, error = %e, "push channel connect failed");
                }
            }

            // Wait before retrying, but never resurrect a cancelled
            // subscription out of the backoff sleep.
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            debug!(
                bus_id = %self.bus_id,
                backoff_ms = backoff.as_millis() as u64,
                "push channel reconnecting"
            );
            backoff = next_backoff(backoff, self.config.reconnect_max);
        }
    }

    /// Drain one open connection. Returns `true` when the subscriber was
    /// cancelled and must not reconnect.
    async fn listen(&self, mut stream: WsStream) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(bus_id = %self.bus_id, "push channel closed");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(bus_id = %self.bus_id, error = %e, "push channel read error");
                        return false;
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame: PushFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable push frame");
                return;
            }
        };
        let PushFrame::LocationUpdate { bus_id, location } = frame else {
            return;
        };

        // The connection may still be draining frames for a bus that was
        // just deselected; only the subscribed bus passes.
        if !bus_id.matches(&self.bus_id) {
            debug!(bus_id = %self.bus_id, "dropping frame for another bus");
            return;
        }

        // Frames without a usable coordinate pair carry nothing to show.
        let Some(sample) = location.into_sample(&self.bus_id, Utc::now()) else {
            return;
        };

        let _ = self
            .tx
            .send(SourceEvent::Push { bus_id: self.bus_id.clone(), sample })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut waits = Vec::new();
        for _ in 0..7 {
            waits.push(delay.as_secs());
            delay = next_backoff(delay, max);
        }
        assert_eq!(waits, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_location_update_frame_parses() {
        let frame: PushFrame = serde_json::from_str(
            r#"{"type": "location_update", "bus_id": "7", "lat": 17.73, "lon": 83.31}"#,
        )
        .unwrap();
        let PushFrame::LocationUpdate { bus_id, location } = frame else {
            panic!("expected location_update");
        };
        assert!(bus_id.matches("7"));
        let sample = location.into_sample("7", Utc::now()).unwrap();
        assert_eq!(sample.latitude, 17.73);
        assert_eq!(sample.longitude, 83.31);
    }

    #[test]
    fn test_numeric_bus_id_matches_string_selection() {
        let frame: PushFrame = serde_json::from_str(
            r#"{"type": "location_update", "bus_id": 7, "latitude": 1.0, "longitude": 2.0}"#,
        )
        .unwrap();
        let PushFrame::LocationUpdate { bus_id, .. } = frame else {
            panic!("expected location_update");
        };
        assert!(bus_id.matches("7"));
        assert!(!bus_id.matches("9"));
    }

    #[test]
    fn test_other_frame_types_are_ignored() {
        let frame: PushFrame =
            serde_json::from_str(r#"{"type": "ping", "seq": 12}"#).unwrap();
        assert!(matches!(frame, PushFrame::Other));
    }

    #[test]
    fn test_frame_without_coordinates_yields_no_sample() {
        let frame: PushFrame = serde_json::from_str(
            r#"{"type": "location_update", "bus_id": "7", "current_stop": "Library"}"#,
        )
        .unwrap();
        let PushFrame::LocationUpdate { location, .. } = frame else {
            panic!("expected location_update");
        };
        assert!(location.into_sample("7", Utc::now()).is_none());
    }
}

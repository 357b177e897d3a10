//! Live-location reconciliation.
//!
//! One bus may be tracked at a time. Two independent producers feed the
//! tracker while a bus is selected:
//! - a snapshot poller hitting `GET /buses/{id}/location` on a fixed
//!   interval (the backstop), and
//! - a per-bus WebSocket push subscription (low latency, but unreliable on
//!   some deployment targets).
//!
//! The tracker merges both into a single [`ReconciledView`] published
//! through a watch channel. Whichever source reports a coordinate pair last
//! wins; no ordering comparison is made between the two.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::TokenStore;
use crate::config::Config;
use crate::providers::push::{PushConfig, PushSubscriber};
use crate::providers::rest::RestClient;
use types::{ActivityState, BusId, LocationSample, ReconciledView};

/// Settings for a tracker instance.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Snapshot poll period while a bus is selected.
    pub poll_interval: Duration,
    /// Push channel settings; `None` disables the channel for the lifetime
    /// of the tracker and polling carries live tracking alone.
    pub push: Option<PushConfig>,
}

impl TrackerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.tracking.poll_interval(),
            push: config.ws_base_url.clone().map(|ws_base_url| PushConfig {
                ws_base_url,
                reconnect_initial: config.tracking.reconnect_initial(),
                reconnect_max: config.tracking.reconnect_max(),
            }),
        }
    }
}

/// Commands from the tracker handle to the task.
#[derive(Debug)]
enum Command {
    Select(BusId),
    Deselect,
}

/// Output of one producer callback, tagged with the bus it belongs to so
/// the tracker can drop late arrivals from a previous selection.
#[derive(Debug)]
pub(crate) enum SourceEvent {
    /// Result of one snapshot fetch; `None` means the backend has no usable
    /// coordinate pair for the bus right now.
    Snapshot { bus_id: BusId, sample: Option<LocationSample> },
    /// One push frame that carried a coordinate pair.
    Push { bus_id: BusId, sample: LocationSample },
}

/// The state machine proper. Pure: no I/O, no timers. The tracker task
/// drives it from source callbacks; every apply method re-checks the event's
/// bus id against the current selection, the last line of defense against
/// teardown races.
#[derive(Debug, Default)]
pub struct Reconciler {
    selected: Option<BusId>,
    view: ReconciledView,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &ReconciledView {
        &self.view
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// A bus became selected. The view resets to `Inactive` until a source
    /// reports coordinates.
    pub fn select(&mut self, bus_id: BusId) {
        self.selected = Some(bus_id);
        self.view = ReconciledView {
            state: ActivityState::Inactive,
            sample: None,
            last_updated_at: None,
        };
    }

    /// Selection cleared.
    pub fn deselect(&mut self) {
        self.selected = None;
        self.view = ReconciledView::default();
    }

    /// Apply one snapshot result. Returns whether the view changed.
    ///
    /// A no-sample snapshot demotes to `Inactive` and clears the position:
    /// the authoritative record says the bus is not reporting.
    pub fn apply_snapshot(&mut self, bus_id: &str, sample: Option<LocationSample>) -> bool {
        if self.selected.as_deref() != Some(bus_id) {
            return false;
        }
        match sample {
            Some(sample) => self.adopt(sample),
            None => {
                let next = ReconciledView {
                    state: ActivityState::Inactive,
                    sample: None,
                    last_updated_at: None,
                };
                let changed = self.view != next;
                self.view = next;
                changed
            }
        }
    }

    /// Apply one push event. Push frames only ever promote or refresh;
    /// frames without coordinates are dropped before they reach here.
    pub fn apply_push(&mut self, bus_id: &str, sample: LocationSample) -> bool {
        if self.selected.as_deref() != Some(bus_id) {
            return false;
        }
        self.adopt(sample)
    }

    fn adopt(&mut self, sample: LocationSample) -> bool {
        self.view.state = ActivityState::Active;
        self.view.last_updated_at = Some(sample.observed_at);
        self.view.sample = Some(sample);
        true
    }
}

/// Handle to a running tracker task.
///
/// Cheap to clone via [`Tracker::subscribe`]; dropping the handle tears the
/// task and both producers down.
pub struct Tracker {
    cmd_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<ReconciledView>,
}

impl Tracker {
    /// Spawn the tracker task with its producers wired to `rest`.
    pub fn spawn(rest: Arc<RestClient>, tokens: TokenStore, config: TrackerConfig) -> Self {
        if config.push.is_none() {
            // Degraded but usable: polling alone carries live tracking.
            warn!("push channel base URL not configured; relying on polling only");
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (view_tx, view_rx) = watch::channel(ReconciledView::default());

        let task = TrackerTask {
            rest,
            tokens,
            config,
            reconciler: Reconciler::new(),
            view_tx,
            event_tx,
            event_rx,
            cycle: None,
        };
        tokio::spawn(task.run(cmd_rx));

        Self { cmd_tx, view_rx }
    }

    /// Select the bus to track, replacing any previous selection. The old
    /// selection's poller and subscription are torn down before the new
    /// cycle starts.
    pub async fn select(&self, bus_id: impl Into<BusId>) {
        let _ = self.cmd_tx.send(Command::Select(bus_id.into())).await;
    }

    /// Clear the selection and tear down both producers.
    pub async fn deselect(&self) {
        let _ = self.cmd_tx.send(Command::Deselect).await;
    }

    /// Watch the reconciled view; the current value is readable immediately.
    pub fn subscribe(&self) -> watch::Receiver<ReconciledView> {
        self.view_rx.clone()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> ReconciledView {
        self.view_rx.borrow().clone()
    }
}

struct TrackerTask {
    rest: Arc<RestClient>,
    tokens: TokenStore,
    config: TrackerConfig,
    reconciler: Reconciler,
    view_tx: watch::Sender<ReconciledView>,
    event_tx: mpsc::Sender<SourceEvent>,
    event_rx: mpsc::Receiver<SourceEvent>,
    /// Teardown trigger for the currently selected bus's producers.
    cycle: Option<CancellationToken>,
}

impl TrackerTask {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Select(bus_id)) => self.switch_to(Some(bus_id)),
                    Some(Command::Deselect) => self.switch_to(None),
                    // Handle dropped: shut down.
                    None => break,
                },
                event = self.event_rx.recv() => {
                    if let Some(event) = event {
                        self.apply(event);
                    }
                }
            }
        }
        if let Some(cycle) = self.cycle.take() {
            cycle.cancel();
        }
    }

    /// Change the selection. The previous cycle is cancelled before the
    /// selection changes, so late callbacks race against a selection they
    /// can no longer match; anything already queued is dropped by the
    /// reconciler's bus id check.
    fn switch_to(&mut self, bus_id: Option<BusId>) {
        if let Some(cycle) = self.cycle.take() {
            cycle.cancel();
        }

        match bus_id {
            Some(bus_id) => {
                self.reconciler.select(bus_id.clone());
                let cycle = CancellationToken::new();
                self.spawn_poller(bus_id.clone(), cycle.clone());
                self.spawn_push(bus_id, cycle.clone());
                self.cycle = Some(cycle);
            }
            None => self.reconciler.deselect(),
        }
        self.publish();
    }

    /// Snapshot poll loop. The first fetch happens immediately; after that
    /// the loop holds the configured period. A failed fetch is logged and
    /// reported as "no sample" — the schedule never stops for one failure.
    fn spawn_poller(&self, bus_id: BusId, cancel: CancellationToken) {
        let rest = self.rest.clone();
        let tx = self.event_tx.clone();
        let period = self.config.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }

                let sample = match rest.fetch_location(&bus_id).await {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!(bus_id = %bus_id, error = %e, "snapshot fetch failed");
                        None
                    }
                };

                if cancel.is_cancelled() {
                    return;
                }
                if tx
                    .send(SourceEvent::Snapshot { bus_id: bus_id.clone(), sample })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });
    }

    fn spawn_push(&self, bus_id: BusId, cancel: CancellationToken) {
        let Some(push) = self.config.push.clone() else {
            return;
        };
        let subscriber = PushSubscriber::new(
            push,
            self.tokens.clone(),
            bus_id,
            self.event_tx.clone(),
            cancel,
        );
        tokio::spawn(subscriber.run());
    }

    fn apply(&mut self, event: SourceEvent) {
        let changed = match event {
            SourceEvent::Snapshot { bus_id, sample } => {
                self.reconciler.apply_snapshot(&bus_id, sample)
            }
            SourceEvent::Push { bus_id, sample } => self.reconciler.apply_push(&bus_id, sample),
        };
        if changed {
            self.publish();
        }
    }

    fn publish(&self) {
        // Send only fails when every receiver is gone; the handle keeps one.
        let _ = self.view_tx.send(self.reconciler.view().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(bus_id: &str, lat: f64, lon: f64) -> LocationSample {
        LocationSample {
            bus_id: bus_id.to_string(),
            latitude: lat,
            longitude: lon,
            current_stop: None,
            next_stop: None,
            eta: None,
            observed_at: Utc.with_ymd_and_hms(2025, 11, 3, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_starts_unselected() {
        let reconciler = Reconciler::new();
        assert_eq!(reconciler.view().state, ActivityState::Unselected);
        assert!(reconciler.view().sample.is_none());
        assert!(reconciler.selected().is_none());
    }

    #[test]
    fn test_selection_resets_to_inactive() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        assert_eq!(reconciler.view().state, ActivityState::Inactive);
        assert_eq!(reconciler.selected(), Some("7"));
    }

    #[test]
    fn test_first_sample_activates_from_either_source() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        assert!(reconciler.apply_snapshot("7", Some(sample("7", 17.72, 83.30))));
        assert_eq!(reconciler.view().state, ActivityState::Active);

        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        assert!(reconciler.apply_push("7", sample("7", 17.72, 83.30)));
        assert_eq!(reconciler.view().state, ActivityState::Active);
    }

    #[test]
    fn test_snapshot_then_404_then_push_roundtrip() {
        // Concrete scenario: select "7", fetch activates, a later empty
        // fetch deactivates and clears, a push frame reactivates at once.
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());

        assert!(reconciler.apply_snapshot("7", Some(sample("7", 17.72, 83.30))));
        assert_eq!(reconciler.view().state, ActivityState::Active);
        assert_eq!(reconciler.view().sample.as_ref().unwrap().latitude, 17.72);

        assert!(reconciler.apply_snapshot("7", None));
        assert_eq!(reconciler.view().state, ActivityState::Inactive);
        assert!(reconciler.view().sample.is_none());
        assert!(reconciler.view().last_updated_at.is_none());

        assert!(reconciler.apply_push("7", sample("7", 17.73, 83.31)));
        assert_eq!(reconciler.view().state, ActivityState::Active);
        assert_eq!(reconciler.view().sample.as_ref().unwrap().latitude, 17.73);
        assert_eq!(reconciler.view().sample.as_ref().unwrap().longitude, 83.31);
    }

    #[test]
    fn test_repeated_no_sample_snapshots_do_not_report_change() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        assert!(!reconciler.apply_snapshot("7", None));
        assert!(!reconciler.apply_snapshot("7", None));
        assert_eq!(reconciler.view().state, ActivityState::Inactive);
    }

    #[test]
    fn test_last_write_wins_between_sources() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());

        reconciler.apply_push("7", sample("7", 1.0, 1.0));
        reconciler.apply_snapshot("7", Some(sample("7", 2.0, 2.0)));
        assert_eq!(reconciler.view().sample.as_ref().unwrap().latitude, 2.0);

        reconciler.apply_push("7", sample("7", 3.0, 3.0));
        assert_eq!(reconciler.view().sample.as_ref().unwrap().latitude, 3.0);
        assert_eq!(reconciler.view().state, ActivityState::Active);
    }

    #[test]
    fn test_events_for_other_buses_are_dropped() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        reconciler.apply_snapshot("7", Some(sample("7", 1.0, 1.0)));

        // Switch to bus 9; late arrivals tagged 7 must not touch the view.
        reconciler.select("9".into());
        assert!(!reconciler.apply_snapshot("7", Some(sample("7", 5.0, 5.0))));
        assert!(!reconciler.apply_push("7", sample("7", 6.0, 6.0)));
        assert_eq!(reconciler.view().state, ActivityState::Inactive);
        assert!(reconciler.view().sample.is_none());
    }

    #[test]
    fn test_deselect_clears_everything() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        reconciler.apply_push("7", sample("7", 1.0, 1.0));

        reconciler.deselect();
        assert_eq!(reconciler.view().state, ActivityState::Unselected);
        assert!(reconciler.view().sample.is_none());
        assert!(reconciler.view().last_updated_at.is_none());
        // Events from the dead cycle are ignored entirely.
        assert!(!reconciler.apply_push("7", sample("7", 2.0, 2.0)));
        assert_eq!(reconciler.view().state, ActivityState::Unselected);
    }

    #[test]
    fn test_reselection_behaves_like_first_selection() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        reconciler.apply_push("7", sample("7", 1.0, 1.0));
        reconciler.deselect();

        reconciler.select("7".into());
        assert_eq!(reconciler.view().state, ActivityState::Inactive);
        assert!(reconciler.view().sample.is_none());
        assert!(reconciler.apply_snapshot("7", Some(sample("7", 2.0, 2.0))));
        assert_eq!(reconciler.view().state, ActivityState::Active);
    }

    #[test]
    fn test_push_never_demotes_active_state() {
        let mut reconciler = Reconciler::new();
        reconciler.select("7".into());
        reconciler.apply_push("7", sample("7", 1.0, 1.0));
        // A second frame only refreshes.
        reconciler.apply_push("7", sample("7", 1.5, 1.5));
        assert_eq!(reconciler.view().state, ActivityState::Active);
        assert_eq!(reconciler.view().sample.as_ref().unwrap().latitude, 1.5);
    }
}

//! Connectivity state machine gating when sync may run
//!
//! The monitor tracks four ordered levels. Network events move between
//! `OFFLINE` and `ONLINE_LOCAL` immediately; higher levels are only reached
//! through a fresh, timeout-bounded probe of the peer and then of the
//! application endpoint.

mod state;

pub use state::{ConnectionClass, ConnectionStrategy, ConnectivityLevel, ConnectivityState};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::util::{duration_millis, now_millis};

/// Poll cadence while the user is active
pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Poll cadence when idle or hidden
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Inactivity after which the idle cadence applies
pub const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(120);

/// Reachability checks supplied by the transport layer.
pub trait ReachabilityProbe {
    /// Check that the private-network peer answers
    fn probe_peer(&self) -> impl Future<Output = Result<()>> + Send;

    /// Check that the application status endpoint answers
    fn probe_server(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Tracks connectivity and publishes every transition.
pub struct ConnectivityMonitor<P> {
    probe: P,
    probe_timeout: Duration,
    events: EventBus,
    state_tx: watch::Sender<ConnectivityState>,
    visible: AtomicBool,
    last_activity: AtomicI64,
}

impl<P: ReachabilityProbe> ConnectivityMonitor<P> {
    /// Create a monitor; the network is assumed up until told otherwise.
    pub fn new(probe: P, probe_timeout: Duration, events: EventBus) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::default());
        Self {
            probe,
            probe_timeout,
            events,
            state_tx,
            visible: AtomicBool::new(true),
            last_activity: AtomicI64::new(now_millis()),
        }
    }

    /// Current snapshot
    pub fn state(&self) -> ConnectivityState {
        self.state_tx.borrow().clone()
    }

    /// Current level
    pub fn level(&self) -> ConnectivityLevel {
        self.state_tx.borrow().level()
    }

    /// Watch every state update
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Wait until the level reaches `min_level`, giving up after `timeout`.
    pub async fn wait_for_connection(
        &self,
        min_level: ConnectivityLevel,
        timeout: Duration,
    ) -> Result<ConnectivityState> {
        let mut rx = self.state_tx.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|state| state.level() >= min_level))
            .await
            .map_err(|_| Error::Timeout(duration_millis(timeout)))?;
        let current = reached
            .map(|state| ConnectivityState::clone(&state))
            .map_err(|_| Error::Network("connectivity monitor closed".to_string()))?;
        Ok(current)
    }

    /// Low-level network up/down notification.
    pub fn network_event(&self, online: bool) -> ConnectivityState {
        tracing::info!("Network {}", if online { "up" } else { "down" });
        self.update(|state| {
            state.online = online;
            state.peer_reachable = false;
            state.server_available = false;
            if !online {
                state.connection_class = ConnectionClass::Offline;
            } else if state.connection_class == ConnectionClass::Offline {
                state.connection_class = ConnectionClass::Unknown;
            }
        })
    }

    /// Platform reported a new effective connection type.
    pub fn connection_changed(&self, effective_type: Option<&str>) -> ConnectivityState {
        let class = ConnectionClass::from_effective_type(effective_type);
        self.update(|state| {
            if state.online {
                state.connection_class = class;
            }
        })
    }

    /// Enable or disable automatic mode. Disabling forces `OFFLINE` and
    /// forgets confirmed reachability, so re-enabling needs a fresh probe.
    pub fn set_auto_mode(&self, enabled: bool) -> ConnectivityState {
        tracing::info!(
            "Connectivity auto mode {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.update(|state| {
            state.auto_mode = enabled;
            if !enabled {
                state.peer_reachable = false;
                state.server_available = false;
            }
        })
    }

    /// Page visibility changed
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
        if visible {
            self.record_activity();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// The user interacted with the application
    pub fn record_activity(&self) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
    }

    /// Delay until the next tick given the current time (Unix ms).
    ///
    /// Slow or absent networks stretch the cadence to their class interval.
    pub fn poll_interval(&self, now: i64) -> Duration {
        let idle_for = now.saturating_sub(self.last_activity.load(Ordering::Relaxed));
        let threshold = i64::try_from(duration_millis(INACTIVITY_THRESHOLD)).unwrap_or(i64::MAX);
        let base = if !self.is_visible() || idle_for >= threshold {
            IDLE_POLL_INTERVAL
        } else {
            ACTIVE_POLL_INTERVAL
        };

        let strategy = self.state_tx.borrow().connection_class.strategy();
        if strategy.cache_first {
            base.max(strategy.sync_interval.unwrap_or(IDLE_POLL_INTERVAL))
        } else {
            base
        }
    }

    /// Probe the peer, then the server, and publish the resulting state.
    ///
    /// Each failure drops to the highest level still confirmed.
    pub async fn probe_now(&self) -> ConnectivityState {
        let current = self.state();
        if !current.online || !current.auto_mode {
            return self.update(|state| {
                state.last_check = Some(now_millis());
            });
        }

        let peer_reachable = match self.bounded(self.probe.probe_peer()).await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Peer probe failed: {error}");
                false
            }
        };

        let server_available = peer_reachable
            && match self.bounded(self.probe.probe_server()).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::debug!("Server probe failed: {error}");
                    false
                }
            };

        self.update(|state| {
            // A network or auto-mode change during the probe wins
            let confirmed = state.online && state.auto_mode;
            state.peer_reachable = confirmed && peer_reachable;
            state.server_available = confirmed && server_available;
            state.last_check = Some(now_millis());
        })
    }

    /// Poll until `shutdown` flips to true. Hidden ticks skip the probe.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Connectivity monitor started");
        self.probe_now().await;

        loop {
            let delay = self.poll_interval(now_millis());
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if self.is_visible() {
                        self.probe_now().await;
                    } else {
                        tracing::debug!("Skipping probe while hidden");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Connectivity monitor stopped");
    }

    async fn bounded(&self, probe: impl Future<Output = Result<()>>) -> Result<()> {
        tokio::time::timeout(self.probe_timeout, probe)
            .await
            .map_err(|_| Error::Timeout(duration_millis(self.probe_timeout)))?
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectivityState)) -> ConnectivityState {
        let mut transitioned = false;
        self.state_tx.send_if_modified(|state| {
            let before = state.clone();
            apply(state);
            transitioned = !before.same_reachability(state);
            before != *state
        });

        let current = self.state();
        if transitioned {
            tracing::info!(
                "Connectivity now {} ({})",
                current.level(),
                current.connection_class
            );
            self.events
                .emit(SyncEvent::ConnectivityChanged(current.clone()));
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeProbe {
        peer: AtomicBool,
        server: AtomicBool,
        hang: AtomicBool,
    }

    impl FakeProbe {
        fn reachable() -> Self {
            let probe = Self::default();
            probe.peer.store(true, Ordering::SeqCst);
            probe.server.store(true, Ordering::SeqCst);
            probe
        }
    }

    impl ReachabilityProbe for Arc<FakeProbe> {
        async fn probe_peer(&self) -> Result<()> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.peer.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::Network("peer unreachable".to_string()))
            }
        }

        async fn probe_server(&self) -> Result<()> {
            if self.server.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::Network("server unavailable".to_string()))
            }
        }
    }

    fn monitor(probe: &Arc<FakeProbe>) -> ConnectivityMonitor<Arc<FakeProbe>> {
        ConnectivityMonitor::new(
            Arc::clone(probe),
            Duration::from_millis(50),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_probe_reaches_server() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);

        let state = monitor.probe_now().await;
        assert_eq!(state.level(), ConnectivityLevel::OnlineServer);
        assert!(state.last_check.is_some());
    }

    #[tokio::test]
    async fn test_failed_peer_probe_downgrades_from_server() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);
        monitor.probe_now().await;

        probe.peer.store(false, Ordering::SeqCst);
        let state = monitor.probe_now().await;
        assert!(state.level() <= ConnectivityLevel::OnlineLocal);
    }

    #[tokio::test]
    async fn test_failed_server_probe_keeps_peer() {
        let probe = Arc::new(FakeProbe::reachable());
        probe.server.store(false, Ordering::SeqCst);
        let monitor = monitor(&probe);

        assert_eq!(
            monitor.probe_now().await.level(),
            ConnectivityLevel::OnlinePeer
        );
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let probe = Arc::new(FakeProbe::reachable());
        probe.hang.store(true, Ordering::SeqCst);
        let monitor = monitor(&probe);

        assert_eq!(
            monitor.probe_now().await.level(),
            ConnectivityLevel::OnlineLocal
        );
    }

    #[tokio::test]
    async fn test_network_down_drops_to_offline() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);
        monitor.probe_now().await;

        let state = monitor.network_event(false);
        assert_eq!(state.level(), ConnectivityLevel::Offline);
        assert_eq!(state.connection_class, ConnectionClass::Offline);

        // Probing while offline never raises the level
        assert_eq!(
            monitor.probe_now().await.level(),
            ConnectivityLevel::Offline
        );

        let state = monitor.network_event(true);
        assert_eq!(state.level(), ConnectivityLevel::OnlineLocal);
    }

    #[tokio::test]
    async fn test_auto_mode_off_forces_offline() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);
        monitor.probe_now().await;

        monitor.set_auto_mode(false);
        assert_eq!(monitor.level(), ConnectivityLevel::Offline);
        assert_eq!(
            monitor.probe_now().await.level(),
            ConnectivityLevel::Offline
        );

        // Re-enabling does not restore reachability without a probe
        assert_eq!(
            monitor.set_auto_mode(true).level(),
            ConnectivityLevel::OnlineLocal
        );
    }

    #[tokio::test]
    async fn test_transitions_emit_events() {
        let probe = Arc::new(FakeProbe::reachable());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let monitor = ConnectivityMonitor::new(
            Arc::clone(&probe),
            Duration::from_millis(50),
            events,
        );

        monitor.probe_now().await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "connectivity:statechange");

        // Same reachability again: no new transition
        monitor.probe_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_poll_interval_adapts() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor(&probe);
        let now = now_millis();

        assert_eq!(monitor.poll_interval(now), ACTIVE_POLL_INTERVAL);
        assert_eq!(
            monitor.poll_interval(now + 121_000),
            IDLE_POLL_INTERVAL
        );

        monitor.set_visible(false);
        assert_eq!(monitor.poll_interval(now), IDLE_POLL_INTERVAL);
    }

    #[test]
    fn test_slow_networks_stretch_poll_interval() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor(&probe);
        let now = now_millis();

        monitor.connection_changed(Some("slow-2g"));
        assert_eq!(monitor.poll_interval(now), Duration::from_secs(300));

        monitor.connection_changed(Some("3g"));
        assert_eq!(monitor.poll_interval(now), Duration::from_secs(180));

        monitor.connection_changed(Some("wifi"));
        assert_eq!(monitor.poll_interval(now), ACTIVE_POLL_INTERVAL);

        monitor.network_event(false);
        assert_eq!(monitor.poll_interval(now), IDLE_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_wait_for_connection_resolves_on_probe() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);

        let (waited, _) = tokio::join!(
            monitor.wait_for_connection(ConnectivityLevel::OnlineServer, Duration::from_secs(2)),
            monitor.probe_now()
        );
        assert_eq!(waited.unwrap().level(), ConnectivityLevel::OnlineServer);

        // Already satisfied: returns without waiting
        let state = monitor
            .wait_for_connection(ConnectivityLevel::OnlinePeer, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(state.server_available);
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor(&probe);
        monitor.probe_now().await;

        let error = monitor
            .wait_for_connection(ConnectivityLevel::OnlinePeer, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Timeout(20)));
    }

    #[test]
    fn test_connection_change_updates_class() {
        let probe = Arc::new(FakeProbe::default());
        let monitor = monitor(&probe);

        let state = monitor.connection_changed(Some("3g"));
        assert_eq!(state.connection_class, ConnectionClass::ThreeG);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let probe = Arc::new(FakeProbe::reachable());
        let monitor = monitor(&probe);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown_tx.send(true).unwrap();
        };
        tokio::join!(monitor.run(shutdown_rx), stop);

        assert_eq!(monitor.level(), ConnectivityLevel::OnlineServer);
    }
}

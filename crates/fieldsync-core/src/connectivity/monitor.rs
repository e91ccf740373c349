use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::Probe;

use super::{next_state, ConnectivityEvent, ConnectivityState, Transition};

/// Transitions buffered per subscriber before the oldest are dropped.
const TRANSITION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Owner of the connectivity state.
pub struct ConnectivityMonitor {
    state: Mutex<ConnectivityState>,
    transitions: broadcast::Sender<Transition>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        debug!(state = %initial, "Connectivity monitor created");
        Self {
            state: Mutex::new(initial),
            transitions,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Feed one event through the state machine, publishing any transition.
    pub fn apply(&self, event: ConnectivityEvent) -> Option<Transition> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let to = next_state(*state, event)?;
        let transition = Transition {
            from: *state,
            to,
            cause: event,
            at: Utc::now(),
        };
        *state = to;

        info!(from = %transition.from, to = %transition.to, cause = ?event, "Connectivity changed");
        // Sent under the lock so subscribers see transitions in order.
        // No receivers is fine.
        let _ = self.transitions.send(transition);
        Some(transition)
    }

    pub fn report_platform(&self, online: bool) -> Option<Transition> {
        self.apply(if online {
            ConnectivityEvent::PlatformOnline
        } else {
            ConnectivityEvent::PlatformOffline
        })
    }

    pub fn set_manual_offline(&self, enabled: bool) -> Option<Transition> {
        self.apply(if enabled {
            ConnectivityEvent::ManualOfflineEnabled
        } else {
            ConnectivityEvent::ManualOfflineDisabled
        })
    }

    /// Run one probe. Errors and timeouts count as failure.
    /// Skipped entirely in manual mode.
    pub async fn probe_once(&self, probe: &dyn Probe, timeout: Duration) -> Option<Transition> {
        if self.state() == ConnectivityState::OfflineManual {
            return None;
        }

        let ok = match tokio::time::timeout(timeout, probe.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Probe timed out");
                false
            }
        };

        self.apply(if ok {
            ConnectivityEvent::ProbeSucceeded
        } else {
            ConnectivityEvent::ProbeFailed
        })
    }

    /// Spawn the background task that consumes platform signals and probes
    /// on a fixed interval until `shutdown` flips or its sender is dropped.
    pub fn spawn(
        self: &Arc<Self>,
        probe: Arc<dyn Probe>,
        settings: ProbeSettings,
        mut signals: mpsc::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut signals_open = true;

            debug!(interval_secs = settings.interval.as_secs(), "Connectivity monitor running");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    signal = signals.recv(), if signals_open => match signal {
                        Some(online) => {
                            monitor.report_platform(online);
                        }
                        None => {
                            warn!("Platform signal channel closed, relying on probes");
                            signals_open = false;
                        }
                    },
                    _ = ticker.tick() => {
                        monitor.probe_once(probe.as_ref(), settings.timeout).await;
                    }
                }
            }
            debug!("Connectivity monitor stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

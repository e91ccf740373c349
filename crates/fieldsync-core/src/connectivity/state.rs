use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
    /// User override; only the user can leave it.
    OfflineManual,
}

impl ConnectivityState {
    pub fn from_platform(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
            ConnectivityState::OfflineManual => "offline (manual)",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the connectivity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    PlatformOnline,
    PlatformOffline,
    ProbeSucceeded,
    ProbeFailed,
    ManualOfflineEnabled,
    ManualOfflineDisabled,
}

/// Next state for an event, or `None` when the event changes nothing.
pub fn next_state(current: ConnectivityState, event: ConnectivityEvent) -> Option<ConnectivityState> {
    use ConnectivityEvent::*;
    use ConnectivityState::*;

    let next = match (current, event) {
        (_, ManualOfflineEnabled) => OfflineManual,
        (OfflineManual, ManualOfflineDisabled) => Online,
        // Automatic signals never leave manual mode
        (OfflineManual, _) => OfflineManual,
        (Online, PlatformOffline | ProbeFailed) => Offline,
        (Offline, PlatformOnline | ProbeSucceeded) => Online,
        (state, _) => state,
    };

    (next != current).then_some(next)
}

/// A state change published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
    pub cause: ConnectivityEvent,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Entered Online from either offline state; this is what starts a drain.
    pub fn restores_connectivity(&self) -> bool {
        self.to == ConnectivityState::Online && self.from != ConnectivityState::Online
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectivityEvent::*;
    use super::ConnectivityState::*;
    use super::*;

    #[test]
    fn test_online_to_offline() {
        assert_eq!(next_state(Online, PlatformOffline), Some(Offline));
        assert_eq!(next_state(Online, ProbeFailed), Some(Offline));
        assert_eq!(next_state(Online, ProbeSucceeded), None);
        assert_eq!(next_state(Online, PlatformOnline), None);
    }

    #[test]
    fn test_offline_to_online() {
        assert_eq!(next_state(Offline, PlatformOnline), Some(Online));
        assert_eq!(next_state(Offline, ProbeSucceeded), Some(Online));
        assert_eq!(next_state(Offline, ProbeFailed), None);
    }

    #[test]
    fn test_manual_mode_from_any_state() {
        assert_eq!(next_state(Online, ManualOfflineEnabled), Some(OfflineManual));
        assert_eq!(next_state(Offline, ManualOfflineEnabled), Some(OfflineManual));
        assert_eq!(next_state(OfflineManual, ManualOfflineEnabled), None);
    }

    #[test]
    fn test_manual_mode_ignores_automatic_signals() {
        for event in [PlatformOnline, PlatformOffline, ProbeSucceeded, ProbeFailed] {
            assert_eq!(next_state(OfflineManual, event), None);
        }
        assert_eq!(next_state(OfflineManual, ManualOfflineDisabled), Some(Online));
        assert_eq!(next_state(Offline, ManualOfflineDisabled), None);
    }

    #[test]
    fn test_restores_connectivity() {
        let t = Transition {
            from: OfflineManual,
            to: Online,
            cause: ManualOfflineDisabled,
            at: Utc::now(),
        };
        assert!(t.restores_connectivity());
        let t = Transition {
            from: Online,
            to: Offline,
            cause: ProbeFailed,
            at: Utc::now(),
        };
        assert!(!t.restores_connectivity());
    }
}

//! Connection lifecycle states and the pure transition function driving them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::retry::RetryPolicy;

/// Process-wide connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No pool has been installed yet.
    Disconnected,
    /// Walking the candidate list.
    Probing,
    /// A pool is live and answered the liveness query.
    Connected,
    /// A connection of the live pool dropped; recovery is running.
    Degraded,
    /// Bounded retries were exhausted. Terminal for automatic recovery.
    Fatal,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ProbeStarted,
    ProbeSucceeded,
    /// A full pass failed; `passes` counts failed passes so far.
    PassFailed { passes: u32 },
    ConnectionLost,
    /// An operator swapped the active host explicitly.
    Reconfigured,
}

impl ConnectionState {
    /// Next state for `event`. Events that do not apply leave the state unchanged.
    pub fn on(self, event: ConnectionEvent, policy: &RetryPolicy) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Reconfigured) => S::Connected,
            (S::Fatal, _) => S::Fatal,
            (S::Disconnected | S::Degraded | S::Probing, E::ProbeStarted) => S::Probing,
            (S::Probing | S::Degraded, E::ProbeSucceeded) => S::Connected,
            (S::Probing | S::Degraded, E::PassFailed { passes }) => {
                if policy.allows_another_pass(passes) {
                    self
                } else {
                    S::Fatal
                }
            }
            (S::Connected, E::ConnectionLost) => S::Degraded,
            (state, _) => state,
        }
    }
}

/// Snapshot published to observers after every transition.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub active_host: Option<String>,
    pub failed_passes: u32,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            active_host: None,
            failed_passes: 0,
            last_error: None,
            changed_at: Utc::now(),
        }
    }
}

/// One entry of the transition history.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::retry::RetryPolicy;

    fn bounded(max: u32) -> RetryPolicy {
        RetryPolicy {
            max_passes: Some(max),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn boot_probe_connect() {
        let policy = bounded(3);
        let s = ConnectionState::Disconnected
            .on(ConnectionEvent::ProbeStarted, &policy)
            .on(ConnectionEvent::PassFailed { passes: 1 }, &policy)
            .on(ConnectionEvent::ProbeSucceeded, &policy);
        assert_eq!(s, ConnectionState::Connected);
    }

    #[test]
    fn lost_connection_degrades_then_recovers() {
        let policy = bounded(3);
        let s = ConnectionState::Connected.on(ConnectionEvent::ConnectionLost, &policy);
        assert_eq!(s, ConnectionState::Degraded);

        let s = s.on(ConnectionEvent::ProbeStarted, &policy);
        assert_eq!(s, ConnectionState::Probing);
        assert_eq!(
            s.on(ConnectionEvent::ProbeSucceeded, &policy),
            ConnectionState::Connected
        );
    }

    #[test]
    fn exhausted_passes_are_fatal_and_sticky() {
        let policy = bounded(2);
        let s = ConnectionState::Probing.on(ConnectionEvent::PassFailed { passes: 2 }, &policy);
        assert_eq!(s, ConnectionState::Fatal);
        assert_eq!(
            s.on(ConnectionEvent::ProbeStarted, &policy),
            ConnectionState::Fatal
        );
        assert_eq!(
            s.on(ConnectionEvent::ProbeSucceeded, &policy),
            ConnectionState::Fatal
        );
        assert_eq!(
            s.on(ConnectionEvent::Reconfigured, &policy),
            ConnectionState::Connected
        );
    }

    #[test]
    fn unbounded_policy_never_goes_fatal() {
        let policy = RetryPolicy {
            max_passes: None,
            ..RetryPolicy::default()
        };
        let s = ConnectionState::Probing.on(ConnectionEvent::PassFailed { passes: 10_000 }, &policy);
        assert_eq!(s, ConnectionState::Probing);
    }

    #[test]
    fn loss_outside_connected_is_ignored() {
        let policy = bounded(1);
        assert_eq!(
            ConnectionState::Probing.on(ConnectionEvent::ConnectionLost, &policy),
            ConnectionState::Probing
        );
        assert_eq!(
            ConnectionState::Disconnected.on(ConnectionEvent::ConnectionLost, &policy),
            ConnectionState::Disconnected
        );
    }
}

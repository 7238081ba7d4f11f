//! Commanded-vs-confirmed bookkeeping for a relay reachable only through
//! asynchronous pub/sub messages. This is the transport-free core; the
//! controller binary wraps it with the actual publish/await-confirmation
//! protocol.

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::RelayState;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// A requested state was never echoed back on the state topic within
    /// the confirmation budget. Never swallowed silently: the caller
    /// decides whether to alarm, retry, or fail safe.
    #[error("relay did not confirm {requested} within {waited_ms} ms")]
    ConfirmationTimeout {
        requested: RelayState,
        waited_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Requested state already confirmed; nothing to publish.
    Redundant,
    /// Command must go out on the wire.
    Publish,
}

/// Result of applying an asynchronous state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub state: RelayState,
    /// False when the relay moved without us asking (manual intervention
    /// or firmware fault). Observational only.
    pub requested: bool,
}

#[derive(Debug, Clone)]
pub struct RelayLink {
    confirmed_state: RelayState,
    requested_state: RelayState,
    requested_at_ms: Option<u64>,
    confirmed_at_ms: Option<u64>,
    pending: bool,
}

impl Default for RelayLink {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayLink {
    pub fn new() -> Self {
        Self {
            confirmed_state: RelayState::Unknown,
            requested_state: RelayState::Unknown,
            requested_at_ms: None,
            confirmed_at_ms: None,
            pending: false,
        }
    }

    pub fn confirmed_state(&self) -> RelayState {
        self.confirmed_state
    }

    pub fn requested_state(&self) -> RelayState {
        self.requested_state
    }

    pub fn requested_at_ms(&self) -> Option<u64> {
        self.requested_at_ms
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending
    }

    /// Records a state request. Redundant requests (already confirmed)
    /// issue no transport command.
    pub fn begin_request(&mut self, state: RelayState, now_ms: u64) -> RequestOutcome {
        if state == self.confirmed_state {
            debug!(state = state.as_str(), "relay request redundant, already confirmed");
            return RequestOutcome::Redundant;
        }

        self.requested_state = state;
        self.requested_at_ms = Some(now_ms);
        self.pending = true;
        RequestOutcome::Publish
    }

    /// Applies an asynchronous state notification unconditionally.
    /// `confirmed_at_ms` only advances forward.
    pub fn on_state_change(&mut self, new_state: RelayState, now_ms: u64) -> StateChange {
        let requested = new_state == self.requested_state;
        if !requested {
            warn!(
                observed = new_state.as_str(),
                requested = self.requested_state.as_str(),
                "unrequested relay state change"
            );
        } else if self.pending {
            self.pending = false;
        }

        self.confirmed_state = new_state;
        self.confirmed_at_ms = Some(match self.confirmed_at_ms {
            Some(prev) => prev.max(now_ms),
            None => now_ms,
        });

        StateChange {
            state: new_state,
            requested,
        }
    }

    /// Gives up on a pending request after a confirmation timeout so that
    /// drift reconciliation can take over on later ticks.
    pub fn fail_pending(&mut self) {
        self.pending = false;
    }

    /// Elapsed time since the confirmed state last changed. Before any
    /// confirmation has ever arrived this is treated as infinite, so no
    /// dwell interlock spuriously blocks the first transition.
    pub fn ms_since_confirmed_change(&self, now_ms: u64) -> u64 {
        match self.confirmed_at_ms {
            Some(at) => now_ms.saturating_sub(at),
            None => u64::MAX,
        }
    }

    /// True when a previously confirmed state has drifted away from the
    /// last request while no request is in flight. Guards against relay
    /// firmware resets; the owner re-issues the request.
    pub fn needs_reconcile(&self) -> bool {
        !self.pending
            && self.requested_state != RelayState::Unknown
            && self.confirmed_at_ms.is_some()
            && self.confirmed_state != self.requested_state
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn redundant_request_publishes_nothing() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.on_state_change(RelayState::On, 500);

        assert_eq!(link.begin_request(RelayState::On, 1_000), RequestOutcome::Redundant);
        assert!(!link.has_pending_request());
    }

    #[test]
    fn first_request_always_publishes() {
        let mut link = RelayLink::new();
        assert_eq!(link.begin_request(RelayState::Off, 0), RequestOutcome::Publish);
        assert!(link.has_pending_request());
    }

    #[test]
    fn matching_notification_clears_pending() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);

        let change = link.on_state_change(RelayState::On, 1_200);
        assert!(change.requested);
        assert!(!link.has_pending_request());
        assert_eq!(link.confirmed_state(), RelayState::On);
    }

    #[test]
    fn unrequested_change_is_flagged_but_applied() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.on_state_change(RelayState::On, 1_000);

        let change = link.on_state_change(RelayState::Off, 5_000);
        assert!(!change.requested);
        assert_eq!(link.confirmed_state(), RelayState::Off);
    }

    #[test]
    fn elapsed_is_infinite_before_first_confirmation() {
        let link = RelayLink::new();
        assert_eq!(link.ms_since_confirmed_change(123_456), u64::MAX);
    }

    #[test]
    fn confirmed_at_never_moves_backward() {
        let mut link = RelayLink::new();
        link.on_state_change(RelayState::On, 10_000);
        link.on_state_change(RelayState::Off, 4_000);
        assert_eq!(link.ms_since_confirmed_change(10_000), 0);
    }

    #[test]
    fn drift_after_confirmation_needs_reconcile() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.on_state_change(RelayState::On, 1_000);
        assert!(!link.needs_reconcile());

        // Someone toggled the plug by hand.
        link.on_state_change(RelayState::Off, 8_000);
        assert!(link.needs_reconcile());
    }

    #[test]
    fn pending_request_is_not_drift() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.on_state_change(RelayState::On, 1_000);
        link.begin_request(RelayState::Off, 2_000);
        assert!(!link.needs_reconcile());
    }

    #[test]
    fn failed_request_becomes_reconcilable_drift() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.on_state_change(RelayState::On, 1_000);

        link.begin_request(RelayState::Off, 2_000);
        link.fail_pending();
        assert!(link.needs_reconcile());
    }

    #[test]
    fn never_confirmed_link_does_not_reconcile() {
        let mut link = RelayLink::new();
        link.begin_request(RelayState::On, 0);
        link.fail_pending();
        // No confirmation has ever been seen; there is no known state to
        // drift from.
        assert!(!link.needs_reconcile());
    }
}

//! Async shell around the [`RelayLink`] state machine: publishes relay
//! commands and awaits confirmation from the state topic.
//!
//! The confirmation wait is event-driven (a watch channel bumped by the
//! MQTT subscriber task) but keeps the bounded attempts × interval
//! contract of a poll loop, so network latency can never hold the
//! control loop hostage for longer than the configured budget.

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, QoS};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use fridge_common::{
    RelayConfig, RelayError, RelayLink, RelayState, RequestOutcome, StateChange,
    TOPIC_RELAY_COMMAND, TOPIC_RELAY_KEEPALIVE,
};

#[derive(Clone)]
pub struct RelayHandle {
    mqtt: AsyncClient,
    config: RelayConfig,
    link: Arc<Mutex<RelayLink>>,
    // Generation counter bumped on every state notification; subscribers
    // wake and re-check the confirmed state.
    confirm_tx: Arc<watch::Sender<u64>>,
}

impl RelayHandle {
    pub fn new(mqtt: AsyncClient, config: RelayConfig) -> Self {
        let (confirm_tx, _) = watch::channel(0);
        Self {
            mqtt,
            config,
            link: Arc::new(Mutex::new(RelayLink::new())),
            confirm_tx: Arc::new(confirm_tx),
        }
    }

    /// Called by the MQTT subscriber task for every state notification.
    pub async fn on_state_change(&self, state: RelayState, now_ms: u64) -> StateChange {
        let change = self.link.lock().await.on_state_change(state, now_ms);
        self.confirm_tx.send_modify(|generation| *generation += 1);
        change
    }

    pub async fn confirmed_state(&self) -> RelayState {
        self.link.lock().await.confirmed_state()
    }

    /// Requests a relay state. Redundant requests publish nothing; a
    /// published command that is never confirmed within the budget
    /// surfaces [`RelayError::ConfirmationTimeout`] to the caller.
    pub async fn request(&self, state: RelayState, now_ms: u64) -> Result<(), RelayError> {
        let outcome = self.link.lock().await.begin_request(state, now_ms);
        if outcome == RequestOutcome::Redundant {
            return Ok(());
        }

        if let Err(err) = self
            .mqtt
            .publish(TOPIC_RELAY_COMMAND, QoS::AtLeastOnce, false, state.as_str())
            .await
        {
            // The confirmation wait below still bounds the operation.
            warn!("relay command publish failed: {err}");
        }

        self.await_confirmation(state).await
    }

    async fn await_confirmation(&self, requested: RelayState) -> Result<(), RelayError> {
        let mut rx = self.confirm_tx.subscribe();
        let interval = Duration::from_millis(self.config.confirm_interval_ms);

        for _ in 0..self.config.confirm_attempts {
            if self.link.lock().await.confirmed_state() == requested {
                return Ok(());
            }
            // A wake-up without a matching confirmation spends the
            // attempt, same as a poll would.
            let _ = tokio::time::timeout(interval, rx.changed()).await;
        }

        let mut link = self.link.lock().await;
        if link.confirmed_state() == requested {
            return Ok(());
        }
        link.fail_pending();
        Err(RelayError::ConfirmationTimeout {
            requested,
            waited_ms: u64::from(self.config.confirm_attempts) * self.config.confirm_interval_ms,
        })
    }

    /// Liveness ping to the relay's supervisory firmware, independent of
    /// any state request.
    pub async fn keepalive(&self) {
        if let Err(err) = self
            .mqtt
            .publish(TOPIC_RELAY_KEEPALIVE, QoS::AtMostOnce, false, "ping")
            .await
        {
            warn!("relay keepalive publish failed: {err}");
        }
    }

    /// Re-issues the last requested state when confirmed drift is
    /// detected (relay firmware reset, manual toggle).
    pub async fn reconcile(&self, now_ms: u64) -> Result<(), RelayError> {
        let target = {
            let link = self.link.lock().await;
            if link.needs_reconcile() {
                Some(link.requested_state())
            } else {
                None
            }
        };

        match target {
            Some(state) => {
                info!(state = state.as_str(), "relay drift detected, re-issuing request");
                self.request(state, now_ms).await
            }
            None => Ok(()),
        }
    }
}

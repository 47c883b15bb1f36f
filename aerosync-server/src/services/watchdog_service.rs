use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use aerosync_api::ActuatorResource;

use crate::configs::Liveness;
use crate::models::{Actuator, ActuatorState, ObserveHandle};
use crate::services::coap::ActuatorTransport;
use crate::services::observe_handler::ObserveHandler;
use crate::services::persistence::{self, StateSink};

/// Queue depth between the transport and one observation handler.
const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Recurring liveness probe for one actuator. The probe blocks its own task
/// only; the fixed-rate period exceeds the ping timeout (enforced at config
/// load) so firings never pile up.
pub struct ActuatorWatchdog {
    actuator: Arc<Actuator>,
    transport: Arc<dyn ActuatorTransport>,
    sink: Arc<dyn StateSink>,
    period: Duration,
    ping_timeout: Duration,
}

impl ActuatorWatchdog {
    pub fn new(
        actuator: Arc<Actuator>,
        transport: Arc<dyn ActuatorTransport>,
        sink: Arc<dyn StateSink>,
        liveness: &Liveness,
    ) -> Self {
        Self {
            actuator,
            transport,
            sink,
            period: Duration::from_secs(liveness.watchdog_period_secs),
            ping_timeout: Duration::from_secs(liveness.ping_timeout_secs),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.probe_cycle().await;
            }
        })
    }

    /// One watchdog firing: skip in steady state, otherwise probe and let
    /// the outcome drive the OFFLINE/ONLINE transition and re-subscription.
    pub async fn probe_cycle(&self) {
        {
            let state = self.actuator.state.lock().await;
            if state.all_subscribed() {
                return;
            }
        }

        // The probe round-trip runs without the device lock.
        let alive = self.transport.ping(self.ping_timeout).await;

        let mut state = self.actuator.state.lock().await;

        if !alive {
            // First-ever probe failing still gets reported, so an actuator
            // that is down from process start shows up as offline.
            if state.online || !state.probed_once {
                state.online = false;
                state.probed_once = true;
                tracing::warn!(
                    device = self.actuator.id,
                    mac = %self.actuator.mac,
                    "actuator unreachable, marked offline"
                );
                persistence::push_connection_state(self.sink.as_ref(), self.actuator.id, false)
                    .await;
            }
            return;
        }

        state.probed_once = true;
        if !state.online {
            state.online = true;
            tracing::info!(
                device = self.actuator.id,
                mac = %self.actuator.mac,
                "actuator online"
            );
            persistence::push_connection_state(self.sink.as_ref(), self.actuator.id, true).await;
        }

        for resource in ActuatorResource::ALL {
            if !state.slot(resource).is_active() {
                self.establish(&mut state, resource).await;
            }
        }
    }

    /// Wire up a fresh observe relationship: handler task first, then the
    /// transport, then the slot. The watchdog is the only place this happens.
    async fn establish(&self, state: &mut ActuatorState, resource: ActuatorResource) {
        let handle = ObserveHandle::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let handler = ObserveHandler::new(
            self.actuator.clone(),
            resource,
            self.sink.clone(),
            handle.clone(),
        );
        tokio::spawn(handler.run(events_rx));

        self.transport
            .observe(resource, events_tx, handle.clone())
            .await;

        state.slot_mut(resource).install(handle);
        tracing::debug!(
            device = self.actuator.id,
            resource = %resource,
            "observe relationship established"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::Liveness;
    use crate::tests::{FakeTransport, RecordingSink, SinkCall, test_directory};

    fn fixture(
        transport: Arc<FakeTransport>,
    ) -> (ActuatorWatchdog, Arc<RecordingSink>, Arc<Actuator>) {
        let directory = test_directory();
        let actuator = directory.actuators().next().unwrap().clone();
        let sink = RecordingSink::new();
        let liveness = Liveness {
            bootstrap_grace_secs: 50,
            watchdog_period_secs: 15,
            ping_timeout_secs: 2,
        };
        let watchdog = ActuatorWatchdog::new(actuator.clone(), transport, sink.clone(), &liveness);
        (watchdog, sink, actuator)
    }

    #[tokio::test]
    async fn probe_outcomes_drive_the_liveness_machine() {
        // Subscriptions always fail to register, so every cycle re-probes.
        let transport = FakeTransport::new([false, false, true, false], false);
        let (watchdog, sink, actuator) = fixture(transport);

        for _ in 0..4 {
            watchdog.probe_cycle().await;
        }

        let state = actuator.state.lock().await;
        assert!(!state.online);
        assert!(state.probed_once);

        // Two offline reports and one online report: the offline→offline
        // probe in between is silent.
        let device = actuator.id;
        assert_eq!(
            sink.calls().await,
            vec![
                SinkCall::Connection { device, online: false },
                SinkCall::Connection { device, online: true },
                SinkCall::Connection { device, online: false },
            ]
        );
    }

    #[tokio::test]
    async fn successful_probe_establishes_all_subscriptions() {
        let transport = FakeTransport::new([true], true);
        let (watchdog, _sink, actuator) = fixture(transport.clone());

        watchdog.probe_cycle().await;

        let state = actuator.state.lock().await;
        assert!(state.online);
        assert!(state.all_subscribed());
        assert_eq!(transport.observed().await, 3);
    }

    #[tokio::test]
    async fn steady_state_skips_the_probe() {
        let transport = FakeTransport::new([true], true);
        let (watchdog, _sink, _actuator) = fixture(transport.clone());

        watchdog.probe_cycle().await;
        watchdog.probe_cycle().await;

        // Second cycle found all three slots active and never pinged.
        assert_eq!(transport.pings().await, 1);
    }

    #[tokio::test]
    async fn cancelled_subscription_is_reestablished() {
        let transport = FakeTransport::new([true, true], true);
        let (watchdog, _sink, actuator) = fixture(transport.clone());

        watchdog.probe_cycle().await;

        // The fan handler cancelled itself (e.g. transport error); the next
        // cycle re-probes and re-subscribes just that resource.
        transport.cancel_last(ActuatorResource::Fan).await;
        watchdog.probe_cycle().await;

        let state = actuator.state.lock().await;
        assert!(state.all_subscribed());
        assert_eq!(transport.pings().await, 2);
        assert_eq!(transport.observed().await, 4);
    }
}

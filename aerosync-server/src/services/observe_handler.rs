use std::sync::Arc;

use coap_lite::ResponseType;
use serde_json::Value;
use tokio::sync::mpsc;

use aerosync_api::{ActuatorResource, validate};

use crate::errors::{ActuatorNetError, report};
use crate::models::{Actuator, ObserveHandle};
use crate::services::coap::ObserveEvent;
use crate::services::persistence::{self, QuantityKind, StateSink};

/// Rejection code a constrained device answers with when its observer table
/// is full.
const TOO_MANY_OBSERVERS: ResponseType = ResponseType::ServiceUnavailable;

/// Consumes the notifications of one observe relationship and folds them
/// into the owning actuator's state. Holds its own cancellation handle so a
/// broken relationship can be handed back to the watchdog.
pub struct ObserveHandler {
    actuator: Arc<Actuator>,
    resource: ActuatorResource,
    sink: Arc<dyn StateSink>,
    handle: ObserveHandle,
}

impl ObserveHandler {
    pub fn new(
        actuator: Arc<Actuator>,
        resource: ActuatorResource,
        sink: Arc<dyn StateSink>,
        handle: ObserveHandle,
    ) -> Self {
        Self {
            actuator,
            resource,
            sink,
            handle,
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<ObserveEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&self, event: ObserveEvent) {
        match event {
            ObserveEvent::Rejected { code } if code == TOO_MANY_OBSERVERS => {
                self.on_too_many_observers().await;
            }
            ObserveEvent::Rejected { code } => {
                report(
                    Some(self.actuator.id),
                    &ActuatorNetError::ObserveRejected {
                        resource: self.resource,
                        code: format!("{code:?}"),
                    },
                );
                self.abandon_subscription();
            }
            ObserveEvent::Failed { reason } => {
                report(
                    Some(self.actuator.id),
                    &ActuatorNetError::ObserveFailed {
                        resource: self.resource,
                        reason,
                    },
                );
                self.abandon_subscription();
            }
            ObserveEvent::Notification { payload } if payload.is_empty() => {
                // Subscription confirmation without a representation; the
                // error stream sends these as keep-alives.
                tracing::debug!(
                    device = self.actuator.id,
                    resource = %self.resource,
                    "empty notification ignored"
                );
            }
            ObserveEvent::Notification { payload } => {
                if let Err(err) = self.apply(&payload).await {
                    report(Some(self.actuator.id), &err);
                }
            }
        }
    }

    /// The device shed us and will not take this observer back until it
    /// restarts. Warned once per device session; repeats are dropped.
    async fn on_too_many_observers(&self) {
        let mut state = self.actuator.state.lock().await;
        let slot = state.slot_mut(self.resource);
        if !slot.too_many_warned {
            slot.too_many_warned = true;
            report(
                Some(self.actuator.id),
                &ActuatorNetError::TooManyObservers {
                    resource: self.resource,
                },
            );
        }
    }

    /// Cancel the relationship so the next watchdog cycle re-attempts it.
    /// The error stream has no standing to cancel; it is re-registered on
    /// liveness transitions anyway.
    fn abandon_subscription(&self) {
        if self.resource != ActuatorResource::Errors {
            self.handle.cancel();
        }
    }

    /// Validate a non-empty notification body and fold it into the
    /// actuator. A failed validation discards this notification only.
    async fn apply(&self, payload: &[u8]) -> Result<(), ActuatorNetError> {
        let not_json = || ActuatorNetError::NotJson {
            raw: String::from_utf8_lossy(payload).into_owned(),
        };

        let parsed: Value = serde_json::from_slice(payload).map_err(|_| not_json())?;
        let obj = parsed.as_object().ok_or_else(not_json)?;

        match self.resource {
            ActuatorResource::Fan => {
                let speed = validate::fan_rel_speed(obj)?;
                let mut state = self.actuator.state.lock().await;
                state.fan_speed = Some(speed);
                persistence::push_quantity(
                    self.sink.as_ref(),
                    self.actuator.id,
                    QuantityKind::FanRelSpeed,
                    i64::from(speed),
                )
                .await;
            }
            ActuatorResource::Light => {
                let light = validate::light_state(obj)?;
                let mut state = self.actuator.state.lock().await;
                state.light = Some(light);
                persistence::push_quantity(
                    self.sink.as_ref(),
                    self.actuator.id,
                    QuantityKind::LightState,
                    light.index(),
                )
                .await;
            }
            ActuatorResource::Errors => {
                let code = validate::error_code(obj)?;
                let client_ip = validate::client_ip(obj)?;
                let description = validate::error_description(obj)?;
                tracing::warn!(
                    device = self.actuator.id,
                    mac = %self.actuator.mac,
                    code = %code,
                    client_ip = %client_ip,
                    description = description.as_deref(),
                    "actuator reported an error"
                );
            }
        }

        Ok(())
    }
}

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use aerosync_api::{ActuatorResource, Id, LightState};

use crate::configs::{ActuatorEntry, SensorEntry, Settings};
use crate::errors::DirectoryError;
use crate::net::{self, COAP_PORT};

/// Mutable half of a sensor record. Guarded by the per-device mutex; the
/// guard must span any associated persistence call so state order matches
/// sink order.
#[derive(Debug, Default)]
pub struct SensorState {
    pub online: bool,
    /// Whether any validated message has arrived since startup.
    pub reported: bool,
    pub co2: Option<i32>,
    pub temperature: Option<i32>,
}

#[derive(Debug)]
pub struct Sensor {
    pub id: Id,
    pub mac: String,
    pub state: Mutex<SensorState>,
}

impl Sensor {
    fn new(entry: &SensorEntry) -> Self {
        Self {
            id: entry.id,
            mac: entry.mac.clone(),
            state: Mutex::new(SensorState::default()),
        }
    }
}

/// Cancellation handle shared between a resource slot, its observation
/// handler and the transport task serving the relationship.
#[derive(Debug, Clone, Default)]
pub struct ObserveHandle {
    token: CancellationToken,
}

impl ObserveHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Subscription state of one actuator resource.
#[derive(Debug, Default)]
pub struct ResourceSlot {
    handle: Option<ObserveHandle>,
    /// Armed once per device session: surviving handler re-creation is the
    /// point, so this lives here and not on the handler.
    pub too_many_warned: bool,
}

impl ResourceSlot {
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_cancelled())
    }

    pub fn install(&mut self, handle: ObserveHandle) {
        self.handle = Some(handle);
    }
}

/// Mutable half of an actuator record.
#[derive(Debug, Default)]
pub struct ActuatorState {
    pub online: bool,
    /// Set after the first liveness probe so an actuator that is down from
    /// process start still gets exactly one offline report.
    pub probed_once: bool,
    pub fan_speed: Option<u8>,
    pub light: Option<LightState>,
    fan_sub: ResourceSlot,
    light_sub: ResourceSlot,
    error_sub: ResourceSlot,
}

impl ActuatorState {
    pub fn slot(&self, resource: ActuatorResource) -> &ResourceSlot {
        match resource {
            ActuatorResource::Fan => &self.fan_sub,
            ActuatorResource::Light => &self.light_sub,
            ActuatorResource::Errors => &self.error_sub,
        }
    }

    pub fn slot_mut(&mut self, resource: ActuatorResource) -> &mut ResourceSlot {
        match resource {
            ActuatorResource::Fan => &mut self.fan_sub,
            ActuatorResource::Light => &mut self.light_sub,
            ActuatorResource::Errors => &mut self.error_sub,
        }
    }

    pub fn all_subscribed(&self) -> bool {
        ActuatorResource::ALL.iter().all(|r| self.slot(*r).is_active())
    }
}

#[derive(Debug)]
pub struct Actuator {
    pub id: Id,
    pub mac: String,
    pub addr: SocketAddr,
    pub state: Mutex<ActuatorState>,
}

impl Actuator {
    fn new(entry: &ActuatorEntry) -> Result<Self, DirectoryError> {
        let addr = match &entry.addr {
            Some(explicit) => explicit
                .parse()
                .map_err(|_| DirectoryError::BadAddress {
                    mac: entry.mac.clone(),
                    reason: "explicit endpoint override is not a socket address",
                })?,
            None => {
                let ip = net::endpoint_from_mac(&entry.mac).ok_or(DirectoryError::BadAddress {
                    mac: entry.mac.clone(),
                    reason: "expected six colon-separated hex octets",
                })?;
                SocketAddr::new(IpAddr::V6(ip), COAP_PORT)
            }
        };

        Ok(Self {
            id: entry.id,
            mac: entry.mac.clone(),
            addr,
            state: Mutex::new(ActuatorState::default()),
        })
    }
}

/// Address-keyed view of the installation, built once at startup and
/// read-only afterwards.
pub struct DeviceDirectory {
    sensors: HashMap<String, Arc<Sensor>>,
    actuators: HashMap<String, Arc<Actuator>>,
}

impl DeviceDirectory {
    pub fn new(
        sensors: &[SensorEntry],
        actuators: &[ActuatorEntry],
    ) -> Result<Self, DirectoryError> {
        if sensors.is_empty() {
            return Err(DirectoryError::EmptyClass { class: "sensor" });
        }
        if actuators.is_empty() {
            return Err(DirectoryError::EmptyClass { class: "actuator" });
        }

        let mut directory = Self {
            sensors: HashMap::with_capacity(sensors.len()),
            actuators: HashMap::with_capacity(actuators.len()),
        };

        // Sensor addresses are opaque lookup keys; only actuators need a
        // derivable endpoint.
        for entry in sensors {
            let sensor = Arc::new(Sensor::new(entry));
            if directory
                .sensors
                .insert(entry.mac.clone(), sensor)
                .is_some()
            {
                return Err(DirectoryError::DuplicateAddress {
                    mac: entry.mac.clone(),
                });
            }
        }

        for entry in actuators {
            let actuator = Arc::new(Actuator::new(entry)?);
            if directory
                .actuators
                .insert(entry.mac.clone(), actuator)
                .is_some()
            {
                return Err(DirectoryError::DuplicateAddress {
                    mac: entry.mac.clone(),
                });
            }
        }

        Ok(directory)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, DirectoryError> {
        Self::new(&settings.sensors, &settings.actuators)
    }

    pub fn sensor_by_mac(&self, mac: &str) -> Option<&Arc<Sensor>> {
        self.sensors.get(mac)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Arc<Sensor>> {
        self.sensors.values()
    }

    pub fn actuators(&self) -> impl Iterator<Item = &Arc<Actuator>> {
        self.actuators.values()
    }
}

//! Shared fixtures for unit and integration tests, exposed through the
//! `mock` feature.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use aerosync_api::{ActuatorResource, Id};

use crate::configs::{ActuatorEntry, SensorEntry};
use crate::models::{DeviceDirectory, ObserveHandle};
use crate::services::coap::{ActuatorTransport, ObserveEvent};
use crate::services::persistence::{QuantityKind, SinkError, StateSink};

/// Two sensors and one actuator, enough for every dispatch path.
pub fn test_directory() -> Arc<DeviceDirectory> {
    let sensors = [
        SensorEntry {
            id: 1,
            mac: "AA:BB:CC:DD:EE:01".into(),
        },
        SensorEntry {
            id: 2,
            mac: "AA:BB:CC:DD:EE:02".into(),
        },
    ];
    let actuators = [ActuatorEntry {
        id: 3,
        mac: "AA:BB:CC:DD:EE:03".into(),
        addr: None,
    }];

    Arc::new(DeviceDirectory::new(&sensors, &actuators).expect("test directory"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Connection { device: Id, online: bool },
    Quantity { device: Id, kind: QuantityKind, value: i64 },
}

/// A [`StateSink`] that records every push, optionally failing them all.
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().await.clone()
    }

    fn check(&self) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SinkError("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateSink for RecordingSink {
    async fn connection_state(&self, device: Id, online: bool) -> Result<(), SinkError> {
        self.calls
            .lock()
            .await
            .push(SinkCall::Connection { device, online });
        self.check()
    }

    async fn quantity(&self, device: Id, kind: QuantityKind, value: i64) -> Result<(), SinkError> {
        self.calls
            .lock()
            .await
            .push(SinkCall::Quantity { device, kind, value });
        self.check()
    }
}

/// An [`ActuatorTransport`] with scripted ping outcomes. Observe calls
/// record their handle; when `subscriptions_work` is false the handle is
/// cancelled immediately, as a real transport does on a dead registration.
pub struct FakeTransport {
    ping_script: Mutex<VecDeque<bool>>,
    ping_count: Mutex<u32>,
    subscriptions_work: bool,
    handles: Mutex<Vec<(ActuatorResource, ObserveHandle)>>,
}

impl FakeTransport {
    pub fn new(
        ping_script: impl IntoIterator<Item = bool>,
        subscriptions_work: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            ping_script: Mutex::new(ping_script.into_iter().collect()),
            ping_count: Mutex::new(0),
            subscriptions_work,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub async fn pings(&self) -> u32 {
        *self.ping_count.lock().await
    }

    pub async fn observed(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Cancel the most recent subscription on `resource`, as a handler
    /// abandoning it would.
    pub async fn cancel_last(&self, resource: ActuatorResource) {
        let handles = self.handles.lock().await;
        let handle = handles
            .iter()
            .rev()
            .find(|(r, _)| *r == resource)
            .map(|(_, h)| h.clone())
            .expect("no subscription to cancel");
        handle.cancel();
    }
}

#[async_trait]
impl ActuatorTransport for FakeTransport {
    async fn ping(&self, _timeout: Duration) -> bool {
        *self.ping_count.lock().await += 1;
        self.ping_script.lock().await.pop_front().unwrap_or(false)
    }

    async fn observe(
        &self,
        resource: ActuatorResource,
        _events: mpsc::Sender<ObserveEvent>,
        handle: ObserveHandle,
    ) {
        if !self.subscriptions_work {
            handle.cancel();
        }
        self.handles.lock().await.push((resource, handle));
    }
}

use async_trait::async_trait;

use aerosync_api::Id;

/// Metric name under which a quantity is pushed for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    Co2,
    Temperature,
    FanRelSpeed,
    LightState,
}

impl QuantityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Co2 => "C02",
            Self::Temperature => "temp",
            Self::FanRelSpeed => "fanRelSpeed",
            Self::LightState => "lightState",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("persistence sink rejected the update: {0}")]
pub struct SinkError(pub String);

/// The persistence collaborator: connection state and quantity pushes keyed
/// by device ID. Implementations may fail; callers log and move on.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn connection_state(&self, device: Id, online: bool) -> Result<(), SinkError>;

    async fn quantity(&self, device: Id, kind: QuantityKind, value: i64) -> Result<(), SinkError>;
}

/// Mirrors every update into the log. Stands in for the database writer,
/// which lives outside the connectivity engine.
pub struct LogSink;

#[async_trait]
impl StateSink for LogSink {
    async fn connection_state(&self, device: Id, online: bool) -> Result<(), SinkError> {
        tracing::info!(device, online, "connection state stored");
        Ok(())
    }

    async fn quantity(&self, device: Id, kind: QuantityKind, value: i64) -> Result<(), SinkError> {
        tracing::info!(device, quantity = kind.name(), value, "quantity stored");
        Ok(())
    }
}

/// Push a connection state change; a sink failure is logged and swallowed so
/// the protocol path never stalls on the store.
pub async fn push_connection_state(sink: &dyn StateSink, device: Id, online: bool) {
    if let Err(err) = sink.connection_state(device, online).await {
        tracing::error!(device, "failed to persist connection state: {err}");
    }
}

/// Push a quantity update; failures are logged, never retried.
pub async fn push_quantity(sink: &dyn StateSink, device: Id, kind: QuantityKind, value: i64) {
    if let Err(err) = sink.quantity(device, kind, value).await {
        tracing::error!(device, quantity = kind.name(), "failed to persist quantity: {err}");
    }
}

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

pub mod configs;
pub mod errors;
pub mod models;
pub mod net;
pub mod services;

#[cfg(any(test, feature = "mock"))]
pub mod tests;

use crate::configs::Settings;
use crate::models::DeviceDirectory;
use crate::services::coap::CoapEndpoint;
use crate::services::persistence::{LogSink, StateSink};
use crate::services::sensor_service::{SensorIngest, SensorService};
use crate::services::watchdog_service::ActuatorWatchdog;

/// Bring the connectivity engine up and keep it running until the MQTT
/// session dies fatally or the process is interrupted.
pub async fn run(settings: &Arc<Settings>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let directory = Arc::new(DeviceDirectory::from_settings(settings)?);
    let sink: Arc<dyn StateSink> = Arc::new(LogSink);

    let ingest = Arc::new(SensorIngest::new(directory.clone(), sink.clone()));
    let (service, session) = SensorService::start(
        &settings.gateway,
        Duration::from_secs(settings.liveness.bootstrap_grace_secs),
        ingest,
    )
    .await?;

    for actuator in directory.actuators() {
        let transport = Arc::new(CoapEndpoint::new(actuator.addr));
        ActuatorWatchdog::new(actuator.clone(), transport, sink.clone(), &settings.liveness)
            .spawn();
    }

    service.spawn_avg_fan_reporter(
        directory.clone(),
        Duration::from_secs(settings.gateway.avg_fan_period_secs),
    );

    tracing::info!(
        sensors = directory.sensors().count(),
        actuators = directory.actuators().count(),
        "connectivity engine running"
    );

    tokio::select! {
        joined = session => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(err) => Err(err.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    }
}

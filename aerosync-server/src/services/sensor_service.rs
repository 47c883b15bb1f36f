use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use rustls_pemfile::{Item, certs, read_one};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use aerosync_api::{DeviceErrorCode, validate};

use crate::configs::{Gateway, GatewayAuth};
use crate::errors::{SensorNetError, report};
use crate::models::{DeviceDirectory, Sensor};
use crate::services::persistence::{self, QuantityKind, StateSink};

const TOPIC_CO2: &str = "C02";
const TOPIC_TEMP: &str = "temp";
const TOPIC_ERRORS: &str = "sensorsErrors";
const TOPIC_AVG_FAN: &str = "avgFanRelSpeed";

/// Consecutive poll failures tolerated before the broker is written off.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// The telemetry message pipeline: parse, attribute, dispatch, mutate.
/// Owns no transport; the MQTT session feeds it one message at a time.
pub struct SensorIngest {
    directory: Arc<DeviceDirectory>,
    sink: Arc<dyn StateSink>,
    bootstrap_done: AtomicBool,
}

impl SensorIngest {
    pub fn new(directory: Arc<DeviceDirectory>, sink: Arc<dyn StateSink>) -> Self {
        Self {
            directory,
            sink,
            bootstrap_done: AtomicBool::new(false),
        }
    }

    pub fn bootstrap_elapsed(&self) -> bool {
        self.bootstrap_done.load(Ordering::SeqCst)
    }

    /// Process one inbound publication. Any returned error concerns this
    /// message alone; the caller reports it and keeps the session running.
    pub async fn handle_publish(&self, topic: &str, payload: &[u8]) -> Result<(), SensorNetError> {
        let not_json = || SensorNetError::NotJson {
            raw: String::from_utf8_lossy(payload).into_owned(),
        };

        let parsed: Value = serde_json::from_slice(payload).map_err(|_| not_json())?;
        let obj = parsed.as_object().ok_or_else(not_json)?;

        let mac = validate::mac(obj)?;
        let sensor = self
            .directory
            .sensor_by_mac(&mac)
            .ok_or(SensorNetError::UnknownAddress { mac })?;

        match topic {
            TOPIC_CO2 => {
                let value = validate::co2(obj).map_err(|e| self.field_error(sensor, e))?;
                self.stage_reading(sensor, QuantityKind::Co2, value).await;
                Ok(())
            }
            TOPIC_TEMP => {
                let value = validate::temperature(obj).map_err(|e| self.field_error(sensor, e))?;
                self.stage_reading(sensor, QuantityKind::Temperature, value)
                    .await;
                Ok(())
            }
            TOPIC_ERRORS => self.on_error_report(sensor, obj).await,
            other => Err(SensorNetError::UnknownTopic {
                device: sensor.id,
                topic: other.to_owned(),
            }),
        }
    }

    fn field_error(&self, sensor: &Sensor, source: aerosync_api::ValidationError) -> SensorNetError {
        SensorNetError::Field {
            device: sensor.id,
            source,
        }
    }

    /// Stage a validated telemetry value. Publication activity implies the
    /// sensor is reachable, so an offline sensor comes back online here.
    async fn stage_reading(&self, sensor: &Arc<Sensor>, kind: QuantityKind, value: i32) {
        let mut state = sensor.state.lock().await;
        state.reported = true;

        if !state.online {
            state.online = true;
            tracing::info!(device = sensor.id, mac = %sensor.mac, "sensor online");
            persistence::push_connection_state(self.sink.as_ref(), sensor.id, true).await;
        }

        let slot = match kind {
            QuantityKind::Co2 => &mut state.co2,
            QuantityKind::Temperature => &mut state.temperature,
            QuantityKind::FanRelSpeed | QuantityKind::LightState => return,
        };
        *slot = Some(value);
        persistence::push_quantity(self.sink.as_ref(), sensor.id, kind, value as i64).await;
    }

    async fn on_error_report(
        &self,
        sensor: &Arc<Sensor>,
        obj: &Map<String, Value>,
    ) -> Result<(), SensorNetError> {
        let code = validate::error_code(obj).map_err(|e| self.field_error(sensor, e))?;
        let client_state = validate::client_state(obj).map_err(|e| self.field_error(sensor, e))?;
        let description =
            validate::error_description(obj).map_err(|e| self.field_error(sensor, e))?;

        if code == DeviceErrorCode::Disconnected {
            if !self.bootstrap_elapsed() {
                return Err(SensorNetError::StaleDisconnect { device: sensor.id });
            }

            let mut state = sensor.state.lock().await;
            state.reported = true;
            tracing::warn!(
                device = sensor.id,
                mac = %sensor.mac,
                client_state = ?client_state,
                description = description.as_deref(),
                "sensor disconnected"
            );
            if state.online {
                state.online = false;
                persistence::push_connection_state(self.sink.as_ref(), sensor.id, false).await;
            }
            return Ok(());
        }

        // Non-disconnect conditions are surfaced as-is; the sensor keeps its
        // last known state.
        tracing::warn!(
            device = sensor.id,
            mac = %sensor.mac,
            code = %code,
            client_state = ?client_state,
            description = description.as_deref(),
            "sensor reported an error"
        );
        Ok(())
    }

    /// End of the bootstrap window: sensors that never published are
    /// explicitly declared offline, and disconnect gating is lifted.
    pub async fn finish_bootstrap(&self) {
        self.bootstrap_done.store(true, Ordering::SeqCst);

        for sensor in self.directory.sensors() {
            let mut state = sensor.state.lock().await;
            if !state.reported && !state.online {
                tracing::warn!(
                    device = sensor.id,
                    mac = %sensor.mac,
                    "sensor silent since startup, marked offline"
                );
                persistence::push_connection_state(self.sink.as_ref(), sensor.id, false).await;
            }
        }
    }
}

/// Command surface of the MQTT session. Constructed by [`SensorService::start`],
/// which also hands back the session task for fatal-error supervision.
pub struct SensorService {
    client: AsyncClient,
    base_topic: String,
}

impl SensorService {
    /// Connect to the broker, subscribe to the three sensor topics, and
    /// spawn the poll loop plus the bootstrap timer.
    pub async fn start(
        gateway: &Gateway,
        bootstrap_grace: Duration,
        ingest: Arc<SensorIngest>,
    ) -> Result<(Self, JoinHandle<Result<(), SensorNetError>>), SensorNetError> {
        let mut options = MqttOptions::new(&gateway.client_id, &gateway.host, gateway.port);
        options.set_keep_alive(Duration::from_secs(5));

        match &gateway.auth {
            Some(GatewayAuth::BasicAuth { username, password }) => {
                options.set_credentials(username.clone(), password.clone());
            }
            Some(GatewayAuth::TlsAuth {
                cert_path,
                key_path,
            }) => {
                options.set_transport(Transport::Tls(tls_configuration(cert_path, key_path)?));
            }
            None => {}
        }

        let (client, event_loop) = AsyncClient::new(options, 10);

        let topics = [TOPIC_CO2, TOPIC_TEMP, TOPIC_ERRORS]
            .map(|leaf| format!("{}/{leaf}", gateway.base_topic));
        for topic in &topics {
            client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(SensorNetError::Connect)?;
        }

        {
            let ingest = ingest.clone();
            tokio::spawn(async move {
                tokio::time::sleep(bootstrap_grace).await;
                ingest.finish_bootstrap().await;
            });
        }

        let session = tokio::spawn(poll_loop(event_loop, client.clone(), topics, ingest));

        Ok((
            Self {
                client,
                base_topic: gateway.base_topic.clone(),
            },
            session,
        ))
    }

    /// Publish the installation-wide average fan speed as a plain integer
    /// string, rejecting values the sensors would refuse.
    pub async fn publish_avg_fan_speed(&self, value: u8) -> Result<(), SensorNetError> {
        if value > 100 {
            return Err(SensorNetError::AvgFanSpeedOutOfRange { value });
        }

        self.client
            .publish(
                format!("{}/{TOPIC_AVG_FAN}", self.base_topic),
                QoS::AtLeastOnce,
                false,
                value.to_string(),
            )
            .await
            .map_err(SensorNetError::Publish)
    }

    /// Periodically publish the average commanded fan speed of the online
    /// actuators, so sensors can adapt their sampling rate to airflow.
    pub fn spawn_avg_fan_reporter(
        self,
        directory: Arc<DeviceDirectory>,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let mut total: u32 = 0;
                let mut count: u32 = 0;
                for actuator in directory.actuators() {
                    let state = actuator.state.lock().await;
                    if state.online {
                        if let Some(speed) = state.fan_speed {
                            total += u32::from(speed);
                            count += 1;
                        }
                    }
                }

                if count == 0 {
                    continue;
                }
                if let Err(err) = self.publish_avg_fan_speed((total / count) as u8).await {
                    report(None, &err);
                }
            }
        })
    }
}

async fn poll_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topics: [String; 3],
    ingest: Arc<SensorIngest>,
) -> Result<(), SensorNetError> {
    let mut failures: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                failures = 0;
                let leaf = publish
                    .topic
                    .rsplit('/')
                    .next()
                    .unwrap_or(publish.topic.as_str());
                if let Err(err) = ingest.handle_publish(leaf, &publish.payload).await {
                    report(err.device(), &err);
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                failures = 0;
                tracing::info!("connected to broker");
                // The broker may not have kept session state across the
                // reconnect; subscriptions are re-issued every time.
                for topic in &topics {
                    if let Err(err) = client.subscribe(topic, QoS::AtLeastOnce).await {
                        return Err(SensorNetError::Connect(err));
                    }
                }
            }
            Ok(_) => failures = 0,
            Err(err) => {
                failures += 1;
                if failures > MAX_RECONNECT_ATTEMPTS {
                    let fatal = SensorNetError::BrokerLost {
                        attempts: MAX_RECONNECT_ATTEMPTS,
                        reason: err.to_string(),
                    };
                    report(None, &fatal);
                    return Err(fatal);
                }

                let delay = reconnect_delay(failures);
                tracing::warn!(
                    attempt = failures,
                    "connection to broker failed, retrying in {delay:?}: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff (1s, 2s, 4s, 8s, 16s) with ±20% jitter so a fleet of
/// monitors does not hammer a recovering broker in lockstep.
fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 << (attempt.saturating_sub(1)).min(4);
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}

fn tls_configuration(cert_path: &str, key_path: &str) -> Result<TlsConfiguration, SensorNetError> {
    let tls = |e: String| SensorNetError::Tls(e);

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    roots.add_parsable_certificates(native.certs);

    let cert_file = File::open(cert_path).map_err(|e| tls(format!("{cert_path}: {e}")))?;
    let cert_chain = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls(format!("{cert_path}: {e}")))?;

    let key_file = File::open(key_path).map_err(|e| tls(format!("{key_path}: {e}")))?;
    let mut key_reader = BufReader::new(key_file);
    let key = loop {
        match read_one(&mut key_reader).map_err(|e| tls(format!("{key_path}: {e}")))? {
            Some(Item::Sec1Key(key)) => break key.into(),
            Some(Item::Pkcs1Key(key)) => break key.into(),
            Some(Item::Pkcs8Key(key)) => break key.into(),
            None => return Err(tls(format!("{key_path}: no usable private key found"))),
            _ => {}
        }
    };

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| tls(e.to_string()))?;

    Ok(TlsConfiguration::from(config))
}

//! End-to-end actuator path: a real CoAP device stub on UDP, the real
//! transport, the watchdog and the observation handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use tokio::net::UdpSocket;

use aerosync_api::LightState;
use aerosync_server::configs::{ActuatorEntry, Liveness, SensorEntry};
use aerosync_server::models::DeviceDirectory;
use aerosync_server::services::coap::CoapEndpoint;
use aerosync_server::services::persistence::QuantityKind;
use aerosync_server::services::watchdog_service::ActuatorWatchdog;
use aerosync_server::tests::{RecordingSink, SinkCall};

/// A device that answers pings with Reset and serves current values on
/// observe registrations.
async fn spawn_device() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(packet) = Packet::from_bytes(&buf[..n]) else {
                continue;
            };

            match packet.header.code {
                MessageClass::Empty if packet.header.get_type() == MessageType::Confirmable => {
                    let mut reset = Packet::new();
                    reset.header.set_type(MessageType::Reset);
                    reset.header.code = MessageClass::Empty;
                    reset.header.message_id = packet.header.message_id;
                    let _ = socket.send_to(&reset.to_bytes().unwrap(), from).await;
                }
                MessageClass::Request(RequestType::Get) => {
                    let path = packet
                        .get_option(CoapOption::UriPath)
                        .and_then(|segments| segments.front().cloned())
                        .unwrap_or_default();
                    let body: &[u8] = match path.as_slice() {
                        b"fan" => br#"{"fanRelSpeed":55}"#,
                        b"light" => br#"{"lightState":1}"#,
                        // The error stream confirms the subscription with an
                        // empty representation.
                        _ => b"",
                    };

                    let mut response = Packet::new();
                    response.header.set_type(MessageType::NonConfirmable);
                    response.header.code = MessageClass::Response(ResponseType::Content);
                    response.header.message_id = packet.header.message_id;
                    response.set_token(packet.get_token().to_vec());
                    response.payload = body.to_vec();
                    let _ = socket.send_to(&response.to_bytes().unwrap(), from).await;
                }
                _ => {}
            }
        }
    });

    addr
}

#[tokio::test]
async fn watchdog_synchronizes_a_reachable_actuator() {
    let device_addr = spawn_device().await;

    let directory = DeviceDirectory::new(
        &[SensorEntry {
            id: 1,
            mac: "AA:BB:CC:DD:EE:01".into(),
        }],
        &[ActuatorEntry {
            id: 9,
            mac: "AA:BB:CC:DD:EE:09".into(),
            addr: Some(device_addr.to_string()),
        }],
    )
    .unwrap();
    let actuator = directory.actuators().next().unwrap().clone();
    let sink = RecordingSink::new();
    let liveness = Liveness {
        bootstrap_grace_secs: 1,
        watchdog_period_secs: 2,
        ping_timeout_secs: 1,
    };

    let watchdog = ActuatorWatchdog::new(
        actuator.clone(),
        Arc::new(CoapEndpoint::new(actuator.addr)),
        sink.clone(),
        &liveness,
    );

    watchdog.probe_cycle().await;

    // Give the observe registrations and handlers a moment to exchange.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = actuator.state.lock().await;
    assert!(state.online);
    assert!(state.all_subscribed());
    assert_eq!(state.fan_speed, Some(55));
    assert_eq!(state.light, Some(LightState::On));
    drop(state);

    let calls = sink.calls().await;
    assert!(calls.contains(&SinkCall::Connection {
        device: 9,
        online: true
    }));
    assert!(calls.contains(&SinkCall::Quantity {
        device: 9,
        kind: QuantityKind::FanRelSpeed,
        value: 55
    }));
    assert!(calls.contains(&SinkCall::Quantity {
        device: 9,
        kind: QuantityKind::LightState,
        value: 1
    }));
}

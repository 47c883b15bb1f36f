//! CoAP exchange layer for actuators: liveness pings and observe
//! relationships, built directly on UDP datagrams.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use coap_lite::{
    CoapOption, MessageClass, MessageType, ObserveOption, Packet, RequestType, ResponseType,
};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use aerosync_api::ActuatorResource;

use crate::models::ObserveHandle;

/// How long a silent device may sit on an observe registration before the
/// relationship is written off and left for the watchdog to retry.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(4);

const MAX_DATAGRAM: usize = 2048;

/// One delivery on an observe relationship.
#[derive(Debug, Clone)]
pub enum ObserveEvent {
    /// Semantically successful exchange; an empty body is a
    /// subscription-confirmation keep-alive.
    Notification { payload: Vec<u8> },
    /// The device answered with a non-success code; the relationship is
    /// over on the remote side.
    Rejected { code: ResponseType },
    /// No usable response at all (socket failure, registration timeout).
    Failed { reason: String },
}

/// Network operations the watchdog and observation handlers need from an
/// actuator endpoint.
#[async_trait]
pub trait ActuatorTransport: Send + Sync + 'static {
    /// Blocking liveness probe with a bounded timeout.
    async fn ping(&self, timeout: Duration) -> bool;

    /// Establish an observe relationship on `resource`. Events flow into
    /// `events` until the handle is cancelled or the relationship dies;
    /// the transport cancels the handle itself when it gives up, so slot
    /// activity always reflects reality.
    async fn observe(
        &self,
        resource: ActuatorResource,
        events: mpsc::Sender<ObserveEvent>,
        handle: ObserveHandle,
    );
}

/// A CoAP/UDP device endpoint.
pub struct CoapEndpoint {
    addr: SocketAddr,
}

impl CoapEndpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// CoAP ping: an Empty Confirmable message. Any reply bearing the same
    /// message ID (a Reset from a conforming peer) proves the endpoint is
    /// alive (RFC 7252 section 4.3).
    async fn ping_exchange(&self) -> io::Result<()> {
        let socket = connect(self.addr).await?;

        let mut probe = Packet::new();
        probe.header.set_type(MessageType::Confirmable);
        probe.header.code = MessageClass::Empty;
        probe.header.message_id = rand::rng().random();

        socket.send(&encode(&probe)?).await?;

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let n = socket.recv(&mut buf).await?;
            if let Ok(reply) = Packet::from_bytes(&buf[..n]) {
                if reply.header.message_id == probe.header.message_id {
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl ActuatorTransport for CoapEndpoint {
    async fn ping(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.ping_exchange()).await,
            Ok(Ok(()))
        )
    }

    async fn observe(
        &self,
        resource: ActuatorResource,
        events: mpsc::Sender<ObserveEvent>,
        handle: ObserveHandle,
    ) {
        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(reason) = run_observe(addr, resource, &events, &handle).await {
                let _ = events.send(ObserveEvent::Failed { reason }).await;
            }
            handle.cancel();
        });
    }
}

async fn connect(addr: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

fn encode(packet: &Packet) -> io::Result<Vec<u8>> {
    packet
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))
}

fn is_success(code: ResponseType) -> bool {
    matches!(
        code,
        ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content
            | ResponseType::Continue
    )
}

enum Exchange {
    Notified,
    Ended,
}

async fn run_observe(
    addr: SocketAddr,
    resource: ActuatorResource,
    events: &mpsc::Sender<ObserveEvent>,
    handle: &ObserveHandle,
) -> Result<(), String> {
    let socket = connect(addr).await.map_err(|e| e.to_string())?;

    let token: [u8; 4] = rand::rng().random();

    let mut register = Packet::new();
    register.header.set_type(MessageType::Confirmable);
    register.header.code = MessageClass::Request(RequestType::Get);
    register.header.message_id = rand::rng().random();
    register.set_token(token.to_vec());
    register.add_option(CoapOption::Observe, vec![ObserveOption::Register as u8]);
    register.add_option(CoapOption::UriPath, resource.path().as_bytes().to_vec());

    socket
        .send(&encode(&register).map_err(|e| e.to_string())?)
        .await
        .map_err(|e| e.to_string())?;

    // The registration response doubles as the first notification; a silent
    // device means the relationship never existed.
    match tokio::time::timeout(REGISTER_TIMEOUT, recv_matching(&socket, &token, events)).await {
        Err(_) => return Err("no response to observe registration".into()),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(Exchange::Ended)) => return Ok(()),
        Ok(Ok(Exchange::Notified)) => {}
    }

    loop {
        tokio::select! {
            _ = handle.cancelled() => {
                deregister(&socket, resource, &token).await;
                return Ok(());
            }
            exchange = recv_matching(&socket, &token, events) => match exchange? {
                Exchange::Notified => {}
                Exchange::Ended => return Ok(()),
            }
        }
    }
}

/// Wait for the next response carrying our token, acknowledge it if
/// confirmable, and forward it as an event.
async fn recv_matching(
    socket: &UdpSocket,
    token: &[u8],
    events: &mpsc::Sender<ObserveEvent>,
) -> Result<Exchange, String> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let n = socket.recv(&mut buf).await.map_err(|e| e.to_string())?;
        let Ok(response) = Packet::from_bytes(&buf[..n]) else {
            continue;
        };
        if response.get_token()[..] != token[..] {
            continue;
        }

        if response.header.get_type() == MessageType::Confirmable {
            ack(socket, response.header.message_id).await;
        }

        match response.header.code {
            MessageClass::Response(code) if is_success(code) => {
                let delivered = events
                    .send(ObserveEvent::Notification {
                        payload: response.payload.clone(),
                    })
                    .await;
                return Ok(if delivered.is_ok() {
                    Exchange::Notified
                } else {
                    Exchange::Ended
                });
            }
            MessageClass::Response(code) => {
                let _ = events.send(ObserveEvent::Rejected { code }).await;
                return Ok(Exchange::Ended);
            }
            _ => {}
        }
    }
}

async fn ack(socket: &UdpSocket, message_id: u16) {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;

    if let Ok(bytes) = packet.to_bytes() {
        let _ = socket.send(&bytes).await;
    }
}

/// Best-effort deregistration so a cooperative device can free the observer
/// slot early; it would age out server-side regardless.
async fn deregister(socket: &UdpSocket, resource: ActuatorResource, token: &[u8]) {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::NonConfirmable);
    packet.header.code = MessageClass::Request(RequestType::Get);
    packet.header.message_id = rand::rng().random();
    packet.set_token(token.to_vec());
    packet.add_option(CoapOption::Observe, vec![ObserveOption::Deregister as u8]);
    packet.add_option(CoapOption::UriPath, resource.path().as_bytes().to_vec());

    if let Ok(bytes) = packet.to_bytes() {
        let _ = socket.send(&bytes).await;
    }
}

use core::net::Ipv4Addr;

use embassy_futures::select::{Either3, select3};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Ticker, with_timeout};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use node_core::supervisor::InboundMessage;

use crate::link::{
    BROKER_CONNECT_TIMEOUT, BrokerEndpoint, BrokerRequest, InboundSender, RequestReceiver,
    STATION_NAME,
};
use crate::status::{AttemptId, BrokerState, LinkStatus};

const SOCKET_BUFFER: usize = 1024;
const MQTT_BUFFER: usize = 512;
const MQTT_MAX_PACKET: u32 = 512;
const MQTT_MAX_PROPERTIES: usize = 5;
const KEEP_ALIVE_SECS: u16 = 60;
const SOCKET_TIMEOUT_SECS: u64 = 10;
const INBOUND_POLL_MS: u64 = 20;

type Client<'a> = MqttClient<'a, TcpSocket<'a>, MQTT_MAX_PROPERTIES, CountingRng>;

/// Why a broker session ended.
enum SessionEnd {
    /// An established session dropped.
    Closed,
    Unreachable,
    Refused(u8),
    /// The device loop gave up on this attempt before it connected.
    Abandoned,
    /// The device loop asked for a fresh session.
    Reconnect(AttemptId, BrokerEndpoint),
}

struct SessionBuffers {
    socket_rx: [u8; SOCKET_BUFFER],
    socket_tx: [u8; SOCKET_BUFFER],
    mqtt_write: [u8; MQTT_BUFFER],
    mqtt_read: [u8; MQTT_BUFFER],
}

impl SessionBuffers {
    const fn new() -> Self {
        Self {
            socket_rx: [0; SOCKET_BUFFER],
            socket_tx: [0; SOCKET_BUFFER],
            mqtt_write: [0; MQTT_BUFFER],
            mqtt_read: [0; MQTT_BUFFER],
        }
    }
}

/// Owns the broker session. Connect requests start a session; subscribe and
/// publish requests are forwarded while one is up.
#[embassy_executor::task]
pub async fn run(
    stack: Stack<'static>,
    requests: RequestReceiver<'static>,
    inbound: InboundSender<'static>,
    status: &'static LinkStatus,
) {
    let mut next: Option<(AttemptId, BrokerEndpoint)> = None;

    loop {
        let (attempt, endpoint) = match next.take() {
            Some(request) => request,
            None => match requests.receive().await {
                BrokerRequest::Connect { attempt, endpoint } => (attempt, endpoint),
                // Left over from a session that already ended.
                BrokerRequest::Subscribe(_) | BrokerRequest::Publish(_) => continue,
            },
        };

        let reported = match session(stack, attempt, &endpoint, requests, inbound, status).await {
            SessionEnd::Closed => {
                defmt::warn!("mqtt: session closed");
                BrokerState::Idle
            }
            SessionEnd::Unreachable => {
                defmt::warn!("mqtt: broker {} unreachable", endpoint.host.as_str());
                BrokerState::Unreachable
            }
            SessionEnd::Refused(code) => {
                defmt::warn!("mqtt: broker refused connection, reason {}", code);
                BrokerState::Refused(code)
            }
            SessionEnd::Abandoned => {
                defmt::info!("mqtt: attempt {} abandoned", attempt);
                continue;
            }
            SessionEnd::Reconnect(attempt, endpoint) => {
                next = Some((attempt, endpoint));
                continue;
            }
        };
        if !status.report_broker(attempt, reported) {
            defmt::debug!("mqtt: attempt {} already replaced", attempt);
        }
    }
}

async fn resolve(stack: Stack<'static>, host: &str) -> Option<IpAddress> {
    if let Ok(address) = host.parse::<Ipv4Addr>() {
        return Some(IpAddress::Ipv4(address));
    }
    let addresses = stack.dns_query(host, DnsQueryType::A).await.ok()?;
    addresses.first().copied()
}

/// Resolves the broker, opens the socket, and waits for CONNACK.
async fn open<'a>(
    stack: Stack<'static>,
    endpoint: &'a BrokerEndpoint,
    buffers: &'a mut SessionBuffers,
) -> Result<Client<'a>, SessionEnd> {
    let address = resolve(stack, &endpoint.host)
        .await
        .ok_or(SessionEnd::Unreachable)?;

    let SessionBuffers {
        socket_rx,
        socket_tx,
        mqtt_write,
        mqtt_read,
    } = buffers;
    let mut socket = TcpSocket::new(stack, socket_rx, socket_tx);
    socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
    socket
        .connect((address, endpoint.port))
        .await
        .map_err(|_| SessionEnd::Unreachable)?;

    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
    config.add_max_subscribe_qos(QualityOfService::QoS0);
    config.add_client_id(STATION_NAME);
    if !endpoint.user.is_empty() {
        config.add_username(&endpoint.user);
        config.add_password(&endpoint.pass);
    }
    config.max_packet_size = MQTT_MAX_PACKET;
    config.keep_alive = KEEP_ALIVE_SECS;

    let mut client = Client::new(
        socket,
        mqtt_write,
        MQTT_BUFFER,
        mqtt_read,
        MQTT_BUFFER,
        config,
    );

    match client.connect_to_broker().await {
        Ok(()) => Ok(client),
        Err(ReasonCode::NetworkError) => Err(SessionEnd::Unreachable),
        Err(code) => Err(SessionEnd::Refused(code.into())),
    }
}

async fn session(
    stack: Stack<'static>,
    attempt: AttemptId,
    endpoint: &BrokerEndpoint,
    requests: RequestReceiver<'static>,
    inbound: InboundSender<'static>,
    status: &'static LinkStatus,
) -> SessionEnd {
    let mut buffers = SessionBuffers::new();
    let connect_timeout = Duration::from_millis(u64::from(BROKER_CONNECT_TIMEOUT.as_u32()));
    let mut client = match with_timeout(connect_timeout, open(stack, endpoint, &mut buffers)).await
    {
        Ok(Ok(client)) => client,
        Ok(Err(end)) => return end,
        Err(_) => return SessionEnd::Unreachable,
    };

    if !status.report_broker(attempt, BrokerState::Connected) {
        return SessionEnd::Abandoned;
    }
    defmt::info!("mqtt: connected to {}:{}", endpoint.host.as_str(), endpoint.port);

    let mut keepalive = Ticker::every(Duration::from_secs(u64::from(KEEP_ALIVE_SECS / 2)));
    let mut inbound_poll = Ticker::every(Duration::from_millis(INBOUND_POLL_MS));

    // Only cancel-safe futures are raced. Packet reads happen outside the
    // select so a half-read frame is never dropped.
    loop {
        let sent = match select3(requests.receive(), inbound_poll.next(), keepalive.next()).await {
            Either3::First(BrokerRequest::Connect { attempt, endpoint }) => {
                return SessionEnd::Reconnect(attempt, endpoint);
            }
            Either3::First(BrokerRequest::Subscribe(topic)) => {
                client.subscribe_to_topic(&topic).await
            }
            Either3::First(BrokerRequest::Publish(message)) => {
                client
                    .send_message(
                        &message.topic,
                        &message.payload,
                        QualityOfService::QoS0,
                        message.retained,
                    )
                    .await
            }
            Either3::Second(()) => forward_inbound(&mut client, inbound).await,
            Either3::Third(()) => client.send_ping().await,
        };

        if let Err(code) = sent {
            defmt::warn!("mqtt: session error {}", defmt::Debug2Format(&code));
            return SessionEnd::Closed;
        }
    }
}

/// Hands every packet already waiting on the socket to the device loop.
async fn forward_inbound(
    client: &mut Client<'_>,
    inbound: InboundSender<'static>,
) -> Result<(), ReasonCode> {
    loop {
        let message = match client.receive_message_if_ready().await? {
            Some((topic, payload)) => InboundMessage::new(topic, payload),
            None => return Ok(()),
        };
        match message {
            Ok(message) => inbound.send(message).await,
            Err(err) => {
                defmt::warn!("mqtt: inbound message dropped: {}", defmt::Display2Format(&err));
            }
        }
    }
}

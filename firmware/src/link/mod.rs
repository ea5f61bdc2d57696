#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Main-loop collaborators backed by the network tasks.
//!
//! The device loop never awaits. Its `NetworkJoiner` and `MessagingClient`
//! are thin adapters that post requests into bounded channels, read task
//! state from [`LinkStatus`], and report `InProgress` until the owning task
//! has finished. The supervisor's own deadlines bound every attempt; each
//! request carries an [`AttemptId`] so a task that answers after the
//! supervisor gave up cannot fail the attempt that replaced it.

use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::{String, Vec};
use node_core::clock::Milliseconds;
use node_core::commands::TOPIC_CAPACITY;
use node_core::config::{
    BROKER_JOIN_TIMEOUT, HOST_CAPACITY, NETWORK_JOIN_TIMEOUT, PASS_CAPACITY, USER_CAPACITY,
};
use node_core::supervisor::{
    ClientError, ConnectError, InboundMessage, JoinError, LinkInfo, MessagingClient,
    NetworkJoiner,
};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::status::{AttemptCounter, AttemptId, BrokerState, LinkStatus};

/// Name the station announces on the network and uses as its MQTT client id.
pub const STATION_NAME: &str = "edge-node";

/// Depth of the main loop → MQTT task request queue. Holds the full
/// subscription burst plus the connect announcements.
pub const REQUEST_QUEUE_DEPTH: usize = 16;

/// Depth of the MQTT task → main loop inbound queue.
pub const INBOUND_QUEUE_DEPTH: usize = 4;

/// Largest outbound payload, sized for log lines.
pub const OUTBOUND_PAYLOAD_CAPACITY: usize = 160;

/// Head start a task needs to report before the supervisor's deadline.
const REPORT_MARGIN: Milliseconds = Milliseconds::from_secs(1);

/// How long the Wi-Fi task waits for association and an address.
pub const ASSOCIATE_TIMEOUT: Milliseconds =
    Milliseconds::new(NETWORK_JOIN_TIMEOUT.as_u32() - REPORT_MARGIN.as_u32());

/// How long the MQTT task waits for DNS, TCP, and CONNACK together.
pub const BROKER_CONNECT_TIMEOUT: Milliseconds =
    Milliseconds::new(BROKER_JOIN_TIMEOUT.as_u32() - REPORT_MARGIN.as_u32());

const _: () = assert!(ASSOCIATE_TIMEOUT.as_u32() < NETWORK_JOIN_TIMEOUT.as_u32());
const _: () = assert!(BROKER_CONNECT_TIMEOUT.as_u32() < BROKER_JOIN_TIMEOUT.as_u32());

#[cfg(target_os = "none")]
type LinkMutex = CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
type LinkMutex = NoopRawMutex;

/// Broker address and credentials for one connect attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String<HOST_CAPACITY>,
    pub port: u16,
    pub user: String<USER_CAPACITY>,
    pub pass: String<PASS_CAPACITY>,
}

impl BrokerEndpoint {
    /// # Errors
    ///
    /// Returns [`ConnectError::NotConfigured`] when a field does not fit.
    pub fn new(host: &str, port: u16, user: &str, pass: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            host: String::try_from(host).map_err(|_| ConnectError::NotConfigured)?,
            port,
            user: String::try_from(user).map_err(|_| ConnectError::NotConfigured)?,
            pass: String::try_from(pass).map_err(|_| ConnectError::NotConfigured)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutboundMessage {
    pub topic: String<TOPIC_CAPACITY>,
    pub payload: Vec<u8, OUTBOUND_PAYLOAD_CAPACITY>,
    pub retained: bool,
}

/// Work items for the MQTT task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BrokerRequest {
    Connect {
        attempt: AttemptId,
        endpoint: BrokerEndpoint,
    },
    Subscribe(String<TOPIC_CAPACITY>),
    Publish(OutboundMessage),
}

pub type RequestQueue = Channel<LinkMutex, BrokerRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestSender<'a> = Sender<'a, LinkMutex, BrokerRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestReceiver<'a> = Receiver<'a, LinkMutex, BrokerRequest, REQUEST_QUEUE_DEPTH>;

pub type InboundQueue = Channel<LinkMutex, InboundMessage, INBOUND_QUEUE_DEPTH>;
pub type InboundSender<'a> = Sender<'a, LinkMutex, InboundMessage, INBOUND_QUEUE_DEPTH>;
pub type InboundReceiver<'a> = Receiver<'a, LinkMutex, InboundMessage, INBOUND_QUEUE_DEPTH>;

/// Station-mode join driven by the Wi-Fi task.
pub struct StationLink<'a> {
    status: &'a LinkStatus,
    attempts: AttemptCounter,
    pending: Option<AttemptId>,
}

impl<'a> StationLink<'a> {
    pub const fn new(status: &'a LinkStatus) -> Self {
        Self {
            status,
            attempts: AttemptCounter::new(),
            pending: None,
        }
    }

    fn abandon(&mut self) {
        if let Some(attempt) = self.pending.take() {
            self.status.cancel_join(attempt);
        }
    }
}

impl NetworkJoiner for StationLink<'_> {
    fn join(&mut self, _timeout: Milliseconds) -> Result<LinkInfo, JoinError> {
        if self.status.credentials_forgotten() {
            self.abandon();
            return Err(JoinError::NoCredentials);
        }
        if let Some(info) = self.status.link_info() {
            self.abandon();
            return Ok(info);
        }
        let Some(attempt) = self.pending else {
            let attempt = self.attempts.issue();
            self.status.request_join(attempt);
            self.pending = Some(attempt);
            return Err(JoinError::InProgress);
        };
        if self.status.take_join_failure(attempt) {
            self.pending = None;
            return Err(JoinError::Rejected);
        }
        Err(JoinError::InProgress)
    }

    fn cancel_join(&mut self) {
        self.abandon();
    }

    fn is_link_up(&self) -> bool {
        self.status.is_link_up()
    }

    fn current_identity(&self) -> &str {
        STATION_NAME
    }

    fn forget_credentials(&mut self) {
        self.status.forget_credentials();
    }
}

/// Broker session owned by the MQTT task.
pub struct BrokerLink<'a> {
    status: &'a LinkStatus,
    requests: RequestSender<'a>,
    inbound: InboundReceiver<'a>,
    attempts: AttemptCounter,
    attempt: Option<AttemptId>,
}

impl<'a> BrokerLink<'a> {
    pub const fn new(
        status: &'a LinkStatus,
        requests: RequestSender<'a>,
        inbound: InboundReceiver<'a>,
    ) -> Self {
        Self {
            status,
            requests,
            inbound,
            attempts: AttemptCounter::new(),
            attempt: None,
        }
    }

    fn submit(&self, request: BrokerRequest) -> Result<(), ClientError> {
        if self.status.broker_state() != BrokerState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.requests
            .try_send(request)
            .map_err(|_| ClientError::QueueFull)
    }
}

impl MessagingClient for BrokerLink<'_> {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
    ) -> Result<(), ConnectError> {
        let Some(attempt) = self.attempt else {
            let endpoint = BrokerEndpoint::new(host, port, user, pass)?;
            let attempt = self.attempts.issue();
            // Announce before queueing so the task's first report matches.
            self.status.begin_broker_attempt(attempt);
            self.requests
                .try_send(BrokerRequest::Connect { attempt, endpoint })
                .map_err(|_| ConnectError::InProgress)?;
            self.attempt = Some(attempt);
            return Err(ConnectError::InProgress);
        };

        let outcome = match self.status.broker_outcome(attempt) {
            Some(BrokerState::Connecting) => return Err(ConnectError::InProgress),
            Some(BrokerState::Connected) => Ok(()),
            Some(BrokerState::Refused(code)) => Err(ConnectError::Refused(code)),
            Some(BrokerState::Unreachable | BrokerState::Idle) => Err(ConnectError::Unreachable),
            // Replaced underneath us; start over on the next call.
            None => Err(ConnectError::InProgress),
        };
        self.attempt = None;
        outcome
    }

    fn cancel_connect(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.status.cancel_broker_attempt(attempt);
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        let topic = String::try_from(topic).map_err(|_| ClientError::TooLarge)?;
        self.submit(BrokerRequest::Subscribe(topic))
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), ClientError> {
        let message = OutboundMessage {
            topic: String::try_from(topic).map_err(|_| ClientError::TooLarge)?,
            payload: Vec::from_slice(payload).map_err(|_| ClientError::TooLarge)?,
            retained,
        };
        self.submit(BrokerRequest::Publish(message))
    }

    fn is_connected(&self) -> bool {
        self.status.broker_state() == BrokerState::Connected
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbound.try_receive().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_core::clock::Instant;
    use node_core::commands::TopicTree;
    use node_core::config::{ConfigFields, SupervisorConfig};
    use node_core::pattern::NoopOutputDriver;
    use node_core::supervisor::{
        ConnectionState, ConnectivitySupervisor, FailureReason, Links, SupervisorEvent,
    };

    fn tick(
        supervisor: &mut ConnectivitySupervisor,
        links: &mut Links<'_, StationLink<'_>, BrokerLink<'_>>,
        ms: u32,
    ) -> Option<SupervisorEvent> {
        let broker = ConfigFields::new("10.0.0.2", "1883", "", "").expect("fields");
        supervisor.advance(
            Instant::from_millis(ms),
            links,
            &mut NoopOutputDriver,
            &broker,
            &TopicTree::default(),
        )
    }

    fn connect_request(requests: &RequestQueue) -> (AttemptId, BrokerEndpoint) {
        match requests.try_receive() {
            Ok(BrokerRequest::Connect { attempt, endpoint }) => (attempt, endpoint),
            other => panic!("expected a connect request, got {other:?}"),
        }
    }

    #[test]
    fn join_requests_then_reports_link() {
        let status = LinkStatus::new();
        let mut station = StationLink::new(&status);

        assert_eq!(
            station.join(Milliseconds::from_secs(15)),
            Err(JoinError::InProgress)
        );
        assert!(status.take_join_request().is_some());

        status.record_link(Some([10, 1, 1, 4]));
        assert_eq!(
            station.join(Milliseconds::from_secs(15)),
            Ok(LinkInfo::new([10, 1, 1, 4]))
        );
        assert!(station.is_link_up());
    }

    #[test]
    fn join_failure_and_forgotten_credentials_are_reported() {
        let status = LinkStatus::new();
        let mut station = StationLink::new(&status);

        assert_eq!(station.join(Milliseconds::ZERO), Err(JoinError::InProgress));
        let attempt = status.take_join_request().expect("request posted");
        status.record_join_failure(attempt);
        assert_eq!(station.join(Milliseconds::ZERO), Err(JoinError::Rejected));

        station.forget_credentials();
        assert_eq!(
            station.join(Milliseconds::ZERO),
            Err(JoinError::NoCredentials)
        );
    }

    #[test]
    fn late_join_failure_does_not_fail_the_next_attempt() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut station = StationLink::new(&status);
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());
        let mut supervisor = ConnectivitySupervisor::new(SupervisorConfig::new());
        let mut links = Links {
            network: &mut station,
            client: &mut broker,
        };

        assert_eq!(
            tick(&mut supervisor, &mut links, 0),
            Some(SupervisorEvent::NetworkJoinStarted)
        );
        assert_eq!(tick(&mut supervisor, &mut links, 10), None);
        let first = status.take_join_request().expect("first request");
        assert_eq!(tick(&mut supervisor, &mut links, 14_990), None);
        assert_eq!(
            tick(&mut supervisor, &mut links, 15_000),
            Some(SupervisorEvent::Failed(FailureReason::Network(
                JoinError::Timeout
            )))
        );

        // The Wi-Fi task gives up on its association after the deadline.
        status.record_join_failure(first);

        assert_eq!(tick(&mut supervisor, &mut links, 15_010), None);
        assert_eq!(
            tick(&mut supervisor, &mut links, 16_500),
            Some(SupervisorEvent::NetworkJoinStarted)
        );
        assert_eq!(tick(&mut supervisor, &mut links, 16_510), None);
        assert_eq!(supervisor.state(), ConnectionState::JoiningNetwork);
        let second = status.take_join_request().expect("second request");
        assert_ne!(second, first);

        assert_eq!(tick(&mut supervisor, &mut links, 16_520), None);
        assert_eq!(status.take_join_request(), None, "one request per attempt");

        status.record_link(Some([10, 0, 0, 9]));
        assert_eq!(
            tick(&mut supervisor, &mut links, 16_530),
            Some(SupervisorEvent::NetworkJoined(LinkInfo::new([10, 0, 0, 9])))
        );
    }

    #[test]
    fn timed_out_join_withdraws_its_unclaimed_request() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut station = StationLink::new(&status);
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());
        let mut supervisor = ConnectivitySupervisor::new(SupervisorConfig::new());
        let mut links = Links {
            network: &mut station,
            client: &mut broker,
        };

        tick(&mut supervisor, &mut links, 0);
        tick(&mut supervisor, &mut links, 10);
        assert!(matches!(
            tick(&mut supervisor, &mut links, 15_000),
            Some(SupervisorEvent::Failed(_))
        ));
        assert_eq!(status.take_join_request(), None);
    }

    #[test]
    fn late_broker_refusal_does_not_fail_the_next_attempt() {
        let status = LinkStatus::new();
        status.record_link(Some([10, 0, 0, 9]));
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut station = StationLink::new(&status);
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());
        let mut supervisor = ConnectivitySupervisor::new(SupervisorConfig::new());
        let mut links = Links {
            network: &mut station,
            client: &mut broker,
        };

        tick(&mut supervisor, &mut links, 0);
        assert!(matches!(
            tick(&mut supervisor, &mut links, 10),
            Some(SupervisorEvent::NetworkJoined(_))
        ));
        assert!(matches!(
            tick(&mut supervisor, &mut links, 1_510),
            Some(SupervisorEvent::BrokerJoinStarted(_))
        ));
        assert_eq!(tick(&mut supervisor, &mut links, 1_520), None);
        let (first, endpoint) = connect_request(&requests);
        assert_eq!(endpoint.host.as_str(), "10.0.0.2");

        assert_eq!(
            tick(&mut supervisor, &mut links, 11_510),
            Some(SupervisorEvent::Failed(FailureReason::Broker(
                ConnectError::Timeout
            )))
        );
        assert!(
            !status.report_broker(first, BrokerState::Refused(5)),
            "the cancelled attempt no longer reports"
        );

        assert_eq!(tick(&mut supervisor, &mut links, 11_520), None);
        tick(&mut supervisor, &mut links, 13_010);
        tick(&mut supervisor, &mut links, 13_020);
        assert!(matches!(
            tick(&mut supervisor, &mut links, 14_520),
            Some(SupervisorEvent::BrokerJoinStarted(_))
        ));
        assert_eq!(tick(&mut supervisor, &mut links, 14_530), None);
        assert_eq!(supervisor.state(), ConnectionState::JoiningBroker);
        let (second, _) = connect_request(&requests);
        assert_ne!(second, first);

        assert!(status.report_broker(second, BrokerState::Connected));
        assert_eq!(
            tick(&mut supervisor, &mut links, 14_540),
            Some(SupervisorEvent::Connected)
        );
    }

    #[test]
    fn connect_queues_one_request_and_waits_for_the_task() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());

        assert_eq!(
            broker.connect("broker.local", 1883, "node", "secret"),
            Err(ConnectError::InProgress)
        );
        assert_eq!(
            broker.connect("broker.local", 1883, "node", "secret"),
            Err(ConnectError::InProgress)
        );
        let (attempt, endpoint) = connect_request(&requests);
        assert_eq!(endpoint.port, 1883);
        assert!(requests.try_receive().is_err(), "only one connect is queued");
        assert_eq!(status.broker_outcome(attempt), Some(BrokerState::Connecting));

        assert!(status.report_broker(attempt, BrokerState::Connected));
        assert_eq!(broker.connect("broker.local", 1883, "node", "secret"), Ok(()));
        assert!(broker.is_connected());
    }

    #[test]
    fn refused_connect_resets_for_the_next_attempt() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());

        let _ = broker.connect("broker.local", 1883, "", "");
        let (first, _) = connect_request(&requests);
        assert!(status.report_broker(first, BrokerState::Refused(5)));
        assert_eq!(
            broker.connect("broker.local", 1883, "", ""),
            Err(ConnectError::Refused(5))
        );

        assert_eq!(
            broker.connect("broker.local", 1883, "", ""),
            Err(ConnectError::InProgress)
        );
        let (second, _) = connect_request(&requests);
        assert_ne!(second, first);
        assert_eq!(status.broker_state(), BrokerState::Connecting);
    }

    #[test]
    fn publish_requires_a_session() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());

        assert_eq!(
            broker.publish("devices/esp01/get/ping", b"pong", false),
            Err(ClientError::NotConnected)
        );

        status.begin_broker_attempt(1);
        assert!(status.report_broker(1, BrokerState::Connected));
        broker
            .publish("devices/esp01/get/port2", b"open", true)
            .expect("queued");
        let Ok(BrokerRequest::Publish(message)) = requests.try_receive() else {
            panic!("expected a publish request");
        };
        assert_eq!(message.topic.as_str(), "devices/esp01/get/port2");
        assert_eq!(message.payload.as_slice(), b"open");
        assert!(message.retained);
    }

    #[test]
    fn full_request_queue_reports_queue_full() {
        let status = LinkStatus::new();
        status.begin_broker_attempt(1);
        assert!(status.report_broker(1, BrokerState::Connected));
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());

        for _ in 0..REQUEST_QUEUE_DEPTH {
            broker.subscribe("devices/esp01/set/ping").expect("room");
        }
        assert_eq!(
            broker.subscribe("devices/esp01/set/ping"),
            Err(ClientError::QueueFull)
        );
    }

    #[test]
    fn inbound_messages_are_polled_in_order() {
        let status = LinkStatus::new();
        let requests = RequestQueue::new();
        let inbound = InboundQueue::new();
        let mut broker = BrokerLink::new(&status, requests.sender(), inbound.receiver());

        let first = InboundMessage::new("devices/esp01/set/ping", b"ping").expect("fits");
        let second = InboundMessage::new("devices/esp01/set/beeper", b"beep").expect("fits");
        inbound.try_send(first.clone()).expect("room");
        inbound.try_send(second.clone()).expect("room");

        assert_eq!(broker.poll(), Some(first));
        assert_eq!(broker.poll(), Some(second));
        assert_eq!(broker.poll(), None);
    }
}

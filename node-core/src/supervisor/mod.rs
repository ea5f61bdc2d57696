//! Connection lifecycle: network join, broker session, and recovery.
//!
//! The supervisor is a per-tick state machine. Every call to
//! [`ConnectivitySupervisor::advance`] performs at most one lifecycle step and
//! reports what happened, so the main loop stays responsive while the node
//! retries forever after failures. Status blinks on the LED show which stage
//! is being attempted.

use core::fmt;

use crate::clock::{Instant, Milliseconds};
use crate::commands::{SUBSCRIPTIONS, TopicTree};
use crate::config::{ConfigFields, PortResolution, SupervisorConfig};
use crate::pattern::{
    BROKER_JOIN_TEMPLATE, NETWORK_JOIN_TEMPLATE, OutputDriver, PatternPlayer,
};
use crate::timer::OneShotTimer;

pub mod link;

pub use link::{
    ClientError, ConnectError, InboundMessage, JoinError, LinkInfo, MessagingClient,
    NetworkJoiner,
};

/// Lifecycle phases.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    JoiningNetwork,
    NetworkJoined,
    JoiningBroker,
    Connected,
    /// Lasts one supervisor cycle before returning to `Disconnected`.
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::JoiningNetwork => "joining-network",
            ConnectionState::NetworkJoined => "network-joined",
            ConnectionState::JoiningBroker => "joining-broker",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// States that are only valid while the network link is up.
    #[must_use]
    pub const fn requires_link(self) -> bool {
        matches!(
            self,
            ConnectionState::NetworkJoined
                | ConnectionState::JoiningBroker
                | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt ended in [`ConnectionState::Failed`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureReason {
    Network(JoinError),
    Broker(ConnectError),
    Subscribe(ClientError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network(err) => write!(f, "network: {err}"),
            FailureReason::Broker(err) => write!(f, "broker: {err}"),
            FailureReason::Subscribe(err) => write!(f, "subscribe: {err}"),
        }
    }
}

/// Lifecycle step reported by [`ConnectivitySupervisor::advance`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SupervisorEvent {
    NetworkJoinStarted,
    NetworkJoined(LinkInfo),
    BrokerJoinStarted(PortResolution),
    Connected,
    Failed(FailureReason),
    LinkLost,
    BrokerLost,
}

/// Snapshot for status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub attempt_deadline: Option<Instant>,
}

/// External collaborators the supervisor drives each tick.
pub struct Links<'a, N, C> {
    pub network: &'a mut N,
    pub client: &'a mut C,
}

pub struct ConnectivitySupervisor {
    config: SupervisorConfig,
    state: ConnectionState,
    network_blink: PatternPlayer,
    broker_blink: PatternPlayer,
    attempt: OneShotTimer,
    settle: OneShotTimer,
    broker_port: u16,
    consecutive_failures: u32,
    link_lost: bool,
}

impl ConnectivitySupervisor {
    #[must_use]
    pub const fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            network_blink: PatternPlayer::new(NETWORK_JOIN_TEMPLATE),
            broker_blink: PatternPlayer::new(BROKER_JOIN_TEMPLATE),
            attempt: OneShotTimer::new(),
            settle: OneShotTimer::new(),
            broker_port: 0,
            consecutive_failures: 0,
            link_lost: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            attempt_deadline: self.attempt.deadline(),
        }
    }

    #[must_use]
    pub const fn network_blink(&self) -> &PatternPlayer {
        &self.network_blink
    }

    #[must_use]
    pub const fn broker_blink(&self) -> &PatternPlayer {
        &self.broker_blink
    }

    /// Flags a link drop reported out of band; handled on the next advance.
    pub fn on_link_lost(&mut self) {
        self.link_lost = true;
    }

    /// Advances the status blinks. Called from the pattern step of the tick.
    pub fn advance_patterns<O: OutputDriver>(&mut self, now: Instant, outputs: &mut O) {
        self.network_blink.advance(now, outputs);
        self.broker_blink.advance(now, outputs);
    }

    /// Stops both status blinks and leaves the LED low.
    pub fn halt_patterns<O: OutputDriver>(&mut self, outputs: &mut O) {
        if self.network_blink.is_armed() {
            self.network_blink.halt(outputs);
        }
        if self.broker_blink.is_armed() {
            self.broker_blink.halt(outputs);
        }
    }

    /// Performs at most one lifecycle step.
    pub fn advance<N, C, O>(
        &mut self,
        now: Instant,
        links: &mut Links<'_, N, C>,
        outputs: &mut O,
        broker: &ConfigFields,
        topics: &TopicTree,
    ) -> Option<SupervisorEvent>
    where
        N: NetworkJoiner,
        C: MessagingClient,
        O: OutputDriver,
    {
        let link_lost = core::mem::take(&mut self.link_lost);
        if self.state.requires_link() && (link_lost || !links.network.is_link_up()) {
            if self.state == ConnectionState::JoiningBroker {
                links.client.cancel_connect();
            }
            self.halt_patterns(outputs);
            self.attempt.stop();
            self.settle.stop();
            self.state = ConnectionState::Disconnected;
            return Some(SupervisorEvent::LinkLost);
        }

        match self.state {
            ConnectionState::Disconnected => {
                if self.settling(now) {
                    return None;
                }
                self.state = ConnectionState::JoiningNetwork;
                self.attempt.start(now, self.config.network_timeout);
                self.network_blink.start(now, outputs);
                Some(SupervisorEvent::NetworkJoinStarted)
            }
            ConnectionState::JoiningNetwork => {
                let budget = self.remaining_budget(now);
                match links.network.join(budget) {
                    Ok(info) => {
                        self.attempt.stop();
                        self.settle.start(now, self.config.settle_delay);
                        self.state = ConnectionState::NetworkJoined;
                        Some(SupervisorEvent::NetworkJoined(info))
                    }
                    Err(JoinError::InProgress) if !self.attempt.is_expired(now) => None,
                    Err(JoinError::InProgress) => {
                        links.network.cancel_join();
                        Some(self.fail(now, outputs, FailureReason::Network(JoinError::Timeout)))
                    }
                    Err(err) => Some(self.fail(now, outputs, FailureReason::Network(err))),
                }
            }
            ConnectionState::NetworkJoined => {
                if self.settling(now) {
                    return None;
                }
                let resolution = broker.resolve_port();
                self.broker_port = resolution.port;
                if self.network_blink.is_armed() {
                    self.network_blink.halt(outputs);
                }
                self.broker_blink.start(now, outputs);
                self.attempt.start(now, self.config.broker_timeout);
                self.state = ConnectionState::JoiningBroker;
                Some(SupervisorEvent::BrokerJoinStarted(resolution))
            }
            ConnectionState::JoiningBroker => {
                if !broker.has_host() {
                    return Some(self.fail(
                        now,
                        outputs,
                        FailureReason::Broker(ConnectError::NotConfigured),
                    ));
                }
                let result = links.client.connect(
                    broker.host.trim(),
                    self.broker_port,
                    &broker.user,
                    &broker.pass,
                );
                match result {
                    Ok(()) => Some(self.complete_broker_join(now, links.client, outputs, topics)),
                    Err(ConnectError::InProgress) if !self.attempt.is_expired(now) => None,
                    Err(ConnectError::InProgress) => {
                        links.client.cancel_connect();
                        Some(self.fail(now, outputs, FailureReason::Broker(ConnectError::Timeout)))
                    }
                    Err(err) => Some(self.fail(now, outputs, FailureReason::Broker(err))),
                }
            }
            ConnectionState::Connected => {
                if links.client.is_connected() {
                    return None;
                }
                // Link still up: rejoin the broker only.
                self.settle.start(now, self.config.settle_delay);
                self.state = ConnectionState::NetworkJoined;
                Some(SupervisorEvent::BrokerLost)
            }
            ConnectionState::Failed => {
                self.state = ConnectionState::Disconnected;
                None
            }
        }
    }

    fn complete_broker_join<C, O>(
        &mut self,
        now: Instant,
        client: &mut C,
        outputs: &mut O,
        topics: &TopicTree,
    ) -> SupervisorEvent
    where
        C: MessagingClient,
        O: OutputDriver,
    {
        for topic in SUBSCRIPTIONS {
            let subscribed = topics
                .render(topic)
                .map_err(|_| ClientError::TooLarge)
                .and_then(|name| client.subscribe(&name));
            if let Err(err) = subscribed {
                return self.fail(now, outputs, FailureReason::Subscribe(err));
            }
        }

        self.attempt.stop();
        self.halt_patterns(outputs);
        self.consecutive_failures = 0;
        self.state = ConnectionState::Connected;
        SupervisorEvent::Connected
    }

    fn fail<O: OutputDriver>(
        &mut self,
        now: Instant,
        outputs: &mut O,
        reason: FailureReason,
    ) -> SupervisorEvent {
        self.halt_patterns(outputs);
        self.attempt.stop();
        self.settle.start(now, self.config.settle_delay);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.state = ConnectionState::Failed;
        SupervisorEvent::Failed(reason)
    }

    fn settling(&mut self, now: Instant) -> bool {
        if self.settle.is_armed() && !self.settle.poll(now) {
            return true;
        }
        false
    }

    fn remaining_budget(&self, now: Instant) -> Milliseconds {
        self.attempt
            .remaining(now)
            .unwrap_or(self.config.network_timeout)
    }
}

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared link status for the firmware target.
//!
//! The Wi-Fi and MQTT tasks publish what they observe through atomics, and
//! the main loop's collaborators read it back without taking a lock. Requests
//! flow the other way through attempt-tagged words the tasks consume.

use node_core::supervisor::LinkInfo;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

const BROKER_IDLE: u8 = 0;
const BROKER_CONNECTING: u8 = 1;
const BROKER_CONNECTED: u8 = 2;
const BROKER_UNREACHABLE: u8 = 3;
const BROKER_REFUSED: u8 = 4;

/// Tags one join or connect attempt. Zero means "no attempt".
pub type AttemptId = u16;

/// Hands out attempt ids, skipping zero on wrap.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    last: AttemptId,
}

impl AttemptCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn issue(&mut self) -> AttemptId {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }
}

/// Broker session state as reported by the MQTT task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BrokerState {
    Idle,
    Connecting,
    Connected,
    Unreachable,
    Refused(u8),
}

impl BrokerState {
    #[allow(clippy::cast_lossless)]
    const fn encode(self, attempt: AttemptId) -> u32 {
        let (state, code) = match self {
            BrokerState::Idle => (BROKER_IDLE, 0),
            BrokerState::Connecting => (BROKER_CONNECTING, 0),
            BrokerState::Connected => (BROKER_CONNECTED, 0),
            BrokerState::Unreachable => (BROKER_UNREACHABLE, 0),
            BrokerState::Refused(code) => (BROKER_REFUSED, code),
        };
        ((attempt as u32) << 16) | ((code as u32) << 8) | state as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn decode(word: u32) -> (AttemptId, Self) {
        let state = match word as u8 {
            BROKER_CONNECTING => BrokerState::Connecting,
            BROKER_CONNECTED => BrokerState::Connected,
            BROKER_UNREACHABLE => BrokerState::Unreachable,
            BROKER_REFUSED => BrokerState::Refused((word >> 8) as u8),
            _ => BrokerState::Idle,
        };
        ((word >> 16) as AttemptId, state)
    }
}

/// Atomics shared between the network tasks and the main loop.
///
/// Join and connect attempts carry an [`AttemptId`]. A task reports against
/// the id it was handed, and a report for an attempt the main loop already
/// gave up on is dropped.
pub struct LinkStatus {
    link_up: AtomicBool,
    address: AtomicU32,
    join_request: AtomicU16,
    join_failure: AtomicU16,
    credentials_forgotten: AtomicBool,
    /// Attempt id, refusal code, and state packed as `id << 16 | code << 8 | state`.
    broker: AtomicU32,
}

impl LinkStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            link_up: AtomicBool::new(false),
            address: AtomicU32::new(0),
            join_request: AtomicU16::new(0),
            join_failure: AtomicU16::new(0),
            credentials_forgotten: AtomicBool::new(false),
            broker: AtomicU32::new(BrokerState::Idle.encode(0)),
        }
    }

    /// Records the station address, or `None` once the link drops. A dropped
    /// link also ends any broker session.
    pub fn record_link(&self, address: Option<[u8; 4]>) {
        match address {
            Some(octets) => {
                self.address.store(u32::from_be_bytes(octets), Ordering::Relaxed);
                self.link_up.store(true, Ordering::Release);
            }
            None => {
                self.link_up.store(false, Ordering::Release);
                let _ = self
                    .broker
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                        let (attempt, _) = BrokerState::decode(word);
                        Some(BrokerState::Idle.encode(attempt))
                    });
            }
        }
    }

    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn link_info(&self) -> Option<LinkInfo> {
        if !self.is_link_up() {
            return None;
        }
        let address = self.address.load(Ordering::Relaxed);
        Some(LinkInfo::new(address.to_be_bytes()))
    }

    /// Asks the Wi-Fi task to join for `attempt`, replacing any request or
    /// failure left by an earlier attempt.
    pub fn request_join(&self, attempt: AttemptId) {
        self.join_failure.store(0, Ordering::Release);
        self.join_request.store(attempt, Ordering::Release);
    }

    /// Takes the pending join request, if any.
    #[must_use]
    pub fn take_join_request(&self) -> Option<AttemptId> {
        match self.join_request.swap(0, Ordering::AcqRel) {
            0 => None,
            attempt => Some(attempt),
        }
    }

    /// Withdraws `attempt`'s request and any failure it already reported.
    pub fn cancel_join(&self, attempt: AttemptId) {
        let _ = self
            .join_request
            .compare_exchange(attempt, 0, Ordering::AcqRel, Ordering::Acquire);
        let _ = self
            .join_failure
            .compare_exchange(attempt, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn record_join_failure(&self, attempt: AttemptId) {
        self.join_failure.store(attempt, Ordering::Release);
    }

    /// Consumes a failure reported for `attempt`. Failures of other attempts
    /// are left alone.
    #[must_use]
    pub fn take_join_failure(&self, attempt: AttemptId) -> bool {
        self.join_failure
            .compare_exchange(attempt, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn forget_credentials(&self) {
        self.credentials_forgotten.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn credentials_forgotten(&self) -> bool {
        self.credentials_forgotten.load(Ordering::Acquire)
    }

    /// Marks `attempt` as the current broker attempt.
    pub fn begin_broker_attempt(&self, attempt: AttemptId) {
        self.broker
            .store(BrokerState::Connecting.encode(attempt), Ordering::Release);
    }

    /// Retires `attempt` so later reports against it are dropped.
    pub fn cancel_broker_attempt(&self, attempt: AttemptId) {
        let _ = self.broker.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            let (current, _) = BrokerState::decode(word);
            (current == attempt).then_some(BrokerState::Idle.encode(0))
        });
    }

    /// Records what the MQTT task saw for `attempt`. Returns `false` when the
    /// attempt is no longer current and the report was dropped.
    #[must_use]
    pub fn report_broker(&self, attempt: AttemptId, state: BrokerState) -> bool {
        self.broker
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (current, _) = BrokerState::decode(word);
                (current == attempt).then_some(state.encode(attempt))
            })
            .is_ok()
    }

    #[must_use]
    pub fn broker_state(&self) -> BrokerState {
        BrokerState::decode(self.broker.load(Ordering::Acquire)).1
    }

    /// State of `attempt`, or `None` once another attempt replaced it.
    #[must_use]
    pub fn broker_outcome(&self, attempt: AttemptId) -> Option<BrokerState> {
        let (current, state) = BrokerState::decode(self.broker.load(Ordering::Acquire));
        (current == attempt).then_some(state)
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Status shared by every firmware task.
pub static LINK_STATUS: LinkStatus = LinkStatus::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_drop_ends_broker_session() {
        let status = LinkStatus::new();
        status.record_link(Some([192, 168, 1, 20]));
        status.begin_broker_attempt(3);
        assert!(status.report_broker(3, BrokerState::Connected));
        assert_eq!(
            status.link_info(),
            Some(LinkInfo::new([192, 168, 1, 20]))
        );

        status.record_link(None);
        assert!(!status.is_link_up());
        assert_eq!(status.link_info(), None);
        assert_eq!(status.broker_outcome(3), Some(BrokerState::Idle));
    }

    #[test]
    fn refusal_code_survives_packing() {
        let status = LinkStatus::new();
        status.begin_broker_attempt(AttemptId::MAX);
        assert!(status.report_broker(AttemptId::MAX, BrokerState::Refused(135)));
        assert_eq!(status.broker_state(), BrokerState::Refused(135));
        assert_eq!(
            status.broker_outcome(AttemptId::MAX),
            Some(BrokerState::Refused(135))
        );
    }

    #[test]
    fn reports_for_a_replaced_broker_attempt_are_dropped() {
        let status = LinkStatus::new();
        status.begin_broker_attempt(1);
        status.begin_broker_attempt(2);

        assert!(!status.report_broker(1, BrokerState::Connected));
        assert_eq!(status.broker_outcome(1), None);
        assert_eq!(status.broker_outcome(2), Some(BrokerState::Connecting));

        status.cancel_broker_attempt(2);
        assert!(!status.report_broker(2, BrokerState::Refused(5)));
        assert_eq!(status.broker_state(), BrokerState::Idle);
    }

    #[test]
    fn join_request_is_consumed_once() {
        let status = LinkStatus::new();
        status.request_join(4);
        status.request_join(4);
        assert_eq!(status.take_join_request(), Some(4));
        assert_eq!(status.take_join_request(), None);
    }

    #[test]
    fn join_failure_only_matches_its_attempt() {
        let status = LinkStatus::new();
        status.record_join_failure(1);
        assert!(!status.take_join_failure(2));

        status.request_join(2);
        assert!(!status.take_join_failure(1), "a new request clears old failures");

        status.record_join_failure(2);
        status.cancel_join(2);
        assert!(!status.take_join_failure(2));
        assert_eq!(status.take_join_request(), None);
    }

    #[test]
    fn attempt_ids_skip_zero_on_wrap() {
        let mut counter = AttemptCounter { last: AttemptId::MAX - 1 };
        assert_eq!(counter.issue(), AttemptId::MAX);
        assert_eq!(counter.issue(), 1);
    }
}

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! SNTP packet handling and the shared wall-clock anchor.
//!
//! The SNTP task owns the socket; everything here is plain data so the codec
//! runs under host tests. The device loop reads time through [`SyncedClock`],
//! which projects the last anchor forward on the monotonic clock.

use node_core::calendar::{TimeAnchor, WallClock};
use node_core::clock::{Instant, Milliseconds};
use portable_atomic::{AtomicU64, Ordering};

/// Pool queried for time.
pub const NTP_SERVER: &str = "europe.pool.ntp.org";
pub const NTP_PORT: u16 = 123;
pub const PACKET_LEN: usize = 48;

/// Time between successful synchronisations.
pub const RESYNC_INTERVAL: Milliseconds = Milliseconds::from_secs(60 * 60);
/// Time before retrying after a failed query.
pub const RETRY_INTERVAL: Milliseconds = Milliseconds::from_secs(60);
/// Upper bound on one DNS lookup plus request and reply.
pub const QUERY_TIMEOUT: Milliseconds = Milliseconds::from_secs(5);

/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// LI = 0, VN = 4, mode = 3 (client).
const CLIENT_HEADER: u8 = 0x23;
const MODE_MASK: u8 = 0x07;
const MODE_SERVER: u8 = 4;
const TRANSMIT_SECONDS: usize = 40;
const TRANSMIT_FRACTION: usize = 44;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SntpError {
    /// Fewer than 48 bytes arrived.
    Truncated,
    /// The reply was not sent in server mode.
    NotServer,
    /// Stratum 0 (kiss-o'-death) or an unsynchronised server.
    Unsynchronised,
    /// The transmit time lies before the Unix epoch.
    BeforeEpoch,
}

/// Builds a client request. Every field except the header stays zero.
#[must_use]
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet
}

/// Extracts the server's transmit time as Unix seconds, rounded to the
/// nearest second.
///
/// # Errors
///
/// Returns an [`SntpError`] when the reply is short, not from a server, or
/// comes from an unsynchronised source.
pub fn decode_reply(reply: &[u8]) -> Result<u64, SntpError> {
    let Some(packet) = reply.get(..PACKET_LEN) else {
        return Err(SntpError::Truncated);
    };
    if packet[0] & MODE_MASK != MODE_SERVER {
        return Err(SntpError::NotServer);
    }
    if !(1..=15).contains(&packet[1]) {
        return Err(SntpError::Unsynchronised);
    }

    let seconds = read_u32(packet, TRANSMIT_SECONDS);
    let fraction = read_u32(packet, TRANSMIT_FRACTION);
    let ntp_seconds = u64::from(seconds) + u64::from(fraction >> 31);
    ntp_seconds
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(SntpError::BeforeEpoch)
}

fn read_u32(packet: &[u8], at: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&packet[at..at + 4]);
    u32::from_be_bytes(word)
}

/// Last synchronisation point, packed as `unix_seconds << 32 | instant`.
/// Zero means the clock has not been set.
pub struct TimeSync {
    anchor: AtomicU64,
}

impl TimeSync {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            anchor: AtomicU64::new(0),
        }
    }

    /// Stores a new anchor. Times past 2106 do not fit and are ignored.
    pub fn record(&self, anchor: TimeAnchor) {
        let Ok(unix_seconds) = u32::try_from(anchor.unix_seconds) else {
            return;
        };
        let word = (u64::from(unix_seconds) << 32) | u64::from(anchor.at.as_millis());
        self.anchor.store(word, Ordering::Release);
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn anchor(&self) -> Option<TimeAnchor> {
        match self.anchor.load(Ordering::Acquire) {
            0 => None,
            word => Some(TimeAnchor::new(
                Instant::from_millis(word as u32),
                word >> 32,
            )),
        }
    }
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

/// Anchor written by the SNTP task.
pub static TIME_SYNC: TimeSync = TimeSync::new();

/// [`WallClock`] over a shared [`TimeSync`].
#[derive(Copy, Clone)]
pub struct SyncedClock<'a> {
    sync: &'a TimeSync,
}

impl<'a> SyncedClock<'a> {
    #[must_use]
    pub const fn new(sync: &'a TimeSync) -> Self {
        Self { sync }
    }
}

impl WallClock for SyncedClock<'_> {
    fn unix_seconds(&self, now: Instant) -> Option<u64> {
        self.sync.anchor().map(|anchor| anchor.project(now))
    }
}

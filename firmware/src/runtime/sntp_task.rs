use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Timer, with_timeout};

use node_core::calendar::TimeAnchor;
use node_core::clock::{Milliseconds, MonotonicClock};

use crate::hw::EmbassyClock;
use crate::sntp::{
    NTP_PORT, NTP_SERVER, PACKET_LEN, QUERY_TIMEOUT, RESYNC_INTERVAL, RETRY_INTERVAL, SntpError,
    TimeSync, decode_reply, request,
};

const LOCAL_PORT: u16 = 50_123;

enum QueryFailure {
    Dns,
    Socket,
    Reply(SntpError),
}

fn duration(span: Milliseconds) -> Duration {
    Duration::from_millis(u64::from(span.as_u32()))
}

/// Keeps [`TimeSync`] anchored to the pool's time while the network is up.
#[embassy_executor::task]
pub async fn run(stack: Stack<'static>, sync: &'static TimeSync) {
    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 2 * PACKET_LEN];
    let mut tx_buffer = [0u8; 2 * PACKET_LEN];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(err) = socket.bind(LOCAL_PORT) {
        defmt::warn!("sntp: bind failed: {}", defmt::Debug2Format(&err));
        return;
    }

    loop {
        stack.wait_config_up().await;

        let wait = match with_timeout(duration(QUERY_TIMEOUT), query(stack, &socket)).await {
            Ok(Ok(unix_seconds)) => {
                sync.record(TimeAnchor::new(EmbassyClock.now(), unix_seconds));
                defmt::info!("sntp: clock set to {} (unix)", unix_seconds);
                RESYNC_INTERVAL
            }
            Ok(Err(QueryFailure::Dns)) => {
                defmt::warn!("sntp: cannot resolve {}", NTP_SERVER);
                RETRY_INTERVAL
            }
            Ok(Err(QueryFailure::Socket)) => {
                defmt::warn!("sntp: socket error");
                RETRY_INTERVAL
            }
            Ok(Err(QueryFailure::Reply(err))) => {
                defmt::warn!("sntp: unusable reply: {}", defmt::Debug2Format(&err));
                RETRY_INTERVAL
            }
            Err(_) => {
                defmt::warn!("sntp: no reply within {}ms", QUERY_TIMEOUT.as_u32());
                RETRY_INTERVAL
            }
        };
        Timer::after(duration(wait)).await;
    }
}

async fn query(stack: Stack<'static>, socket: &UdpSocket<'_>) -> Result<u64, QueryFailure> {
    let addresses = stack
        .dns_query(NTP_SERVER, DnsQueryType::A)
        .await
        .map_err(|_| QueryFailure::Dns)?;
    let server: IpAddress = addresses.first().copied().ok_or(QueryFailure::Dns)?;

    socket
        .send_to(&request(), (server, NTP_PORT))
        .await
        .map_err(|_| QueryFailure::Socket)?;

    let mut reply = [0u8; PACKET_LEN];
    loop {
        let (len, meta) = socket
            .recv_from(&mut reply)
            .await
            .map_err(|_| QueryFailure::Socket)?;
        // Only the server just asked counts.
        if meta.endpoint.addr != server {
            continue;
        }
        return decode_reply(&reply[..len]).map_err(QueryFailure::Reply);
    }
}

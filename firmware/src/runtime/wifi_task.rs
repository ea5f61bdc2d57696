use embassy_net::Stack;
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};

use crate::config::wifi_credentials;
use crate::link::ASSOCIATE_TIMEOUT;
use crate::status::LinkStatus;

const REQUEST_POLL_MS: u64 = 50;
const LINK_POLL_MS: u64 = 250;

enum JoinFailure {
    Radio(WifiError),
    Timeout,
}

/// Joins the configured access point whenever the device loop asks, then
/// watches the link until it drops.
#[embassy_executor::task]
pub async fn run(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    status: &'static LinkStatus,
) {
    let Some(credentials) = wifi_credentials() else {
        defmt::warn!("wifi: no station credentials in this build");
        status.forget_credentials();
        return;
    };

    let mode = ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(credentials.ssid.into())
            .with_password(credentials.password.into()),
    );
    if let Err(err) = controller.set_config(&mode) {
        defmt::warn!("wifi: station config rejected: {}", defmt::Debug2Format(&err));
        status.forget_credentials();
        return;
    }

    let join_timeout = Duration::from_millis(u64::from(ASSOCIATE_TIMEOUT.as_u32()));

    loop {
        let attempt = loop {
            if let Some(attempt) = status.take_join_request() {
                break attempt;
            }
            Timer::after_millis(REQUEST_POLL_MS).await;
        };
        if status.credentials_forgotten() {
            continue;
        }

        let joined = with_timeout(join_timeout, associate(&mut controller, stack))
            .await
            .unwrap_or(Err(JoinFailure::Timeout));
        match joined {
            Ok(address) => status.record_link(Some(address)),
            Err(failure) => {
                match failure {
                    JoinFailure::Radio(err) => {
                        defmt::warn!("wifi: join failed: {}", defmt::Debug2Format(&err));
                    }
                    JoinFailure::Timeout => defmt::warn!("wifi: join {} timed out", attempt),
                }
                status.record_join_failure(attempt);
                let _ = controller.disconnect_async().await;
                continue;
            }
        }

        while link_healthy(&controller, stack) {
            Timer::after_millis(LINK_POLL_MS).await;
        }

        defmt::warn!("wifi: link lost");
        status.record_link(None);
        let _ = controller.disconnect_async().await;
    }
}

async fn associate(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
) -> Result<[u8; 4], JoinFailure> {
    if !controller.is_started().map_err(JoinFailure::Radio)? {
        controller.start_async().await.map_err(JoinFailure::Radio)?;
    }
    controller.connect_async().await.map_err(JoinFailure::Radio)?;

    loop {
        stack.wait_config_up().await;
        if let Some(config) = stack.config_v4() {
            return Ok(config.address.address().octets());
        }
    }
}

fn link_healthy(controller: &WifiController<'static>, stack: Stack<'static>) -> bool {
    matches!(controller.is_connected(), Ok(true)) && stack.is_link_up() && stack.config_v4().is_some()
}

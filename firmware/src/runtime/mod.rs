use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, DhcpConfig, Runner, StackResources};
use embassy_time::Timer;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{DriveMode, Flex, Input, InputConfig, Output, OutputConfig, Pull};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_println as _;
use esp_radio::wifi::WifiDevice;
use static_cell::StaticCell;

use node_core::clock::MonotonicClock;
use node_core::config::DeviceConfig;
use node_core::device::{Board, Device, FIRMWARE_BANNER, Platform};
use node_core::pattern::OutputId;

use crate::config::BuildConfigStore;
use crate::hw::{ChipControl, Dht22Sensor, EmbassyClock, GpioButtons, GpioOutputs, idle_pin_level};
use crate::link::{BrokerLink, InboundQueue, RequestQueue, StationLink};
use crate::sntp::{SyncedClock, TIME_SYNC};
use crate::status::LINK_STATUS;
use crate::telemetry::TelemetryDrain;

mod mqtt_task;
mod sntp_task;
mod wifi_task;

const HEAP_SIZE: usize = 72 * 1024;
const TICK_MS: u64 = 10;

esp_bootloader_esp_idf::esp_app_desc!();

static REQUESTS: RequestQueue = RequestQueue::new();
static INBOUND: InboundQueue = InboundQueue::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();

/// Collaborators for the ESP32-C3 board.
struct EdgeNode;

impl Platform for EdgeNode {
    type Outputs = GpioOutputs;
    type Inputs = GpioButtons;
    type Network = StationLink<'static>;
    type Client = BrokerLink<'static>;
    type Sensor = Dht22Sensor;
    type Store = BuildConfigStore;
    type System = ChipControl;
    type WallClock = SyncedClock<'static>;
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    defmt::info!("{}", FIRMWARE_BANNER);

    // Outputs go to their idle level before anything else can run.
    let outputs = GpioOutputs::new(
        Output::new(
            peripherals.GPIO8,
            idle_pin_level(OutputId::StatusLed),
            OutputConfig::default(),
        ),
        Output::new(
            peripherals.GPIO7,
            idle_pin_level(OutputId::Beeper),
            OutputConfig::default(),
        ),
        Output::new(
            peripherals.GPIO4,
            idle_pin_level(OutputId::Port1),
            OutputConfig::default(),
        ),
        Output::new(
            peripherals.GPIO5,
            idle_pin_level(OutputId::Port2),
            OutputConfig::default(),
        ),
    );
    let buttons = GpioButtons::new(
        Input::new(peripherals.GPIO9, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO10, InputConfig::default().with_pull(Pull::Up)),
    );

    let mut dht_pin = Flex::new(peripherals.GPIO6);
    dht_pin.apply_output_config(
        &OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::Up),
    );
    dht_pin.set_input_enable(true);
    dht_pin.set_output_enable(true);
    dht_pin.set_high();

    let radio = RADIO.init(esp_radio::init().expect("failed to init esp-radio"));
    let (controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default())
            .expect("failed to init wifi");

    let rng = Rng::new();
    let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(DhcpConfig::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner
        .spawn(net_task(runner))
        .expect("failed to spawn network stack task");
    spawner
        .spawn(wifi_task::run(controller, stack, &LINK_STATUS))
        .expect("failed to spawn wifi task");
    spawner
        .spawn(mqtt_task::run(
            stack,
            REQUESTS.receiver(),
            INBOUND.sender(),
            &LINK_STATUS,
        ))
        .expect("failed to spawn mqtt task");
    spawner
        .spawn(sntp_task::run(stack, &TIME_SYNC))
        .expect("failed to spawn sntp task");

    let board = Board::<EdgeNode> {
        outputs,
        inputs: buttons,
        network: StationLink::new(&LINK_STATUS),
        client: BrokerLink::new(&LINK_STATUS, REQUESTS.sender(), INBOUND.receiver()),
        sensor: Dht22Sensor::new(dht_pin),
        store: BuildConfigStore::new(),
        system: ChipControl,
        wall_clock: SyncedClock::new(&TIME_SYNC),
    };

    let clock = EmbassyClock;
    let mut device = Device::boot(board, DeviceConfig::new(), clock.now());
    let mut drain = TelemetryDrain::new();

    loop {
        device.tick_with(&clock);
        drain.flush(device.telemetry());
        Timer::after_millis(TICK_MS).await;
    }
}

use heapless::{String, Vec};

use node_core::calendar::{AnchoredClock, TimeAnchor};
use node_core::clock::{Instant, Milliseconds};
use node_core::commands::{DecodeError, PortAction, PortId};
use node_core::config::{ConfigFields, DeviceConfig, MemoryConfigStore};
use node_core::debounce::{InputId, InputReader};
use node_core::device::{Board, Device, DeviceMode, Platform, SystemControl};
use node_core::pattern::{Level, OutputDriver, OutputId};
use node_core::sensor::{Reading, SensorError, SensorSource};
use node_core::supervisor::{
    ClientError, ConnectError, ConnectionState, InboundMessage, JoinError, LinkInfo,
    MessagingClient, NetworkJoiner,
};
use node_core::telemetry::{DeviceEventKind, ResetTrigger};

const TICK: u32 = 10;

#[derive(Default)]
struct Pins {
    levels: [Level; 4],
}

impl Pins {
    fn level(&self, output: OutputId) -> Level {
        self.levels[output.as_index()]
    }
}

impl OutputDriver for Pins {
    fn write(&mut self, output: OutputId, level: Level) {
        self.levels[output.as_index()] = level;
    }
}

struct Buttons {
    levels: [Level; 2],
}

impl Default for Buttons {
    fn default() -> Self {
        Self {
            levels: [Level::High; 2],
        }
    }
}

impl InputReader for Buttons {
    fn level(&mut self, input: InputId) -> Level {
        self.levels[input.as_index()]
    }
}

#[derive(Default)]
struct Station {
    up: bool,
    joins: u32,
    forgotten: bool,
}

impl NetworkJoiner for Station {
    fn join(&mut self, _timeout: Milliseconds) -> Result<LinkInfo, JoinError> {
        self.joins += 1;
        self.up = true;
        Ok(LinkInfo::new([192, 168, 1, 50]))
    }

    fn is_link_up(&self) -> bool {
        self.up
    }

    fn current_identity(&self) -> &str {
        "edge-node-test"
    }

    fn forget_credentials(&mut self) {
        self.forgotten = true;
    }
}

#[derive(Clone, Debug)]
struct Sent {
    topic: String<96>,
    payload: Vec<u8, 128>,
    retained: bool,
}

#[derive(Default)]
struct Broker {
    connected: bool,
    connects: u32,
    last_port: u16,
    subscriptions: u32,
    inbox: Vec<InboundMessage, 8>,
    sent: Vec<Sent, 128>,
}

impl Broker {
    fn deliver(&mut self, topic: &str, payload: &str) {
        let message = InboundMessage::new(topic, payload.as_bytes()).expect("message fits");
        self.inbox.push(message).expect("inbox capacity");
    }

    fn sent_on<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Sent> + 'a {
        self.sent.iter().filter(move |sent| sent.topic.as_str() == topic)
    }
}

impl MessagingClient for Broker {
    fn connect(&mut self, _host: &str, port: u16, _: &str, _: &str) -> Result<(), ConnectError> {
        self.connects += 1;
        self.last_port = port;
        self.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, _topic: &str) -> Result<(), ClientError> {
        self.subscriptions += 1;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), ClientError> {
        let sent = Sent {
            topic: String::try_from(topic).map_err(|_| ClientError::TooLarge)?,
            payload: Vec::from_slice(payload).map_err(|_| ClientError::TooLarge)?,
            retained,
        };
        self.sent.push(sent).map_err(|_| ClientError::QueueFull)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        if self.inbox.is_empty() {
            None
        } else {
            Some(self.inbox.remove(0))
        }
    }
}

struct Thermometer {
    result: Result<Reading, SensorError>,
}

impl SensorSource for Thermometer {
    fn read_temperature_and_humidity(&mut self) -> Result<Reading, SensorError> {
        self.result
    }
}

#[derive(Default)]
struct Restarts {
    count: u32,
}

impl SystemControl for Restarts {
    fn restart(&mut self) {
        self.count += 1;
    }
}

struct TestPlatform;

impl Platform for TestPlatform {
    type Outputs = Pins;
    type Inputs = Buttons;
    type Network = Station;
    type Client = Broker;
    type Sensor = Thermometer;
    type Store = MemoryConfigStore;
    type System = Restarts;
    type WallClock = AnchoredClock;
}

struct Harness {
    device: Device<TestPlatform>,
    now: u32,
}

impl Harness {
    fn boot_with(port: &str) -> Self {
        let fields = ConfigFields::new("broker.local", port, "node", "secret").expect("fields");
        let board = Board {
            outputs: Pins::default(),
            inputs: Buttons::default(),
            network: Station::default(),
            client: Broker::default(),
            sensor: Thermometer {
                result: Reading::new(21.5, 40.0),
            },
            store: MemoryConfigStore::with_fields(fields),
            system: Restarts::default(),
            wall_clock: AnchoredClock::unsynced(),
        };
        Self {
            device: Device::boot(board, DeviceConfig::new(), Instant::BOOT),
            now: 0,
        }
    }

    fn boot() -> Self {
        Self::boot_with("1883")
    }

    fn connected() -> Self {
        let mut harness = Self::boot();
        harness.run_until(|device| device.supervisor().is_connected(), 10_000);
        harness
    }

    fn tick(&mut self) {
        self.now += TICK;
        self.device.tick(Instant::from_millis(self.now));
    }

    fn run_for(&mut self, span_ms: u32) {
        let end = self.now + span_ms;
        while self.now < end {
            self.tick();
        }
    }

    fn run_until(&mut self, done: impl Fn(&Device<TestPlatform>) -> bool, limit_ms: u32) {
        let end = self.now + limit_ms;
        while !done(&self.device) {
            assert!(self.now < end, "condition not reached within {limit_ms}ms");
            self.tick();
        }
    }

    fn broker(&self) -> &Broker {
        &self.device.board().client
    }

    fn deliver(&mut self, suffix: &str, payload: &str) {
        let mut topic: String<96> = String::new();
        topic.push_str("devices/esp01/").expect("fits");
        topic.push_str(suffix).expect("fits");
        self.device.board_mut().client.deliver(&topic, payload);
    }

    fn recorded(&self, event: DeviceEventKind) -> bool {
        self.device
            .telemetry()
            .oldest_first()
            .any(|record| record.event == event)
    }
}

#[test]
fn ping_yields_exactly_one_pong() {
    let mut harness = Harness::connected();
    harness.deliver("set/ping", "ping");
    harness.tick();

    let pongs: Vec<&Sent, 4> = harness.broker().sent_on("devices/esp01/get/ping").collect();
    assert_eq!(pongs.len(), 1);
    assert_eq!(pongs[0].payload.as_slice(), b"pong");
    assert!(!pongs[0].retained);

    // The reply also carries the current uptime.
    assert_eq!(harness.broker().sent_on("devices/esp01/uptime").count(), 2);
    assert!(harness.recorded(DeviceEventKind::PingReplied));
}

#[test]
fn ping_blink_hands_the_led_back_to_the_ready_pattern() {
    let mut harness = Harness::connected();
    assert!(harness.device.status().ready_blinking);

    harness.deliver("set/ping", "ping");
    harness.tick();
    assert!(!harness.device.status().ready_blinking);
    assert_eq!(harness.device.board().outputs.level(OutputId::StatusLed), Level::Low);

    harness.run_for(600);
    assert!(harness.device.status().ready_blinking);
}

#[test]
fn beeper_command_acknowledges_and_sounds_once() {
    let mut harness = Harness::connected();
    harness.deliver("set/beeper", "beep");
    harness.tick();

    let acks: Vec<&Sent, 4> = harness.broker().sent_on("devices/esp01/get/beeper").collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload.as_slice(), b"beep");
    assert!(!acks[0].retained);
    drop(acks);
    assert!(harness.recorded(DeviceEventKind::BeeperStarted));

    let beeper = |harness: &Harness| harness.device.board().outputs.level(OutputId::Beeper);
    assert_eq!(beeper(&harness), Level::Low);
    harness.run_for(490);
    assert_eq!(beeper(&harness), Level::Low, "silent for the first 500 ms");
    harness.run_for(10);
    assert_eq!(beeper(&harness), Level::High);
    harness.run_for(240);
    assert_eq!(beeper(&harness), Level::High);
    harness.run_for(10);
    assert_eq!(beeper(&harness), Level::Low);

    harness.run_for(2_000);
    assert_eq!(beeper(&harness), Level::Low, "the beep does not repeat");
    assert_eq!(harness.broker().sent_on("devices/esp01/get/beeper").count(), 1);
}

#[test]
fn prefixed_or_malformed_topics_are_rejected() {
    let mut harness = Harness::connected();
    harness.deliver("set/pingx", "ping");
    harness.deliver("set/ping/extra", "ping");
    harness.deliver("set/ping", "pong");
    harness.tick();

    assert_eq!(harness.broker().sent_on("devices/esp01/get/ping").count(), 0);
    assert!(harness.recorded(DeviceEventKind::CommandRejected(DecodeError::UnknownTopic)));
    assert!(harness.recorded(DeviceEventKind::CommandRejected(
        DecodeError::UnexpectedPayload
    )));
}

#[test]
fn port1_open_pulses_and_port1_close_is_rejected() {
    let mut harness = Harness::connected();
    harness.deliver("set/port1", "open");
    harness.tick();
    let opened_at = harness.now;

    let pins = &harness.device.board().outputs;
    assert_eq!(pins.level(OutputId::Port1), Level::High);
    assert_eq!(pins.level(OutputId::Beeper), Level::Low, "beep starts low");
    let acks: Vec<&Sent, 2> = harness.broker().sent_on("devices/esp01/get/port1").collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload.as_slice(), b"open");
    assert!(!acks[0].retained);
    drop(acks);

    harness.run_for(490 - TICK);
    assert_eq!(harness.now, opened_at + 480);
    assert_eq!(harness.device.board().outputs.level(OutputId::Port1), Level::High);
    harness.run_for(2 * TICK);
    assert_eq!(harness.device.board().outputs.level(OutputId::Port1), Level::Low);
    assert!(harness.recorded(DeviceEventKind::PortReleased(PortId::Port1)));

    harness.deliver("set/port1", "close");
    harness.tick();
    assert_eq!(harness.broker().sent_on("devices/esp01/get/port1").count(), 1);
    assert!(harness.recorded(DeviceEventKind::CommandRejected(
        DecodeError::UnsupportedAction {
            port: PortId::Port1,
            action: PortAction::Close,
        }
    )));
}

#[test]
fn port2_state_is_published_retained() {
    let mut harness = Harness::connected();
    harness.deliver("set/port2", "open");
    harness.tick();
    assert_eq!(harness.device.board().outputs.level(OutputId::Port2), Level::High);

    harness.deliver("set/port2", "close");
    harness.tick();
    assert_eq!(harness.device.board().outputs.level(OutputId::Port2), Level::Low);

    let acks: Vec<&Sent, 4> = harness.broker().sent_on("devices/esp01/get/port2").collect();
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[0].payload.as_slice(), b"open");
    assert_eq!(acks[1].payload.as_slice(), b"close");
    assert!(acks.iter().all(|ack| ack.retained));
}

#[test]
fn sensor_request_publishes_json_report() {
    let mut harness = Harness::connected();
    harness.deliver("set/sensor_data", "data");
    harness.tick();

    let reports: Vec<&Sent, 2> = harness
        .broker()
        .sent_on("devices/esp01/get/sensor_data")
        .collect();
    assert_eq!(reports.len(), 1);
    let body = core::str::from_utf8(&reports[0].payload).expect("utf8");
    assert!(body.starts_with(r#"{"Temp":"21.50","TempUnit":"C","Hum":"40.00","Time":""#));
}

#[test]
fn reports_switch_to_calendar_time_once_synced() {
    let mut harness = Harness::connected();
    harness.deliver("set/sensor_data", "data");
    harness.tick();
    let before = harness
        .broker()
        .sent_on("devices/esp01/get/sensor_data")
        .last()
        .expect("report");
    let body = core::str::from_utf8(&before.payload).expect("utf8");
    assert!(body.contains(r#""Time":"0:00:00:"#), "uptime until synced: {body}");

    // 2024-03-01T07:00:00Z, shown at the default UTC+5 offset.
    let now = Instant::from_millis(harness.now);
    harness
        .device
        .board_mut()
        .wall_clock
        .sync(TimeAnchor::new(now, 1_709_276_400));
    harness.deliver("set/sensor_data", "data");
    harness.tick();
    let after = harness
        .broker()
        .sent_on("devices/esp01/get/sensor_data")
        .last()
        .expect("report");
    let body = core::str::from_utf8(&after.payload).expect("utf8");
    assert!(body.ends_with(r#""Time":"01-Mar-2024 12:00:00"}"#), "{body}");

    harness.device.board_mut().sensor.result = Err(SensorError::NotANumber);
    harness.deliver("set/sensor_data", "data");
    harness.tick();
    let log = harness
        .broker()
        .sent_on("devices/esp01/log")
        .last()
        .expect("log line");
    let line = core::str::from_utf8(&log.payload).expect("utf8");
    assert!(line.starts_with("01-Mar-2024 12:00:00 | "), "{line}");
}

#[test]
fn sensor_failure_is_logged_remotely() {
    let mut harness = Harness::connected();
    harness.device.board_mut().sensor.result = Err(SensorError::NotANumber);
    harness.deliver("set/sensor_data", "data");
    harness.tick();

    assert_eq!(
        harness.broker().sent_on("devices/esp01/get/sensor_data").count(),
        0
    );
    let log = harness
        .broker()
        .sent_on("devices/esp01/log")
        .last()
        .expect("log line");
    let line = core::str::from_utf8(&log.payload).expect("utf8");
    assert!(line.ends_with("ERR: failed to read from sensor (sensor returned NaN)"));
}

#[test]
fn invalid_port_text_uses_default_port() {
    let mut harness = Harness::boot_with("eighteen");
    harness.run_until(|device| device.supervisor().is_connected(), 10_000);
    assert_eq!(harness.broker().last_port, 1883);
    assert!(harness.recorded(DeviceEventKind::PortDefaulted(1883)));
}

#[test]
fn broker_loss_rejoins_broker_without_rejoining_network() {
    let mut harness = Harness::connected();
    assert_eq!(harness.device.board().network.joins, 1);

    harness.device.board_mut().client.connected = false;
    harness.tick();
    assert_eq!(
        harness.device.supervisor().state(),
        ConnectionState::NetworkJoined
    );
    assert!(harness.recorded(DeviceEventKind::BrokerLost));

    harness.run_until(|device| device.supervisor().is_connected(), 5_000);
    assert_eq!(harness.device.board().network.joins, 1);
    assert_eq!(harness.broker().connects, 2);
    assert_eq!(harness.broker().subscriptions, 10);
}

#[test]
fn link_loss_forces_full_rejoin() {
    let mut harness = Harness::connected();
    harness.device.board_mut().network.up = false;
    harness.tick();

    assert_eq!(
        harness.device.supervisor().state(),
        ConnectionState::Disconnected
    );
    assert!(!harness.device.status().ready_blinking);
    assert_eq!(harness.device.board().outputs.level(OutputId::StatusLed), Level::Low);

    harness.run_until(|device| device.supervisor().is_connected(), 10_000);
    assert_eq!(harness.device.board().network.joins, 2);
    assert_eq!(harness.broker().subscriptions, 10);
}

#[test]
fn uptime_is_published_every_minute_while_connected() {
    let mut harness = Harness::connected();
    let before = harness.broker().sent_on("devices/esp01/uptime").count();
    harness.run_for(60_000);
    let after = harness.broker().sent_on("devices/esp01/uptime").count();
    assert_eq!(after, before + 1);
    assert!(harness.broker().sent_on("devices/esp01/uptime").all(|sent| sent.retained));
}

#[test]
fn long_press_wipes_settings_and_restarts() {
    let mut harness = Harness::connected();
    harness.device.board_mut().inputs.levels[InputId::Button1.as_index()] = Level::Low;
    harness.run_for(8_100);
    harness.device.board_mut().inputs.levels[InputId::Button1.as_index()] = Level::High;
    harness.run_for(100);

    assert!(harness.recorded(DeviceEventKind::ResetRequested(ResetTrigger::LongPress)));
    assert_eq!(harness.device.mode(), DeviceMode::ResetPending);
    assert_eq!(
        harness.device.board().outputs.level(OutputId::Port1),
        Level::Low,
        "a long press never opens port 1"
    );

    harness.run_until(|device| device.mode() == DeviceMode::Restarting, 2_000);
    let board = harness.device.board();
    assert_eq!(board.system.count, 1);
    assert!(board.network.forgotten);
    assert_eq!(board.store.stored(), Some(&ConfigFields::default()));
}

#[test]
fn short_press_pulses_port1() {
    let mut harness = Harness::boot();
    harness.device.board_mut().inputs.levels[InputId::Button1.as_index()] = Level::Low;
    harness.run_for(200);
    harness.device.board_mut().inputs.levels[InputId::Button1.as_index()] = Level::High;
    harness.run_for(50);

    assert_eq!(harness.device.mode(), DeviceMode::Running);
    assert!(harness.device.status().port1_asserted);
    assert_eq!(harness.device.board().outputs.level(OutputId::Port1), Level::High);
}

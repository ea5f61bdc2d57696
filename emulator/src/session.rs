use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use node_core::calendar::{AnchoredClock, TimeAnchor};
use node_core::clock::{ManualClock, Milliseconds, MonotonicClock};
use node_core::config::{ConfigFields, DeviceConfig, MemoryConfigStore};
use node_core::debounce::{DEBOUNCE_WINDOW, InputId, InputReader};
use node_core::device::{Board, Device, DeviceMode, Platform, SystemControl};
use node_core::pattern::{ALL_OUTPUTS, Level, OutputDriver, OutputId};
use node_core::sensor::{Reading, SensorError, SensorSource};
use node_core::supervisor::{
    ClientError, ConnectError, InboundMessage, JoinError, LinkInfo, MessagingClient,
    NetworkJoiner,
};
use node_core::telemetry::EventId;

/// Simulated time advanced per device tick.
pub const TICK: Milliseconds = Milliseconds::new(10);

const DEFAULT_PRESS_MS: u32 = 200;
const STATION_ADDRESS: [u8; 4] = [192, 168, 4, 2];

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("advance", "advance <ms|Ns>              - run the device loop forward"),
    ("press", "press <1|2> [hold ms]          - press and release a button"),
    ("msg", "msg <suffix> [payload]         - deliver a message under the topic base"),
    ("raw", "raw <topic> [payload]          - deliver a message on an exact topic"),
    ("link", "link <up|down>                 - make the access point reachable or drop it"),
    ("broker", "broker <up|down>               - make the broker reachable or drop the session"),
    ("sensor", "sensor <temp> <humidity>|fail  - set the next sensor sample"),
    ("status", "status                         - show connection and output state"),
    ("help", "help [topic]                   - show help for a command"),
];

/// How a response line should be presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineKind {
    Info,
    Event,
    Error,
    Published,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Line {
    pub kind: LineKind,
    pub text: String,
}

impl Line {
    fn info(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Info,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Error,
            text: text.into(),
        }
    }
}

#[derive(Default)]
pub struct SimOutputs {
    levels: [Level; ALL_OUTPUTS.len()],
}

impl SimOutputs {
    #[must_use]
    pub fn level(&self, output: OutputId) -> Level {
        self.levels[output.as_index()]
    }
}

impl OutputDriver for SimOutputs {
    fn write(&mut self, output: OutputId, level: Level) {
        self.levels[output.as_index()] = level;
    }
}

pub struct SimButtons {
    levels: [Level; 2],
}

impl Default for SimButtons {
    fn default() -> Self {
        Self {
            levels: [Level::High; 2],
        }
    }
}

impl SimButtons {
    fn set(&mut self, input: InputId, level: Level) {
        self.levels[input.as_index()] = level;
    }
}

impl InputReader for SimButtons {
    fn level(&mut self, input: InputId) -> Level {
        self.levels[input.as_index()]
    }
}

pub struct SimStation {
    available: bool,
    up: bool,
    joins: u32,
    forgotten: bool,
}

impl Default for SimStation {
    fn default() -> Self {
        Self {
            available: true,
            up: false,
            joins: 0,
            forgotten: false,
        }
    }
}

impl NetworkJoiner for SimStation {
    fn join(&mut self, _timeout: Milliseconds) -> Result<LinkInfo, JoinError> {
        if self.forgotten {
            return Err(JoinError::NoCredentials);
        }
        self.joins += 1;
        if !self.available {
            return Err(JoinError::Timeout);
        }
        self.up = true;
        Ok(LinkInfo::new(STATION_ADDRESS))
    }

    fn is_link_up(&self) -> bool {
        self.up
    }

    fn current_identity(&self) -> &str {
        "edge-node-sim"
    }

    fn forget_credentials(&mut self) {
        self.forgotten = true;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

pub struct SimBroker {
    reachable: bool,
    connected: bool,
    connects: u32,
    subscriptions: Vec<String>,
    inbox: VecDeque<InboundMessage>,
    published: Vec<Published>,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self {
            reachable: true,
            connected: false,
            connects: 0,
            subscriptions: Vec::new(),
            inbox: VecDeque::new(),
            published: Vec::new(),
        }
    }
}

impl MessagingClient for SimBroker {
    fn connect(&mut self, _host: &str, _port: u16, _user: &str, _pass: &str) -> Result<(), ConnectError> {
        self.connects += 1;
        if !self.reachable {
            return Err(ConnectError::Unreachable);
        }
        self.connected = true;
        self.subscriptions.clear();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        self.subscriptions.push(topic.to_owned());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        self.published.push(Published {
            topic: topic.to_owned(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retained,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbox.pop_front()
    }
}

pub struct SimSensor {
    sample: Result<Reading, SensorError>,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self {
            sample: Reading::new(22.5, 48.0),
        }
    }
}

impl SensorSource for SimSensor {
    fn read_temperature_and_humidity(&mut self) -> Result<Reading, SensorError> {
        self.sample
    }
}

#[derive(Default)]
pub struct SimSystem {
    restarts: u32,
}

impl SystemControl for SimSystem {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

pub struct Simulated;

impl Platform for Simulated {
    type Outputs = SimOutputs;
    type Inputs = SimButtons;
    type Network = SimStation;
    type Client = SimBroker;
    type Sensor = SimSensor;
    type Store = MemoryConfigStore;
    type System = SimSystem;
    type WallClock = AnchoredClock;
}

/// Startup options for a session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub host: Option<String>,
    pub port: Option<String>,
    pub hold_button1: bool,
    /// Anchor the wall clock to the host clock at boot.
    pub sync_time: bool,
    pub transcript: Option<PathBuf>,
}

pub struct Session {
    device: Device<Simulated>,
    clock: ManualClock,
    last_event: Option<EventId>,
    published_seen: usize,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let store = match &options.host {
            Some(host) => {
                let port = options.port.as_deref().unwrap_or("1883");
                let fields = ConfigFields::new(host, port, "", "")
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
                MemoryConfigStore::with_fields(fields)
            }
            None => MemoryConfigStore::empty(),
        };

        let mut inputs = SimButtons::default();
        if options.hold_button1 {
            inputs.set(InputId::Button1, Level::Low);
        }

        let mut board: Board<Simulated> = Board {
            outputs: SimOutputs::default(),
            inputs,
            network: SimStation::default(),
            client: SimBroker::default(),
            sensor: SimSensor::default(),
            store,
            system: SimSystem::default(),
            wall_clock: AnchoredClock::unsynced(),
        };

        let clock = ManualClock::new();
        if let Some(unix_seconds) = options.sync_time.then(host_unix_seconds).flatten() {
            board.wall_clock.sync(TimeAnchor::new(clock.now(), unix_seconds));
        }
        let device = Device::boot(board, DeviceConfig::new(), clock.now());
        let mut session = Self {
            device,
            clock,
            last_event: None,
            published_seen: 0,
            transcript,
        };
        session.device.board_mut().inputs.set(InputId::Button1, Level::High);
        Ok(session)
    }

    /// Lines produced since the last call, without running the loop.
    pub fn drain(&mut self) -> Vec<Line> {
        let mut lines = Vec::new();
        for record in self.device.telemetry().newer_than(self.last_event) {
            let kind = if record.event.is_error() {
                LineKind::Error
            } else {
                LineKind::Event
            };
            lines.push(Line {
                kind,
                text: record.to_string(),
            });
            self.last_event = Some(record.id);
        }

        let published = &self.device.board().client.published;
        for message in published.iter().skip(self.published_seen) {
            let retained = if message.retained { " (retained)" } else { "" };
            lines.push(Line {
                kind: LineKind::Published,
                text: format!("pub {} {}{retained}", message.topic, message.payload),
            });
        }
        self.published_seen = published.len();
        lines
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Line>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let elapsed = self.clock.now().as_millis();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let mut lines = match verb.as_str() {
            "help" => help(args.first().copied()),
            "status" => self.status_lines(),
            "advance" | "wait" => match args.first().map(|arg| parse_span(arg)) {
                Some(Some(span)) => {
                    self.advance(span);
                    Vec::new()
                }
                _ => vec![Line::error("ERR usage: advance <ms|Ns>")],
            },
            "press" => self.press(&args),
            "msg" => self.deliver_relative(&args, trimmed),
            "raw" => self.deliver_raw(&args, trimmed),
            "link" => self.set_link(args.first().copied()),
            "broker" => self.set_broker(args.first().copied()),
            "sensor" => self.set_sensor(&args),
            _ => vec![Line::error(format!("ERR unknown command `{verb}`"))],
        };
        lines.extend(self.drain());

        if let Some(transcript) = self.transcript.as_mut() {
            let elapsed = self.clock.now().as_millis();
            for line in &lines {
                transcript.append_line(elapsed, TranscriptRole::Node, &line.text)?;
            }
        }
        Ok(lines)
    }

    /// Runs the loop for `span`, one tick at a time.
    pub fn advance(&mut self, span: Milliseconds) {
        let mut remaining = span.as_u32();
        while remaining > 0 {
            let step = remaining.min(TICK.as_u32());
            let now = self.clock.advance(Milliseconds::new(step));
            self.device.tick(now);
            remaining -= step;
        }
    }

    #[must_use]
    pub fn device(&self) -> &Device<Simulated> {
        &self.device
    }

    fn press(&mut self, args: &[&str]) -> Vec<Line> {
        let input = match args.first().copied() {
            Some("1") => InputId::Button1,
            Some("2") => InputId::Button2,
            _ => return vec![Line::error("ERR usage: press <1|2> [hold ms]")],
        };
        let hold = match args.get(1) {
            Some(arg) => match parse_span(arg) {
                Some(span) => span,
                None => return vec![Line::error(format!("ERR invalid hold `{arg}`"))],
            },
            None => Milliseconds::new(DEFAULT_PRESS_MS),
        };

        self.device.board_mut().inputs.set(input, Level::Low);
        self.advance(hold);
        self.device.board_mut().inputs.set(input, Level::High);
        self.advance(Milliseconds::new(DEBOUNCE_WINDOW.as_u32() + TICK.as_u32()));
        Vec::new()
    }

    fn deliver_relative(&mut self, args: &[&str], line: &str) -> Vec<Line> {
        let Some(suffix) = args.first() else {
            return vec![Line::error("ERR usage: msg <suffix> [payload]")];
        };
        let topic = format!("{}/{}", self.device.topics().base(), suffix);
        let payload = payload_after(line, 2);
        self.deliver(&topic, payload)
    }

    fn deliver_raw(&mut self, args: &[&str], line: &str) -> Vec<Line> {
        let Some(topic) = args.first() else {
            return vec![Line::error("ERR usage: raw <topic> [payload]")];
        };
        let payload = payload_after(line, 2);
        self.deliver(topic, payload)
    }

    fn deliver(&mut self, topic: &str, payload: &str) -> Vec<Line> {
        let broker = &mut self.device.board_mut().client;
        if !broker.connected {
            return vec![Line::error("ERR broker session is down")];
        }
        match InboundMessage::new(topic, payload.as_bytes()) {
            Ok(message) => broker.inbox.push_back(message),
            Err(err) => return vec![Line::error(format!("ERR {err}"))],
        }
        self.advance(TICK);
        Vec::new()
    }

    fn set_link(&mut self, state: Option<&str>) -> Vec<Line> {
        let station = &mut self.device.board_mut().network;
        match state {
            Some("up") => station.available = true,
            Some("down") => {
                station.available = false;
                station.up = false;
                self.device.board_mut().client.connected = false;
            }
            _ => return vec![Line::error("ERR usage: link <up|down>")],
        }
        self.advance(TICK);
        Vec::new()
    }

    fn set_broker(&mut self, state: Option<&str>) -> Vec<Line> {
        let broker = &mut self.device.board_mut().client;
        match state {
            Some("up") => broker.reachable = true,
            Some("down") => {
                broker.reachable = false;
                broker.connected = false;
            }
            _ => return vec![Line::error("ERR usage: broker <up|down>")],
        }
        self.advance(TICK);
        Vec::new()
    }

    fn set_sensor(&mut self, args: &[&str]) -> Vec<Line> {
        let sample = match args {
            ["fail"] => Err(SensorError::Timeout),
            [temperature, humidity] => {
                match (temperature.parse::<f32>(), humidity.parse::<f32>()) {
                    (Ok(temperature), Ok(humidity)) => Reading::new(temperature, humidity),
                    _ => return vec![Line::error("ERR sensor values must be numbers")],
                }
            }
            _ => return vec![Line::error("ERR usage: sensor <temp> <humidity>|fail")],
        };
        self.device.board_mut().sensor.sample = sample;
        vec![Line::info("sensor sample updated")]
    }

    fn status_lines(&self) -> Vec<Line> {
        let status = self.device.status();
        let board = self.device.board();
        let broker = self.device.broker_settings();
        let mode = match status.mode {
            DeviceMode::Running => "running",
            DeviceMode::ResetPending => "reset pending",
            DeviceMode::Restarting => "restarting",
        };
        let outputs = ALL_OUTPUTS
            .iter()
            .map(|line| {
                let level = if board.outputs.level(line.id).is_high() {
                    "on"
                } else {
                    "off"
                };
                format!("{}={level}", line.name)
            })
            .collect::<Vec<_>>()
            .join(" ");
        let host = if broker.has_host() {
            broker.host.as_str()
        } else {
            "<unset>"
        };

        vec![
            Line::info(format!("mode: {mode}, uptime {}", status.uptime)),
            Line::info(format!(
                "connection: {} (failures {})",
                status.connection.state, status.connection.consecutive_failures
            )),
            Line::info(format!(
                "broker: {host} port `{}`, joins {}, connects {}, subscriptions {}",
                broker.port.as_str(),
                board.network.joins,
                board.client.connects,
                board.client.subscriptions.len()
            )),
            Line::info(format!("outputs: {outputs}")),
            Line::info(format!(
                "port1 asserted: {}, port2 open: {}, restarts: {}",
                status.port1_asserted, status.port2_open, board.system.restarts
            )),
        ]
    }
}

fn help(topic: Option<&str>) -> Vec<Line> {
    match topic {
        None => HELP_TOPICS
            .iter()
            .map(|(_, usage)| Line::info(*usage))
            .collect(),
        Some(topic) => match HELP_TOPICS.iter().find(|(name, _)| name.eq_ignore_ascii_case(topic)) {
            Some((_, usage)) => vec![Line::info(*usage)],
            None => vec![Line::error(format!("ERR no help for `{topic}`"))],
        },
    }
}

/// Parses `250`, `250ms`, or `3s`.
fn parse_span(text: &str) -> Option<Milliseconds> {
    if let Some(secs) = text.strip_suffix("ms") {
        return secs.parse().ok().map(Milliseconds::new);
    }
    if let Some(secs) = text.strip_suffix('s') {
        let secs: u32 = secs.parse().ok()?;
        return secs.checked_mul(1_000).map(Milliseconds::new);
    }
    text.parse().ok().map(Milliseconds::new)
}

/// Remainder of `line` after the first `words` words.
fn payload_after(line: &str, words: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..words {
        rest = rest
            .find(char::is_whitespace)
            .map_or("", |index| rest[index..].trim_start());
    }
    rest
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Node,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => ">",
            TranscriptRole::Node => "<",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# edge-node emulator transcript")?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed_ms: u32, role: TranscriptRole, text: &str) -> io::Result<()> {
        writeln!(self.writer, "[{elapsed_ms:>10}ms] {} {text}", role.prefix())?;
        self.writer.flush()
    }
}

fn host_unix_seconds() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|since| since.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_core::supervisor::ConnectionState;

    fn connected_session() -> Session {
        let options = SessionOptions {
            host: Some("broker.local".to_owned()),
            ..SessionOptions::default()
        };
        let mut session = Session::new(&options).expect("session");
        session.advance(Milliseconds::from_secs(10));
        assert_eq!(
            session.device().supervisor().state(),
            ConnectionState::Connected
        );
        session.drain();
        session
    }

    fn texts(lines: &[Line], kind: LineKind) -> Vec<String> {
        lines
            .iter()
            .filter(|line| line.kind == kind)
            .map(|line| line.text.clone())
            .collect()
    }

    #[test]
    fn boot_connects_and_announces_ready() {
        let options = SessionOptions {
            host: Some("broker.local".to_owned()),
            ..SessionOptions::default()
        };
        let mut session = Session::new(&options).expect("session");
        let lines = session.handle_command("advance 10s").expect("advance");

        let events = texts(&lines, LineKind::Event);
        assert!(events.iter().any(|text| text.ends_with("system ready")));
        let published = texts(&lines, LineKind::Published);
        assert!(published.iter().any(|text| text.starts_with("pub devices/esp01/uptime ")));
    }

    #[test]
    fn ping_message_is_answered() {
        let mut session = connected_session();
        let lines = session.handle_command("msg set/ping").expect("msg");
        let published = texts(&lines, LineKind::Published);
        assert!(published.contains(&"pub devices/esp01/get/ping pong".to_owned()));
    }

    #[test]
    fn port2_button_publishes_retained_state() {
        let mut session = connected_session();
        let lines = session.handle_command("press 2").expect("press");
        let published = texts(&lines, LineKind::Published);
        assert!(published.contains(&"pub devices/esp01/get/port2 open (retained)".to_owned()));
        assert!(session.device().status().port2_open);
    }

    #[test]
    fn dropped_link_is_rejoined_once_available() {
        let mut session = connected_session();
        session.handle_command("link down").expect("link");
        session.advance(Milliseconds::from_secs(5));
        assert_ne!(
            session.device().supervisor().state(),
            ConnectionState::Connected
        );

        session.handle_command("link up").expect("link");
        session.advance(Milliseconds::from_secs(10));
        assert_eq!(
            session.device().supervisor().state(),
            ConnectionState::Connected
        );
        assert!(session.device().board().network.joins >= 2);
    }

    #[test]
    fn missing_broker_host_never_connects() {
        let mut session = Session::new(&SessionOptions::default()).expect("session");
        let lines = session.handle_command("advance 5s").expect("advance");
        assert!(!texts(&lines, LineKind::Error).is_empty());
        assert_eq!(session.device().board().client.connects, 0);
    }

    #[test]
    fn unknown_commands_report_an_error() {
        let mut session = connected_session();
        let lines = session.handle_command("launch rockets").expect("command");
        assert_eq!(lines, vec![Line::error("ERR unknown command `launch`")]);
    }

    #[test]
    fn spans_accept_units() {
        assert_eq!(parse_span("250"), Some(Milliseconds::new(250)));
        assert_eq!(parse_span("250ms"), Some(Milliseconds::new(250)));
        assert_eq!(parse_span("3s"), Some(Milliseconds::new(3_000)));
        assert_eq!(parse_span("soon"), None);
    }

    #[test]
    fn payload_keeps_inner_spacing() {
        assert_eq!(payload_after("msg set/port1 open", 2), "open");
        assert_eq!(payload_after("raw a/b  hello  world", 2), "hello  world");
        assert_eq!(payload_after("msg set/ping", 2), "");
    }

    #[test]
    fn synced_session_stamps_reports_with_calendar_time() {
        let options = SessionOptions {
            host: Some("broker.local".to_owned()),
            sync_time: true,
            ..SessionOptions::default()
        };
        let mut session = Session::new(&options).expect("session");
        session.advance(Milliseconds::from_secs(10));
        session.drain();

        let lines = session.handle_command("msg set/sensor_data data").expect("msg");
        let published = texts(&lines, LineKind::Published);
        let report = published
            .iter()
            .find(|text| text.starts_with("pub devices/esp01/get/sensor_data "))
            .expect("sensor report");
        assert!(report.contains(r#""Time":""#));
        assert!(!report.contains(r#""Time":"0:"#), "{report}");
    }
}

//! The cooperative main loop tying every component together.
//!
//! [`Device::tick`] runs one pass in a fixed order: uptime sample, output
//! patterns, reset handling, buttons, connectivity, inbound commands, then
//! periodic reports. No step blocks, so a platform only has to call `tick`
//! often (every few milliseconds) and yield in between.

use core::fmt::Write as _;

use heapless::String;

use crate::calendar::Timestamp;
use crate::clock::{Instant, MonotonicClock};
use crate::commands::{Command, DecodeError, PortAction, PortId, Topic, TopicTree};
use crate::config::{ConfigFields, ConfigStore, DeviceConfig};
use crate::debounce::{ButtonEvent, DebouncedInput, InputId, InputReader, PressKind};
use crate::pattern::{
    BEEP_TEMPLATE, CONFIRM_TEMPLATE, Level, OutputDriver, OutputId, PING_TEMPLATE,
    PatternPlayer, READY_TEMPLATE,
};
use crate::sensor::SensorSource;
use crate::supervisor::{
    ClientError, ConnectivitySupervisor, Links, MessagingClient, NetworkJoiner, SupervisorEvent,
    SupervisorStatus,
};
use crate::telemetry::{DeviceEventKind, ResetTrigger, TelemetryRecorder};
use crate::timer::OneShotTimer;
use crate::uptime::{RolloverSafeUptime, UptimeSnapshot};

mod board;

pub use board::{Board, Platform, SystemControl};

/// Name and version announced with "system ready".
pub const FIRMWARE_BANNER: &str = concat!("edge-node v", env!("CARGO_PKG_VERSION"));

/// Inbound messages handled per tick; the rest wait in the client queue.
pub const MAX_MESSAGES_PER_TICK: usize = 4;

const LOG_LINE_CAPACITY: usize = 160;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceMode {
    Running,
    /// Settings reset requested; waiting for the confirmation blink to end.
    ResetPending,
    /// Restart was requested from the platform.
    Restarting,
}

/// Point-in-time view for status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceStatus {
    pub mode: DeviceMode,
    pub connection: SupervisorStatus,
    pub uptime: UptimeSnapshot,
    pub port2_open: bool,
    pub port1_asserted: bool,
    pub ready_blinking: bool,
}

pub struct Device<P: Platform> {
    config: DeviceConfig,
    topics: TopicTree,
    board: Board<P>,
    broker: ConfigFields,
    uptime: RolloverSafeUptime,
    ready: PatternPlayer,
    ping: PatternPlayer,
    beeper: PatternPlayer,
    confirm: PatternPlayer,
    port1_release: OneShotTimer,
    uptime_report: OneShotTimer,
    sensor_report: OneShotTimer,
    button1: DebouncedInput,
    button2: DebouncedInput,
    port2_open: bool,
    supervisor: ConnectivitySupervisor,
    telemetry: TelemetryRecorder,
    mode: DeviceMode,
    announced: bool,
}

impl<P: Platform> Device<P> {
    /// Brings the node up: idle outputs, stored broker settings, report
    /// timers, and the boot-time reset check on button 1.
    #[must_use]
    pub fn boot(board: Board<P>, config: DeviceConfig, now: Instant) -> Self {
        let mut device = Self {
            config,
            topics: TopicTree::new(config.topic_base),
            board,
            broker: ConfigFields::default(),
            uptime: RolloverSafeUptime::new(now),
            ready: PatternPlayer::new(READY_TEMPLATE),
            ping: PatternPlayer::new(PING_TEMPLATE),
            beeper: PatternPlayer::new(BEEP_TEMPLATE),
            confirm: PatternPlayer::new(CONFIRM_TEMPLATE),
            port1_release: OneShotTimer::new(),
            uptime_report: OneShotTimer::periodic(),
            sensor_report: OneShotTimer::periodic(),
            button1: DebouncedInput::new(now, Level::High, Level::Low, config.debounce_window),
            button2: DebouncedInput::new(now, Level::High, Level::Low, config.debounce_window),
            port2_open: false,
            supervisor: ConnectivitySupervisor::new(config.supervisor),
            telemetry: TelemetryRecorder::new(),
            mode: DeviceMode::Running,
            announced: false,
        };

        device.board.release_outputs();
        device.record(now, DeviceEventKind::Boot);

        match device.board.store.load() {
            Ok(fields) => device.broker = fields,
            Err(err) => device.record(now, DeviceEventKind::ConfigLoadFailed(err)),
        }

        device.uptime_report.start(now, config.uptime_interval);
        device.sensor_report.start(now, config.sensor_interval);

        if device.board.inputs.level(InputId::Button1) == Level::Low {
            device.begin_reset(now, ResetTrigger::BootButton);
        }

        device
    }

    /// Runs one pass of the loop.
    pub fn tick(&mut self, now: Instant) {
        self.uptime.update(now);
        self.advance_patterns(now);

        match self.mode {
            DeviceMode::Running => {}
            DeviceMode::ResetPending => {
                if !self.confirm.is_armed() {
                    self.finish_reset(now);
                }
                return;
            }
            DeviceMode::Restarting => return,
        }

        self.poll_buttons(now);
        if self.mode != DeviceMode::Running {
            return;
        }

        self.drive_supervisor(now);
        self.dispatch_inbound(now);
        self.dispatch_timers(now);
    }

    /// Convenience for platforms that own a [`MonotonicClock`].
    pub fn tick_with<C: MonotonicClock>(&mut self, clock: &C) {
        self.tick(clock.now());
    }

    /// Forwards an out-of-band link drop to the supervisor.
    pub fn on_link_lost(&mut self) {
        self.supervisor.on_link_lost();
    }

    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            mode: self.mode,
            connection: self.supervisor.status(),
            uptime: self.uptime.snapshot(),
            port2_open: self.port2_open,
            port1_asserted: self.port1_release.is_armed(),
            ready_blinking: self.ready.is_armed(),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> DeviceMode {
        self.mode
    }

    #[must_use]
    pub const fn supervisor(&self) -> &ConnectivitySupervisor {
        &self.supervisor
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub const fn broker_settings(&self) -> &ConfigFields {
        &self.broker
    }

    #[must_use]
    pub const fn topics(&self) -> &TopicTree {
        &self.topics
    }

    #[must_use]
    pub const fn uptime(&self) -> &RolloverSafeUptime {
        &self.uptime
    }

    #[must_use]
    pub const fn board(&self) -> &Board<P> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<P> {
        &mut self.board
    }

    fn advance_patterns(&mut self, now: Instant) {
        let outputs = &mut self.board.outputs;
        let ping_was_armed = self.ping.is_armed();

        self.ready.advance(now, outputs);
        self.ping.advance(now, outputs);
        self.beeper.advance(now, outputs);
        self.confirm.advance(now, outputs);
        if self.mode == DeviceMode::Running {
            self.supervisor.advance_patterns(now, outputs);
        }

        // The ready blink resumes once the ping acknowledgement is done.
        if ping_was_armed && !self.ping.is_armed() && self.supervisor.is_connected() {
            self.ready.start(now, outputs);
        }
    }

    fn poll_buttons(&mut self, now: Instant) {
        let raw = self.board.inputs.level(InputId::Button1);
        if let Some(ButtonEvent::Released { held_for }) = self.button1.poll(now, raw) {
            let kind = PressKind::classify(held_for, self.config.long_press);
            self.record(now, DeviceEventKind::ButtonReleased(InputId::Button1, kind));
            match kind {
                PressKind::Short => self.open_port1(now),
                PressKind::Long => {
                    self.begin_reset(now, ResetTrigger::LongPress);
                    return;
                }
            }
        }

        let raw = self.board.inputs.level(InputId::Button2);
        if let Some(ButtonEvent::Released { held_for }) = self.button2.poll(now, raw) {
            let kind = PressKind::classify(held_for, self.config.long_press);
            self.record(now, DeviceEventKind::ButtonReleased(InputId::Button2, kind));
            self.set_port2(now, !self.port2_open);
        }
    }

    fn drive_supervisor(&mut self, now: Instant) {
        let was_connected = self.supervisor.is_connected();
        let mut links = Links {
            network: &mut self.board.network,
            client: &mut self.board.client,
        };
        let event = self.supervisor.advance(
            now,
            &mut links,
            &mut self.board.outputs,
            &self.broker,
            &self.topics,
        );

        if was_connected && !self.supervisor.is_connected() {
            self.quiet_status_led();
        }

        let Some(event) = event else {
            return;
        };
        match event {
            SupervisorEvent::NetworkJoinStarted => {
                self.record(now, DeviceEventKind::NetworkJoinStarted);
            }
            SupervisorEvent::NetworkJoined(info) => {
                self.record(now, DeviceEventKind::NetworkJoined(info));
            }
            SupervisorEvent::BrokerJoinStarted(resolution) => {
                if resolution.defaulted {
                    self.record(now, DeviceEventKind::PortDefaulted(resolution.port));
                }
                self.record(now, DeviceEventKind::BrokerJoinStarted(resolution.port));
            }
            SupervisorEvent::Connected => {
                self.record(now, DeviceEventKind::BrokerConnected);
                self.ready.start(now, &mut self.board.outputs);
                if !self.announced {
                    self.announced = true;
                    self.publish_uptime(now);
                    self.record(now, DeviceEventKind::SystemReady);
                }
            }
            SupervisorEvent::Failed(reason) => {
                self.record(now, DeviceEventKind::ConnectFailed(reason));
            }
            SupervisorEvent::LinkLost => self.record(now, DeviceEventKind::LinkLost),
            SupervisorEvent::BrokerLost => self.record(now, DeviceEventKind::BrokerLost),
        }
    }

    fn dispatch_inbound(&mut self, now: Instant) {
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let Some(message) = self.board.client.poll() else {
                break;
            };
            match self.topics.decode(&message.topic, &message.payload) {
                Ok(command) => {
                    self.record(now, DeviceEventKind::CommandReceived(command));
                    self.execute(now, command);
                }
                Err(err) => self.record(now, DeviceEventKind::CommandRejected(err)),
            }
        }
    }

    fn execute(&mut self, now: Instant, command: Command) {
        match command {
            Command::Ping => {
                self.publish(now, Topic::GetPing, b"pong", false);
                self.record(now, DeviceEventKind::PingReplied);
                self.publish_uptime(now);
                self.ready.stop();
                self.ping.start(now, &mut self.board.outputs);
            }
            Command::SensorData => self.report_sensor(now),
            Command::Beep => self.start_beeper(now),
            Command::Port {
                port: PortId::Port1,
                action: PortAction::Open,
            } => self.open_port1(now),
            Command::Port {
                port: PortId::Port1,
                action,
            } => self.record(
                now,
                DeviceEventKind::CommandRejected(DecodeError::UnsupportedAction {
                    port: PortId::Port1,
                    action,
                }),
            ),
            Command::Port {
                port: PortId::Port2,
                action,
            } => self.set_port2(now, action == PortAction::Open),
        }
    }

    fn dispatch_timers(&mut self, now: Instant) {
        if self.port1_release.poll(now) {
            self.board.outputs.write(OutputId::Port1, Level::Low);
            self.record(now, DeviceEventKind::PortReleased(PortId::Port1));
        }
        if self.uptime_report.poll(now) && self.supervisor.is_connected() {
            self.publish_uptime(now);
        }
        if self.sensor_report.poll(now) {
            self.report_sensor(now);
        }
    }

    /// Asserts port 1 for one pulse. A repeat open restarts the pulse.
    fn open_port1(&mut self, now: Instant) {
        self.board.outputs.write(OutputId::Port1, Level::High);
        self.port1_release.start(now, self.config.port1_pulse);
        self.start_beeper(now);
        self.publish(now, Topic::GetPort(PortId::Port1), PortAction::Open.as_str().as_bytes(), false);
        self.record(now, DeviceEventKind::PortOpened(PortId::Port1));
    }

    fn set_port2(&mut self, now: Instant, open: bool) {
        let action = if open { PortAction::Open } else { PortAction::Close };
        self.port2_open = open;
        self.board.outputs.write(OutputId::Port2, Level::from_bool(open));
        self.start_beeper(now);
        self.publish(now, Topic::GetPort(PortId::Port2), action.as_str().as_bytes(), true);
        let event = if open {
            DeviceEventKind::PortOpened(PortId::Port2)
        } else {
            DeviceEventKind::PortClosed(PortId::Port2)
        };
        self.record(now, event);
    }

    fn start_beeper(&mut self, now: Instant) {
        self.beeper.start(now, &mut self.board.outputs);
        self.publish(now, Topic::GetBeeper, b"beep", false);
        self.record(now, DeviceEventKind::BeeperStarted);
    }

    fn publish_uptime(&mut self, now: Instant) {
        let text = self.uptime.format();
        self.publish(now, Topic::Uptime, text.as_bytes(), true);
        self.record(now, DeviceEventKind::UptimeReported(self.uptime.snapshot()));
    }

    fn report_sensor(&mut self, now: Instant) {
        let reading = match self.board.sensor.read_temperature_and_humidity() {
            Ok(reading) => reading,
            Err(err) => {
                self.record(now, DeviceEventKind::SensorFailed(err));
                return;
            }
        };

        match reading.to_payload(self.timestamp(now)) {
            Ok(payload) => self.publish(now, Topic::GetSensorData, payload.as_bytes(), false),
            Err(_) => {
                self.telemetry.record(DeviceEventKind::PublishFailed(ClientError::TooLarge), now);
                return;
            }
        }
        self.record(
            now,
            DeviceEventKind::SensorReported {
                temperature_c: reading.temperature_c,
                humidity_pct: reading.humidity_pct,
            },
        );
    }

    /// Publishes while a session is up; silently skipped otherwise.
    fn publish(&mut self, now: Instant, topic: Topic, payload: &[u8], retained: bool) {
        if !self.supervisor.is_connected() || !self.board.client.is_connected() {
            return;
        }
        let result = self
            .topics
            .render(topic)
            .map_err(|_| ClientError::TooLarge)
            .and_then(|name| self.board.client.publish(&name, payload, retained));
        if let Err(err) = result {
            self.telemetry.record(DeviceEventKind::PublishFailed(err), now);
        }
    }

    fn record(&mut self, now: Instant, event: DeviceEventKind) {
        self.telemetry.record(event, now);
        if event.mirrors_remotely() && self.supervisor.is_connected() {
            self.mirror(now, event);
        }
    }

    /// Copies an event to the broker's log topic as "timestamp | text".
    fn mirror(&mut self, now: Instant, event: DeviceEventKind) {
        let mut line: String<LOG_LINE_CAPACITY> = String::new();
        let mut written = write!(line, "{} | {event}", self.timestamp(now));
        if event == DeviceEventKind::SystemReady {
            written = written.and_then(|()| {
                write!(
                    line,
                    " | {FIRMWARE_BANNER} | {}",
                    self.board.network.current_identity()
                )
            });
        }
        if written.is_err() {
            self.telemetry.record(DeviceEventKind::PublishFailed(ClientError::TooLarge), now);
            return;
        }
        self.publish(now, Topic::Log, line.as_bytes(), false);
    }

    /// Local calendar time once synced, uptime before that.
    fn timestamp(&self, now: Instant) -> Timestamp {
        Timestamp::resolve(
            &self.board.wall_clock,
            now,
            self.config.utc_offset_secs,
            self.uptime.snapshot(),
        )
    }

    fn quiet_status_led(&mut self) {
        if self.ready.is_armed() {
            self.ready.halt(&mut self.board.outputs);
        }
        if self.ping.is_armed() {
            self.ping.halt(&mut self.board.outputs);
        }
    }

    fn begin_reset(&mut self, now: Instant, trigger: ResetTrigger) {
        self.record(now, DeviceEventKind::ResetRequested(trigger));
        self.mode = DeviceMode::ResetPending;
        self.quiet_status_led();
        self.supervisor.halt_patterns(&mut self.board.outputs);
        self.confirm.start(now, &mut self.board.outputs);
    }

    fn finish_reset(&mut self, now: Instant) {
        let blank = ConfigFields::default();
        if let Err(err) = self.board.store.save(&blank) {
            self.record(now, DeviceEventKind::ConfigWipeFailed(err));
        }
        self.broker = blank;
        self.board.network.forget_credentials();
        self.record(now, DeviceEventKind::Restarting);
        self.mode = DeviceMode::Restarting;
        self.board.release_outputs();
        self.board.system.restart();
    }
}

//! Hardware and service bindings handed to the device loop.

use crate::calendar::WallClock;
use crate::config::ConfigStore;
use crate::debounce::InputReader;
use crate::pattern::{ALL_OUTPUTS, Level, OutputDriver};
use crate::sensor::SensorSource;
use crate::supervisor::{MessagingClient, NetworkJoiner};

/// Restart control for the settings-reset path.
pub trait SystemControl {
    /// Requests a restart. Hardware implementations do not return.
    fn restart(&mut self);
}

/// Bundle of concrete collaborator types for one target.
pub trait Platform {
    type Outputs: OutputDriver;
    type Inputs: InputReader;
    type Network: NetworkJoiner;
    type Client: MessagingClient;
    type Sensor: SensorSource;
    type Store: ConfigStore;
    type System: SystemControl;
    type WallClock: WallClock;
}

/// Owned collaborators. The device threads these into each component call;
/// nothing here is reachable through globals.
pub struct Board<P: Platform> {
    pub outputs: P::Outputs,
    pub inputs: P::Inputs,
    pub network: P::Network,
    pub client: P::Client,
    pub sensor: P::Sensor,
    pub store: P::Store,
    pub system: P::System,
    pub wall_clock: P::WallClock,
}

impl<P: Platform> Board<P> {
    /// Drives every output line to its idle level.
    pub fn release_outputs(&mut self) {
        for line in ALL_OUTPUTS {
            self.outputs.write(line.id, Level::Low);
        }
    }
}

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Broker settings baked in at build time.
//!
//! The board has no settings portal, so the broker fields come from
//! `EDGE_NODE_MQTT_*` environment variables captured when the image is built.
//! A save replaces them in RAM until the next restart.

use node_core::config::{ConfigError, ConfigFields, ConfigStore};

/// Station credentials captured at build time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WifiCredentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

/// Returns the build-time Wi-Fi credentials, if an SSID was provided.
#[must_use]
pub fn wifi_credentials() -> Option<WifiCredentials> {
    let ssid = option_env!("EDGE_NODE_WIFI_SSID")?;
    Some(WifiCredentials {
        ssid,
        password: option_env!("EDGE_NODE_WIFI_PASSWORD").unwrap_or(""),
    })
}

/// [`ConfigStore`] over build-time text with an in-RAM override.
#[derive(Clone, Debug)]
pub struct BuildConfigStore {
    host: Option<&'static str>,
    port: Option<&'static str>,
    user: Option<&'static str>,
    pass: Option<&'static str>,
    saved: Option<ConfigFields>,
}

impl BuildConfigStore {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_parts(
            option_env!("EDGE_NODE_MQTT_HOST"),
            option_env!("EDGE_NODE_MQTT_PORT"),
            option_env!("EDGE_NODE_MQTT_USER"),
            option_env!("EDGE_NODE_MQTT_PASS"),
        )
    }

    #[must_use]
    pub const fn from_parts(
        host: Option<&'static str>,
        port: Option<&'static str>,
        user: Option<&'static str>,
        pass: Option<&'static str>,
    ) -> Self {
        Self {
            host,
            port,
            user,
            pass,
            saved: None,
        }
    }
}

impl Default for BuildConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for BuildConfigStore {
    fn load(&mut self) -> Result<ConfigFields, ConfigError> {
        if let Some(saved) = &self.saved {
            return Ok(saved.clone());
        }
        let host = self.host.ok_or(ConfigError::Missing)?;
        ConfigFields::new(
            host,
            self.port.unwrap_or(""),
            self.user.unwrap_or(""),
            self.pass.unwrap_or(""),
        )
    }

    fn save(&mut self, fields: &ConfigFields) -> Result<(), ConfigError> {
        self.saved = Some(fields.clone());
        Ok(())
    }
}

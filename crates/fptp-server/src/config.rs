// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Server-mode configuration: the `serverMode` object of the service's
//! JSON document.

use serde::Deserialize;

use fptp_proto::{ServerStateDs, TimestampLevel};

/// Default UTC offset announced with hardware timestamps (TAI − UTC).
pub const DEFAULT_UTC_OFFSET: i16 = 37;
/// Default grandmaster priority 1.
pub const DEFAULT_PRIORITY_1: u8 = 128;
/// Default grandmaster clock class.
pub const DEFAULT_CLOCK_CLASS: u8 = 248;
/// Default grandmaster clock accuracy code.
pub const DEFAULT_CLOCK_ACCURACY: u8 = 0x2f;
/// Default grandmaster clock variance.
pub const DEFAULT_CLOCK_VARIANCE: u16 = 65535;
/// Default grandmaster priority 2.
pub const DEFAULT_PRIORITY_2: u8 = 128;
/// Default time source code.
pub const DEFAULT_TIME_SOURCE: u8 = 0x60;

/// The `serverMode` configuration object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerModeConfig {
    /// Whether server mode runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Grandmaster priority 1.
    pub priority1: Option<u8>,
    /// Grandmaster clock class.
    pub clock_class: Option<u8>,
    /// Grandmaster clock accuracy, hex string ("0x17".."0x31").
    pub clock_accuracy: Option<String>,
    /// Grandmaster clock variance.
    pub clock_variance: Option<u16>,
    /// Grandmaster priority 2.
    pub priority2: Option<u8>,
    /// Time source code, hex string ("0x10".."0xfe").
    pub time_source: Option<String>,
    /// Listener configurations, one per interface.
    #[serde(default)]
    pub listeners: Vec<ListenerEntry>,
}

/// One entry of the `listeners` array.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerEntry {
    /// Interface to listen on.
    pub interface: String,
    /// Event port (default 319).
    #[serde(alias = "port")]
    pub event_port: Option<u16>,
    /// General port (default event port + 1).
    pub general_port: Option<u16>,
    /// Receive timestamp level: "usr", "so" or "hw".
    pub timestamp_level: Option<String>,
    /// UTC offset announced in responses with hardware timestamps.
    pub utc_offset: Option<i16>,
}

/// Runtime listener parameters.
#[derive(Clone, Debug)]
pub struct ListenerSpec {
    /// Interface name.
    pub interface: String,
    /// Event port.
    pub event_port: u16,
    /// General port.
    pub general_port: u16,
    /// Receive timestamp level.
    pub timestamp_level: TimestampLevel,
    /// UTC offset announced in responses.
    pub utc_offset: i16,
}

/// Runtime objects produced from a valid server-mode config.
#[derive(Clone, Debug)]
pub struct ResolvedServerMode {
    /// Whether server mode runs.
    pub enabled: bool,
    /// The announced clock-quality dataset. The grandmaster identity is
    /// filled per interface at response time while `stepsRemoved` is 0.
    pub server_state: ServerStateDs,
    /// Listener parameters.
    pub listeners: Vec<ListenerSpec>,
}

fn parse_hex(token: &str) -> Option<u8> {
    let token = token.strip_prefix("0x").unwrap_or(token);
    u8::from_str_radix(token, 16).ok()
}

impl ServerModeConfig {
    /// Validate and resolve, aggregating all problems.
    pub fn resolve(&self) -> Result<ResolvedServerMode, Vec<String>> {
        let mut errs = Vec::new();

        let clock_accuracy = match &self.clock_accuracy {
            Some(token) => match parse_hex(token) {
                Some(value) if (0x17..=0x31).contains(&value) => value,
                _ => {
                    errs.push(format!(
                        "\"{token}\" is not a valid value (\"0x17\" to \"0x31\") \
                         for property \"clockAccuracy\""
                    ));
                    DEFAULT_CLOCK_ACCURACY
                }
            },
            None => DEFAULT_CLOCK_ACCURACY,
        };

        let time_source = match &self.time_source {
            Some(token) => match parse_hex(token) {
                Some(value) if (0x10..=0xfe).contains(&value) => value,
                _ => {
                    errs.push(format!(
                        "\"{token}\" is not a valid value (\"0x10\" to \"0xfe\") \
                         for property \"timeSource\""
                    ));
                    DEFAULT_TIME_SOURCE
                }
            },
            None => DEFAULT_TIME_SOURCE,
        };

        let mut listeners = Vec::new();
        for entry in &self.listeners {
            if entry.interface.is_empty() {
                errs.push(
                    "\"interface\" must be specified within items of \"listeners\"".to_string(),
                );
                continue;
            }
            let timestamp_level = match &entry.timestamp_level {
                Some(token) => match TimestampLevel::from_short_str(token) {
                    Some(level) => level,
                    None => {
                        errs.push(format!(
                            "\"{token}\" is not a valid value (usr/so/hw) \
                             for property \"timestampLevel\""
                        ));
                        continue;
                    }
                },
                None => TimestampLevel::Hardware,
            };
            let event_port = entry.event_port.unwrap_or(fptp_proto::UDP_EVENT_PORT);
            listeners.push(ListenerSpec {
                interface: entry.interface.clone(),
                event_port,
                general_port: entry.general_port.unwrap_or(event_port + 1),
                timestamp_level,
                utc_offset: entry.utc_offset.unwrap_or(DEFAULT_UTC_OFFSET),
            });
        }

        if !errs.is_empty() {
            return Err(errs);
        }
        Ok(ResolvedServerMode {
            enabled: self.enabled,
            server_state: ServerStateDs {
                priority1: self.priority1.unwrap_or(DEFAULT_PRIORITY_1),
                clock_class: self.clock_class.unwrap_or(DEFAULT_CLOCK_CLASS),
                clock_accuracy,
                clock_variance: self.clock_variance.unwrap_or(DEFAULT_CLOCK_VARIANCE),
                priority2: self.priority2.unwrap_or(DEFAULT_PRIORITY_2),
                grandmaster_id: Default::default(),
                steps_removed: 0,
                time_source,
            },
            listeners,
        })
    }
}

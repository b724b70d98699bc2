// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! This crate implements the message bus protocol
//! that the `ipguard` tools use to talk to each other.
//!
//! A bus message is one text line consisting of the message name
//! followed by `key=value` parameters.
//! Serializing messages to the line format and
//! parsing the line format back into a message is implemented here.

#![forbid(unsafe_code)]

mod socket;

pub use crate::socket::BusStream;

use anyhow::{self as ah, format_err as err};

/// Default TCP port of the message bus broker.
pub const PORT: u16 = 5870;

/// The `to` address that delivers a message to all bus subscribers.
pub const BROADCAST: &str = "*";

/// Well-known bus name of the firewall readiness watcher daemon.
pub const FIREWALL_SERVICE: &str = "ipguardd";

/// Broadcast: the firewall readiness status changed.
pub const MSG_FIREWALL_STATUS: &str = "FIREWALL_STATUS";
/// Direct: a peer asks for the current firewall readiness status.
pub const MSG_FIREWALL_STATUS_QUERY: &str = "FIREWALL_STATUS_QUERY";
/// The IP blocker service reports its own up/down status.
pub const MSG_BLOCKER_STATUS: &str = "BLOCKER_STATUS";
/// Direct: ask the IP blocker service to report its status.
pub const MSG_BLOCKER_STATUS_QUERY: &str = "BLOCKER_STATUS_QUERY";
/// The bus broker reports the status of some service on the bus.
pub const MSG_SERVICE_STATUS: &str = "SERVICE_STATUS";
/// A peer announces that it is ready to receive messages.
pub const MSG_READY: &str = "READY";

/// Sender service name. Added to all messages sent via [BusStream].
pub const PARAM_FROM: &str = "from";
/// Receiver service name or [BROADCAST].
pub const PARAM_TO: &str = "to";
/// Generic up/down status parameter.
pub const PARAM_STATUS: &str = "status";
/// Service name parameter of [MSG_SERVICE_STATUS].
pub const PARAM_SERVICE: &str = "service";
/// Firewall readiness status parameter of [MSG_FIREWALL_STATUS].
pub const PARAM_FIREWALL_STATUS: &str = "firewall_status";
/// Cache control parameter. Relays must not replay messages with `cache=no`.
pub const PARAM_CACHE: &str = "cache";

/// The `cache=no` parameter value.
pub const CACHE_NO: &str = "no";
/// The `status=up` parameter value.
pub const STATUS_UP: &str = "up";

/// Readiness status of the host firewall.
///
/// The string mapping of this type is part of the bus protocol.
/// It is total and stable.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FirewallStatus {
    /// Status string could not be parsed.
    ///
    /// This is only ever produced by [FirewallStatus::parse].
    /// It is never a live state of the firewall watcher.
    #[default]
    Unknown,
    /// The initial firewall rules have not been checked, yet.
    NotReady,
    /// The firewall service is not enabled on this host.
    Off,
    /// The firewall service is enabled, but not active.
    Down,
    /// The firewall rules are loaded, but the IP blocker service is down.
    Up,
    /// The firewall rules are loaded and the IP blocker service is up.
    Active,
}

impl FirewallStatus {
    /// Get the wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NotReady => "not_ready",
            Self::Off => "off",
            Self::Down => "down",
            Self::Up => "up",
            Self::Active => "active",
        }
    }

    /// Parse a wire representation into a status.
    ///
    /// Any unrecognized or empty string parses to [FirewallStatus::Unknown].
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "not_ready" => Self::NotReady,
            "off" => Self::Off,
            "down" => Self::Down,
            "up" => Self::Up,
            "active" => Self::Active,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FirewallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

/// Check if a string is a valid message name or parameter key.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Escape a parameter value for the line format.
fn escape_value(value: &str) -> String {
    let mut ret = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => ret.push_str("%25"),
            ' ' => ret.push_str("%20"),
            '=' => ret.push_str("%3D"),
            '\t' => ret.push_str("%09"),
            '\r' => ret.push_str("%0D"),
            '\n' => ret.push_str("%0A"),
            c => ret.push(c),
        }
    }
    ret
}

/// Unescape a parameter value from the line format.
fn unescape_value(value: &str) -> ah::Result<String> {
    let mut ret = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next().ok_or_else(|| err!("Truncated %-escape"))?;
            let lo = chars.next().ok_or_else(|| err!("Truncated %-escape"))?;
            let hi = hi.to_digit(16).ok_or_else(|| err!("Invalid %-escape"))?;
            let lo = lo.to_digit(16).ok_or_else(|| err!("Invalid %-escape"))?;
            let byte: u8 = (hi * 16 + lo)
                .try_into()
                .map_err(|_| err!("Invalid %-escape"))?;
            ret.push(byte as char);
        } else {
            ret.push(c);
        }
    }
    Ok(ret)
}

/// One message on the bus.
///
/// A message has a name and an ordered list of `key=value` parameters.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BusMessage {
    name: String,
    params: Vec<(String, String)>,
}

impl BusMessage {
    /// Create a new message without parameters.
    pub fn new(name: &str) -> Self {
        debug_assert!(is_valid_name(name));
        Self {
            name: name.to_string(),
            params: vec![],
        }
    }

    /// Builder-style parameter adder.
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.set_param(key, value);
        self
    }

    /// Get the message name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a parameter value, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a parameter, replacing an existing one with the same key.
    pub fn set_param(&mut self, key: &str, value: &str) {
        debug_assert!(is_valid_name(key));
        if let Some(param) = self.params.iter_mut().find(|(k, _)| k == key) {
            param.1 = value.to_string();
        } else {
            self.params.push((key.to_string(), value.to_string()));
        }
    }

    /// Get the sender service name, if present.
    pub fn from_service(&self) -> Option<&str> {
        self.param(PARAM_FROM)
    }

    /// Serialize this message into one line of text, including the trailing newline.
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(64);
        line.push_str(&self.name);
        for (key, value) in &self.params {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape_value(value));
        }
        line.push('\n');
        line
    }

    /// Parse one line of text into a message.
    pub fn parse(line: &str) -> ah::Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut fields = line.split(' ').filter(|f| !f.is_empty());

        let Some(name) = fields.next() else {
            return Err(err!("Message line is empty"));
        };
        if !is_valid_name(name) {
            return Err(err!("Invalid message name: '{name}'"));
        }

        let mut params = vec![];
        for field in fields {
            let Some(idx) = field.find('=') else {
                return Err(err!("Message parameter has no '=': '{field}'"));
            };
            let key = &field[..idx];
            if !is_valid_name(key) {
                return Err(err!("Invalid message parameter key: '{key}'"));
            }
            let value = unescape_value(&field[idx + '='.len_utf8()..])?;
            params.push((key.to_string(), value));
        }

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        let all = [
            FirewallStatus::Unknown,
            FirewallStatus::NotReady,
            FirewallStatus::Off,
            FirewallStatus::Down,
            FirewallStatus::Up,
            FirewallStatus::Active,
        ];
        for status in all {
            assert_eq!(FirewallStatus::parse(status.as_str()), status);
        }
        assert_eq!(FirewallStatus::parse(""), FirewallStatus::Unknown);
        assert_eq!(FirewallStatus::parse("garbage"), FirewallStatus::Unknown);
        assert_eq!(FirewallStatus::parse("UP"), FirewallStatus::Unknown);
        assert_eq!(FirewallStatus::parse(" active "), FirewallStatus::Active);
        assert_eq!(FirewallStatus::default(), FirewallStatus::Unknown);
    }

    #[test]
    fn test_msg_encode() {
        let msg = BusMessage::new(MSG_FIREWALL_STATUS)
            .with_param(PARAM_FIREWALL_STATUS, "up")
            .with_param(PARAM_CACHE, CACHE_NO);
        assert_eq!(msg.encode(), "FIREWALL_STATUS firewall_status=up cache=no\n");
    }

    #[test]
    fn test_msg_parse() {
        let msg = BusMessage::parse("BLOCKER_STATUS status=up from=ipblockd\n").unwrap();
        assert_eq!(msg.name(), MSG_BLOCKER_STATUS);
        assert_eq!(msg.param(PARAM_STATUS), Some("up"));
        assert_eq!(msg.from_service(), Some("ipblockd"));
        assert_eq!(msg.param("nonexistent"), None);

        // No parameters.
        let msg = BusMessage::parse("READY").unwrap();
        assert_eq!(msg.name(), MSG_READY);

        // Malformed lines.
        assert!(BusMessage::parse("").is_err());
        assert!(BusMessage::parse("   ").is_err());
        assert!(BusMessage::parse("BAD NAME!").is_err());
        assert!(BusMessage::parse("X par%am=1").is_err());
        assert!(BusMessage::parse("X noequalsign").is_err());
        assert!(BusMessage::parse("X a=%zz").is_err());
        assert!(BusMessage::parse("X a=%0").is_err());
    }

    #[test]
    fn test_msg_escaping() {
        let mut msg = BusMessage::new("X");
        msg.set_param("a", "hello world = 100%\n");
        let line = msg.encode();
        assert_eq!(line, "X a=hello%20world%20%3D%20100%25%0A\n");
        let msg_de = BusMessage::parse(&line).unwrap();
        assert_eq!(msg, msg_de);
    }

    #[test]
    fn test_msg_set_param_replaces() {
        let mut msg = BusMessage::new("X").with_param("a", "1").with_param("b", "2");
        msg.set_param("a", "3");
        assert_eq!(msg.param("a"), Some("3"));
        assert_eq!(msg.encode(), "X a=3 b=2\n");
    }
}

// vim: ts=4 sw=4 expandtab

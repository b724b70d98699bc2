// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! This crate implements the daemon and client configuration
//! file parsing of `ipguard`.
//!
//! Defaults for missing configuration files
//! or missing individual configuration entries are implemented here.

#![forbid(unsafe_code)]

mod ini;

use crate::ini::Ini;
use anyhow::{self as ah, format_err as err, Context as _};
use ipguard_proto::{FIREWALL_SERVICE, PORT};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// The default daemon configuration path.
const DAEMON_CONF_PATH: &str = "/etc/ipguard/ipguardd.conf";

/// The default client configuration path.
const CLIENT_CONF_PATH: &str = "/etc/ipguard/ipguard.conf";

/// The default bus name of the IP blocker service.
const DEFAULT_BLOCKER_SERVICE: &str = "ipblockd";

/// The default service manager query command.
const DEFAULT_SYSTEMCTL: &str = "/usr/bin/systemctl";

/// The default firewall check period, in seconds.
const DEFAULT_CHECK_INTERVAL: u32 = 60;

/// The default delay between two knocks, in milliseconds.
const DEFAULT_KNOCK_DELAY: u32 = 200;

/// The default ipset set base name.
const DEFAULT_SET_NAME: &str = "ipguard";

fn parse_bool(s: &str) -> ah::Result<bool> {
    match s.to_lowercase().trim() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(err!("Invalid boolean string: '{s}'")),
    }
}

fn parse_u32(s: &str) -> ah::Result<u32> {
    Ok(s.trim().parse::<u32>()?)
}

/// Selector of the configuration variant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfigVariant {
    /// `ipguardd.conf`
    Daemon,
    /// `ipguard.conf`
    Client,
}

/// Parsed configuration.
#[derive(Clone, Debug)]
pub struct Config {
    variant: ConfigVariant,
    debug: bool,
    bus_address: String,
    bus_service: String,
    blocker_service: String,
    systemctl: PathBuf,
    check_interval: Duration,
    knock_delay: Duration,
    set_name: String,
    block_timeout: Duration,
}

impl Config {
    /// Create a new configuration with all values set to their defaults.
    pub fn new(variant: ConfigVariant) -> Self {
        let bus_service = match variant {
            ConfigVariant::Daemon => FIREWALL_SERVICE,
            ConfigVariant::Client => "ipguard",
        };
        Self {
            variant,
            debug: false,
            bus_address: format!("localhost:{PORT}"),
            bus_service: bus_service.to_string(),
            blocker_service: DEFAULT_BLOCKER_SERVICE.to_string(),
            systemctl: DEFAULT_SYSTEMCTL.into(),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL.into()),
            knock_delay: Duration::from_millis(DEFAULT_KNOCK_DELAY.into()),
            set_name: DEFAULT_SET_NAME.to_string(),
            block_timeout: Duration::from_secs(0),
        }
    }

    /// Get the default path of this configuration variant.
    pub fn get_default_path(variant: ConfigVariant) -> PathBuf {
        match variant {
            ConfigVariant::Daemon => DAEMON_CONF_PATH.into(),
            ConfigVariant::Client => CLIENT_CONF_PATH.into(),
        }
    }

    /// (Re-)Load a configuration file.
    ///
    /// A missing file is not an error.
    /// All values fall back to their defaults, then.
    pub fn load(&mut self, path: &Path) -> ah::Result<()> {
        *self = Self::new(self.variant);
        if !path.exists() {
            return Ok(());
        }
        let mut ini = Ini::new();
        ini.read_file(path)?;
        self.load_ini(&ini)
            .with_context(|| format!("Configuration file {path:?}"))
    }

    fn load_ini(&mut self, ini: &Ini) -> ah::Result<()> {
        if let Some(debug) = ini.get("GENERAL", "debug") {
            self.debug = parse_bool(debug)?;
        }
        if let Some(address) = ini.get("BUS", "address") {
            self.bus_address = address.to_string();
        }
        if let Some(service) = ini.get("BUS", "service") {
            if service.trim().is_empty() {
                return Err(err!("[BUS] service must not be empty."));
            }
            self.bus_service = service.to_string();
        }
        if let Some(blocker) = ini.get("FIREWALL", "blocker-service") {
            if blocker.trim().is_empty() {
                return Err(err!("[FIREWALL] blocker-service must not be empty."));
            }
            self.blocker_service = blocker.to_string();
        }
        if let Some(systemctl) = ini.get("FIREWALL", "systemctl") {
            self.systemctl = systemctl.into();
        }
        if let Some(interval) = ini.get("FIREWALL", "check-interval") {
            let interval = parse_u32(interval)?;
            if interval == 0 {
                return Err(err!("[FIREWALL] check-interval must not be zero."));
            }
            self.check_interval = Duration::from_secs(interval.into());
        }
        if let Some(delay) = ini.get("CLIENT", "knock-delay") {
            self.knock_delay = Duration::from_millis(parse_u32(delay)?.into());
        }
        if let Some(set_name) = ini.get("CLIENT", "set-name") {
            if set_name.trim().is_empty() {
                return Err(err!("[CLIENT] set-name must not be empty."));
            }
            self.set_name = set_name.to_string();
        }
        if let Some(timeout) = ini.get("CLIENT", "block-timeout") {
            self.block_timeout = Duration::from_secs(parse_u32(timeout)?.into());
        }
        Ok(())
    }

    /// Get the `debug` option from `[GENERAL]`.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Get the `address` option from `[BUS]`.
    pub fn bus_address(&self) -> &str {
        &self.bus_address
    }

    /// Get the `service` option from `[BUS]`.
    /// This is the bus name this process registers under.
    pub fn bus_service(&self) -> &str {
        &self.bus_service
    }

    /// Get the `blocker-service` option from `[FIREWALL]`.
    pub fn blocker_service(&self) -> &str {
        &self.blocker_service
    }

    /// Get the `systemctl` option from `[FIREWALL]`.
    pub fn systemctl(&self) -> &Path {
        &self.systemctl
    }

    /// Get the `check-interval` option from `[FIREWALL]`.
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Get the `knock-delay` option from `[CLIENT]`.
    pub fn knock_delay(&self) -> Duration {
        self.knock_delay
    }

    /// Get the `set-name` option from `[CLIENT]`.
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// Get the `block-timeout` option from `[CLIENT]`.
    /// Zero means that blocks do not expire.
    pub fn block_timeout(&self) -> Duration {
        self.block_timeout
    }
}


// vim: ts=4 sw=4 expandtab

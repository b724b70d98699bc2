// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![forbid(unsafe_code)]

#[cfg(not(any(target_os = "linux", target_os = "android")))]
std::compile_error!("The ipguard client tools do not support non-Linux platforms.");

mod command;
mod ipset;
mod ports;
mod resolver;

use crate::command::{
    block::run_block, knock::run_knock, status::run_status, unblock::run_unblock,
};
use anyhow::{self as ah, format_err as err, Context as _};
use clap::{CommandFactory as _, Parser, Subcommand};
use ipguard_conf::{Config, ConfigVariant};
use std::{net::IpAddr, path::PathBuf, time::Duration};
use tokio::runtime;

#[derive(Parser, Debug)]
struct Opts {
    /// Override the default path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show detailed information about what happens internally.
    #[arg(long)]
    verbose: bool,

    /// Show version information and exit.
    #[arg(long, short = 'v')]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Opts {
    /// Get the configuration path from command line or default.
    pub fn get_config(&self) -> PathBuf {
        if let Some(config) = &self.config {
            config.clone()
        } else {
            Config::get_default_path(ConfigVariant::Client)
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Block all traffic from an IP address.
    ///
    /// The address is added to the ipset block set.
    /// The set and its firewall DROP rule are created, if needed.
    Block {
        /// The IPv4 or IPv6 address to block.
        addr: IpAddr,

        /// Block expiry, in seconds. Zero blocks without expiry.
        ///
        /// If not given, then the `[CLIENT] block-timeout` from the
        /// configuration file is used instead.
        #[arg(short, long)]
        timeout: Option<u32>,
    },

    /// Remove the block of an IP address.
    Unblock {
        /// The IPv4 or IPv6 address to unblock.
        addr: IpAddr,
    },

    /// Knock on a sequence of ports on a remote host.
    Knock {
        /// The host name, IPv4 or IPv6 address to knock on.
        host: String,

        /// The knock port sequence.
        ///
        /// A comma separated list of PORT or PORT/PROTO items,
        /// where PROTO is `tcp` (the default) or `udp`.
        /// Example: 7000,8000/tcp,9000/udp
        ports: String,

        /// Resolve HOST into an IPv6 address instead of IPv4.
        #[arg(short = '6', long)]
        ipv6: bool,

        /// Delay between two knocks, in milliseconds.
        ///
        /// If not given, then the `[CLIENT] knock-delay` from the
        /// configuration file is used instead.
        #[arg(short, long)]
        delay: Option<u32>,
    },

    /// Query the firewall watcher daemon for the firewall status.
    ///
    /// Prints one of:
    /// unknown, not_ready, off, down, up, active
    Status,
}

async fn async_main(opts: Opts) -> ah::Result<()> {
    // Read the ipguard.conf configuration file.
    let mut conf = Config::new(ConfigVariant::Client);
    conf.load(&opts.get_config())
        .context("Configuration file")?;

    // Run the user specified command.
    if let Some(command) = opts.command {
        match command {
            Command::Block { addr, timeout } => {
                run_block(&conf, opts.verbose, addr, timeout).await
            }
            Command::Unblock { addr } => run_unblock(&conf, opts.verbose, addr).await,
            Command::Knock {
                host,
                ports,
                ipv6,
                delay,
            } => run_knock(&conf, opts.verbose, &host, &ports, ipv6, delay).await,
            Command::Status => run_status(&conf, opts.verbose).await,
        }
    } else {
        Opts::command()
            .print_help()
            .context("Failed to print help")?;
        println!();
        Err(err!(
            "'ipguard' requires a subcommand but one was not provided. \
            Please run 'ipguard --help' for more information."
        ))
    }
}

fn main() -> ah::Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("ipguard version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    runtime::Builder::new_current_thread()
        .thread_keep_alive(Duration::from_millis(0))
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .context("Tokio runtime builder")?
        .block_on(async_main(opts))
}

// vim: ts=4 sw=4 expandtab

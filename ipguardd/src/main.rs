// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![forbid(unsafe_code)]

#[cfg(not(any(target_os = "linux", target_os = "android")))]
std::compile_error!("ipguardd does not support non-Linux platforms.");

mod bus;
mod engine;
mod probe;

use crate::{
    bus::{BusEvent, BusOutbox},
    engine::FirewallWatch,
    probe::Prober,
};
use anyhow::{self as ah, format_err as err, Context as _};
use clap::Parser;
use ipguard_conf::{Config, ConfigVariant};
use log::{debug, error, info};
use std::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::Write as _,
    os::unix::fs::MetadataExt as _,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    runtime,
    signal::unix::{signal, SignalKind},
    sync::mpsc,
    time,
};

/// Create a directory, if it does not exist already.
fn create_dir_if_not_exists(path: &Path) -> ah::Result<()> {
    match metadata(path) {
        Err(_) => {
            create_dir_all(path)?;
        }
        Ok(meta) => {
            const S_IFMT: u32 = libc::S_IFMT as _;
            const S_IFDIR: u32 = libc::S_IFDIR as _;
            if (meta.mode() & S_IFMT) != S_IFDIR {
                return Err(err!("Path '{path:?}' exists, but is not a directory."));
            }
        }
    }
    Ok(())
}

/// Create the /run subdirectory.
fn make_run_subdir(rundir: &Path) -> ah::Result<()> {
    let runsubdir = rundir.join("ipguardd");
    create_dir_if_not_exists(&runsubdir).context("Create /run subdirectory")?;
    Ok(())
}

/// Create the PID-file in the /run subdirectory.
fn make_pidfile(rundir: &Path) -> ah::Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(rundir.join("ipguardd/ipguardd.pid"))
        .context("Open PID-file")?
        .write_all(format!("{}\n", std::process::id()).as_bytes())
        .context("Write to PID-file")
}

/// Notify ready-status to systemd, if we have been started by it.
fn systemd_notify_ready() -> ah::Result<()> {
    if sd_notify::booted().unwrap_or(false) {
        sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;
    }
    Ok(())
}

#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Override the default path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The run directory for runtime data.
    #[arg(long, default_value = "/run")]
    rundir: PathBuf,

    /// Show version information and exit.
    #[arg(long, short = 'v')]
    version: bool,
}

impl Opts {
    pub fn get_config(&self) -> PathBuf {
        if let Some(config) = &self.config {
            config.clone()
        } else {
            Config::get_default_path(ConfigVariant::Daemon)
        }
    }
}

async fn async_main(opts: Opts) -> ah::Result<()> {
    make_run_subdir(&opts.rundir)?;

    let mut conf = Config::new(ConfigVariant::Daemon);
    conf.load(&opts.get_config())
        .context("Configuration file")?;

    let default_filter = if conf.debug() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut sigterm = signal(SignalKind::terminate()).unwrap();
    let mut sigint = signal(SignalKind::interrupt()).unwrap();
    let mut sighup = signal(SignalKind::hangup()).unwrap();

    // The probe completion and bus channels feed the event loop below.
    // All engine state is owned by this one task.
    let (probe_tx, mut probe_rx) = mpsc::channel(1);
    let (event_tx, mut event_rx) = mpsc::channel(8);
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let mut watch = FirewallWatch::new(&conf, Prober::new(probe_tx), BusOutbox::new(outbox_tx))
        .context("Firewall watch init")?;
    watch.subscribe(Box::new(|status| {
        debug!("Status subscriber: firewall is now '{status}'.");
    }));

    let bus_join = bus::spawn(
        conf.bus_address().to_string(),
        conf.bus_service().to_string(),
        event_tx,
        outbox_rx,
    );

    make_pidfile(&opts.rundir)?;
    systemd_notify_ready()?;

    // The periodic check timer.
    // Its first tick fires immediately and is the startup kick-off.
    let mut interval = time::interval(conf.check_interval());

    // Task: Main event loop.
    let exitcode;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = watch.check() {
                    // The next tick retries.
                    error!("Failed to start the firewall check: {e:#}");
                }
            }
            result = probe_rx.recv() => {
                let Some(result) = result else {
                    exitcode = Err(err!("The probe channel broke."));
                    break;
                };
                watch.on_probe_done(result);
            }
            event = event_rx.recv() => {
                match event {
                    Some(BusEvent::Connected) => watch.on_bus_connected(),
                    Some(BusEvent::Msg(msg)) => watch.on_bus_message(&msg),
                    None => {
                        exitcode = Err(err!("The bus connection task died."));
                        break;
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM: Terminating.");
                exitcode = Ok(());
                break;
            }
            _ = sigint.recv() => {
                exitcode = Err(err!("Interrupted by SIGINT."));
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP: Reloading the configuration file.");
                if let Err(e) = conf.load(&opts.get_config()) {
                    error!("Failed to load the configuration file: {e:#}");
                } else {
                    watch.update_conf(&conf);
                    interval = time::interval(conf.check_interval());
                    // The bus address cannot be changed at runtime.
                }
            }
        }
    }

    bus_join.abort();
    exitcode
}

fn main() -> ah::Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("ipguardd version {}", env!("CARGO_PKG_VERSION"));
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

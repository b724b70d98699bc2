// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err, Context as _};
use ipguard_conf::Config;
use ipguard_proto::{
    BusMessage, BusStream, FirewallStatus, CACHE_NO, FIREWALL_SERVICE, MSG_FIREWALL_STATUS,
    MSG_FIREWALL_STATUS_QUERY, PARAM_CACHE, PARAM_FIREWALL_STATUS,
};
use std::time::Duration;
use tokio::time;

/// Give up waiting for the status reply after this time.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the direct status reply.
/// Unrelated bus traffic may arrive first and is skipped.
async fn recv_status_reply(bus: &mut BusStream) -> ah::Result<BusMessage> {
    loop {
        match bus.recv().await? {
            Some(msg) if msg.name() == MSG_FIREWALL_STATUS => return Ok(msg),
            Some(_) => (),
            None => return Err(err!("The bus broker closed the connection.")),
        }
    }
}

/// Query the firewall watcher daemon for the current firewall status
/// and print it.
pub async fn run_status(conf: &Config, verbose: bool) -> ah::Result<()> {
    let mut bus = BusStream::connect(conf.bus_address(), conf.bus_service())
        .await
        .context("Connect to the message bus")?;

    if verbose {
        println!("Querying '{FIREWALL_SERVICE}' for the firewall status.");
    }
    let query = BusMessage::new(MSG_FIREWALL_STATUS_QUERY).with_param(PARAM_CACHE, CACHE_NO);
    bus.send_to(FIREWALL_SERVICE, &query)
        .await
        .context("Send the status query")?;

    let reply = time::timeout(QUERY_TIMEOUT, recv_status_reply(&mut bus))
        .await
        .map_err(|_| err!("Timeout waiting for the firewall status reply."))??;

    let status = FirewallStatus::parse(reply.param(PARAM_FIREWALL_STATUS).unwrap_or(""));
    println!("{status}");
    Ok(())
}

// vim: ts=4 sw=4 expandtab

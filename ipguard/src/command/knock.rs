// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{
    ports::{parse_ports, KnockPort, KnockProto},
    resolver::{resolve, ResMode},
};
use anyhow::{self as ah, format_err as err, Context as _};
use ipguard_conf::Config;
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Duration,
};
use tokio::{
    net::{TcpStream, UdpSocket},
    time,
};

/// Give up on a single TCP knock after this time.
/// A refused or timed out connection is still a valid knock.
const KNOCK_TIMEOUT: Duration = Duration::from_millis(500);

async fn knock_one(addr: IpAddr, knock: KnockPort, verbose: bool) -> ah::Result<()> {
    match knock.proto {
        KnockProto::Tcp => {
            // Only the connection attempt matters.
            // The target port is usually closed.
            let _ = time::timeout(KNOCK_TIMEOUT, TcpStream::connect((addr, knock.port))).await;
            if verbose {
                println!("Knocked on {addr} port {}/tcp.", knock.port);
            }
        }
        KnockProto::Udp => {
            let local: IpAddr = if addr.is_ipv6() {
                Ipv6Addr::UNSPECIFIED.into()
            } else {
                Ipv4Addr::UNSPECIFIED.into()
            };
            let socket = UdpSocket::bind((local, 0))
                .await
                .context("Bind UDP knock socket")?;
            socket
                .send_to(&[], (addr, knock.port))
                .await
                .context("Send UDP knock")?;
            if verbose {
                println!("Knocked on {addr} port {}/udp.", knock.port);
            }
        }
    }
    Ok(())
}

/// Run a knock sequence against a host.
pub async fn run_knock(
    conf: &Config,
    verbose: bool,
    host: &str,
    ports: &str,
    ipv6: bool,
    delay: Option<u32>,
) -> ah::Result<()> {
    let ports = parse_ports(ports)?;
    if ports.is_empty() {
        return Err(err!("The knock port sequence is empty."));
    }

    // A raw IPv6 address selects IPv6 mode by itself.
    let raw_v6 = host.parse::<IpAddr>().map(|a| a.is_ipv6()).unwrap_or(false);
    let mode = if ipv6 || raw_v6 {
        ResMode::Ipv6
    } else {
        ResMode::Ipv4
    };
    let addr = resolve(host, mode).await.context("Resolve knock host")?;

    let delay = delay
        .map(|d| Duration::from_millis(d.into()))
        .unwrap_or_else(|| conf.knock_delay());

    for (i, knock) in ports.iter().enumerate() {
        if i > 0 {
            time::sleep(delay).await;
        }
        knock_one(addr, *knock, verbose).await?;
    }

    if verbose {
        println!("Knock sequence completed.");
    }
    Ok(())
}

// vim: ts=4 sw=4 expandtab

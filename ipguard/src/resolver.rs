// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err};
use hickory_resolver::{config::ResolverConfig, TokioAsyncResolver};
use std::net::IpAddr;

/// Host name resolution target mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ResMode {
    #[default]
    Ipv4,
    Ipv6,
}

/// Resolve a host name into an address.
pub async fn resolve(host: &str, mode: ResMode) -> ah::Result<IpAddr> {
    // Try to parse host as an IP address.
    if let Ok(addr) = host.parse::<IpAddr>() {
        match mode {
            ResMode::Ipv4 if !addr.is_ipv4() => {
                return Err(err!(
                    "Supplied a raw IPv6 address, but resolution mode is set to IPv4"
                ));
            }
            ResMode::Ipv6 if !addr.is_ipv6() => {
                return Err(err!(
                    "Supplied a raw IPv4 address, but resolution mode is set to IPv6"
                ));
            }
            _ => (),
        }
        // It is an IP address. No need for DNS lookup.
        return Ok(addr);
    }

    // Create a DNS resolver.
    let resolver;
    if let Ok(r) = TokioAsyncResolver::tokio_from_system_conf() {
        resolver = r;
    } else {
        eprintln!(
            "Warning: Could not create DNS resolver from system configuration. \
             Is /etc/resolv.conf present? Falling back to Google DNS."
        );
        resolver = TokioAsyncResolver::tokio(ResolverConfig::google(), Default::default());
    }

    // Do a DNS lookup of the host and return the first address
    // that matches the requested address resolution mode.
    let Ok(lookup) = resolver.lookup_ip(host).await else {
        return Err(err!("DNS lookup of host '{host}' failed."));
    };
    for addr in lookup {
        match mode {
            ResMode::Ipv4 if addr.is_ipv4() => return Ok(addr),
            ResMode::Ipv6 if addr.is_ipv6() => return Ok(addr),
            _ => (),
        }
    }
    Err(err!(
        "No {} address found for host '{host}'.",
        match mode {
            ResMode::Ipv4 => "IPv4",
            ResMode::Ipv6 => "IPv6",
        }
    ))
}

// vim: ts=4 sw=4 expandtab

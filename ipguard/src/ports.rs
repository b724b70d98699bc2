// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err, Context as _};

/// The transport protocol of one knock.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum KnockProto {
    #[default]
    Tcp,
    Udp,
}

/// One port in a knock sequence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KnockPort {
    pub port: u16,
    pub proto: KnockProto,
}

/// Parse a knock port sequence.
///
/// The sequence is a comma separated list of `PORT` or `PORT/PROTO` items,
/// where `PROTO` is `tcp` (the default) or `udp`.
/// Example: `7000,8000/tcp,9000/udp`
pub fn parse_ports(s: &str) -> ah::Result<Vec<KnockPort>> {
    let mut ports = Vec::with_capacity(8);
    for item in s.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(err!("Empty item in knock port sequence: '{s}'"));
        }
        let (port, proto) = match item.split_once('/') {
            None => (item, KnockProto::Tcp),
            Some((port, proto)) => {
                let proto = match proto.trim().to_lowercase().as_str() {
                    "tcp" => KnockProto::Tcp,
                    "udp" => KnockProto::Udp,
                    other => {
                        return Err(err!("Unknown knock protocol: '{other}'"));
                    }
                };
                (port, proto)
            }
        };
        let port = port
            .trim()
            .parse::<u16>()
            .with_context(|| format!("Invalid knock port: '{port}'"))?;
        if port == 0 {
            return Err(err!("Knock port 0 is not valid."));
        }
        ports.push(KnockPort { port, proto });
    }
    Ok(ports)
}


// vim: ts=4 sw=4 expandtab

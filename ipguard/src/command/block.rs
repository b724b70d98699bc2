// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::ipset::{require_root, BlockSet};
use anyhow::{self as ah, Context as _};
use ipguard_conf::Config;
use std::{net::IpAddr, time::Duration};

/// Block all traffic from an address.
pub async fn run_block(
    conf: &Config,
    verbose: bool,
    addr: IpAddr,
    timeout: Option<u32>,
) -> ah::Result<()> {
    require_root()?;

    let set = BlockSet::new(conf.set_name());
    set.ensure(addr.is_ipv6())
        .await
        .context("Create the block set")?;

    let timeout = timeout
        .map(|t| Duration::from_secs(t.into()))
        .unwrap_or_else(|| conf.block_timeout());
    set.add(addr, timeout).await.context("Block the address")?;

    if verbose {
        if timeout > Duration::ZERO {
            println!("Blocked {addr} for {} seconds.", timeout.as_secs());
        } else {
            println!("Blocked {addr}.");
        }
    }
    Ok(())
}

// vim: ts=4 sw=4 expandtab

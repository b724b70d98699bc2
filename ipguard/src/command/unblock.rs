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
use std::net::IpAddr;

/// Remove the block of an address.
pub async fn run_unblock(conf: &Config, verbose: bool, addr: IpAddr) -> ah::Result<()> {
    require_root()?;

    let set = BlockSet::new(conf.set_name());
    set.del(addr).await.context("Unblock the address")?;

    if verbose {
        println!("Unblocked {addr}.");
    }
    Ok(())
}

// vim: ts=4 sw=4 expandtab

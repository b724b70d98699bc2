// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err, Context as _};
use std::{net::IpAddr, process::Stdio, time::Duration};
use tokio::process::Command;

const IPTABLES: &str = "/usr/sbin/iptables";
const IP6TABLES: &str = "/usr/sbin/ip6tables";
const IPSET: &str = "/usr/sbin/ipset";

/// Check that we are running with root privileges.
pub fn require_root() -> ah::Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(err!("Manipulating the firewall requires root privileges."));
    }
    Ok(())
}

/// Run a firewall tool and fail with its stderr, if it fails.
async fn run_tool(program: &str, args: &[&str]) -> ah::Result<()> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Run {program}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(err!(
            "'{program} {}' failed: [{}] {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim_end(),
        ))
    }
}

/// Run a firewall tool and only report whether it succeeded.
async fn tool_succeeds(program: &str, args: &[&str]) -> bool {
    match Command::new(program).args(args).stdin(Stdio::null()).output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// The pair of ipset block sets (IPv4 and IPv6) and their DROP rules.
pub struct BlockSet {
    base_name: String,
}

impl BlockSet {
    pub fn new(base_name: &str) -> Self {
        Self {
            base_name: base_name.to_string(),
        }
    }

    fn set_name(&self, v6: bool) -> String {
        format!("{}{}", self.base_name, if v6 { "6" } else { "4" })
    }

    /// Create the block set and its INPUT chain DROP rule,
    /// if they do not exist already.
    pub async fn ensure(&self, v6: bool) -> ah::Result<()> {
        let set_name = self.set_name(v6);

        let mut create: Vec<&str> = vec!["create", &set_name, "hash:ip", "timeout", "0"];
        if v6 {
            create.extend(["family", "inet6"]);
        }
        create.push("-exist");
        run_tool(IPSET, &create).await?;

        let iptables = if v6 { IP6TABLES } else { IPTABLES };
        let rule = [
            "INPUT", "-m", "set", "--match-set", &set_name, "src", "-j", "DROP",
        ];
        let mut check: Vec<&str> = vec!["-C"];
        check.extend(rule);
        if !tool_succeeds(iptables, &check).await {
            let mut insert: Vec<&str> = vec!["-I"];
            insert.extend(rule);
            run_tool(iptables, &insert).await?;
        }
        Ok(())
    }

    /// Add an address to the block set.
    /// A zero `timeout` blocks without expiry.
    pub async fn add(&self, addr: IpAddr, timeout: Duration) -> ah::Result<()> {
        let set_name = self.set_name(addr.is_ipv6());
        let addr = addr.to_string();
        let timeout_secs = timeout.as_secs().to_string();
        let mut add: Vec<&str> = vec!["add", &set_name, &addr];
        if timeout > Duration::ZERO {
            add.extend(["timeout", &timeout_secs]);
        }
        add.push("-exist");
        run_tool(IPSET, &add).await
    }

    /// Remove an address from the block set.
    /// Removing an address that is not blocked is not an error.
    pub async fn del(&self, addr: IpAddr) -> ah::Result<()> {
        let set_name = self.set_name(addr.is_ipv6());
        let addr = addr.to_string();
        run_tool(IPSET, &["del", &set_name, &addr, "-exist"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_names() {
        let set = BlockSet::new("ipguard");
        assert_eq!(set.set_name(false), "ipguard4");
        assert_eq!(set.set_name(true), "ipguard6");
    }
}

// vim: ts=4 sw=4 expandtab

// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{BusMessage, BROADCAST, PARAM_FROM, PARAM_TO};
use anyhow::{self as ah, Context as _};
use log::debug;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

/// A connection to the message bus broker.
///
/// The broker itself is not part of this crate.
/// This is a plain TCP client that speaks the line format of [BusMessage].
pub struct BusStream {
    rd: BufReader<OwnedReadHalf>,
    wr: OwnedWriteHalf,
    service: String,
}

impl BusStream {
    /// Connect to the bus broker at `addr`.
    ///
    /// `service` is the bus name of the connecting service.
    /// It is added to all sent messages as the `from` parameter.
    pub async fn connect(addr: &str, service: &str) -> ah::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Connect to message bus")?;
        stream.set_nodelay(true).context("Set TCP_NODELAY")?;
        let (rd, wr) = stream.into_split();
        Ok(Self {
            rd: BufReader::new(rd),
            wr,
            service: service.to_string(),
        })
    }

    /// Send a message to one service on the bus.
    pub async fn send_to(&mut self, to: &str, msg: &BusMessage) -> ah::Result<()> {
        let mut msg = msg.clone();
        msg.set_param(PARAM_FROM, &self.service);
        msg.set_param(PARAM_TO, to);
        self.wr
            .write_all(msg.encode().as_bytes())
            .await
            .context("Bus socket write")?;
        Ok(())
    }

    /// Send a message to all subscribers on the bus.
    pub async fn broadcast(&mut self, msg: &BusMessage) -> ah::Result<()> {
        self.send_to(BROADCAST, msg).await
    }

    /// Receive the next message from the bus.
    ///
    /// Lines that do not parse are dropped.
    /// That is expected traffic filtering, not an error.
    /// Returns `None`, if the broker closed the connection.
    pub async fn recv(&mut self) -> ah::Result<Option<BusMessage>> {
        let mut line = String::new();
        loop {
            line.clear();
            let count = self
                .rd
                .read_line(&mut line)
                .await
                .context("Bus socket read")?;
            if count == 0 {
                return Ok(None); // EOF
            }
            if line.trim().is_empty() {
                continue;
            }
            match BusMessage::parse(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    debug!("Dropped malformed bus message: {e}");
                }
            }
        }
    }
}

// vim: ts=4 sw=4 expandtab

// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::engine::BusTx;
use ipguard_proto::{BusMessage, BusStream, BROADCAST, MSG_READY};
use log::{info, warn};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
    time,
};

/// Delay before a bus reconnect attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// An event from the bus connection task to the event loop.
pub enum BusEvent {
    /// The bus connection has been (re-)established.
    Connected,
    /// A message arrived from the bus.
    Msg(BusMessage),
}

/// The engine's sending half of the bus connection.
///
/// Messages are queued towards the connection task without blocking.
/// While the bus is disconnected, queued messages are dropped.
/// Message loss is tolerated by the protocol.
pub struct BusOutbox {
    tx: mpsc::UnboundedSender<(String, BusMessage)>,
}

impl BusOutbox {
    pub fn new(tx: mpsc::UnboundedSender<(String, BusMessage)>) -> Self {
        Self { tx }
    }
}

impl BusTx for BusOutbox {
    fn broadcast(&mut self, msg: BusMessage) {
        let _ = self.tx.send((BROADCAST.to_string(), msg));
    }

    fn send_to(&mut self, service: &str, msg: BusMessage) {
        let _ = self.tx.send((service.to_string(), msg));
    }
}

/// Spawn the bus connection task.
///
/// It maintains the TCP connection to the bus broker,
/// reconnects with a fixed backoff after a connection loss,
/// forwards inbound messages as [BusEvent]s
/// and sends the queued outbound messages.
pub fn spawn(
    addr: String,
    service: String,
    event_tx: mpsc::Sender<BusEvent>,
    outbox_rx: mpsc::UnboundedReceiver<(String, BusMessage)>,
) -> JoinHandle<()> {
    task::spawn(run(addr, service, event_tx, outbox_rx))
}

async fn run(
    addr: String,
    service: String,
    event_tx: mpsc::Sender<BusEvent>,
    mut outbox_rx: mpsc::UnboundedReceiver<(String, BusMessage)>,
) {
    loop {
        let mut stream = match BusStream::connect(&addr, &service).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Bus connect to '{addr}' failed: {e:#}");
                drain_outbox(&mut outbox_rx);
                time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!("Connected to the message bus at '{addr}'.");

        // Announce that we are ready to receive messages.
        if let Err(e) = stream.broadcast(&BusMessage::new(MSG_READY)).await {
            warn!("Bus ready announcement failed: {e:#}");
        }
        if event_tx.send(BusEvent::Connected).await.is_err() {
            return; // The event loop is gone. Shutdown.
        }

        loop {
            tokio::select! {
                out = outbox_rx.recv() => {
                    let Some((to, msg)) = out else {
                        return; // The event loop is gone. Shutdown.
                    };
                    if let Err(e) = stream.send_to(&to, &msg).await {
                        warn!("Bus send failed: {e:#}");
                        break;
                    }
                }
                msg = stream.recv() => {
                    match msg {
                        Ok(Some(msg)) => {
                            if event_tx.send(BusEvent::Msg(msg)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {
                            warn!("The bus broker closed the connection.");
                            break;
                        }
                        Err(e) => {
                            warn!("Bus receive failed: {e:#}");
                            break;
                        }
                    }
                }
            }
        }

        drain_outbox(&mut outbox_rx);
        time::sleep(RECONNECT_DELAY).await;
    }
}

/// Drop all queued outbound messages.
/// They would be stale by the time the bus comes back.
fn drain_outbox(outbox_rx: &mut mpsc::UnboundedReceiver<(String, BusMessage)>) {
    while outbox_rx.try_recv().is_ok() {}
}

// vim: ts=4 sw=4 expandtab

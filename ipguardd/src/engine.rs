// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The firewall readiness engine.
//!
//! This module owns the canonical [FirewallStatus] of the host.
//! It drives the two-phase `is-enabled`/`is-active` probe sequence,
//! folds asynchronously arriving bus messages about the IP blocker
//! service into the status and publishes every status transition
//! to local subscribers and to the bus.
//!
//! All of this runs on the single event loop task.
//! Handlers run to completion before the next event is processed,
//! so none of the state in here is guarded by a lock.

use crate::probe::{ProbeResult, ProbeRunner};
use anyhow::{self as ah, format_err as err};
use ipguard_conf::Config;
use ipguard_proto::{
    BusMessage, FirewallStatus, CACHE_NO, MSG_BLOCKER_STATUS, MSG_BLOCKER_STATUS_QUERY,
    MSG_FIREWALL_STATUS, MSG_FIREWALL_STATUS_QUERY, MSG_READY, MSG_SERVICE_STATUS,
    PARAM_CACHE, PARAM_FIREWALL_STATUS, PARAM_SERVICE, PARAM_STATUS, STATUS_UP,
};
use log::{debug, error, info, warn};
use std::path::PathBuf;

/// The phase of the two-phase firewall check sequence.
///
/// At most one probe is in flight at a time.
/// That mutual exclusion is expressed by this field alone.
/// No lock is needed, because the engine runs on a single task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CheckState {
    /// No check is in flight.
    Idle,
    /// The `is-enabled` probe is in flight.
    CheckingEnabled,
    /// The `is-active` probe is in flight.
    CheckingActive,
}

/// Handle of a registered status subscriber.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubscriberId(u64);

/// Outbound message capability of the engine.
///
/// Sending is fire-and-forget.
/// The bus connection task picks the messages up asynchronously.
pub trait BusTx {
    /// Send a message to all subscribers on the bus.
    fn broadcast(&mut self, msg: BusMessage);
    /// Send a message to one service on the bus.
    fn send_to(&mut self, service: &str, msg: BusMessage);
}

type SubscriberCallback = Box<dyn FnMut(FirewallStatus)>;

/// The firewall readiness state machine.
///
/// All host capabilities the engine needs (probe launching, bus sending)
/// are passed into the constructor explicitly.
pub struct FirewallWatch<P, B> {
    status: FirewallStatus,
    check_state: CheckState,
    blocker_is_up: bool,
    systemctl: PathBuf,
    blocker_service: String,
    prober: P,
    bus: B,
    subscribers: Vec<(SubscriberId, SubscriberCallback)>,
    next_subscriber: u64,
}

impl<P: ProbeRunner, B: BusTx> FirewallWatch<P, B> {
    /// Create a new engine in the `not_ready` state.
    ///
    /// Configuration preconditions are checked here, once, and are fatal.
    pub fn new(conf: &Config, prober: P, bus: B) -> ah::Result<Self> {
        if conf.systemctl().as_os_str().is_empty() {
            return Err(err!("The service manager query command is not configured."));
        }
        if conf.blocker_service().trim().is_empty() {
            return Err(err!("The IP blocker service name is not configured."));
        }
        Ok(Self {
            status: FirewallStatus::NotReady,
            check_state: CheckState::Idle,
            blocker_is_up: false,
            systemctl: conf.systemctl().to_path_buf(),
            blocker_service: conf.blocker_service().to_string(),
            prober,
            bus,
            subscribers: vec![],
            next_subscriber: 0,
        })
    }

    /// Take over reloaded configuration values.
    pub fn update_conf(&mut self, conf: &Config) {
        self.systemctl = conf.systemctl().to_path_buf();
        self.blocker_service = conf.blocker_service().to_string();
    }

    /// Get the current firewall status.
    pub fn status(&self) -> FirewallStatus {
        self.status
    }

    /// Register a status subscriber.
    ///
    /// The callback is invoked synchronously, in registration order,
    /// once per status transition.
    pub fn subscribe(&mut self, callback: SubscriberCallback) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push((id, callback));
        id
    }

    /// Remove a status subscriber.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.retain(|(i, _)| *i != id);
    }

    /// Trigger a firewall check.
    ///
    /// This is called by the periodic timer and by the startup kick-off.
    /// If a check is already in flight, the triggers coalesce
    /// and this is a successful no-op.
    pub fn check(&mut self) -> ah::Result<()> {
        if self.check_state != CheckState::Idle {
            return Ok(());
        }
        self.check_state = CheckState::CheckingEnabled;
        self.start_check()
    }

    /// Launch the probe for the current check phase.
    ///
    /// If the probe cannot be launched, the sequencer falls back
    /// to `Idle` before the error is returned.
    /// No code path may leave it stuck in a non-idle state,
    /// because no completion will ever arrive for a failed launch.
    fn start_check(&mut self) -> ah::Result<()> {
        let mode = match self.check_state {
            CheckState::CheckingEnabled => "is-enabled",
            CheckState::CheckingActive => "is-active",
            CheckState::Idle => {
                return Err(err!("start_check() called without a check phase."));
            }
        };
        if let Err(e) = self
            .prober
            .start(&self.systemctl, &[mode, &self.blocker_service])
        {
            self.check_state = CheckState::Idle;
            return Err(e);
        }
        Ok(())
    }

    /// Handle the completion of a probe process.
    pub fn on_probe_done(&mut self, result: ProbeResult) {
        let phase = self.check_state;
        // Deferred reset: the sequencer returns to idle on every path
        // out of this handler. The phase-1 success branch re-arms it.
        self.check_state = CheckState::Idle;

        match phase {
            CheckState::Idle => {
                warn!("Stray probe completion without a check in flight.");
            }
            CheckState::CheckingEnabled => {
                if result.exited_with(0) {
                    // The firewall service is enabled. Now check whether
                    // it is also active, without an external trigger.
                    self.set_status(FirewallStatus::Down);
                    self.check_state = CheckState::CheckingActive;
                    if let Err(e) = self.start_check() {
                        error!("Failed to launch the is-active probe: {e:#}");
                    }
                } else if result.exited_with(1) {
                    self.set_status(FirewallStatus::Off);
                } else {
                    log_indeterminate("is-enabled", &result);
                }
            }
            CheckState::CheckingActive => {
                if result.exited_with(0) {
                    let status = if self.blocker_is_up {
                        FirewallStatus::Active
                    } else {
                        FirewallStatus::Up
                    };
                    self.set_status(status);
                } else if result.exited_with(1) {
                    self.set_status(FirewallStatus::Down);
                } else {
                    log_indeterminate("is-active", &result);
                }
            }
        }
    }

    /// Handle one inbound message from the bus.
    ///
    /// Malformed messages and messages about unrelated services
    /// are expected traffic. They are filtered, not errors.
    pub fn on_bus_message(&mut self, msg: &BusMessage) {
        match msg.name() {
            MSG_BLOCKER_STATUS => {
                let Some(status) = msg.param(PARAM_STATUS) else {
                    debug!("BLOCKER_STATUS message without a status parameter.");
                    return;
                };
                self.on_blocker_status(status == STATUS_UP);
            }
            MSG_SERVICE_STATUS => {
                let (Some(service), Some(status)) =
                    (msg.param(PARAM_SERVICE), msg.param(PARAM_STATUS))
                else {
                    debug!("SERVICE_STATUS message with missing parameters.");
                    return;
                };
                // This catches the blocker crashing without ever
                // sending its own down notice.
                if service == self.blocker_service && status != STATUS_UP {
                    self.on_blocker_status(false);
                }
            }
            MSG_READY => {
                // A peer just became reachable.
                // Ask the blocker for its current status.
                // If the blocker is absent, the bus drops the query.
                self.query_blocker_status();
            }
            MSG_FIREWALL_STATUS_QUERY => {
                let Some(from) = msg.from_service() else {
                    debug!("FIREWALL_STATUS_QUERY without a sender.");
                    return;
                };
                let reply = self.status_msg();
                self.bus.send_to(from, reply);
            }
            other => {
                debug!("Ignoring bus message '{other}'.");
            }
        }
    }

    /// The bus connection (re-)established.
    ///
    /// Publish our current status and ask the blocker for its status,
    /// because messages may have been lost while we were away.
    pub fn on_bus_connected(&mut self) {
        let msg = self.status_msg();
        self.bus.broadcast(msg);
        self.query_blocker_status();
    }

    /// Fold a blocker liveness report into the status.
    fn on_blocker_status(&mut self, up: bool) {
        self.blocker_is_up = up;
        match self.status {
            FirewallStatus::Up | FirewallStatus::Active => {
                let status = if up {
                    FirewallStatus::Active
                } else {
                    FirewallStatus::Up
                };
                self.set_status(status);
            }
            _ => {
                // The primary firewall load phase has not succeeded, yet.
                // Its probe result supersedes any peer report.
            }
        }
    }

    /// Ask the blocker service to report its status.
    /// Fire-and-forget. The reply, if any, arrives as BLOCKER_STATUS.
    fn query_blocker_status(&mut self) {
        let msg = BusMessage::new(MSG_BLOCKER_STATUS_QUERY).with_param(PARAM_CACHE, CACHE_NO);
        let service = self.blocker_service.clone();
        self.bus.send_to(&service, msg);
    }

    /// The single choke point for status mutation.
    ///
    /// Publishes exactly once per distinct consecutive value.
    /// A no-op set to the current value does not publish.
    fn set_status(&mut self, status: FirewallStatus) {
        debug_assert_ne!(status, FirewallStatus::Unknown);
        if status == self.status {
            return;
        }
        self.status = status;
        self.notify();
    }

    /// Publish a status transition to all subscribers and to the bus.
    fn notify(&mut self) {
        info!("Firewall status changed to '{}'.", self.status);
        let status = self.status;
        for (_, callback) in &mut self.subscribers {
            callback(status);
        }
        let msg = self.status_msg();
        self.bus.broadcast(msg);
    }

    /// Build the status announcement message.
    fn status_msg(&self) -> BusMessage {
        BusMessage::new(MSG_FIREWALL_STATUS)
            .with_param(PARAM_FIREWALL_STATUS, self.status.as_str())
            .with_param(PARAM_CACHE, CACHE_NO)
    }
}

/// Log a probe outcome that must not alter the status.
fn log_indeterminate(mode: &str, result: &ProbeResult) {
    if result.signaled {
        error!(
            "The {mode} probe was terminated by signal {}. \
             stdout: '{}' stderr: '{}'",
            result.exit_code,
            String::from_utf8_lossy(&result.stdout).trim(),
            String::from_utf8_lossy(&result.stderr).trim(),
        );
    } else {
        error!(
            "The {mode} probe reported an unrecognized outcome (exit code {}). \
             The firewall status is left unchanged. \
             stdout: '{}' stderr: '{}'",
            result.exit_code,
            String::from_utf8_lossy(&result.stdout).trim(),
            String::from_utf8_lossy(&result.stderr).trim(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipguard_conf::ConfigVariant;
    use ipguard_proto::{PARAM_FROM, BROADCAST};
    use std::{cell::RefCell, path::Path, rc::Rc};

    #[derive(Default)]
    struct FakeProber {
        starts: Vec<Vec<String>>,
        fail_next: bool,
    }

    impl ProbeRunner for FakeProber {
        fn start(&mut self, program: &Path, args: &[&str]) -> ah::Result<()> {
            if self.fail_next {
                self.fail_next = false;
                return Err(err!("simulated spawn failure"));
            }
            let mut start = vec![program.display().to_string()];
            start.extend(args.iter().map(|a| a.to_string()));
            self.starts.push(start);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        sent: Vec<(String, BusMessage)>,
    }

    impl BusTx for RecordingBus {
        fn broadcast(&mut self, msg: BusMessage) {
            self.sent.push((BROADCAST.to_string(), msg));
        }
        fn send_to(&mut self, service: &str, msg: BusMessage) {
            self.sent.push((service.to_string(), msg));
        }
    }

    type TestWatch = FirewallWatch<FakeProber, RecordingBus>;

    fn make_watch() -> TestWatch {
        let conf = Config::new(ConfigVariant::Daemon);
        FirewallWatch::new(&conf, FakeProber::default(), RecordingBus::default()).unwrap()
    }

    fn exit(exit_code: i32) -> ProbeResult {
        ProbeResult {
            succeeded: true,
            signaled: false,
            exit_code,
            stdout: vec![],
            stderr: vec![],
        }
    }

    fn signaled() -> ProbeResult {
        ProbeResult {
            succeeded: false,
            signaled: true,
            exit_code: libc::SIGKILL,
            stdout: b"killed".to_vec(),
            stderr: vec![],
        }
    }

    /// Run a full successful two-phase check. Leaves the watch in Up or Active.
    fn run_full_check(watch: &mut TestWatch) {
        watch.check().unwrap();
        watch.on_probe_done(exit(0)); // is-enabled -> enabled
        watch.on_probe_done(exit(0)); // is-active -> active
    }

    fn blocker_status_msg(status: &str) -> BusMessage {
        BusMessage::new(MSG_BLOCKER_STATUS).with_param(PARAM_STATUS, status)
    }

    fn service_status_msg(service: &str, status: &str) -> BusMessage {
        BusMessage::new(MSG_SERVICE_STATUS)
            .with_param(PARAM_SERVICE, service)
            .with_param(PARAM_STATUS, status)
    }

    #[test]
    fn test_initial_state() {
        let watch = make_watch();
        assert_eq!(watch.status(), FirewallStatus::NotReady);
        assert_eq!(watch.check_state, CheckState::Idle);
        assert!(!watch.blocker_is_up);
    }

    #[test]
    fn test_probe_invocation() {
        let mut watch = make_watch();
        watch.check().unwrap();
        assert_eq!(
            watch.prober.starts,
            vec![vec![
                "/usr/bin/systemctl".to_string(),
                "is-enabled".to_string(),
                "ipblockd".to_string(),
            ]]
        );
        watch.on_probe_done(exit(0));
        assert_eq!(watch.prober.starts.len(), 2);
        assert_eq!(watch.prober.starts[1][1], "is-active");
    }

    #[test]
    fn test_scenario_enabled_chains_to_active() {
        let mut watch = make_watch();
        watch.check().unwrap();
        watch.on_probe_done(exit(0));
        // Phase 1 success: status Down, phase 2 started without
        // an external trigger.
        assert_eq!(watch.status(), FirewallStatus::Down);
        assert_eq!(watch.check_state, CheckState::CheckingActive);
        assert_eq!(watch.prober.starts.len(), 2);
    }

    #[test]
    fn test_scenario_disabled() {
        let mut watch = make_watch();
        watch.check().unwrap();
        watch.on_probe_done(exit(1));
        assert_eq!(watch.status(), FirewallStatus::Off);
        assert_eq!(watch.check_state, CheckState::Idle);
        // No phase 2 probe.
        assert_eq!(watch.prober.starts.len(), 1);
    }

    #[test]
    fn test_scenario_blocker_toggling() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        assert_eq!(watch.status(), FirewallStatus::Up);

        watch.on_bus_message(&blocker_status_msg("up"));
        assert_eq!(watch.status(), FirewallStatus::Active);

        watch.on_bus_message(&service_status_msg("ipblockd", "down"));
        assert_eq!(watch.status(), FirewallStatus::Up);

        // Reports about other services are filtered.
        watch.on_bus_message(&blocker_status_msg("up"));
        watch.on_bus_message(&service_status_msg("otherservice", "down"));
        assert_eq!(watch.status(), FirewallStatus::Active);
    }

    #[test]
    fn test_concurrent_triggers_coalesce() {
        let mut watch = make_watch();
        watch.check().unwrap();
        watch.check().unwrap();
        watch.check().unwrap();
        // Only one probe was spawned.
        assert_eq!(watch.prober.starts.len(), 1);
    }

    #[test]
    fn test_check_state_always_returns_to_idle() {
        for result in [exit(1), signaled(), exit(7)] {
            let mut watch = make_watch();
            watch.check().unwrap();
            watch.on_probe_done(result);
            assert_eq!(watch.check_state, CheckState::Idle);
        }
        // And through the full two-phase sequence.
        let mut watch = make_watch();
        run_full_check(&mut watch);
        assert_eq!(watch.check_state, CheckState::Idle);
    }

    #[test]
    fn test_indeterminate_leaves_status_unchanged() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        assert_eq!(watch.status(), FirewallStatus::Up);

        watch.check().unwrap();
        watch.on_probe_done(signaled());
        assert_eq!(watch.status(), FirewallStatus::Up);
        assert_eq!(watch.check_state, CheckState::Idle);

        watch.check().unwrap();
        watch.on_probe_done(exit(255));
        assert_eq!(watch.status(), FirewallStatus::Up);
        assert_eq!(watch.check_state, CheckState::Idle);
    }

    #[test]
    fn test_active_firewall_goes_down() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        watch.on_bus_message(&blocker_status_msg("up"));
        assert_eq!(watch.status(), FirewallStatus::Active);

        // The firewall service stopped.
        watch.check().unwrap();
        watch.on_probe_done(exit(0)); // is-enabled
        watch.on_probe_done(exit(1)); // is-active -> inactive
        assert_eq!(watch.status(), FirewallStatus::Down);
    }

    #[test]
    fn test_peer_reports_never_regress_to_not_ready() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        for _ in 0..3 {
            watch.on_bus_message(&blocker_status_msg("down"));
            assert_eq!(watch.status(), FirewallStatus::Up);
            watch.on_bus_message(&service_status_msg("ipblockd", "crashed"));
            assert_eq!(watch.status(), FirewallStatus::Up);
            watch.on_bus_message(&blocker_status_msg("up"));
            assert_eq!(watch.status(), FirewallStatus::Active);
        }
    }

    #[test]
    fn test_early_peer_reports_are_remembered_but_not_applied() {
        let mut watch = make_watch();
        watch.on_bus_message(&blocker_status_msg("up"));
        // Not applied: the primary load phase did not succeed, yet.
        assert_eq!(watch.status(), FirewallStatus::NotReady);
        assert!(watch.blocker_is_up);

        // But it decides the UP/ACTIVE tie-break of phase 2.
        run_full_check(&mut watch);
        assert_eq!(watch.status(), FirewallStatus::Active);
    }

    #[test]
    fn test_set_status_publishes_once_per_transition() {
        let mut watch = make_watch();
        let seen = Rc::new(RefCell::new(vec![]));
        let seen_clone = Rc::clone(&seen);
        watch.subscribe(Box::new(move |status| {
            seen_clone.borrow_mut().push(status);
        }));

        watch.set_status(FirewallStatus::Down);
        watch.set_status(FirewallStatus::Down);
        watch.set_status(FirewallStatus::Down);
        watch.set_status(FirewallStatus::Up);
        watch.set_status(FirewallStatus::NotReady); // back is allowed via set_status itself
        assert_eq!(
            *seen.borrow(),
            vec![
                FirewallStatus::Down,
                FirewallStatus::Up,
                FirewallStatus::NotReady,
            ]
        );
        // One broadcast per transition, no more.
        let broadcasts: Vec<_> = watch
            .bus
            .sent
            .iter()
            .filter(|(to, msg)| to == BROADCAST && msg.name() == MSG_FIREWALL_STATUS)
            .collect();
        assert_eq!(broadcasts.len(), 3);
        assert_eq!(
            broadcasts[0].1.param(PARAM_FIREWALL_STATUS),
            Some("down")
        );
        assert_eq!(broadcasts[0].1.param(PARAM_CACHE), Some("no"));
    }

    #[test]
    fn test_subscribers_in_registration_order() {
        let mut watch = make_watch();
        let order = Rc::new(RefCell::new(vec![]));
        let order_a = Rc::clone(&order);
        let order_b = Rc::clone(&order);
        let id_a = watch.subscribe(Box::new(move |_| order_a.borrow_mut().push('a')));
        watch.subscribe(Box::new(move |_| order_b.borrow_mut().push('b')));

        watch.set_status(FirewallStatus::Down);
        assert_eq!(*order.borrow(), vec!['a', 'b']);

        watch.unsubscribe(id_a);
        watch.set_status(FirewallStatus::Off);
        assert_eq!(*order.borrow(), vec!['a', 'b', 'b']);
    }

    #[test]
    fn test_spawn_failure_resets_sequencer() {
        let mut watch = make_watch();
        watch.prober.fail_next = true;
        assert!(watch.check().is_err());
        assert_eq!(watch.check_state, CheckState::Idle);
        assert_eq!(watch.status(), FirewallStatus::NotReady);
        // The next timer tick can retry.
        watch.check().unwrap();
        assert_eq!(watch.check_state, CheckState::CheckingEnabled);
    }

    #[test]
    fn test_ready_triggers_blocker_query() {
        let mut watch = make_watch();
        watch.on_bus_message(&BusMessage::new(MSG_READY));
        let (to, msg) = &watch.bus.sent[0];
        assert_eq!(to, "ipblockd");
        assert_eq!(msg.name(), MSG_BLOCKER_STATUS_QUERY);
        assert_eq!(msg.param(PARAM_CACHE), Some("no"));
    }

    #[test]
    fn test_status_query_gets_direct_reply() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        watch.bus.sent.clear();

        let query = BusMessage::new(MSG_FIREWALL_STATUS_QUERY).with_param(PARAM_FROM, "peer");
        watch.on_bus_message(&query);
        assert_eq!(watch.bus.sent.len(), 1);
        let (to, msg) = &watch.bus.sent[0];
        assert_eq!(to, "peer");
        assert_eq!(msg.name(), MSG_FIREWALL_STATUS);
        assert_eq!(msg.param(PARAM_FIREWALL_STATUS), Some("up"));
        // Answering a query does not mutate state.
        assert_eq!(watch.status(), FirewallStatus::Up);
        assert_eq!(watch.check_state, CheckState::Idle);
    }

    #[test]
    fn test_malformed_messages_are_filtered() {
        let mut watch = make_watch();
        run_full_check(&mut watch);
        watch.bus.sent.clear();

        watch.on_bus_message(&BusMessage::new(MSG_BLOCKER_STATUS)); // no status param
        watch.on_bus_message(&BusMessage::new(MSG_SERVICE_STATUS)); // no params
        watch.on_bus_message(&BusMessage::new(MSG_FIREWALL_STATUS_QUERY)); // no sender
        watch.on_bus_message(&BusMessage::new("SOMETHING_ELSE"));
        assert_eq!(watch.status(), FirewallStatus::Up);
        assert!(watch.bus.sent.is_empty());
    }

    #[test]
    fn test_bus_connect_announces_and_queries() {
        let mut watch = make_watch();
        watch.on_bus_connected();
        assert_eq!(watch.bus.sent.len(), 2);
        let (to, msg) = &watch.bus.sent[0];
        assert_eq!(to, BROADCAST);
        assert_eq!(msg.name(), MSG_FIREWALL_STATUS);
        assert_eq!(msg.param(PARAM_FIREWALL_STATUS), Some("not_ready"));
        let (to, msg) = &watch.bus.sent[1];
        assert_eq!(to, "ipblockd");
        assert_eq!(msg.name(), MSG_BLOCKER_STATUS_QUERY);
    }

    #[test]
    fn test_stray_probe_completion() {
        let mut watch = make_watch();
        watch.on_probe_done(exit(0));
        assert_eq!(watch.status(), FirewallStatus::NotReady);
        assert_eq!(watch.check_state, CheckState::Idle);
        assert!(watch.prober.starts.is_empty());
    }
}

// vim: ts=4 sw=4 expandtab

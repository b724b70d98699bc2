// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, Context as _};
use std::{os::unix::process::ExitStatusExt as _, path::Path, process::Stdio};
use tokio::{process::Command, sync::mpsc, task};

/// The outcome of one completed probe process.
///
/// Produced exactly once per successfully launched probe
/// and consumed immediately by the check sequencer.
#[derive(Debug)]
pub struct ProbeResult {
    /// The process ran to completion and reported a normal exit code.
    pub succeeded: bool,
    /// The process was terminated by a signal.
    pub signaled: bool,
    /// The exit code, if `succeeded`.
    /// The terminating signal number, if `signaled`.
    pub exit_code: i32,
    /// Captured stdout of the process.
    pub stdout: Vec<u8>,
    /// Captured stderr of the process.
    pub stderr: Vec<u8>,
}

impl ProbeResult {
    /// Check if the probe exited normally with the given exit code.
    pub fn exited_with(&self, exit_code: i32) -> bool {
        self.succeeded && !self.signaled && self.exit_code == exit_code
    }
}

/// Something that can launch a probe process.
///
/// This is the seam between the check sequencer and the operating system.
pub trait ProbeRunner {
    /// Launch the probe in the background.
    ///
    /// A failure to spawn the process surfaces synchronously as `Err`
    /// and no completion is delivered for the attempt.
    fn start(&mut self, program: &Path, args: &[&str]) -> ah::Result<()>;
}

/// Launches external probe processes and delivers their [ProbeResult]
/// back into the event loop through an mpsc channel.
///
/// Spawning never blocks the calling task.
pub struct Prober {
    done_tx: mpsc::Sender<ProbeResult>,
}

impl Prober {
    pub fn new(done_tx: mpsc::Sender<ProbeResult>) -> Self {
        Self { done_tx }
    }
}

impl ProbeRunner for Prober {
    fn start(&mut self, program: &Path, args: &[&str]) -> ah::Result<()> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Spawn probe process {program:?}"))?;

        let done_tx = self.done_tx.clone();
        task::spawn(async move {
            let result = match child.wait_with_output().await {
                Ok(output) => match output.status.code() {
                    Some(exit_code) => ProbeResult {
                        succeeded: true,
                        signaled: false,
                        exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                    },
                    None => ProbeResult {
                        succeeded: false,
                        signaled: true,
                        exit_code: output.status.signal().unwrap_or(0),
                        stdout: output.stdout,
                        stderr: output.stderr,
                    },
                },
                Err(e) => ProbeResult {
                    succeeded: false,
                    signaled: false,
                    exit_code: -1,
                    stdout: vec![],
                    stderr: e.to_string().into_bytes(),
                },
            };
            // The receiver only goes away on daemon shutdown.
            let _ = done_tx.send(result).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_probe(program: &str, args: &[&str]) -> ProbeResult {
        let (tx, mut rx) = mpsc::channel(1);
        let mut prober = Prober::new(tx);
        prober.start(Path::new(program), args).unwrap();
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_probe_exit_zero() {
        let result = run_probe("/bin/sh", &["-c", "exit 0"]).await;
        assert!(result.exited_with(0));
        assert!(!result.signaled);
    }

    #[tokio::test]
    async fn test_probe_exit_code() {
        let result = run_probe("/bin/sh", &["-c", "echo out; echo err >&2; exit 3"]).await;
        assert!(result.succeeded);
        assert!(!result.signaled);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"err\n");
        assert!(!result.exited_with(0));
        assert!(result.exited_with(3));
    }

    #[tokio::test]
    async fn test_probe_signaled() {
        let result = run_probe("/bin/sh", &["-c", "kill -KILL $$"]).await;
        assert!(!result.succeeded);
        assert!(result.signaled);
        assert_eq!(result.exit_code, libc::SIGKILL);
        assert!(!result.exited_with(0));
        assert!(!result.exited_with(1));
    }

    #[tokio::test]
    async fn test_probe_spawn_failure() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut prober = Prober::new(tx);
        let res = prober.start(Path::new("/nonexistent/probe/command"), &[]);
        assert!(res.is_err());
        // No completion must be delivered for a failed spawn.
        assert!(rx.try_recv().is_err());
    }
}

// vim: ts=4 sw=4 expandtab

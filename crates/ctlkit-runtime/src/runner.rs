//! Task execution
//!
//! [`Runner::start`] links processing on a mapping, runs its initial tasks to completion
//! in order, then spawns every scan task on a `JoinSet`. The returned [`RunningTasks`]
//! keeps them alive until a shutdown signal, after which scan loops are aborted and the
//! root controller is closed.
//!
//! ```text
//! start ──► link ──► connect ──► spawn scans ──► run_until(signal) ──► abort scans ──► close
//!                       │
//!                       └─ failure: returned, nothing spawned
//! ```

use ctlkit_core::{Controller, CtlError, CtlResult, Mapping, TaskSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

use crate::settings::RunnerSettings;

type ScanOutcome = (String, CtlResult<()>);

/// Starts mapped controller trees.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    settings: RunnerSettings,
}

impl Runner {
    /// Runner with the given settings.
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    /// Link, connect and spawn.
    ///
    /// An initial task failure is returned as is; no scan task has been started then.
    pub async fn start(&self, mapping: &Mapping) -> CtlResult<RunningTasks> {
        let tasks = TaskSet::derive(mapping)?;

        for task in tasks.initial {
            let name = task.name().to_string();
            if let Err(e) = task.run().await {
                tracing::error!(task = %name, error = %e, "initial task failed, startup aborted");
                return Err(e);
            }
        }

        let mut set = JoinSet::new();
        let count = tasks.scan.len();
        for scan in tasks.scan {
            let name = scan.name().to_string();
            set.spawn(async move { (name, scan.run().await) });
        }
        tracing::info!(scan_tasks = count, "controller started");

        Ok(RunningTasks {
            root: mapping.controller().clone(),
            tasks: set,
            shutdown_timeout: self.settings.shutdown_timeout(),
        })
    }

    /// Start, then run until Ctrl-C.
    pub async fn run(&self, mapping: &Mapping) -> CtlResult<()> {
        self.start(mapping).await?.run_until(shutdown_signal()).await
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for Ctrl-C, shutting down");
        }
    }
}

/// Scan tasks of a started tree.
pub struct RunningTasks {
    root: Arc<dyn Controller>,
    tasks: JoinSet<ScanOutcome>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for RunningTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTasks")
            .field("active", &self.tasks.len())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl RunningTasks {
    /// Scan tasks that have not finished yet.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Keep running until `signal` resolves, then shut down.
    ///
    /// Scan tasks that end on their own are reaped and logged meanwhile.
    pub async fn run_until<F>(mut self, signal: F) -> CtlResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                Some(outcome) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    reap(outcome);
                }
            }
        }
        self.shutdown().await
    }

    /// Abort every scan loop and close the root controller.
    pub async fn shutdown(mut self) -> CtlResult<()> {
        tracing::info!(active = self.tasks.len(), "shutting down");
        self.tasks.abort_all();
        while let Some(outcome) = self.tasks.join_next().await {
            reap(outcome);
        }

        match tokio::time::timeout(self.shutdown_timeout, self.root.close()).await {
            Ok(result) => result,
            Err(_) => Err(CtlError::Device(format!(
                "controller close did not finish within {:?}",
                self.shutdown_timeout
            ))),
        }
    }
}

fn reap(outcome: Result<ScanOutcome, JoinError>) {
    match outcome {
        Ok((name, Ok(()))) => tracing::info!(task = %name, "scan task finished"),
        Ok((name, Err(e))) => tracing::warn!(task = %name, error = %e, "scan task ended"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "scan task panicked"),
    }
}

//! Task scheduler
//!
//! Turns a built [`Mapping`] into task descriptions. Nothing here spawns anything: an
//! owning runtime runs the [`InitialTask`]s to completion, in order, then starts every
//! [`ScanTask`] concurrently.
//!
//! - **Initial tasks**: the root controller's `connect`.
//! - **Scan tasks**: one per scan method, and one per readable attribute whose handler has
//!   an updater. Each iteration is followed by a sleep of the task's period. A failed
//!   iteration ends that task only.
//! - **Process linking**: a put method named `put_<attr>` becomes the process callback of
//!   `<attr>`. Writable attributes that no put method claims but whose handler has a
//!   sender forward their writes to it.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::attribute::{AnyAttribute, ValueCallback};
use crate::datatype::Value;
use crate::error::{CtlError, CtlResult};
use crate::mapping::{Mapping, SingleMapping};
use crate::method::{Method, MethodKind, ScanFlow, PUT_PREFIX};

type InitialFn = Box<dyn FnOnce() -> BoxFuture<'static, CtlResult<()>> + Send>;
type StepFn = Arc<dyn Fn() -> BoxFuture<'static, CtlResult<ScanFlow>> + Send + Sync>;

/// One-shot startup work.
pub struct InitialTask {
    name: String,
    run: InitialFn,
}

impl fmt::Debug for InitialTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl InitialTask {
    /// Wrap a one-shot future factory.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, CtlResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(f),
        }
    }

    /// Task label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run to completion.
    pub async fn run(self) -> CtlResult<()> {
        tracing::info!(task = %self.name, "running initial task");
        (self.run)().await
    }
}

/// Periodically repeated work.
#[derive(Clone)]
pub struct ScanTask {
    name: String,
    period: Duration,
    step: StepFn,
}

impl fmt::Debug for ScanTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanTask")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl ScanTask {
    /// Wrap an iteration factory. `period` must be positive.
    pub fn new<F>(name: impl Into<String>, period: Duration, step: F) -> CtlResult<Self>
    where
        F: Fn() -> BoxFuture<'static, CtlResult<ScanFlow>> + Send + Sync + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            return Err(CtlError::Configuration(format!(
                "scan task '{}' must have a positive period",
                name
            )));
        }
        Ok(Self {
            name,
            period,
            step: Arc::new(step),
        })
    }

    /// Task label, `<path>.<member>` for sub-controllers.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay between iterations.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run a single iteration.
    pub async fn run_once(&self) -> CtlResult<ScanFlow> {
        (self.step)().await
    }

    /// Iterate until the step asks to stop or fails.
    ///
    /// A failure is logged here and returned; it never escapes into other tasks.
    pub async fn run(self) -> CtlResult<()> {
        tracing::debug!(task = %self.name, period = ?self.period, "scan task started");
        loop {
            match self.run_once().await {
                Ok(ScanFlow::Continue) => {}
                Ok(ScanFlow::Stop) => {
                    tracing::warn!(task = %self.name, "scan task stopped by its continuation flag");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(task = %self.name, error = %e, "scan iteration failed, task stopped");
                    return Err(e);
                }
            }
            tokio::time::sleep(self.period).await;
        }
    }
}

/// Everything a runtime needs to start a mapped tree.
#[derive(Debug)]
pub struct TaskSet {
    /// Run first, in order.
    pub initial: Vec<InitialTask>,
    /// Run concurrently after every initial task succeeded.
    pub scan: Vec<ScanTask>,
}

impl TaskSet {
    /// Link processing on `mapping` and derive its tasks.
    pub fn derive(mapping: &Mapping) -> CtlResult<Self> {
        link_attribute_processing(mapping)?;
        Ok(Self {
            initial: initial_tasks(mapping),
            scan: scan_tasks(mapping)?,
        })
    }
}

fn qualified(mapping: &SingleMapping, member: &str) -> String {
    if mapping.path().is_empty() {
        member.to_string()
    } else {
        format!("{}.{}", mapping.path().join("."), member)
    }
}

/// The root controller's `connect`.
pub fn initial_tasks(mapping: &Mapping) -> Vec<InitialTask> {
    let root = mapping.controller().clone();
    vec![InitialTask::new("connect", move || -> BoxFuture<'static, CtlResult<()>> {
        Box::pin(async move { root.connect().await })
    })]
}

/// Scan methods and attribute updaters, in mapping order.
pub fn scan_tasks(mapping: &Mapping) -> CtlResult<Vec<ScanTask>> {
    let mut tasks = Vec::new();
    for single in mapping.get_controller_mappings() {
        for (name, method) in single.methods() {
            if let MethodKind::Scan { period } = method.kind() {
                let method = method.clone();
                tasks.push(ScanTask::new(qualified(single, name), period, move || {
                    method.scan()
                })?);
            }
        }

        for (name, attr) in single.attributes() {
            if !attr.mode().is_readable() {
                continue;
            }
            let Some(io) = attr.io() else { continue };
            let Some(period) = io.update_period() else {
                continue;
            };
            let (io, attr) = (io.clone(), attr.clone());
            tasks.push(ScanTask::new(
                qualified(single, name),
                period,
                move || -> BoxFuture<'static, CtlResult<ScanFlow>> {
                    let (io, attr) = (io.clone(), attr.clone());
                    Box::pin(async move {
                        io.update(attr.as_ref()).await?;
                        Ok(ScanFlow::Continue)
                    })
                },
            )?);
        }
    }
    Ok(tasks)
}

/// Install process callbacks for every writable attribute that has a write target.
///
/// All `put_<attr>` links are validated before any callback is installed, so a
/// configuration error leaves the tree untouched. Re-linking is idempotent.
pub fn link_attribute_processing(mapping: &Mapping) -> CtlResult<()> {
    let mut put_links: Vec<(Arc<dyn AnyAttribute>, Arc<Method>)> = Vec::new();
    let mut sender_links: Vec<Arc<dyn AnyAttribute>> = Vec::new();

    for single in mapping.get_controller_mappings() {
        let mut claimed = HashSet::new();
        for (name, method) in single.methods() {
            if method.kind() != MethodKind::Put {
                continue;
            }
            let Some(attr_name) = name.strip_prefix(PUT_PREFIX) else {
                continue;
            };
            let attr = single.attribute(attr_name).ok_or_else(|| {
                CtlError::Configuration(format!(
                    "'{}' has no attribute '{}' to write",
                    qualified(single, name),
                    attr_name
                ))
            })?;
            if !attr.mode().is_writable() {
                return Err(CtlError::Configuration(format!(
                    "'{}' targets {} attribute '{}'",
                    qualified(single, name),
                    attr.mode(),
                    qualified(single, attr_name)
                )));
            }
            claimed.insert(attr_name);
            put_links.push((attr.clone(), method.clone()));
        }

        for (name, attr) in single.attributes() {
            if !attr.mode().is_writable() || claimed.contains(name.as_str()) {
                continue;
            }
            if attr.io().is_some_and(|io| io.can_put()) {
                sender_links.push(attr.clone());
            }
        }
    }

    for (attr, method) in put_links {
        let callback: ValueCallback = Arc::new(move |value: Value| method.put(value));
        attr.set_value_process_callback(Some(callback));
    }

    for attr in sender_links {
        if attr.has_process_callback() {
            continue;
        }
        let Some(io) = attr.io().cloned() else { continue };
        let weak = Arc::downgrade(&attr);
        let callback: ValueCallback =
            Arc::new(move |value: Value| -> BoxFuture<'static, CtlResult<()>> {
                let (io, weak) = (io.clone(), weak.clone());
                Box::pin(async move {
                    let attr = weak.upgrade().ok_or_else(|| {
                        CtlError::Disconnected("attribute has been dropped".into())
                    })?;
                    io.put(attr.as_ref(), value).await
                })
            });
        attr.set_value_process_callback(Some(callback));
    }

    tracing::debug!("linked attribute processing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_period_task_rejected() {
        let err = ScanTask::new("t", Duration::ZERO, || -> BoxFuture<'static, CtlResult<ScanFlow>> {
            Box::pin(async { Ok(ScanFlow::Continue) })
        })
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_task_stops_on_flag() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScanTask::new(
            "counter",
            Duration::from_millis(100),
            move || -> BoxFuture<'static, CtlResult<ScanFlow>> {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move { Ok(ScanFlow::from(n < 3)) })
            },
        )
        .unwrap();

        task.run().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_task_ends_on_error() {
        let task = ScanTask::new(
            "broken",
            Duration::from_millis(100),
            || -> BoxFuture<'static, CtlResult<ScanFlow>> {
                Box::pin(async { Err(CtlError::Device("boom".into())) })
            },
        )
        .unwrap();

        let err = task.run().await.unwrap_err();
        assert!(matches!(err, CtlError::Device(_)));
    }

    #[tokio::test]
    async fn test_initial_task_runs_once() {
        let task = InitialTask::new("noop", || -> BoxFuture<'static, CtlResult<()>> {
            Box::pin(async { Ok(()) })
        });
        assert_eq!(task.name(), "noop");
        task.run().await.unwrap();
    }
}

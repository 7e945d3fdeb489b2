//! Controller methods: scan, put and command.
//!
//! A [`MethodDecl`] is declared on a controller type next to its attribute templates and
//! is bound to each instance through a weak owner reference, yielding a [`Method`] that
//! can be called without knowing the controller type.
//!
//! - **Scan**: no arguments, repeated by a scan task every `period`. Returns `()` or a
//!   continuation flag (`false` ends the scan task).
//! - **Put**: exactly one value argument. A put method named `put_<attr>` becomes the
//!   process callback of attribute `<attr>` when processing is linked.
//! - **Command**: no arguments, invoked on demand by a backend.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::datatype::Value;
use crate::error::{CtlError, CtlResult};

/// Prefix linking a put method to the attribute it writes.
pub const PUT_PREFIX: &str = "put_";

/// Outcome of one scan iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFlow {
    /// Run again after the period.
    Continue,
    /// End this scan task.
    Stop,
}

impl From<()> for ScanFlow {
    fn from(_: ()) -> Self {
        ScanFlow::Continue
    }
}

impl From<bool> for ScanFlow {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            ScanFlow::Continue
        } else {
            ScanFlow::Stop
        }
    }
}

/// Classification of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MethodKind {
    /// Periodic, no arguments.
    Scan {
        /// Delay between the end of one iteration and the start of the next.
        #[serde(with = "duration_secs")]
        period: Duration,
    },
    /// One value argument.
    Put,
    /// No arguments, on demand.
    Command,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::Scan { period } => write!(f, "scan({:?})", period),
            MethodKind::Put => f.write_str("put"),
            MethodKind::Command => f.write_str("command"),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

type ScanFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, CtlResult<ScanFlow>> + Send + Sync>;
type PutFn<C> = Arc<dyn Fn(Arc<C>, Value) -> BoxFuture<'static, CtlResult<()>> + Send + Sync>;
type CommandFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, CtlResult<()>> + Send + Sync>;

enum DeclCall<C> {
    Scan(ScanFn<C>),
    Put(PutFn<C>),
    Command(CommandFn<C>),
}

/// Method template declared on controller type `C`.
pub struct MethodDecl<C> {
    kind: MethodKind,
    doc: Option<String>,
    call: DeclCall<C>,
}

impl<C> MethodDecl<C>
where
    C: Send + Sync + 'static,
{
    /// Declare a scan method. `period` must be positive.
    pub fn scan<F, Fut, R>(period: Duration, f: F) -> CtlResult<Self>
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CtlResult<R>> + Send + 'static,
        R: Into<ScanFlow>,
    {
        if period.is_zero() {
            return Err(CtlError::Configuration(
                "scan method must have a positive period".into(),
            ));
        }
        let call: ScanFn<C> = Arc::new(move |c: Arc<C>| -> BoxFuture<'static, CtlResult<ScanFlow>> {
            let fut = f(c);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Ok(Self {
            kind: MethodKind::Scan { period },
            doc: None,
            call: DeclCall::Scan(call),
        })
    }

    /// Declare a put method taking one value.
    pub fn put<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<C>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CtlResult<()>> + Send + 'static,
    {
        let call: PutFn<C> = Arc::new(move |c: Arc<C>, v: Value| -> BoxFuture<'static, CtlResult<()>> {
            Box::pin(f(c, v))
        });
        Self {
            kind: MethodKind::Put,
            doc: None,
            call: DeclCall::Put(call),
        }
    }

    /// Declare a command.
    pub fn command<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CtlResult<()>> + Send + 'static,
    {
        let call: CommandFn<C> = Arc::new(move |c: Arc<C>| -> BoxFuture<'static, CtlResult<()>> {
            Box::pin(f(c))
        });
        Self {
            kind: MethodKind::Command,
            doc: None,
            call: DeclCall::Command(call),
        }
    }

    /// Attach a description for backends.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// The classification.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub(crate) fn bind(&self, owner: &Weak<C>) -> Method {
        let call = match &self.call {
            DeclCall::Scan(f) => {
                let (f, owner) = (f.clone(), owner.clone());
                BoundCall::Scan(Arc::new(move || -> BoxFuture<'static, CtlResult<ScanFlow>> {
                    let (f, owner) = (f.clone(), owner.clone());
                    Box::pin(async move { f(upgrade(&owner)?).await })
                }))
            }
            DeclCall::Put(f) => {
                let (f, owner) = (f.clone(), owner.clone());
                BoundCall::Put(Arc::new(move |value: Value| -> BoxFuture<'static, CtlResult<()>> {
                    let (f, owner) = (f.clone(), owner.clone());
                    Box::pin(async move { f(upgrade(&owner)?, value).await })
                }))
            }
            DeclCall::Command(f) => {
                let (f, owner) = (f.clone(), owner.clone());
                BoundCall::Command(Arc::new(move || -> BoxFuture<'static, CtlResult<()>> {
                    let (f, owner) = (f.clone(), owner.clone());
                    Box::pin(async move { f(upgrade(&owner)?).await })
                }))
            }
        };
        Method {
            kind: self.kind,
            doc: self.doc.clone(),
            call,
        }
    }
}

fn upgrade<C>(owner: &Weak<C>) -> CtlResult<Arc<C>> {
    owner
        .upgrade()
        .ok_or_else(|| CtlError::Disconnected("owning controller has been dropped".into()))
}

enum BoundCall {
    Scan(Arc<dyn Fn() -> BoxFuture<'static, CtlResult<ScanFlow>> + Send + Sync>),
    Put(Arc<dyn Fn(Value) -> BoxFuture<'static, CtlResult<()>> + Send + Sync>),
    Command(Arc<dyn Fn() -> BoxFuture<'static, CtlResult<()>> + Send + Sync>),
}

/// A method bound to one controller instance.
pub struct Method {
    kind: MethodKind,
    doc: Option<String>,
    call: BoundCall,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("kind", &self.kind)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

impl Method {
    /// The classification.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Description, if declared.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Scan period, for scan methods.
    pub fn period(&self) -> Option<Duration> {
        match self.kind {
            MethodKind::Scan { period } => Some(period),
            _ => None,
        }
    }

    /// Run one scan iteration.
    pub fn scan(&self) -> BoxFuture<'static, CtlResult<ScanFlow>> {
        match &self.call {
            BoundCall::Scan(f) => f(),
            _ => self.wrong_kind("scan"),
        }
    }

    /// Invoke a put method with `value`.
    pub fn put(&self, value: Value) -> BoxFuture<'static, CtlResult<()>> {
        match &self.call {
            BoundCall::Put(f) => f(value),
            _ => self.wrong_kind("put"),
        }
    }

    /// Invoke a command.
    pub fn call(&self) -> BoxFuture<'static, CtlResult<()>> {
        match &self.call {
            BoundCall::Command(f) => f(),
            _ => self.wrong_kind("command"),
        }
    }

    fn wrong_kind<T: Send + 'static>(&self, op: &str) -> BoxFuture<'static, CtlResult<T>> {
        let err = CtlError::Configuration(format!("cannot invoke a {} method as {}", self.kind, op));
        Box::pin(async move { Err(err) })
    }
}

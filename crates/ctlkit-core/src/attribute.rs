//! Attribute<T> - typed, mode-tagged value slot
//!
//! An attribute is one named value of a controller that a backend exposes for reading
//! and/or writing. The value itself lives in a `tokio::sync::watch` channel (so
//! `get()` is a non-blocking borrow and any number of subscribers can observe changes);
//! the two callback slots and the optional bound handler sit next to it.
//!
//! # Templates and instances
//!
//! Attributes are declared once per controller type as [`AttrDecl`] templates. A
//! template is pure configuration: dtype, mode and the handler strategy. Every
//! controller instance binds its own [`Attribute`] from each template during
//! construction, so no two instances ever share a value or a callback.
//!
//! # Write paths
//!
//! ```text
//! Updater poll / backend ──► set(v) ──► coerce ──► store ──► update callback
//!
//! backend write ──► process(v) ──► coerce ──► [ReadWrite: store + update callback]
//!                                         └─► process callback (put_ method or Sender)
//! ```
//!
//! Coercion happens before anything is stored, so a failed `set`/`process` leaves the
//! attribute untouched. An unset callback slot is a silent no-op.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::datatype::{AttrValue, DataType, Value};
use crate::error::{CtlError, CtlResult};
use crate::handler::{AttrIo, Handler, OwnedHandler, Sender, Updater};

/// Callback receiving a typed attribute value.
pub type AttrCallback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, CtlResult<()>> + Send + Sync>;

/// Callback receiving a type-erased value.
pub type ValueCallback = AttrCallback<Value>;

/// Access mode of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrMode {
    /// Value is read from the device; backends may not write it.
    Read,
    /// Value is only written to the device; there is no stored value.
    Write,
    /// Both.
    ReadWrite,
}

impl AttrMode {
    /// `get`/`set` are valid.
    pub fn is_readable(self) -> bool {
        matches!(self, AttrMode::Read | AttrMode::ReadWrite)
    }

    /// `process` is valid.
    pub fn is_writable(self) -> bool {
        matches!(self, AttrMode::Write | AttrMode::ReadWrite)
    }
}

impl fmt::Display for AttrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttrMode::Read => "read",
            AttrMode::Write => "write",
            AttrMode::ReadWrite => "read_write",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Attribute<T>
// =============================================================================

/// A live attribute owned by one controller instance.
pub struct Attribute<T: AttrValue> {
    dtype: DataType,
    mode: AttrMode,
    value: watch::Sender<T>,
    update_callback: RwLock<Option<AttrCallback<T>>>,
    process_callback: RwLock<Option<AttrCallback<T>>>,
    io: Option<Arc<dyn AttrIo>>,
}

impl<T: AttrValue> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("dtype", &self.dtype)
            .field("mode", &self.mode)
            .field("value", &*self.value.borrow())
            .field("has_io", &self.io.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: AttrValue> Attribute<T> {
    /// Create a standalone attribute without a handler.
    ///
    /// Fails with a configuration error if `dtype` is not the catalog entry for `T`.
    pub fn new(dtype: DataType, mode: AttrMode) -> CtlResult<Self> {
        check_dtype::<T>(&dtype)?;
        Ok(Self::with_io(dtype, mode, None))
    }

    fn with_io(dtype: DataType, mode: AttrMode, io: Option<Arc<dyn AttrIo>>) -> Self {
        let (value, _) = watch::channel(T::zero());
        Self {
            dtype,
            mode,
            value,
            update_callback: RwLock::new(None),
            process_callback: RwLock::new(None),
            io,
        }
    }

    /// The dtype.
    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }

    /// The access mode.
    pub fn mode(&self) -> AttrMode {
        self.mode
    }

    /// The bound handler, if the template carried one.
    pub fn io(&self) -> Option<&Arc<dyn AttrIo>> {
        self.io.as_ref()
    }

    /// Current value.
    pub fn get(&self) -> CtlResult<T> {
        self.ensure_readable("get")?;
        Ok(self.value.borrow().clone())
    }

    /// Coerce and store `value`, then fire the update callback.
    pub async fn set(&self, value: impl Into<Value>) -> CtlResult<()> {
        self.ensure_readable("set")?;
        let value = T::coerce(value.into())?;
        self.store(value).await
    }

    /// Apply an external write.
    ///
    /// For `ReadWrite` the value is first stored (firing the update callback), then
    /// forwarded to the process callback. For `Write` it is forwarded directly.
    pub async fn process(&self, value: impl Into<Value>) -> CtlResult<()> {
        if !self.mode.is_writable() {
            return Err(CtlError::Configuration(format!(
                "cannot process a write on a {} attribute",
                self.mode
            )));
        }
        let value = T::coerce(value.into())?;
        if self.mode == AttrMode::ReadWrite {
            self.store(value.clone()).await?;
        }

        let callback = self.process_callback.read().clone();
        match callback {
            Some(callback) => callback(value).await,
            None => {
                tracing::trace!(dtype = self.dtype.name(), "no process callback, write not forwarded");
                Ok(())
            }
        }
    }

    /// Install (or with `None`, remove) the update callback.
    pub fn set_update_callback(&self, callback: Option<AttrCallback<T>>) {
        *self.update_callback.write() = callback;
    }

    /// Install (or with `None`, remove) the process callback.
    pub fn set_process_callback(&self, callback: Option<AttrCallback<T>>) {
        *self.process_callback.write() = callback;
    }

    /// Whether writes are forwarded anywhere.
    pub fn has_process_callback(&self) -> bool {
        self.process_callback.read().is_some()
    }

    /// Observe every stored value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    async fn store(&self, value: T) -> CtlResult<()> {
        self.value.send_replace(value.clone());

        let callback = self.update_callback.read().clone();
        match callback {
            Some(callback) => callback(value).await,
            None => {
                tracing::trace!(dtype = self.dtype.name(), "no update callback registered");
                Ok(())
            }
        }
    }

    fn ensure_readable(&self, op: &str) -> CtlResult<()> {
        if self.mode.is_readable() {
            Ok(())
        } else {
            Err(CtlError::Configuration(format!(
                "cannot {} a write-only attribute",
                op
            )))
        }
    }
}

fn check_dtype<T: AttrValue>(dtype: &DataType) -> CtlResult<()> {
    if T::matches(dtype) {
        Ok(())
    } else {
        Err(CtlError::Configuration(format!(
            "dtype '{}' cannot back an attribute of type {}",
            dtype.name(),
            std::any::type_name::<T>()
        )))
    }
}

/// Wrap a value callback so it accepts `T`.
fn typed_callback<T: AttrValue>(callback: ValueCallback) -> AttrCallback<T> {
    Arc::new(move |value: T| callback(value.into_value()))
}

// =============================================================================
// AnyAttribute - type-erased access
// =============================================================================

/// Type-erased view of an [`Attribute`], used by mappings, handlers and backends
/// that do not know the value type.
#[async_trait]
pub trait AnyAttribute: Send + Sync + 'static {
    /// The dtype.
    fn dtype(&self) -> &DataType;

    /// The access mode.
    fn mode(&self) -> AttrMode;

    /// Rust type name of the value (e.g. "bool").
    fn value_type(&self) -> &'static str;

    /// The bound handler, if any.
    fn io(&self) -> Option<&Arc<dyn AttrIo>>;

    /// Current value.
    fn get_value(&self) -> CtlResult<Value>;

    /// See [`Attribute::set`].
    async fn set_value(&self, value: Value) -> CtlResult<()>;

    /// See [`Attribute::process`].
    async fn process_value(&self, value: Value) -> CtlResult<()>;

    /// See [`Attribute::set_update_callback`].
    fn set_value_update_callback(&self, callback: Option<ValueCallback>);

    /// See [`Attribute::set_process_callback`].
    fn set_value_process_callback(&self, callback: Option<ValueCallback>);

    /// See [`Attribute::has_process_callback`].
    fn has_process_callback(&self) -> bool;

    /// For downcasting to `Attribute<T>`.
    fn as_any(&self) -> &dyn Any;

    /// For downcasting an `Arc<dyn AnyAttribute>` to `Arc<Attribute<T>>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<T: AttrValue> AnyAttribute for Attribute<T> {
    fn dtype(&self) -> &DataType {
        &self.dtype
    }

    fn mode(&self) -> AttrMode {
        self.mode
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn io(&self) -> Option<&Arc<dyn AttrIo>> {
        self.io.as_ref()
    }

    fn get_value(&self) -> CtlResult<Value> {
        self.get().map(AttrValue::into_value)
    }

    async fn set_value(&self, value: Value) -> CtlResult<()> {
        self.set(value).await
    }

    async fn process_value(&self, value: Value) -> CtlResult<()> {
        self.process(value).await
    }

    fn set_value_update_callback(&self, callback: Option<ValueCallback>) {
        self.set_update_callback(callback.map(typed_callback::<T>));
    }

    fn set_value_process_callback(&self, callback: Option<ValueCallback>) {
        self.set_process_callback(callback.map(typed_callback::<T>));
    }

    fn has_process_callback(&self) -> bool {
        Attribute::has_process_callback(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Build a standalone attribute from a dtype known only at runtime.
pub fn attribute_for(dtype: DataType, mode: AttrMode) -> Arc<dyn AnyAttribute> {
    match dtype {
        DataType::Int => Arc::new(Attribute::<i64>::with_io(dtype, mode, None)),
        DataType::Float { .. } => Arc::new(Attribute::<f64>::with_io(dtype, mode, None)),
        DataType::Bool { .. } => Arc::new(Attribute::<bool>::with_io(dtype, mode, None)),
    }
}

/// Build a standalone attribute from a dtype name such as "float".
///
/// Unsupported names fail here, at declaration, with a configuration error.
pub fn attribute_named(dtype: &str, mode: AttrMode) -> CtlResult<Arc<dyn AnyAttribute>> {
    Ok(attribute_for(dtype.parse()?, mode))
}

// =============================================================================
// AttrDecl - per-type template
// =============================================================================

/// Attribute template declared on controller type `C`.
pub struct AttrDecl<C, T> {
    dtype: DataType,
    mode: AttrMode,
    sender: Option<Arc<dyn Sender<C>>>,
    updater: Option<Arc<dyn Updater<C>>>,
    _value: PhantomData<fn() -> T>,
}

impl<C, T> AttrDecl<C, T>
where
    C: Send + Sync + 'static,
    T: AttrValue,
{
    /// Declare an attribute. Fails if `dtype` does not match `T`.
    pub fn new(dtype: DataType, mode: AttrMode) -> CtlResult<Self> {
        check_dtype::<T>(&dtype)?;
        Ok(Self {
            dtype,
            mode,
            sender: None,
            updater: None,
            _value: PhantomData,
        })
    }

    /// Read-only attribute.
    pub fn read(dtype: DataType) -> CtlResult<Self> {
        Self::new(dtype, AttrMode::Read)
    }

    /// Write-only attribute.
    pub fn write(dtype: DataType) -> CtlResult<Self> {
        Self::new(dtype, AttrMode::Write)
    }

    /// Read/write attribute.
    pub fn read_write(dtype: DataType) -> CtlResult<Self> {
        Self::new(dtype, AttrMode::ReadWrite)
    }

    /// Use `handler` for both directions.
    pub fn with_handler<H: Handler<C>>(self, handler: H) -> Self {
        let handler = Arc::new(handler);
        Self {
            sender: Some(handler.clone()),
            updater: Some(handler),
            ..self
        }
    }

    /// Install a sender only.
    pub fn with_sender<S: Sender<C>>(mut self, sender: S) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    /// Install an updater only.
    pub fn with_updater<U: Updater<C>>(mut self, updater: U) -> Self {
        self.updater = Some(Arc::new(updater));
        self
    }
}

/// A template with its value type erased, as stored in a declaration list.
pub(crate) trait AttrTemplate<C>: Send + Sync {
    fn mode(&self) -> AttrMode;

    fn update_period(&self) -> Option<std::time::Duration>;

    /// Produce an instance-private attribute owned by `owner`.
    fn bind(&self, owner: &Weak<C>) -> Arc<dyn AnyAttribute>;
}

impl<C, T> AttrTemplate<C> for AttrDecl<C, T>
where
    C: Send + Sync + 'static,
    T: AttrValue,
{
    fn mode(&self) -> AttrMode {
        self.mode
    }

    fn update_period(&self) -> Option<std::time::Duration> {
        self.updater.as_ref().map(|u| u.update_period())
    }

    fn bind(&self, owner: &Weak<C>) -> Arc<dyn AnyAttribute> {
        let io: Option<Arc<dyn AttrIo>> = if self.sender.is_some() || self.updater.is_some() {
            Some(Arc::new(OwnedHandler {
                owner: owner.clone(),
                sender: self.sender.clone(),
                updater: self.updater.clone(),
            }))
        } else {
            None
        };
        Arc::new(Attribute::<T>::with_io(self.dtype.clone(), self.mode, io))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn done() -> BoxFuture<'static, CtlResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn recorder<T: AttrValue>() -> (AttrCallback<T>, Arc<parking_lot::Mutex<Vec<T>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: AttrCallback<T> = Arc::new(move |v: T| {
            sink.lock().push(v);
            done()
        });
        (callback, seen)
    }

    #[test]
    fn test_default_from_dtype() {
        let attr = Attribute::<f64>::new(DataType::float(), AttrMode::Read).unwrap();
        assert_eq!(attr.get().unwrap(), 0.0);
        let attr = Attribute::<bool>::new(DataType::bool(), AttrMode::ReadWrite).unwrap();
        assert!(!attr.get().unwrap());
    }

    #[test]
    fn test_dtype_mismatch_is_configuration_error() {
        let err = Attribute::<i64>::new(DataType::float(), AttrMode::Read).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unsupported_dtype_name_fails_at_declaration() {
        let err = attribute_named("string", AttrMode::ReadWrite).err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_set_coerces_and_fires_update() {
        let attr = Attribute::<i64>::new(DataType::int(), AttrMode::Read).unwrap();
        let (callback, seen) = recorder::<i64>();
        attr.set_update_callback(Some(callback));

        attr.set(4.8).await.unwrap();

        assert_eq!(attr.get().unwrap(), 4);
        assert_eq!(*seen.lock(), vec![4]);
    }

    #[tokio::test]
    async fn test_set_without_callback_succeeds() {
        let attr = Attribute::<bool>::new(DataType::bool(), AttrMode::Read).unwrap();
        attr.set(1).await.unwrap();
        assert!(attr.get().unwrap());
    }

    #[tokio::test]
    async fn test_failed_coercion_leaves_value() {
        let attr = Attribute::<f64>::new(DataType::float(), AttrMode::ReadWrite).unwrap();
        attr.set(2.5).await.unwrap();

        let err = attr.set("not a number").await.unwrap_err();
        assert!(err.is_value());
        assert_eq!(attr.get().unwrap(), 2.5);

        let err = attr.process("still not").await.unwrap_err();
        assert!(err.is_value());
        assert_eq!(attr.get().unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_process_read_write_stores_then_forwards_once() {
        let attr = Attribute::<bool>::new(DataType::bool(), AttrMode::ReadWrite).unwrap();
        let (update, updates) = recorder::<bool>();
        let (process, writes) = recorder::<bool>();
        attr.set_update_callback(Some(update));
        attr.set_process_callback(Some(process));

        attr.process(1).await.unwrap();

        assert!(attr.get().unwrap());
        assert_eq!(*updates.lock(), vec![true]);
        assert_eq!(*writes.lock(), vec![true]);
    }

    #[tokio::test]
    async fn test_process_write_only_forwards_directly() {
        let attr = Attribute::<i64>::new(DataType::int(), AttrMode::Write).unwrap();
        let (process, writes) = recorder::<i64>();
        attr.set_process_callback(Some(process));

        attr.process(7.2).await.unwrap();

        assert_eq!(*writes.lock(), vec![7]);
        assert!(attr.get().unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_process_without_callback_is_noop() {
        let attr = Attribute::<i64>::new(DataType::int(), AttrMode::Write).unwrap();
        assert!(!attr.has_process_callback());
        attr.process(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_process_on_read_only_rejected() {
        let attr = Attribute::<f64>::new(DataType::float(), AttrMode::Read).unwrap();
        assert!(attr.process(1.0).await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_callbacks_overwrite_and_remove() {
        let attr = Attribute::<i64>::new(DataType::int(), AttrMode::ReadWrite).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let first: AttrCallback<i64> = Arc::new(move |_: i64| {
            c.fetch_add(1, Ordering::SeqCst);
            done()
        });
        attr.set_process_callback(Some(first));
        let (second, writes) = recorder::<i64>();
        attr.set_process_callback(Some(second));
        attr.process(1).await.unwrap();
        attr.set_process_callback(None);
        attr.process(2).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(*writes.lock(), vec![1]);
        assert_eq!(attr.get().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_erased_access() {
        let attr = attribute_for(DataType::float_with_prec(3), AttrMode::ReadWrite);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ValueCallback = Arc::new(move |v: Value| {
            sink.lock().push(v);
            done()
        });
        attr.set_value_process_callback(Some(callback));

        attr.process_value(Value::Text("1.5".into())).await.unwrap();

        assert_eq!(attr.get_value().unwrap(), Value::Float(1.5));
        assert_eq!(*seen.lock(), vec![Value::Float(1.5)]);
        assert_eq!(attr.value_type(), "f64");
        assert!(attr.into_any().downcast::<Attribute<f64>>().is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_sees_updates() {
        let attr = Attribute::<f64>::new(DataType::float(), AttrMode::Read).unwrap();
        let mut rx = attr.subscribe();
        attr.set(3.0).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 3.0);
    }
}

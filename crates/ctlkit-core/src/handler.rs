//! Per-attribute I/O strategies.
//!
//! A device controller supplies a [`Sender`] (performs the external write) and/or an
//! [`Updater`] (performs the external read, paired with a polling period) for each
//! attribute that talks to hardware. Most devices implement both on one type, which
//! then is a [`Handler`].
//!
//! Both traits are generic over the controller type `C` so that implementations get the
//! concrete controller (its transport, its address suffix) without downcasting. When a
//! controller instance is bound, each handler is paired with a weak reference to its
//! owner and stored in the attribute as a type-erased [`AttrIo`].

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::attribute::AnyAttribute;
use crate::datatype::Value;
use crate::error::{CtlError, CtlResult};

/// Performs the external write of an attribute.
#[async_trait]
pub trait Sender<C>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    /// Write `value` to the device. `value` has already been coerced to `attr`'s dtype.
    async fn put(&self, controller: &C, attr: &dyn AnyAttribute, value: Value) -> CtlResult<()>;
}

/// Performs the external read of an attribute.
#[async_trait]
pub trait Updater<C>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    /// Interval between two polls. Must be positive.
    fn update_period(&self) -> Duration;

    /// Read the device and store the result with `attr.set_value(..)`.
    async fn update(&self, controller: &C, attr: &dyn AnyAttribute) -> CtlResult<()>;
}

/// A combined read/write strategy.
pub trait Handler<C>: Sender<C> + Updater<C>
where
    C: Send + Sync + 'static,
{
}

impl<C, H> Handler<C> for H
where
    C: Send + Sync + 'static,
    H: Sender<C> + Updater<C>,
{
}

/// Handler bound to one controller instance, with the controller type erased.
#[async_trait]
pub trait AttrIo: Send + Sync {
    /// Polling period, if this attribute has an updater.
    fn update_period(&self) -> Option<Duration>;

    /// Whether a sender is installed.
    fn can_put(&self) -> bool;

    /// Forward a write to the sender. Without a sender this is a no-op.
    async fn put(&self, attr: &dyn AnyAttribute, value: Value) -> CtlResult<()>;

    /// Poll the updater. Without an updater this is a no-op.
    async fn update(&self, attr: &dyn AnyAttribute) -> CtlResult<()>;
}

pub(crate) struct OwnedHandler<C> {
    pub(crate) owner: Weak<C>,
    pub(crate) sender: Option<Arc<dyn Sender<C>>>,
    pub(crate) updater: Option<Arc<dyn Updater<C>>>,
}

impl<C> OwnedHandler<C> {
    fn owner(&self) -> CtlResult<Arc<C>> {
        self.owner
            .upgrade()
            .ok_or_else(|| CtlError::Disconnected("owning controller has been dropped".into()))
    }
}

#[async_trait]
impl<C> AttrIo for OwnedHandler<C>
where
    C: Send + Sync + 'static,
{
    fn update_period(&self) -> Option<Duration> {
        self.updater.as_ref().map(|u| u.update_period())
    }

    fn can_put(&self) -> bool {
        self.sender.is_some()
    }

    async fn put(&self, attr: &dyn AnyAttribute, value: Value) -> CtlResult<()> {
        match &self.sender {
            Some(sender) => {
                let owner = self.owner()?;
                sender.put(owner.as_ref(), attr, value).await
            }
            None => {
                tracing::trace!("no sender installed, write dropped");
                Ok(())
            }
        }
    }

    async fn update(&self, attr: &dyn AnyAttribute) -> CtlResult<()> {
        match &self.updater {
            Some(updater) => {
                let owner = self.owner()?;
                updater.update(owner.as_ref(), attr).await
            }
            None => {
                tracing::trace!("no updater installed, poll skipped");
                Ok(())
            }
        }
    }
}

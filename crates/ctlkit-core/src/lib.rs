//! `ctlkit-core`
//!
//! Runtime engine for process-control style device interfaces.
//!
//! A device is modelled as a tree of controllers. Each controller type declares its
//! attributes (typed, mode-tagged value slots) and methods (scan, put, command) once, as
//! templates; every instance binds its own private copy of each template during
//! construction. The bound tree is then flattened into a [`Mapping`] for backends, and
//! the [`scheduler`] derives the tasks an owning runtime executes.
//!
//! ## Layers
//!
//! - [`datatype`]: the scalar kinds (`int`, `float`, `bool`) and value coercion
//! - [`attribute`]: `Attribute<T>`, its modes, callbacks and templates
//! - [`handler`]: `Sender` / `Updater` strategies supplied by device code
//! - [`method`]: scan, put and command methods
//! - [`controller`]: the controller tree and the binding pass
//! - [`mapping`]: the flattened, ordered snapshot of a tree
//! - [`scheduler`]: initial tasks, scan tasks and process linking
//! - [`connection`]: a shared line-oriented TCP transport for device drivers
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctlkit_core::{Mapping, TaskSet};
//! # use std::sync::Arc;
//! # fn example<C: ctlkit_core::Controller>(root: Arc<C>) -> ctlkit_core::CtlResult<()> {
//! let mapping = Mapping::build(root)?;
//! let tasks = TaskSet::derive(&mapping)?;
//! // Run `tasks.initial` in order, then spawn every `tasks.scan`.
//! # Ok(())
//! # }
//! ```

pub mod attribute;
pub mod connection;
pub mod controller;
pub mod datatype;
pub mod error;
pub mod handler;
pub mod mapping;
pub mod method;
pub mod scheduler;

pub use attribute::{
    attribute_for, attribute_named, AnyAttribute, AttrCallback, AttrDecl, AttrMode, Attribute,
    ValueCallback,
};
pub use connection::{IpConnection, IpConnectionSettings};
pub use controller::{
    bind_controller, bind_sub_controller, Controller, ControllerCore, ControllerNode, Declare,
    Declarations, SubController,
};
pub use datatype::{AttrValue, DataType, Value};
pub use error::{CtlError, CtlResult};
pub use handler::{AttrIo, Handler, Sender, Updater};
pub use mapping::{Classification, ControllerLayout, Mapping, SingleMapping};
pub use method::{Method, MethodDecl, MethodKind, ScanFlow};
pub use scheduler::{InitialTask, ScanTask, TaskSet};

// Used by `Declare` implementations to cache their declarations.
pub use once_cell::sync::OnceCell;

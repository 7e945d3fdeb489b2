//! `ctlkit-runtime`
//!
//! Owns the execution of a mapped controller tree: layered [`settings`], tracing
//! initialisation in [`logging`], and the [`runner`] that connects the root controller,
//! drives every scan task and tears everything down on shutdown.
//!
//! ```rust,no_run
//! use ctlkit_core::{Controller, Mapping};
//! use ctlkit_runtime::{logging, runner::Runner, settings::RuntimeSettings};
//! # use std::sync::Arc;
//!
//! # async fn example<C: Controller>(root: Arc<C>) -> anyhow::Result<()> {
//! let settings = RuntimeSettings::load(Some("ctlkit.toml"))?;
//! logging::init_tracing(&settings.logging)?;
//!
//! let mapping = Mapping::build(root)?;
//! Runner::new(settings.runtime).run(&mapping).await?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod runner;
pub mod settings;

pub use logging::{init_tracing, LogFormat, LoggingError};
pub use runner::{shutdown_signal, Runner, RunningTasks};
pub use settings::{LoggingSettings, RunnerSettings, RuntimeSettings};

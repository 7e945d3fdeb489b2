//! `ctlkit-driver-temp`
//!
//! Temperature ramp controller built on `ctlkit-core`: a root [`TempController`] with one
//! [`TempRampController`] per channel, all speaking a short ASCII protocol over one shared
//! TCP link through [`TempControllerHandler`]. The [`sim`] module provides a simulated
//! device for development and tests.

pub mod controllers;
pub mod handler;
pub mod sim;

pub use controllers::{TempController, TempControllerSettings, TempRampController};
pub use handler::{TempControllerHandler, TempNode};
pub use sim::{SimHandle, SimSettings, TempControllerSim};

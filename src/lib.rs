//! # GDA EPICS area-detector middleware
//!
//! Facade over the workspace crates plus the application-level pieces the
//! `adviewer` binary needs:
//!
//! - [`gda_core`]: errors, observables, the control-system client
//!   seam and the simulated IOC
//! - [`areadetector`] (`gda-areadetector`): NDPlugin wrappers, the camera
//!   driver base and collection strategies
//! - [`adviewer`] (`gda-adviewer`): reference stores, display ranging, the
//!   live update pipeline and the controller registry
//! - [`config`]: figment-loaded viewer configuration
//! - [`logging`]: tracing subscriber setup

pub mod config;
pub mod logging;

pub use gda_adviewer as adviewer;
pub use gda_areadetector as areadetector;
pub use gda_core;

pub use config::ViewerConfig;
pub use gda_core::{GdaError, Result};

//! Core types for the GDA EPICS area-detector crates.
//!
//! - [`error`]: the shared [`GdaError`] taxonomy
//! - [`observable`]: watch-backed values with metadata and validation
//! - [`pv`]: the control-system client seam and typed record handles
//! - [`sim`]: an in-memory IOC for tests and demos
//! - [`frame`]: typed detector frames

pub mod error;
pub mod frame;
pub mod observable;
pub mod pv;
pub mod sim;

pub use error::{GdaError, Result};
pub use frame::{ArrayData, ElementType, RawFrame};
pub use observable::Observable;
pub use pv::{ControlClient, Pv, PvMonitor, PvName, PvType, PvValue, SharedClient};
pub use sim::SimulatedIoc;

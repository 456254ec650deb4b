//! Live area-detector image viewing for GDA.
//!
//! - [`range`]: histogram-based display ranging
//! - [`combine`] and [`stores`]: reference stores A and B and the frame
//!   arithmetic shown against them
//! - [`persist`]: saved stores (JSON, or HDF5 with `storage_hdf5`)
//! - [`live`]: the coalescing update pipeline behind a live view
//! - [`controller`] and [`registry`]: per-detector wiring from configuration
//! - [`snapshot`]: PNG export of the displayed frame

pub mod combine;
pub mod controller;
pub mod live;
pub mod persist;
pub mod range;
pub mod registry;
pub mod snapshot;
pub mod stores;

pub use combine::{combine, DisplayFrame, InvalidReason, ShowOption, Validity};
pub use controller::{AdController, ControllerConfig, FrameSource, PvSuffixes};
pub use live::{LiveSettings, LiveUpdate, LiveView, RecordingSurface, RenderSurface, UiThread};
pub use persist::StateFormat;
pub use range::{DisplayRange, Histogram, RangeTracker};
pub use registry::ControllerRegistry;
pub use stores::{ReferenceStores, SharedStores, StoreKey};

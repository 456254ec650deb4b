//! areaDetector support for GDA.
//!
//! - [`ndplugin`]: NDPluginBase records shared by every plugin
//! - [`ndarray_plugin`], [`ndroi`], [`ndstats`]: image array, ROI and
//!   statistics plugins
//! - [`adbase`]: the camera driver's acquisition controls
//! - [`collection`]: collection strategies and their decorator chain
//! - [`sim_detector`]: a camera simulation for the in-memory IOC

pub mod adbase;
pub mod collection;
pub mod ndarray_plugin;
pub mod ndplugin;
pub mod ndroi;
pub mod ndstats;
pub mod sim_detector;

pub use adbase::{AdBase, EpicsAdBase, ImageMode, SharedAdBase};
pub use collection::{CollectionChain, CollectionStrategy, DecoratorSpec, ScanInfo, TerminalSpec};
pub use ndarray_plugin::NdArrayPlugin;
pub use ndplugin::{NdPluginBase, PluginInitialValues};
pub use ndroi::{NdRoi, Region};
pub use ndstats::{NdStats, Statistics};
pub use sim_detector::{SimDetector, SimDetectorConfig};

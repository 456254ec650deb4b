//! Area-detector controllers.
//!
//! An [`AdController`] bundles everything a viewer needs for one detector:
//! the driver (`CAM:`), the image array plugin the frames are read from,
//! and the optional ROI and statistics plugins, together with the display
//! defaults from its [`ControllerConfig`] entry.

use async_trait::async_trait;
use gda_areadetector::{
    CollectionChain, DecoratorSpec, EpicsAdBase, NdArrayPlugin, NdRoi, NdStats, SharedAdBase,
    TerminalSpec,
};
use gda_core::pv::{PvName, SharedClient};
use gda_core::{GdaError, RawFrame, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::range::DisplayRange;

/// Plugin suffixes appended to a detector's PV prefix.
///
/// An empty `roi` or `stats` suffix means the detector has no such plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PvSuffixes {
    /// Driver.
    pub cam: String,
    /// Image array plugin.
    pub array: String,
    /// ROI plugin feeding the image array plugin.
    pub roi: String,
    /// Statistics plugin.
    pub stats: String,
}

impl Default for PvSuffixes {
    fn default() -> Self {
        Self {
            cam: "CAM:".to_string(),
            array: "ARR:".to_string(),
            roi: "ROI:".to_string(),
            stats: "STAT:".to_string(),
        }
    }
}

fn default_auto_scale() -> bool {
    true
}

fn default_hist_size() -> usize {
    1000
}

fn default_readout_time() -> f64 {
    -1.0
}

/// One `[[controllers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Registry key, e.g. `pco`.
    pub service_name: String,
    /// Human-readable detector name; defaults to the service name.
    #[serde(default)]
    pub detector_name: Option<String>,
    /// PV prefix shared by the detector's records, e.g. `BL13I-EA-DET-01:`.
    pub pv_prefix: String,
    /// Plugin suffixes.
    #[serde(default)]
    pub suffixes: PvSuffixes,
    /// Port the image plugin should read from.
    #[serde(default)]
    pub array_port_input: Option<String>,
    /// Minimum time between image plugin callbacks, seconds.
    #[serde(default)]
    pub min_callback_time: f64,
    /// Bins in the histogram published with each update.
    #[serde(default = "default_hist_size")]
    pub hist_size: usize,
    /// Initial display minimum.
    #[serde(default)]
    pub image_min: Option<i64>,
    /// Initial display maximum.
    #[serde(default)]
    pub image_max: Option<i64>,
    /// Percentile stretch per frame.
    #[serde(default = "default_auto_scale")]
    pub auto_scale: bool,
    /// Detector readout time in seconds, negative for unknown.
    #[serde(default = "default_readout_time")]
    pub readout_time: f64,
    /// Strategy at the end of the collection chain.
    #[serde(default)]
    pub terminal: Option<TerminalSpec>,
    /// Collection decorators, outermost first.
    #[serde(default)]
    pub collection: Vec<DecoratorSpec>,
}

impl ControllerConfig {
    /// Minimal entry with defaults for everything but the names.
    pub fn new(service_name: impl Into<String>, pv_prefix: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            detector_name: None,
            pv_prefix: pv_prefix.into(),
            suffixes: PvSuffixes::default(),
            array_port_input: None,
            min_callback_time: 0.0,
            hist_size: default_hist_size(),
            image_min: None,
            image_max: None,
            auto_scale: true,
            readout_time: default_readout_time(),
            terminal: None,
            collection: Vec::new(),
        }
    }

    /// Checks the entry for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(GdaError::Configuration("controller service_name is empty".into()));
        }
        if self.pv_prefix.trim().is_empty() {
            return Err(GdaError::Configuration(format!(
                "controller '{}' has an empty pv_prefix",
                self.service_name
            )));
        }
        if self.hist_size == 0 {
            return Err(GdaError::Configuration(format!(
                "controller '{}': hist_size must be positive",
                self.service_name
            )));
        }
        if self.min_callback_time < 0.0 {
            return Err(GdaError::Configuration(format!(
                "controller '{}': min_callback_time must not be negative",
                self.service_name
            )));
        }
        if let (Some(min), Some(max)) = (self.image_min, self.image_max) {
            if max <= min {
                return Err(GdaError::Configuration(format!(
                    "controller '{}': image_max must exceed image_min",
                    self.service_name
                )));
            }
        }
        Ok(())
    }

    /// Driver base PV.
    pub fn cam_base(&self) -> PvName {
        PvName::new(format!("{}{}", self.pv_prefix, self.suffixes.cam))
    }

    /// Image array plugin base PV.
    pub fn array_base(&self) -> PvName {
        PvName::new(format!("{}{}", self.pv_prefix, self.suffixes.array))
    }

    fn optional_base(&self, suffix: &str) -> Option<PvName> {
        (!suffix.is_empty()).then(|| PvName::new(format!("{}{}", self.pv_prefix, suffix)))
    }
}

/// Live view and frame source seam.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Latest frame from the detector.
    async fn current_frame(&self) -> Result<RawFrame>;
}

/// One detector, ready for viewing and collection.
pub struct AdController {
    config: ControllerConfig,
    ad_base: Arc<EpicsAdBase>,
    image: NdArrayPlugin,
    roi: Option<NdRoi>,
    stats: Option<NdStats>,
}

impl std::fmt::Debug for AdController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdController")
            .field("service", &self.config.service_name)
            .field("prefix", &self.config.pv_prefix)
            .field("roi", &self.roi.is_some())
            .field("stats", &self.stats.is_some())
            .finish()
    }
}

impl AdController {
    /// Builds the plugin wrappers for `config`.
    pub fn new(client: SharedClient, config: ControllerConfig) -> Result<Self> {
        if config.pv_prefix.trim().is_empty() {
            return Err(GdaError::NotConfigured(format!(
                "controller '{}' needs a pv_prefix",
                config.service_name
            )));
        }
        let ad_base = Arc::new(EpicsAdBase::new(client.clone(), config.cam_base())?);
        let image = NdArrayPlugin::new(client.clone(), config.array_base())?;
        let roi = config
            .optional_base(&config.suffixes.roi)
            .map(|base| NdRoi::new(client.clone(), base))
            .transpose()?;
        let stats = config
            .optional_base(&config.suffixes.stats)
            .map(|base| NdStats::new(client.clone(), base))
            .transpose()?;
        debug!(service = %config.service_name, prefix = %config.pv_prefix, "controller created");
        Ok(Self {
            config,
            ad_base,
            image,
            roi,
            stats,
        })
    }

    /// Registry key.
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Display name.
    pub fn detector_name(&self) -> &str {
        self.config
            .detector_name
            .as_deref()
            .unwrap_or(&self.config.service_name)
    }

    /// Configuration entry this controller was built from.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Driver handle.
    pub fn ad_base(&self) -> &EpicsAdBase {
        &self.ad_base
    }

    /// Driver handle for collection strategies.
    pub fn shared_ad_base(&self) -> SharedAdBase {
        self.ad_base.clone()
    }

    /// Image array plugin.
    pub fn image_plugin(&self) -> &NdArrayPlugin {
        &self.image
    }

    /// ROI plugin, when the detector has one.
    pub fn roi(&self) -> Option<&NdRoi> {
        self.roi.as_ref()
    }

    /// Statistics plugin, when the detector has one.
    pub fn stats(&self) -> Option<&NdStats> {
        self.stats.as_ref()
    }

    /// Port the image plugin should read from.
    pub fn array_port_input(&self) -> Option<&str> {
        self.config.array_port_input.as_deref()
    }

    /// Minimum callback time for the image plugin, seconds.
    pub fn min_callback_time(&self) -> f64 {
        self.config.min_callback_time
    }

    /// Histogram bins.
    pub fn hist_size(&self) -> usize {
        self.config.hist_size
    }

    /// Fixed display range from `image_min` / `image_max`.
    pub fn initial_range(&self) -> Option<DisplayRange> {
        match (self.config.image_min, self.config.image_max) {
            (Some(min), Some(max)) => Some(DisplayRange::new(min, max)),
            _ => None,
        }
    }

    /// Starts the statistics plugin's histogram.
    ///
    /// The plugin reads from `array_port_input` when one is configured and
    /// bins frames into `hist_size` bins, over `image_min..image_max` for
    /// whichever bound is configured.
    #[allow(clippy::cast_precision_loss)]
    pub async fn start_stats(&self) -> Result<()> {
        let stats = self.stats.as_ref().ok_or_else(|| {
            GdaError::NotConfigured(format!("controller '{}' has no stats plugin", self.service_name()))
        })?;
        let plugin = stats.plugin_base();
        if let Some(source) = self.array_port_input() {
            plugin.set_nd_array_port(source).await?;
        }
        let bins = i32::try_from(self.hist_size())
            .map_err(|_| GdaError::Configuration(format!("hist_size {} is too large", self.hist_size())))?;
        stats.set_hist_size(bins).await?;
        if let Some(min) = self.config.image_min {
            stats.set_hist_min(min as f64).await?;
        }
        if let Some(max) = self.config.image_max {
            stats.set_hist_max(max as f64).await?;
        }
        stats.set_compute_histogram(true).await?;
        plugin.enable_callbacks().await?;
        debug!(service = %self.config.service_name, bins, "stats histogram started");
        Ok(())
    }

    /// Builds the configured collection chain.
    pub fn collection_chain(&self) -> Result<CollectionChain> {
        CollectionChain::build(
            self.shared_ad_base(),
            self.config.terminal.as_ref(),
            &self.config.collection,
        )
    }
}

#[async_trait]
impl FrameSource for AdController {
    async fn current_frame(&self) -> Result<RawFrame> {
        self.image.image_data().await
    }
}

//! Statistics plugin (NDPluginStats).
//!
//! Besides the basic statistics the plugin bins every frame into an
//! intensity histogram of `HistSize` bins over `[HistMin, HistMax]`, read
//! back from `Histogram_RBV` together with its entropy.

use gda_core::pv::{PvMonitor, PvName, SharedClient};
use gda_core::{ArrayData, Result};
use serde::{Deserialize, Serialize};

use crate::ndplugin::NdPluginBase;

/// Snapshot of the basic statistics readbacks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Minimum pixel value.
    pub min: f64,
    /// Maximum pixel value.
    pub max: f64,
    /// Mean pixel value.
    pub mean: f64,
    /// Standard deviation.
    pub sigma: f64,
    /// Sum of all pixels.
    pub total: f64,
    /// Sum after background subtraction.
    pub net: f64,
}

/// NDPluginStats wrapper.
#[derive(Debug, Clone)]
pub struct NdStats {
    base: NdPluginBase,
}

impl NdStats {
    /// Creates the wrapper over a plugin base such as `...:STAT:`.
    pub fn new(client: SharedClient, base: PvName) -> Result<Self> {
        Ok(Self {
            base: NdPluginBase::new(client, base)?,
        })
    }

    /// NDPluginBase records of this plugin.
    pub fn plugin_base(&self) -> &NdPluginBase {
        &self.base
    }

    /// Turns basic statistics on or off.
    pub async fn set_compute_statistics(&self, enable: bool) -> Result<()> {
        self.base.write("ComputeStatistics", enable).await
    }

    /// Whether basic statistics are computed.
    pub async fn compute_statistics(&self) -> Result<bool> {
        self.base.read("ComputeStatistics_RBV").await
    }

    /// Minimum pixel value.
    pub async fn min_value(&self) -> Result<f64> {
        self.base.read("MinValue_RBV").await
    }

    /// Maximum pixel value.
    pub async fn max_value(&self) -> Result<f64> {
        self.base.read("MaxValue_RBV").await
    }

    /// Mean pixel value.
    pub async fn mean_value(&self) -> Result<f64> {
        self.base.read("MeanValue_RBV").await
    }

    /// Standard deviation.
    pub async fn sigma(&self) -> Result<f64> {
        self.base.read("Sigma_RBV").await
    }

    /// Sum of all pixels.
    pub async fn total(&self) -> Result<f64> {
        self.base.read("Total_RBV").await
    }

    /// Background-subtracted sum.
    pub async fn net(&self) -> Result<f64> {
        self.base.read("Net_RBV").await
    }

    /// Turns the histogram on or off.
    pub async fn set_compute_histogram(&self, enable: bool) -> Result<()> {
        self.base.write("ComputeHistogram", enable).await
    }

    /// Whether the histogram is computed.
    pub async fn compute_histogram(&self) -> Result<bool> {
        self.base.read("ComputeHistogram_RBV").await
    }

    /// Observable of the histogram enable readback.
    pub async fn compute_histogram_monitor(&self) -> Result<PvMonitor<bool>> {
        self.base.pv::<bool>("ComputeHistogram_RBV").monitor().await
    }

    /// Sets the number of histogram bins.
    pub async fn set_hist_size(&self, bins: i32) -> Result<()> {
        self.base.write("HistSize", bins).await
    }

    /// Number of histogram bins.
    pub async fn hist_size(&self) -> Result<i32> {
        self.base.read("HistSize_RBV").await
    }

    /// Sets the lower edge of the first bin.
    pub async fn set_hist_min(&self, min: f64) -> Result<()> {
        self.base.write("HistMin", min).await
    }

    /// Lower edge of the first bin.
    pub async fn hist_min(&self) -> Result<f64> {
        self.base.read("HistMin_RBV").await
    }

    /// Sets the upper edge of the last bin.
    pub async fn set_hist_max(&self, max: f64) -> Result<()> {
        self.base.write("HistMax", max).await
    }

    /// Upper edge of the last bin.
    pub async fn hist_max(&self) -> Result<f64> {
        self.base.read("HistMax_RBV").await
    }

    /// Entropy of the last histogram.
    pub async fn hist_entropy(&self) -> Result<f64> {
        self.base.read("HistEntropy_RBV").await
    }

    /// Bin counts of the last histogram.
    pub async fn histogram(&self) -> Result<Vec<f64>> {
        let counts: ArrayData = self.base.read("Histogram_RBV").await?;
        Ok(counts.to_f64_vec())
    }

    /// Reads all basic statistics.
    pub async fn statistics(&self) -> Result<Statistics> {
        Ok(Statistics {
            min: self.min_value().await?,
            max: self.max_value().await?,
            mean: self.mean_value().await?,
            sigma: self.sigma().await?,
            total: self.total().await?,
            net: self.net().await?,
        })
    }
}

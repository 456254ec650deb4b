//! Terminal strategies: the links that end a chain and drive acquisition.

use async_trait::async_trait;
use gda_core::Result;
use tracing::trace;

use super::{exposure_for, CollectionStrategy, ScanInfo};
use crate::adbase::{ImageMode, SharedAdBase};

/// Starts acquisition on collect and stops it on complete.
///
/// Sets neither trigger mode nor image mode; wrap it in the matching
/// decorators.
pub struct SoftwareStartStop {
    ad_base: SharedAdBase,
}

impl SoftwareStartStop {
    /// Creates the strategy over the shared acquisition base.
    pub fn new(ad_base: SharedAdBase) -> Self {
        Self { ad_base }
    }
}

#[async_trait]
impl CollectionStrategy for SoftwareStartStop {
    fn name(&self) -> &'static str {
        "SoftwareStartStop"
    }

    async fn prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        _scan_info: &ScanInfo,
    ) -> Result<()> {
        trace!(collection_time, num_images, "SoftwareStartStop prepare: nothing to do");
        Ok(())
    }

    async fn collect_data(&self) -> Result<()> {
        self.ad_base.start_acquiring().await
    }

    async fn complete_collection(&self) -> Result<()> {
        self.ad_base.stop_acquiring().await
    }

    async fn stop(&self) -> Result<()> {
        self.complete_collection().await
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.complete_collection().await
    }

    async fn save_state(&self) -> Result<()> {
        Ok(())
    }

    async fn restore_state(&self) -> Result<()> {
        Ok(())
    }

    async fn acquire_time(&self) -> Result<f64> {
        self.ad_base.acquire_time().await
    }

    async fn acquire_period(&self) -> Result<f64> {
        self.ad_base.acquire_period().await
    }

    fn readout_time(&self) -> f64 {
        -1.0
    }

    fn number_images_per_collection(&self, collection_time: f64) -> i32 {
        trace!(collection_time, "ignoring collection time, returning 1");
        1
    }
}

/// Single-image acquisition with a known readout time.
///
/// Prepare sets the acquire period to the collection time and the exposure
/// to the collection time less the readout.
pub struct SimpleAcquire {
    ad_base: SharedAdBase,
    readout_time: f64,
}

impl SimpleAcquire {
    /// Creates the strategy; a negative `readout_time` means unknown.
    pub fn new(ad_base: SharedAdBase, readout_time: f64) -> Self {
        Self {
            ad_base,
            readout_time,
        }
    }
}

#[async_trait]
impl CollectionStrategy for SimpleAcquire {
    fn name(&self) -> &'static str {
        "SimpleAcquire"
    }

    async fn prepare_for_collection(
        &self,
        collection_time: f64,
        _num_images: i32,
        _scan_info: &ScanInfo,
    ) -> Result<()> {
        self.ad_base.set_image_mode_wait(ImageMode::Single).await?;
        self.ad_base.set_num_images(1).await?;
        self.ad_base.set_acquire_period(collection_time).await?;
        self.ad_base
            .set_acquire_time(exposure_for(collection_time, self.readout_time))
            .await
    }

    async fn collect_data(&self) -> Result<()> {
        self.ad_base.start_acquiring().await
    }

    async fn complete_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.ad_base.stop_acquiring().await
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.ad_base.stop_acquiring().await
    }

    async fn save_state(&self) -> Result<()> {
        Ok(())
    }

    async fn restore_state(&self) -> Result<()> {
        Ok(())
    }

    async fn acquire_time(&self) -> Result<f64> {
        self.ad_base.acquire_time().await
    }

    async fn acquire_period(&self) -> Result<f64> {
        self.ad_base.acquire_period().await
    }

    fn readout_time(&self) -> f64 {
        self.readout_time
    }

    fn number_images_per_collection(&self, _collection_time: f64) -> i32 {
        1
    }
}

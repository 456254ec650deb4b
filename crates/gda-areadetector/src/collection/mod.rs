//! Collection strategies.
//!
//! A collection strategy drives one detector through a scan point: arm,
//! trigger, read out. Strategies compose as a linear chain: decorators each
//! adjust one acquisition concern (exposure time, trigger mode, image mode,
//! shutter run-up) and hand the call to the next link, and exactly one
//! terminal strategy ends the chain and talks to the hardware.
//!
//! ```text
//! ConfigureAcquireTime -> TriggerMode -> ImageMode -> SoftwareStartStop
//! ```
//!
//! Decorators implement [`CollectionStrategyDecorator`], whose `raw_*` hooks
//! forward to the decoratee unless overridden; a blanket impl turns every
//! decorator into a [`CollectionStrategy`]. Errors from any link propagate
//! unchanged to the caller. Nothing is retried.

mod chain;
mod decorators;
mod terminal;

pub use chain::{CollectionChain, DecoratorSpec, TerminalSpec};
pub use decorators::{
    ConfigureAcquireTimeDecorator, ImageModeDecorator, StopBeforePrepareDecorator,
    TriggerModeDecorator, UnsynchronisedExternalShutterDecorator,
    DEFAULT_COLLECTION_EXTENSION_S,
};
pub use terminal::{SimpleAcquire, SoftwareStartStop};

use async_trait::async_trait;
use gda_core::Result;
use serde::{Deserialize, Serialize};

/// Scan context passed down the chain at prepare time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Scan number, when the scan has one.
    pub scan_number: Option<i64>,
    /// Points per scan dimension.
    pub dimensions: Vec<usize>,
}

/// One link of a collection-strategy chain.
#[async_trait]
pub trait CollectionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Configures the detector for a collection of `collection_time`
    /// seconds and `num_images` images.
    async fn prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()>;

    /// Starts the collection.
    async fn collect_data(&self) -> Result<()>;

    /// Finishes the collection.
    async fn complete_collection(&self) -> Result<()>;

    /// Aborts an ongoing collection.
    async fn stop(&self) -> Result<()>;

    /// Called when a scan command failed.
    async fn at_command_failure(&self) -> Result<()>;

    /// Records detector state that prepare will override.
    async fn save_state(&self) -> Result<()>;

    /// Re-applies state recorded by [`CollectionStrategy::save_state`].
    async fn restore_state(&self) -> Result<()>;

    /// Effective exposure time, seconds.
    async fn acquire_time(&self) -> Result<f64>;

    /// Effective acquire period, seconds.
    async fn acquire_period(&self) -> Result<f64>;

    /// Detector readout time, seconds; negative when unknown.
    fn readout_time(&self) -> f64;

    /// Images produced per collection of `collection_time` seconds.
    fn number_images_per_collection(&self, collection_time: f64) -> i32;
}

/// A link that wraps another strategy.
///
/// Every hook forwards to [`CollectionStrategyDecorator::decoratee`] by
/// default; a decorator overrides only the calls it changes.
#[async_trait]
pub trait CollectionStrategyDecorator: Send + Sync {
    /// Short name used in logs.
    fn decorator_name(&self) -> &'static str;

    /// The wrapped strategy.
    fn decoratee(&self) -> &dyn CollectionStrategy;

    /// See [`CollectionStrategy::prepare_for_collection`].
    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        self.decoratee()
            .prepare_for_collection(collection_time, num_images, scan_info)
            .await
    }

    /// See [`CollectionStrategy::collect_data`].
    async fn raw_collect_data(&self) -> Result<()> {
        self.decoratee().collect_data().await
    }

    /// See [`CollectionStrategy::complete_collection`].
    async fn raw_complete_collection(&self) -> Result<()> {
        self.decoratee().complete_collection().await
    }

    /// See [`CollectionStrategy::stop`].
    async fn raw_stop(&self) -> Result<()> {
        self.decoratee().stop().await
    }

    /// See [`CollectionStrategy::at_command_failure`].
    async fn raw_at_command_failure(&self) -> Result<()> {
        self.decoratee().at_command_failure().await
    }

    /// See [`CollectionStrategy::save_state`].
    async fn raw_save_state(&self) -> Result<()> {
        self.decoratee().save_state().await
    }

    /// See [`CollectionStrategy::restore_state`].
    async fn raw_restore_state(&self) -> Result<()> {
        self.decoratee().restore_state().await
    }

    /// See [`CollectionStrategy::acquire_time`].
    async fn raw_acquire_time(&self) -> Result<f64> {
        self.decoratee().acquire_time().await
    }

    /// See [`CollectionStrategy::acquire_period`].
    async fn raw_acquire_period(&self) -> Result<f64> {
        self.decoratee().acquire_period().await
    }

    /// See [`CollectionStrategy::readout_time`].
    fn raw_readout_time(&self) -> f64 {
        self.decoratee().readout_time()
    }

    /// See [`CollectionStrategy::number_images_per_collection`].
    fn raw_number_images_per_collection(&self, collection_time: f64) -> i32 {
        self.decoratee().number_images_per_collection(collection_time)
    }
}

#[async_trait]
impl<D: CollectionStrategyDecorator> CollectionStrategy for D {
    fn name(&self) -> &'static str {
        self.decorator_name()
    }

    async fn prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        tracing::trace!(
            link = self.decorator_name(),
            collection_time,
            num_images,
            "prepare_for_collection"
        );
        self.raw_prepare_for_collection(collection_time, num_images, scan_info)
            .await
    }

    async fn collect_data(&self) -> Result<()> {
        self.raw_collect_data().await
    }

    async fn complete_collection(&self) -> Result<()> {
        self.raw_complete_collection().await
    }

    async fn stop(&self) -> Result<()> {
        self.raw_stop().await
    }

    async fn at_command_failure(&self) -> Result<()> {
        self.raw_at_command_failure().await
    }

    async fn save_state(&self) -> Result<()> {
        self.raw_save_state().await
    }

    async fn restore_state(&self) -> Result<()> {
        self.raw_restore_state().await
    }

    async fn acquire_time(&self) -> Result<f64> {
        self.raw_acquire_time().await
    }

    async fn acquire_period(&self) -> Result<f64> {
        self.raw_acquire_period().await
    }

    fn readout_time(&self) -> f64 {
        self.raw_readout_time()
    }

    fn number_images_per_collection(&self, collection_time: f64) -> i32 {
        self.raw_number_images_per_collection(collection_time)
    }
}

/// Hardware exposure for a collection time `t` given readout time `r`.
///
/// A negative readout time means "unknown": the full collection time is
/// used. Otherwise the readout is subtracted, never going below zero.
pub fn exposure_for(collection_time: f64, readout_time: f64) -> f64 {
    if readout_time < 0.0 {
        collection_time
    } else {
        (collection_time - readout_time).max(0.0)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_rule() {
        assert_eq!(exposure_for(1.0, -1.0), 1.0);
        assert_eq!(exposure_for(1.0, 0.0), 1.0);
        assert!((exposure_for(1.0, 0.1) - 0.9).abs() < 1e-12);
        assert_eq!(exposure_for(0.05, 0.1), 0.0);
    }
}

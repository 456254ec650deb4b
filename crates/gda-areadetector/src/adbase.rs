//! ADBase driver handle.
//!
//! [`AdBase`] is the acquisition-base handle shared by every link of a
//! collection-strategy chain. [`EpicsAdBase`] implements it over the camera
//! driver records (`...:CAM:AcquireTime` and friends).

use async_trait::async_trait;
use gda_core::pv::{Pv, PvName, PvType, SharedClient};
use gda_core::{GdaError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// ADBase record suffixes.
pub mod suffix {
    #![allow(missing_docs)]
    pub const ACQUIRE_TIME: &str = "AcquireTime";
    pub const ACQUIRE_TIME_RBV: &str = "AcquireTime_RBV";
    pub const ACQUIRE_PERIOD: &str = "AcquirePeriod";
    pub const ACQUIRE_PERIOD_RBV: &str = "AcquirePeriod_RBV";
    pub const TRIGGER_MODE: &str = "TriggerMode";
    pub const TRIGGER_MODE_RBV: &str = "TriggerMode_RBV";
    pub const IMAGE_MODE: &str = "ImageMode";
    pub const IMAGE_MODE_RBV: &str = "ImageMode_RBV";
    pub const NUM_IMAGES: &str = "NumImages";
    pub const NUM_IMAGES_RBV: &str = "NumImages_RBV";
    pub const ACQUIRE: &str = "Acquire";
    pub const ACQUIRE_RBV: &str = "Acquire_RBV";
}

/// areaDetector `ImageMode` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// One image per acquisition.
    Single,
    /// `NumImages` images per acquisition.
    Multiple,
    /// Until stopped.
    Continuous,
}

impl ImageMode {
    /// Enum index of the `ImageMode` record.
    pub fn index(self) -> u16 {
        match self {
            ImageMode::Single => 0,
            ImageMode::Multiple => 1,
            ImageMode::Continuous => 2,
        }
    }

    /// Parses an enum index.
    pub fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(ImageMode::Single),
            1 => Some(ImageMode::Multiple),
            2 => Some(ImageMode::Continuous),
            _ => None,
        }
    }
}

/// Acquisition control of one camera driver.
#[async_trait]
pub trait AdBase: Send + Sync {
    /// Exposure time readback, seconds.
    async fn acquire_time(&self) -> Result<f64>;
    /// Sets the exposure time, seconds.
    async fn set_acquire_time(&self, seconds: f64) -> Result<()>;
    /// Acquire period readback, seconds.
    async fn acquire_period(&self) -> Result<f64>;
    /// Sets the acquire period, seconds.
    async fn set_acquire_period(&self, seconds: f64) -> Result<()>;
    /// Trigger mode readback, by driver-specific enum index.
    async fn trigger_mode(&self) -> Result<u16>;
    /// Sets the trigger mode by enum index.
    async fn set_trigger_mode(&self, mode: u16) -> Result<()>;
    /// Image mode readback.
    async fn image_mode(&self) -> Result<ImageMode>;
    /// Sets the image mode and waits for completion.
    async fn set_image_mode_wait(&self, mode: ImageMode) -> Result<()>;
    /// Sets the number of images per acquisition.
    async fn set_num_images(&self, count: i32) -> Result<()>;
    /// Starts acquiring.
    async fn start_acquiring(&self) -> Result<()>;
    /// Stops acquiring.
    async fn stop_acquiring(&self) -> Result<()>;
    /// True while the detector is acquiring.
    async fn is_acquiring(&self) -> Result<bool>;
}

/// Shared acquisition-base handle.
pub type SharedAdBase = Arc<dyn AdBase>;

/// [`AdBase`] over the camera driver records.
#[derive(Clone)]
pub struct EpicsAdBase {
    client: SharedClient,
    base: PvName,
}

impl std::fmt::Debug for EpicsAdBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpicsAdBase").field("base", &self.base).finish()
    }
}

impl EpicsAdBase {
    /// Creates the handle over a driver base such as `...:CAM:`.
    pub fn new(client: SharedClient, base: PvName) -> Result<Self> {
        if base.is_empty() {
            return Err(GdaError::NotConfigured(
                "'basePVName' needs to be declared".to_string(),
            ));
        }
        Ok(Self { client, base })
    }

    /// Driver base PV name.
    pub fn base(&self) -> &PvName {
        &self.base
    }

    fn pv<T: PvType>(&self, suffix: &str) -> Pv<T> {
        Pv::new(self.client.clone(), self.base.join(suffix))
    }

    async fn read<T: PvType>(&self, suffix: &str) -> Result<T> {
        let pv = self.pv::<T>(suffix);
        pv.get().await.map_err(|e| {
            warn!(pv = pv.name(), error = %e, "Cannot get{}", suffix);
            e
        })
    }

    async fn write<T: PvType>(&self, suffix: &str, value: T, wait: bool) -> Result<()> {
        let pv = self.pv::<T>(suffix);
        let result = if wait {
            pv.put_wait(value).await
        } else {
            pv.put(value).await
        };
        result.map_err(|e| {
            warn!(pv = pv.name(), error = %e, "Cannot set{}", suffix);
            e
        })
    }
}

#[async_trait]
impl AdBase for EpicsAdBase {
    async fn acquire_time(&self) -> Result<f64> {
        self.read(suffix::ACQUIRE_TIME_RBV).await
    }

    async fn set_acquire_time(&self, seconds: f64) -> Result<()> {
        self.write(suffix::ACQUIRE_TIME, seconds, false).await
    }

    async fn acquire_period(&self) -> Result<f64> {
        self.read(suffix::ACQUIRE_PERIOD_RBV).await
    }

    async fn set_acquire_period(&self, seconds: f64) -> Result<()> {
        self.write(suffix::ACQUIRE_PERIOD, seconds, false).await
    }

    async fn trigger_mode(&self) -> Result<u16> {
        self.read(suffix::TRIGGER_MODE_RBV).await
    }

    async fn set_trigger_mode(&self, mode: u16) -> Result<()> {
        self.write(suffix::TRIGGER_MODE, mode, false).await
    }

    async fn image_mode(&self) -> Result<ImageMode> {
        let index: u16 = self.read(suffix::IMAGE_MODE_RBV).await?;
        ImageMode::from_index(index).ok_or_else(|| {
            GdaError::control(self.base.join(suffix::IMAGE_MODE_RBV), format!("unknown image mode {index}"))
        })
    }

    async fn set_image_mode_wait(&self, mode: ImageMode) -> Result<()> {
        self.write(suffix::IMAGE_MODE, mode.index(), true).await
    }

    async fn set_num_images(&self, count: i32) -> Result<()> {
        self.write(suffix::NUM_IMAGES, count, false).await
    }

    async fn start_acquiring(&self) -> Result<()> {
        debug!(base = %self.base, "start acquiring");
        self.write(suffix::ACQUIRE, true, false).await
    }

    async fn stop_acquiring(&self) -> Result<()> {
        debug!(base = %self.base, "stop acquiring");
        self.write(suffix::ACQUIRE, false, false).await
    }

    async fn is_acquiring(&self) -> Result<bool> {
        self.read(suffix::ACQUIRE_RBV).await
    }
}

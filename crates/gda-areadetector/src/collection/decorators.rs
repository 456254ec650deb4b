//! Decorators: each adjusts one acquisition parameter and delegates.

use async_trait::async_trait;
use gda_core::Result;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

use super::{exposure_for, CollectionStrategy, CollectionStrategyDecorator, ScanInfo};
use crate::adbase::{ImageMode, SharedAdBase};

/// Default shutter run-up compensation, seconds.
pub const DEFAULT_COLLECTION_EXTENSION_S: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct SavedState {
    acquire_time: f64,
    acquiring: bool,
}

/// Sets the hardware exposure from the collection time.
///
/// With a readout time `R >= 0` the exposure is `max(T - R, 0)`, otherwise
/// `T`. The original `T` is always forwarded.
///
/// Also owns the chain's saved state: [`CollectionStrategy::save_state`]
/// records the exposure and whether the detector was acquiring, and
/// [`CollectionStrategy::restore_state`] stops a running acquisition,
/// re-applies the exposure and restarts if it was running when saved.
pub struct ConfigureAcquireTimeDecorator {
    decoratee: Box<dyn CollectionStrategy>,
    ad_base: SharedAdBase,
    readout_time: f64,
    saved: Mutex<Option<SavedState>>,
}

impl ConfigureAcquireTimeDecorator {
    /// Wraps `decoratee`; a negative `readout_time` defers to the decoratee.
    pub fn new(decoratee: Box<dyn CollectionStrategy>, ad_base: SharedAdBase, readout_time: f64) -> Self {
        Self {
            decoratee,
            ad_base,
            readout_time,
            saved: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CollectionStrategyDecorator for ConfigureAcquireTimeDecorator {
    fn decorator_name(&self) -> &'static str {
        "ConfigureAcquireTimeDecorator"
    }

    fn decoratee(&self) -> &dyn CollectionStrategy {
        self.decoratee.as_ref()
    }

    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        let exposure = exposure_for(collection_time, self.raw_readout_time());
        self.ad_base.set_acquire_time(exposure).await?;
        self.decoratee
            .prepare_for_collection(collection_time, num_images, scan_info)
            .await
    }

    async fn raw_save_state(&self) -> Result<()> {
        let state = SavedState {
            acquire_time: self.ad_base.acquire_time().await?,
            acquiring: self.ad_base.is_acquiring().await?,
        };
        debug!(acquire_time = state.acquire_time, acquiring = state.acquiring, "saved state");
        *self.saved.lock() = Some(state);
        self.decoratee.save_state().await
    }

    async fn raw_restore_state(&self) -> Result<()> {
        let saved = self.saved.lock().take();
        match saved {
            Some(state) => {
                if self.ad_base.is_acquiring().await? {
                    self.ad_base.stop_acquiring().await?;
                }
                self.ad_base.set_acquire_time(state.acquire_time).await?;
                if state.acquiring {
                    self.ad_base.start_acquiring().await?;
                }
                debug!(acquire_time = state.acquire_time, acquiring = state.acquiring, "restored state");
            }
            None => debug!("restore_state without saved state"),
        }
        self.decoratee.restore_state().await
    }

    fn raw_readout_time(&self) -> f64 {
        if self.readout_time >= 0.0 {
            self.readout_time
        } else {
            self.decoratee.readout_time()
        }
    }
}

/// Sets the trigger mode before delegating.
pub struct TriggerModeDecorator {
    decoratee: Box<dyn CollectionStrategy>,
    ad_base: SharedAdBase,
    trigger_mode: u16,
}

impl TriggerModeDecorator {
    /// Wraps `decoratee`; `trigger_mode` is the driver's enum index.
    pub fn new(decoratee: Box<dyn CollectionStrategy>, ad_base: SharedAdBase, trigger_mode: u16) -> Self {
        Self {
            decoratee,
            ad_base,
            trigger_mode,
        }
    }
}

#[async_trait]
impl CollectionStrategyDecorator for TriggerModeDecorator {
    fn decorator_name(&self) -> &'static str {
        "TriggerModeDecorator"
    }

    fn decoratee(&self) -> &dyn CollectionStrategy {
        self.decoratee.as_ref()
    }

    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        self.ad_base.set_trigger_mode(self.trigger_mode).await?;
        self.decoratee
            .prepare_for_collection(collection_time, num_images, scan_info)
            .await
    }
}

/// Sets image mode and image count before delegating.
pub struct ImageModeDecorator {
    decoratee: Box<dyn CollectionStrategy>,
    ad_base: SharedAdBase,
    image_mode: ImageMode,
}

impl ImageModeDecorator {
    /// Wraps `decoratee`.
    pub fn new(decoratee: Box<dyn CollectionStrategy>, ad_base: SharedAdBase, image_mode: ImageMode) -> Self {
        Self {
            decoratee,
            ad_base,
            image_mode,
        }
    }
}

#[async_trait]
impl CollectionStrategyDecorator for ImageModeDecorator {
    fn decorator_name(&self) -> &'static str {
        "ImageModeDecorator"
    }

    fn decoratee(&self) -> &dyn CollectionStrategy {
        self.decoratee.as_ref()
    }

    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        self.ad_base.set_image_mode_wait(self.image_mode).await?;
        let count = match self.image_mode {
            ImageMode::Single => 1,
            ImageMode::Multiple | ImageMode::Continuous => num_images.max(1),
        };
        self.ad_base.set_num_images(count).await?;
        self.decoratee
            .prepare_for_collection(collection_time, num_images, scan_info)
            .await
    }

    fn raw_number_images_per_collection(&self, collection_time: f64) -> i32 {
        match self.image_mode {
            ImageMode::Single => 1,
            _ => self.decoratee.number_images_per_collection(collection_time),
        }
    }
}

/// Compensates for an external shutter that is not synchronised with the
/// detector by extending every collection.
///
/// The decoratee sees `T + extension`; reported acquire time has the
/// extension taken off again, and so does the acquire period when the
/// decoratee reports a positive readout time.
pub struct UnsynchronisedExternalShutterDecorator {
    decoratee: Box<dyn CollectionStrategy>,
    collection_extension_s: f64,
}

impl UnsynchronisedExternalShutterDecorator {
    /// Wraps `decoratee` with the default 5 s extension.
    pub fn new(decoratee: Box<dyn CollectionStrategy>) -> Self {
        Self::with_extension(decoratee, DEFAULT_COLLECTION_EXTENSION_S)
    }

    /// Wraps `decoratee` with a custom extension in seconds.
    pub fn with_extension(decoratee: Box<dyn CollectionStrategy>, collection_extension_s: f64) -> Self {
        Self {
            decoratee,
            collection_extension_s,
        }
    }

    /// Extension added to every collection, seconds.
    pub fn collection_extension_s(&self) -> f64 {
        self.collection_extension_s
    }
}

#[async_trait]
impl CollectionStrategyDecorator for UnsynchronisedExternalShutterDecorator {
    fn decorator_name(&self) -> &'static str {
        "UnsynchronisedExternalShutterDecorator"
    }

    fn decoratee(&self) -> &dyn CollectionStrategy {
        self.decoratee.as_ref()
    }

    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        self.decoratee
            .prepare_for_collection(collection_time + self.collection_extension_s, num_images, scan_info)
            .await
    }

    async fn raw_acquire_time(&self) -> Result<f64> {
        Ok(self.decoratee.acquire_time().await? - self.collection_extension_s)
    }

    async fn raw_acquire_period(&self) -> Result<f64> {
        let period = self.decoratee.acquire_period().await?;
        if self.decoratee.readout_time() > 0.0 {
            Ok(period - self.collection_extension_s)
        } else {
            Ok(period)
        }
    }
}

/// Stops acquisition before delegating prepare, then waits `settle`.
///
/// Some detectors (Pilatus) ignore parameter changes while acquiring.
pub struct StopBeforePrepareDecorator {
    decoratee: Box<dyn CollectionStrategy>,
    ad_base: SharedAdBase,
    settle: Duration,
}

impl StopBeforePrepareDecorator {
    /// Wraps `decoratee`.
    pub fn new(decoratee: Box<dyn CollectionStrategy>, ad_base: SharedAdBase, settle: Duration) -> Self {
        Self {
            decoratee,
            ad_base,
            settle,
        }
    }
}

#[async_trait]
impl CollectionStrategyDecorator for StopBeforePrepareDecorator {
    fn decorator_name(&self) -> &'static str {
        "StopBeforePrepareDecorator"
    }

    fn decoratee(&self) -> &dyn CollectionStrategy {
        self.decoratee.as_ref()
    }

    async fn raw_prepare_for_collection(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        self.ad_base.stop_acquiring().await?;
        self.decoratee
            .prepare_for_collection(collection_time, num_images, scan_info)
            .await?;
        if !self.settle.is_zero() {
            trace!(settle_ms = self.settle.as_millis() as u64, "sleeping after prepare");
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::adbase::EpicsAdBase;
    use crate::collection::{SimpleAcquire, SoftwareStartStop};
    use gda_core::{PvName, PvValue, SimulatedIoc};
    use std::sync::Arc;

    fn setup() -> (Arc<SimulatedIoc>, SharedAdBase) {
        let ioc = SimulatedIoc::new().shared();
        let ad_base: SharedAdBase =
            Arc::new(EpicsAdBase::new(ioc.clone(), PvName::new("SIM:CAM:")).unwrap());
        (ioc, ad_base)
    }

    /// Terminal that records the collection time it was prepared with.
    struct Recorder {
        prepared: Mutex<Vec<f64>>,
        readout: f64,
    }

    impl Recorder {
        fn boxed(readout: f64) -> (Arc<Self>, Box<dyn CollectionStrategy>) {
            let recorder = Arc::new(Self {
                prepared: Mutex::new(Vec::new()),
                readout,
            });
            (recorder.clone(), Box::new(Shared(recorder)))
        }
    }

    struct Shared(Arc<Recorder>);

    #[async_trait]
    impl CollectionStrategy for Shared {
        fn name(&self) -> &'static str {
            "Recorder"
        }
        async fn prepare_for_collection(&self, t: f64, _n: i32, _s: &ScanInfo) -> Result<()> {
            self.0.prepared.lock().push(t);
            Ok(())
        }
        async fn collect_data(&self) -> Result<()> {
            Ok(())
        }
        async fn complete_collection(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn at_command_failure(&self) -> Result<()> {
            Ok(())
        }
        async fn save_state(&self) -> Result<()> {
            Ok(())
        }
        async fn restore_state(&self) -> Result<()> {
            Ok(())
        }
        async fn acquire_time(&self) -> Result<f64> {
            Ok(10.0)
        }
        async fn acquire_period(&self) -> Result<f64> {
            Ok(12.0)
        }
        fn readout_time(&self) -> f64 {
            self.0.readout
        }
        fn number_images_per_collection(&self, _t: f64) -> i32 {
            1
        }
    }

    #[tokio::test]
    async fn test_acquire_time_forwards_original_time() {
        for (t, r, expected) in [(1.0, -1.0, 1.0), (1.0, 0.25, 0.75), (0.1, 0.5, 0.0), (2.0, 0.0, 2.0)] {
            let (ioc, ad_base) = setup();
            let (recorder, inner) = Recorder::boxed(-1.0);
            let chain = ConfigureAcquireTimeDecorator::new(inner, ad_base, r);
            chain
                .prepare_for_collection(t, 1, &ScanInfo::default())
                .await
                .unwrap();

            assert_eq!(ioc.puts_to("SIM:CAM:AcquireTime"), vec![PvValue::Double(expected)]);
            assert_eq!(*recorder.prepared.lock(), vec![t]);
        }
    }

    #[tokio::test]
    async fn test_restore_after_save_leaves_running_detector_unchanged() {
        let (ioc, ad_base) = setup();
        ioc.seed("SIM:CAM:AcquireTime_RBV", PvValue::Double(0.3))
            .seed("SIM:CAM:Acquire_RBV", PvValue::Int(1));
        let chain = ConfigureAcquireTimeDecorator::new(
            Box::new(SoftwareStartStop::new(ad_base.clone())),
            ad_base.clone(),
            -1.0,
        );

        chain.save_state().await.unwrap();
        chain.restore_state().await.unwrap();

        let log: Vec<_> = ioc.put_log().into_iter().map(|p| (p.pv, p.value)).collect();
        assert_eq!(
            log,
            vec![
                ("SIM:CAM:Acquire".to_string(), PvValue::Int(0)),
                ("SIM:CAM:AcquireTime".to_string(), PvValue::Double(0.3)),
                ("SIM:CAM:Acquire".to_string(), PvValue::Int(1)),
            ]
        );
        assert_eq!(ad_base.acquire_time().await.unwrap(), 0.3);
        assert!(ad_base.is_acquiring().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_after_save_leaves_stopped_detector_stopped() {
        let (ioc, ad_base) = setup();
        ioc.seed("SIM:CAM:AcquireTime_RBV", PvValue::Double(2.0))
            .seed("SIM:CAM:Acquire_RBV", PvValue::Int(0));
        let chain = ConfigureAcquireTimeDecorator::new(
            Box::new(SoftwareStartStop::new(ad_base.clone())),
            ad_base.clone(),
            -1.0,
        );

        chain.save_state().await.unwrap();
        chain.restore_state().await.unwrap();

        assert!(ioc.puts_to("SIM:CAM:Acquire").is_empty());
        assert_eq!(ad_base.acquire_time().await.unwrap(), 2.0);
        assert!(!ad_base.is_acquiring().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_reverts_prepare_override() {
        let (ioc, ad_base) = setup();
        ioc.seed("SIM:CAM:AcquireTime_RBV", PvValue::Double(0.5))
            .seed("SIM:CAM:Acquire_RBV", PvValue::Int(0));
        let chain = ConfigureAcquireTimeDecorator::new(
            Box::new(SoftwareStartStop::new(ad_base.clone())),
            ad_base.clone(),
            -1.0,
        );

        chain.save_state().await.unwrap();
        chain
            .prepare_for_collection(3.0, 1, &ScanInfo::default())
            .await
            .unwrap();
        assert_eq!(ad_base.acquire_time().await.unwrap(), 3.0);

        chain.restore_state().await.unwrap();
        assert_eq!(ad_base.acquire_time().await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_trigger_and_image_mode_order() {
        let (ioc, ad_base) = setup();
        let terminal = Box::new(SoftwareStartStop::new(ad_base.clone()));
        let image = Box::new(ImageModeDecorator::new(terminal, ad_base.clone(), ImageMode::Multiple));
        let chain = TriggerModeDecorator::new(image, ad_base.clone(), 1);

        chain
            .prepare_for_collection(0.1, 4, &ScanInfo::default())
            .await
            .unwrap();

        let log: Vec<_> = ioc.put_log().into_iter().map(|p| (p.pv, p.value)).collect();
        assert_eq!(
            log,
            vec![
                ("SIM:CAM:TriggerMode".to_string(), PvValue::Enum(1)),
                ("SIM:CAM:ImageMode".to_string(), PvValue::Enum(1)),
                ("SIM:CAM:NumImages".to_string(), PvValue::Int(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_external_shutter_extension() {
        let (recorder, inner) = Recorder::boxed(0.0);
        let shutter = UnsynchronisedExternalShutterDecorator::new(inner);
        shutter
            .prepare_for_collection(1.0, 1, &ScanInfo::default())
            .await
            .unwrap();

        assert_eq!(*recorder.prepared.lock(), vec![6.0]);
        assert_eq!(shutter.acquire_time().await.unwrap(), 5.0);
        // zero readout: period is reported as is
        assert_eq!(shutter.acquire_period().await.unwrap(), 12.0);

        let (_, inner) = Recorder::boxed(0.1);
        let shutter = UnsynchronisedExternalShutterDecorator::with_extension(inner, 2.0);
        assert_eq!(shutter.acquire_period().await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_stop_before_prepare() {
        let (ioc, ad_base) = setup();
        let terminal = Box::new(SimpleAcquire::new(ad_base.clone(), -1.0));
        let chain = StopBeforePrepareDecorator::new(terminal, ad_base, Duration::ZERO);
        chain
            .prepare_for_collection(0.5, 1, &ScanInfo::default())
            .await
            .unwrap();

        let log = ioc.put_log();
        assert_eq!(log[0].pv, "SIM:CAM:Acquire");
        assert_eq!(log[0].value, PvValue::Int(0));
        assert_eq!(log.last().map(|p| p.pv.as_str()), Some("SIM:CAM:AcquireTime"));
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        let (ioc, ad_base) = setup();
        ioc.fail("SIM:CAM:TriggerMode");
        let (recorder, inner) = Recorder::boxed(-1.0);
        let chain = ConfigureAcquireTimeDecorator::new(
            Box::new(TriggerModeDecorator::new(inner, ad_base.clone(), 0)),
            ad_base,
            -1.0,
        );

        let err = chain
            .prepare_for_collection(1.0, 1, &ScanInfo::default())
            .await
            .unwrap_err();
        assert!(err.is_control_system());
        assert!(recorder.prepared.lock().is_empty());
    }
}

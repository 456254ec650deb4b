//! Simulated camera IOC.
//!
//! [`SimDetector`] watches the driver's `Acquire` record on a
//! [`SimulatedIoc`] and, while it is 1, produces frames into the image array
//! plugin the way an areaDetector camera does: waveform, dimensions, data
//! type and finally the array counter that live views monitor.
//!
//! Frames show a Gaussian spot orbiting the centre over a ramp background,
//! with optional uniform noise.

use gda_core::pv::{ControlClient, PvName, PvValue};
use gda_core::{ArrayData, ElementType, Result, SimulatedIoc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adbase::{suffix as cam, ImageMode};
use crate::ndarray_plugin::ARRAY_DATA;
use crate::ndplugin::suffix as plugin;

/// Shortest frame interval.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Simulated camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDetectorConfig {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Pixel type.
    pub element_type: ElementType,
    /// Peak-to-peak noise amplitude in counts.
    pub noise: f64,
    /// Noise seed.
    pub seed: u64,
}

impl Default for SimDetectorConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            element_type: ElementType::UInt16,
            noise: 20.0,
            seed: 0x5eed,
        }
    }
}

/// Test pattern for frame `frame_num`.
#[allow(clippy::cast_precision_loss)]
pub fn generate_pattern(width: usize, height: usize, frame_num: u64, noise: f64, rng: &mut StdRng) -> Vec<f64> {
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let orbit = width.min(height) as f64 / 5.0;
    let angle = (frame_num as f64 * 0.2) % std::f64::consts::TAU;
    let spot_x = cx + orbit * angle.cos();
    let spot_y = cy + orbit * angle.sin();
    let sigma = (width.min(height) as f64 / 10.0).max(1.0);
    let span = (width + height).max(1) as f64;

    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let ramp = 100.0 + 400.0 * (x + y) as f64 / span;
            let dx = x as f64 - spot_x;
            let dy = y as f64 - spot_y;
            let spot = 3000.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            let jitter = if noise > 0.0 {
                rng.gen_range(-noise / 2.0..noise / 2.0)
            } else {
                0.0
            };
            pixels.push((ramp + spot + jitter).max(0.0));
        }
    }
    pixels
}

/// Camera simulation driving a [`SimulatedIoc`].
pub struct SimDetector {
    ioc: Arc<SimulatedIoc>,
    cam: PvName,
    arr: PvName,
    config: SimDetectorConfig,
    frames: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SimDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDetector")
            .field("cam", &self.cam)
            .field("arr", &self.arr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SimDetector {
    /// Creates the simulation for a driver base (`...:CAM:`) and image array
    /// plugin base (`...:ARR:`).
    pub fn new(ioc: Arc<SimulatedIoc>, cam: PvName, arr: PvName, config: SimDetectorConfig) -> Self {
        Self {
            ioc,
            cam,
            arr,
            config,
            frames: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Frames produced so far.
    pub fn frames_emitted(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn seed_default(&self, pv: String, value: PvValue) {
        if self.ioc.value(&pv).is_none() {
            self.ioc.post(&pv, value);
        }
    }

    /// Seeds the driver and plugin records and starts watching `Acquire`.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn start(&self) -> Result<()> {
        let cam = &self.cam;
        let arr = &self.arr;
        self.seed_default(cam.join(cam::ACQUIRE_TIME_RBV), PvValue::Double(0.1));
        self.seed_default(cam.join(cam::ACQUIRE_PERIOD_RBV), PvValue::Double(0.1));
        self.seed_default(cam.join(cam::IMAGE_MODE_RBV), PvValue::Enum(ImageMode::Continuous.index()));
        self.seed_default(cam.join(cam::NUM_IMAGES_RBV), PvValue::Int(1));
        self.seed_default(cam.join(cam::TRIGGER_MODE_RBV), PvValue::Enum(0));
        self.seed_default(cam.join(cam::ACQUIRE_RBV), PvValue::Int(0));
        self.seed_default(cam.join(plugin::ARRAY_COUNTER_RBV), PvValue::Int(0));
        self.seed_default(cam.join(plugin::PORT_NAME_RBV), PvValue::Str("SIM.CAM".into()));
        self.seed_default(arr.join(plugin::PORT_NAME_RBV), PvValue::Str("SIM.ARR".into()));
        self.seed_default(arr.join(plugin::ARRAY_COUNTER_RBV), PvValue::Int(0));
        self.seed_default(arr.join(plugin::ENABLE_CALLBACKS_RBV), PvValue::Int(0));
        self.seed_default(arr.join(plugin::MIN_CALLBACK_TIME_RBV), PvValue::Double(0.0));
        self.seed_default(arr.join(plugin::DROPPED_ARRAYS_RBV), PvValue::Int(0));
        self.seed_default(arr.join(plugin::ARRAY_SIZE0_RBV), PvValue::Int(self.config.width as i64));
        self.seed_default(arr.join(plugin::ARRAY_SIZE1_RBV), PvValue::Int(self.config.height as i64));

        let acquire = self.ioc.monitor(&cam.join(cam::ACQUIRE)).await?;
        let worker = Worker {
            ioc: self.ioc.clone(),
            cam: self.cam.clone(),
            arr: self.arr.clone(),
            config: self.config.clone(),
            frames: self.frames.clone(),
            rng: StdRng::seed_from_u64(self.config.seed),
        };
        let handle = tokio::spawn(worker.run(acquire));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        info!(cam = %self.cam, width = self.config.width, height = self.config.height, "simulated detector started");
        Ok(())
    }

    /// Stops the simulation task.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SimDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    ioc: Arc<SimulatedIoc>,
    cam: PvName,
    arr: PvName,
    config: SimDetectorConfig,
    frames: Arc<AtomicU64>,
    rng: StdRng,
}

fn is_on(value: &PvValue) -> bool {
    matches!(value, PvValue::Int(v) if *v != 0) || matches!(value, PvValue::Enum(v) if *v != 0)
}

impl Worker {
    async fn run(mut self, mut acquire: watch::Receiver<PvValue>) {
        while acquire.changed().await.is_ok() {
            let start = is_on(&acquire.borrow_and_update());
            if start {
                self.acquire(&acquire).await;
            }
        }
        debug!(cam = %self.cam, "acquire monitor closed");
    }

    fn read_f64(&self, pv: &str, default: f64) -> f64 {
        match self.ioc.value(pv) {
            Some(PvValue::Double(v)) => v,
            #[allow(clippy::cast_precision_loss)]
            Some(PvValue::Int(v)) => v as f64,
            _ => default,
        }
    }

    fn read_i64(&self, pv: &str, default: i64) -> i64 {
        match self.ioc.value(pv) {
            Some(PvValue::Int(v)) => v,
            Some(PvValue::Enum(v)) => i64::from(v),
            _ => default,
        }
    }

    async fn acquire(&mut self, acquire: &watch::Receiver<PvValue>) {
        let cam = self.cam.clone();
        let exposure = self.read_f64(&cam.join(cam::ACQUIRE_TIME_RBV), 0.1);
        let period = self.read_f64(&cam.join(cam::ACQUIRE_PERIOD_RBV), 0.1);
        let mode = u16::try_from(self.read_i64(&cam.join(cam::IMAGE_MODE_RBV), 2))
            .ok()
            .and_then(ImageMode::from_index)
            .unwrap_or(ImageMode::Continuous);
        let limit = match mode {
            ImageMode::Single => Some(1),
            ImageMode::Multiple => Some(self.read_i64(&cam.join(cam::NUM_IMAGES_RBV), 1).max(1)),
            ImageMode::Continuous => None,
        };
        let interval = Duration::from_secs_f64(exposure.max(period).max(0.0)).max(MIN_FRAME_INTERVAL);
        debug!(cam = %cam, ?mode, ?limit, interval_ms = interval.as_millis() as u64, "acquisition started");

        self.ioc.post(&cam.join(cam::ACQUIRE_RBV), PvValue::Int(1));
        let mut emitted = 0i64;
        loop {
            tokio::time::sleep(interval).await;
            if !is_on(&acquire.borrow()) {
                break;
            }
            self.emit_frame();
            emitted += 1;
            if limit.is_some_and(|n| emitted >= n) {
                self.ioc.post(&cam.join(cam::ACQUIRE), PvValue::Int(0));
                break;
            }
        }
        self.ioc.post(&cam.join(cam::ACQUIRE_RBV), PvValue::Int(0));
        debug!(cam = %cam, emitted, "acquisition finished");
    }

    #[allow(clippy::cast_possible_wrap)]
    fn emit_frame(&mut self) {
        let frame_num = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = frame_num as i64;
        self.ioc.post(&self.cam.join(plugin::ARRAY_COUNTER_RBV), PvValue::Int(counter));

        let plugin_enabled = self
            .ioc
            .value(&self.arr.join(plugin::ENABLE_CALLBACKS_RBV))
            .is_some_and(|v| is_on(&v));
        if !plugin_enabled {
            return;
        }

        let SimDetectorConfig {
            width,
            height,
            element_type,
            noise,
            ..
        } = self.config.clone();
        let pixels = generate_pattern(width, height, frame_num, noise, &mut self.rng);
        let data = ArrayData::from_f64(element_type, &pixels);
        let arr = &self.arr;
        self.ioc.post(&arr.join(ARRAY_DATA), PvValue::Array(data));
        self.ioc.post(&arr.join(plugin::ARRAY_SIZE0_RBV), PvValue::Int(width as i64));
        self.ioc.post(&arr.join(plugin::ARRAY_SIZE1_RBV), PvValue::Int(height as i64));
        self.ioc.post(&arr.join(plugin::DATA_TYPE_RBV), PvValue::Enum(element_type.nd_data_type()));
        let plugin_counter = self.read_i64(&arr.join(plugin::ARRAY_COUNTER_RBV), 0) + 1;
        self.ioc.post(&arr.join(plugin::ARRAY_COUNTER_RBV), PvValue::Int(plugin_counter));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adbase::{AdBase, EpicsAdBase};
    use crate::ndarray_plugin::NdArrayPlugin;

    fn sim() -> (Arc<SimulatedIoc>, SimDetector) {
        let ioc = SimulatedIoc::new().shared();
        let detector = SimDetector::new(
            ioc.clone(),
            PvName::new("SIM:CAM:"),
            PvName::new("SIM:ARR:"),
            SimDetectorConfig {
                width: 8,
                height: 6,
                ..SimDetectorConfig::default()
            },
        );
        (ioc, detector)
    }

    #[test]
    fn test_pattern_has_a_spot() {
        let mut rng = StdRng::seed_from_u64(1);
        let pixels = generate_pattern(32, 32, 0, 0.0, &mut rng);
        let max = pixels.iter().cloned().fold(f64::MIN, f64::max);
        let min = pixels.iter().cloned().fold(f64::MAX, f64::min);
        assert_eq!(pixels.len(), 32 * 32);
        assert!(max > 2000.0);
        assert!(min >= 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mode_emits_one_frame() {
        let (ioc, detector) = sim();
        detector.start().await.unwrap();
        let ad_base = EpicsAdBase::new(ioc.clone(), PvName::new("SIM:CAM:")).unwrap();
        let arr = NdArrayPlugin::new(ioc.clone(), PvName::new("SIM:ARR:")).unwrap();
        arr.plugin_base().enable_callbacks().await.unwrap();

        ad_base.set_image_mode_wait(ImageMode::Single).await.unwrap();
        ad_base.set_acquire_period(0.01).await.unwrap();
        ad_base.set_acquire_time(0.01).await.unwrap();
        ad_base.start_acquiring().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(detector.frames_emitted(), 1);
        assert!(!ad_base.is_acquiring().await.unwrap());

        let frame = arr.image_data().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.counter(), 1);
        assert_eq!(frame.element_type(), ElementType::UInt16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_plugin_receives_no_frames() {
        let (ioc, detector) = sim();
        detector.start().await.unwrap();
        let ad_base = EpicsAdBase::new(ioc.clone(), PvName::new("SIM:CAM:")).unwrap();

        ad_base.set_image_mode_wait(ImageMode::Multiple).await.unwrap();
        ad_base.set_num_images(3).await.unwrap();
        ad_base.set_acquire_period(0.01).await.unwrap();
        ad_base.start_acquiring().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(detector.frames_emitted(), 3);
        assert_eq!(ioc.value("SIM:CAM:ArrayCounter_RBV"), Some(PvValue::Int(3)));
        assert_eq!(ioc.value("SIM:ARR:ArrayCounter_RBV"), Some(PvValue::Int(0)));
    }
}

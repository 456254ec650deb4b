//! Live view driven end to end by the simulated camera.
//!
//! The IOC, camera simulation, controller registry and live view all run
//! in-process; frames arrive at the simulated frame rate, so waits are
//! bounded by a timeout rather than a fixed sleep.

use anyhow::{Context, Result};
use gda_epics::adviewer::{
    ControllerConfig, ControllerRegistry, LiveSettings, LiveView, RecordingSurface, ShowOption, StateFormat,
    StoreKey, Validity,
};
use gda_epics::areadetector::{AdBase, ImageMode, SimDetector, SimDetectorConfig};
use gda_epics::gda_core::{PvValue, SimulatedIoc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Rig {
    ioc: Arc<SimulatedIoc>,
    detector: SimDetector,
    view: LiveView,
    surface: Arc<RecordingSurface>,
    _state: TempDir,
}

impl Rig {
    async fn wait_for(&self, renders: usize) -> Result<()> {
        tokio::time::timeout(WAIT, self.surface.wait_for(renders))
            .await
            .with_context(|| format!("waiting for {renders} renders"))
    }

    async fn acquire(&self) -> Result<()> {
        let controller = self.view.controller();
        controller.ad_base().set_image_mode_wait(ImageMode::Continuous).await?;
        controller.ad_base().start_acquiring().await?;
        Ok(())
    }
}

async fn rig(with_roi: bool, state: TempDir) -> Result<Rig> {
    let ioc = SimulatedIoc::new().shared();
    ioc.seed("SIM:CAM:AcquireTime_RBV", PvValue::Double(0.01))
        .seed("SIM:CAM:AcquirePeriod_RBV", PvValue::Double(0.01))
        .seed("SIM:ROI:PortName_RBV", PvValue::Str("SIM.ROI".into()));

    let mut config = ControllerConfig::new("sim", "SIM:");
    config.array_port_input = Some("SIM.CAM".into());
    config.hist_size = 16;
    if !with_roi {
        config.suffixes.roi = String::new();
    }
    let registry = ControllerRegistry::new(ioc.clone(), [config])?;
    let controller = registry.get_or_register("sim")?;

    let detector = SimDetector::new(
        ioc.clone(),
        controller.config().cam_base(),
        controller.config().array_base(),
        SimDetectorConfig {
            width: 8,
            height: 6,
            noise: 0.0,
            ..SimDetectorConfig::default()
        },
    );
    detector.start().await?;

    let surface = Arc::new(RecordingSurface::new());
    let settings = LiveSettings::for_controller(&controller, state.path().to_path_buf(), StateFormat::Json);
    let view = LiveView::new(controller, surface.clone(), settings);
    Ok(Rig {
        ioc,
        detector,
        view,
        surface,
        _state: state,
    })
}

#[tokio::test]
async fn test_simulated_frames_reach_the_surface() -> Result<()> {
    let rig = rig(false, TempDir::new()?).await?;
    rig.view.configure().await?;
    rig.acquire().await?;
    rig.wait_for(3).await?;

    let update = rig.surface.last().context("no render")?;
    assert_eq!(update.frame.grid.dim(), (6, 8));
    assert_eq!(update.frame.name, update.counter.to_string());
    assert!(update.range.min < update.range.max);
    assert_eq!(update.histogram.counts().len(), 16);

    let counters: Vec<i64> = rig.surface.updates().iter().map(|u| u.counter).collect();
    assert!(counters.windows(2).all(|w| w[0] < w[1]), "{counters:?}");
    assert!(rig.detector.frames_emitted() >= 3);
    Ok(())
}

#[tokio::test]
async fn test_difference_against_stored_reference() -> Result<()> {
    let rig = rig(false, TempDir::new()?).await?;
    rig.view.configure().await?;
    rig.acquire().await?;
    rig.wait_for(2).await?;

    rig.view.store_as(StoreKey::A)?;
    rig.view.set_show_option(ShowOption::IMinusA);
    let seen = rig.surface.len();
    rig.wait_for(seen + 2).await?;

    let update = rig.surface.last().context("no render")?;
    assert_eq!(update.show_option, ShowOption::IMinusA);
    assert_eq!(update.frame.validity, Validity::Valid);
    assert!(update.frame.name.ends_with(" - A"), "{}", update.frame.name);

    // B was never stored.
    rig.view.set_show_option(ShowOption::IMinusB);
    let seen = rig.surface.len();
    rig.wait_for(seen + 1).await?;
    let update = rig.surface.last().context("no render")?;
    assert!(!update.frame.is_valid());
    Ok(())
}

#[tokio::test]
async fn test_stop_ends_rendering() -> Result<()> {
    let rig = rig(false, TempDir::new()?).await?;
    rig.view.configure().await?;
    rig.acquire().await?;
    rig.wait_for(2).await?;

    rig.view.stop().await?;
    assert!(!rig.view.monitoring_observable().get());
    assert_eq!(rig.ioc.puts_to("SIM:ARR:EnableCallbacks").last(), Some(&PvValue::Int(0)));

    // Let any in-flight render land, then check nothing follows.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let rendered = rig.surface.len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.surface.len(), rendered);
    Ok(())
}

#[tokio::test]
async fn test_roi_sits_between_source_and_image_plugin() -> Result<()> {
    let rig = rig(true, TempDir::new()?).await?;
    rig.view.configure().await?;

    assert_eq!(
        rig.ioc.puts_to("SIM:ROI:NDArrayPort"),
        vec![PvValue::Str("SIM.CAM".into())]
    );
    assert_eq!(
        rig.ioc.puts_to("SIM:ARR:NDArrayPort").last(),
        Some(&PvValue::Str("SIM.ROI".into()))
    );
    assert_eq!(rig.ioc.puts_to("SIM:ROI:EnableCallbacks"), vec![PvValue::Int(1)]);

    // Image plugin throttling follows through to the ROI.
    rig.ioc.post("SIM:ARR:MinCallbackTime_RBV", PvValue::Double(0.5));
    tokio::time::timeout(WAIT, async {
        while rig.ioc.puts_to("SIM:ROI:MinCallbackTime").last() != Some(&PvValue::Double(0.5)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    rig.acquire().await?;
    rig.wait_for(1).await?;
    Ok(())
}

#[tokio::test]
async fn test_saved_stores_survive_a_new_view() -> Result<()> {
    let state = TempDir::new()?;
    let state_path = state.path().to_path_buf();
    let first = rig(false, state).await?;
    first.view.configure().await?;
    first.acquire().await?;
    first.wait_for(2).await?;
    first.view.store_as(StoreKey::A)?;
    let first_count = first.surface.len();
    first.wait_for(first_count + 1).await?;
    first.view.store_as(StoreKey::B)?;
    let saved = first.view.save("session").await.context("save failed")?;
    assert!(saved.starts_with(&state_path));
    assert!(saved.exists());

    let ioc = SimulatedIoc::new().shared();
    let mut config = ControllerConfig::new("sim", "SIM:");
    config.suffixes.roi = String::new();
    let registry = ControllerRegistry::new(ioc, [config])?;
    let controller = registry.get_or_register("sim")?;
    let surface = Arc::new(RecordingSurface::new());
    let settings = LiveSettings::for_controller(&controller, state_path, StateFormat::Json);
    let second = LiveView::new(controller, surface, settings);
    second.restore("session").await;

    let restored = second.stores();
    let restored = restored.read();
    let original = first.view.stores();
    let original = original.read();
    assert_eq!(restored.get(StoreKey::A), original.get(StoreKey::A));
    assert_eq!(restored.get(StoreKey::B), original.get(StoreKey::B));
    assert!(restored.a_minus_b().is_some());
    Ok(())
}

#[tokio::test]
async fn test_snapshot_png_of_displayed_frame() -> Result<()> {
    let rig = rig(false, TempDir::new()?).await?;
    rig.view.configure().await?;
    rig.acquire().await?;
    rig.wait_for(1).await?;

    let out = TempDir::new()?;
    let path = out.path().join("frame.png");
    rig.view.save_snapshot(&path)?;
    let png = image::open(&path)?.to_luma8();
    assert_eq!(png.dimensions(), (8, 6));
    Ok(())
}

//! Live image view.
//!
//! A [`LiveView`] follows the image array plugin's array counter. Every
//! counter change schedules the update job through a one-slot queue, so
//! bursts of notifications collapse into at most one pending run. The job
//! fetches the frame, combines it with the reference stores, ranges it and
//! publishes the result. Publishing keeps only the latest result and posts
//! at most one render callback to the [`UiThread`]; the callback renders
//! whatever is latest when it runs.
//!
//! Failures inside the job are logged and swallowed so monitoring carries on
//! with the next frame. Counter updates that do not decode as an integer are
//! skipped; only a closed monitor ends monitoring. Nothing is rendered once
//! the view is disposed.

use gda_areadetector::NdPluginBase;
use gda_core::{GdaError, Observable, PvMonitor, Result};
use ndarray::Array2;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::combine::{combine, DisplayFrame, ShowOption};
use crate::controller::{AdController, FrameSource};
use crate::persist::{self, StateFormat};
use crate::range::{DisplayRange, Histogram, RangeTracker};
use crate::snapshot;
use crate::stores::{ReferenceStores, SharedStores, StoreKey};

/// One published view update.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveUpdate {
    /// Array counter of the source frame.
    pub counter: i64,
    /// Selection shown.
    pub show_option: ShowOption,
    /// Combined frame.
    pub frame: DisplayFrame,
    /// Display range applied to `frame`.
    pub range: DisplayRange,
    /// Intensity histogram of `frame` over `range`.
    pub histogram: Histogram,
}

/// Where updates are drawn. Called on the [`UiThread`] only.
pub trait RenderSurface: Send + Sync {
    /// Draws an update.
    fn render(&self, update: &LiveUpdate);
}

/// Collects rendered updates; for headless runs and tests.
#[derive(Debug)]
pub struct RecordingSurface {
    updates: Mutex<Vec<LiveUpdate>>,
    count: watch::Sender<usize>,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSurface {
    /// Empty surface.
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            count: watch::channel(0).0,
        }
    }

    /// Everything rendered so far.
    pub fn updates(&self) -> Vec<LiveUpdate> {
        self.updates.lock().clone()
    }

    /// Number of renders.
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    /// True before the first render.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent render.
    pub fn last(&self) -> Option<LiveUpdate> {
        self.updates.lock().last().cloned()
    }

    /// Waits until at least `n` renders happened.
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.count.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|&count| count >= n).await;
    }
}

impl RenderSurface for RecordingSurface {
    fn render(&self, update: &LiveUpdate) {
        let mut updates = self.updates.lock();
        updates.push(update.clone());
        self.count.send_replace(updates.len());
    }
}

type UiTask = Box<dyn FnOnce() + Send>;

/// Runs posted callbacks one at a time, in order, on a single task.
#[derive(Debug)]
pub struct UiThread {
    tx: mpsc::UnboundedSender<UiTask>,
    task: JoinHandle<()>,
}

impl UiThread {
    /// Spawns the UI task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiTask>();
        let task = tokio::spawn(async move {
            while let Some(callback) = rx.recv().await {
                callback();
            }
        });
        Self { tx, task }
    }

    /// Queues `callback`; false once the UI task has gone.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(callback)).is_ok()
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Viewer settings not tied to the detector.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Percentile stretch per frame.
    pub auto_scale: bool,
    /// Starting display range.
    pub initial_range: Option<DisplayRange>,
    /// Bins in the published histogram.
    pub hist_size: usize,
    /// Directory for saved stores.
    pub state_dir: PathBuf,
    /// Format for saved stores.
    pub state_format: StateFormat,
}

impl LiveSettings {
    /// Settings taken from a controller's configuration.
    pub fn for_controller(controller: &AdController, state_dir: PathBuf, state_format: StateFormat) -> Self {
        Self {
            auto_scale: controller.config().auto_scale,
            initial_range: controller.initial_range(),
            hist_size: controller.hist_size(),
            state_dir,
            state_format,
        }
    }
}

#[derive(Default)]
struct Tasks {
    job: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    roi_forwarder: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [self.job.take(), self.monitor.take(), self.roi_forwarder.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared {
    controller: Arc<AdController>,
    source: Arc<dyn FrameSource>,
    surface: Arc<dyn RenderSurface>,
    ui: UiThread,
    settings: LiveSettings,
    stores: SharedStores,
    show_option: Observable<ShowOption>,
    auto_scale: Observable<bool>,
    monitoring: Observable<bool>,
    min_callback_time: Observable<f64>,
    visible: AtomicBool,
    disposed: AtomicBool,
    render_scheduled: AtomicBool,
    jobs: mpsc::Sender<()>,
    last_counter: Mutex<Option<i64>>,
    last_raw: Mutex<Option<Array2<f64>>>,
    tracker: Mutex<RangeTracker>,
    latest: Mutex<Option<LiveUpdate>>,
}

impl Shared {
    fn on_counter(&self, counter: i64) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.last_counter.lock() = Some(counter);
        if self.visible.load(Ordering::SeqCst) {
            self.schedule();
        }
    }

    fn schedule(&self) {
        match self.jobs.try_send(()) {
            Ok(()) => trace!("update scheduled"),
            Err(mpsc::error::TrySendError::Full(())) => trace!("update already pending"),
            Err(mpsc::error::TrySendError::Closed(())) => {}
        }
    }

    /// Re-runs the job for the last counter seen, if any.
    fn refresh(&self) {
        let last = *self.last_counter.lock();
        if let Some(counter) = last {
            self.on_counter(counter);
        }
    }

    async fn update(self: &Arc<Self>) -> Result<()> {
        let frame = self.source.current_frame().await?;
        let grid = frame.to_grid()?;
        let option = self.show_option.get();
        let display = {
            let stores = self.stores.read();
            combine(&grid, &frame.counter().to_string(), option, &stores)
        };
        let range = self.tracker.lock().update(&display.grid, self.auto_scale.get())?;
        #[allow(clippy::cast_precision_loss)]
        let histogram = Histogram::new(
            self.settings.hist_size,
            range.min as f64,
            range.max as f64,
            display.grid.iter(),
        );
        *self.last_raw.lock() = Some(grid);

        self.publish(LiveUpdate {
            counter: frame.counter(),
            show_option: option,
            frame: display,
            range,
            histogram,
        });
        Ok(())
    }

    fn publish(self: &Arc<Self>, update: LiveUpdate) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.latest.lock() = Some(update);
        if self.render_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(self);
        self.ui.post(move || {
            shared.render_scheduled.store(false, Ordering::SeqCst);
            if shared.disposed.load(Ordering::SeqCst) {
                return;
            }
            let latest = shared.latest.lock().clone();
            if let Some(update) = latest {
                shared.surface.render(&update);
            }
        });
    }
}

async fn follow_counter(shared: Arc<Shared>, mut counter: PvMonitor<i64>) {
    loop {
        match counter.changed().await {
            Ok(value) => shared.on_counter(value),
            Err(e @ GdaError::TypeMismatch { .. }) => warn!(error = %e, "skipping array counter update"),
            Err(e) => {
                warn!(error = %e, "array counter monitor ended");
                break;
            }
        }
    }
    shared.monitoring.set_unchecked(false);
}

async fn forward_min_callback_time(shared: Arc<Shared>, roi: NdPluginBase, mut min_time: PvMonitor<f64>) {
    loop {
        match min_time.changed().await {
            Ok(seconds) => {
                shared.min_callback_time.set_unchecked(seconds);
                if let Err(e) = roi.set_min_callback_time(seconds).await {
                    error!(error = %e, "Error setting minCallbackTime");
                }
            }
            Err(e @ GdaError::TypeMismatch { .. }) => warn!(error = %e, "skipping min callback time update"),
            Err(e) => {
                warn!(error = %e, "min callback time monitor ended");
                break;
            }
        }
    }
}

async fn run_job(shared: Arc<Shared>, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        if shared.disposed.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = shared.update().await {
            error!(error = %e, "Error updating image view");
        }
    }
}

/// Live view of one controller's image plugin.
pub struct LiveView {
    shared: Arc<Shared>,
    job_rx: Mutex<Option<mpsc::Receiver<()>>>,
    tasks: Mutex<Tasks>,
}

impl std::fmt::Debug for LiveView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveView")
            .field("service", &self.shared.controller.service_name())
            .field("monitoring", &self.shared.monitoring.get())
            .field("show_option", &self.shared.show_option.get())
            .finish_non_exhaustive()
    }
}

impl LiveView {
    /// Creates a view reading frames from the controller's image plugin.
    /// Must be called inside a Tokio runtime.
    pub fn new(controller: Arc<AdController>, surface: Arc<dyn RenderSurface>, settings: LiveSettings) -> Self {
        let source: Arc<dyn FrameSource> = controller.clone();
        Self::with_source(controller, source, surface, settings)
    }

    /// Like [`LiveView::new`] with frames from another source.
    pub fn with_source(
        controller: Arc<AdController>,
        source: Arc<dyn FrameSource>,
        surface: Arc<dyn RenderSurface>,
        settings: LiveSettings,
    ) -> Self {
        let (jobs, job_rx) = mpsc::channel(1);
        let tracker = settings
            .initial_range
            .map_or_else(RangeTracker::new, RangeTracker::with_range);
        let auto_scale = settings.auto_scale;
        let min_callback_time = controller.min_callback_time();
        let shared = Arc::new(Shared {
            controller,
            source,
            surface,
            ui: UiThread::spawn(),
            settings,
            stores: ReferenceStores::new().shared(),
            show_option: Observable::new("show_option", ShowOption::I)
                .with_description("Selection combined with the live image"),
            auto_scale: Observable::new("auto_scale", auto_scale),
            monitoring: Observable::new("monitoring", false).read_only(),
            min_callback_time: Observable::new("min_callback_time", min_callback_time)
                .with_description("Minimum time between image plugin callbacks, seconds")
                .with_range(0.0, f64::MAX),
            visible: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            render_scheduled: AtomicBool::new(false),
            jobs,
            last_counter: Mutex::new(None),
            last_raw: Mutex::new(None),
            tracker: Mutex::new(tracker),
            latest: Mutex::new(None),
        });
        Self {
            shared,
            job_rx: Mutex::new(Some(job_rx)),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// Controller being viewed.
    pub fn controller(&self) -> &Arc<AdController> {
        &self.shared.controller
    }

    /// Prepares the plugins and starts monitoring.
    ///
    /// The image plugin gets the view's minimum callback time and is pointed
    /// at the configured source port; [`LiveView::start`] enables its
    /// callbacks. With an ROI
    /// plugin the chain becomes source, ROI, image plugin, and image plugin
    /// minimum callback time changes are copied to the ROI plugin. ROI
    /// problems are logged and do not fail the call.
    pub async fn configure(&self) -> Result<()> {
        let controller = &self.shared.controller;
        let image = controller.image_plugin().plugin_base();

        if let Err(e) = image.set_min_callback_time(self.shared.min_callback_time.get()).await {
            error!(error = %e, "Error setting min callback time");
        }

        let source = controller.array_port_input();
        if let Some(source) = source {
            if image.nd_array_port_rbv().await.ok().as_deref() != Some(source) {
                image.set_nd_array_port(source).await?;
            }
        }

        if let Err(e) = self.start().await {
            error!(error = %e, "Error starting live view");
        }

        if controller.roi().is_some() {
            if let Err(e) = self.route_through_roi(source).await {
                error!(error = %e, "Error configuring the ROI");
            }
        }
        Ok(())
    }

    async fn route_through_roi(&self, source: Option<&str>) -> Result<()> {
        let controller = self.shared.controller.clone();
        let roi = controller
            .roi()
            .ok_or_else(|| GdaError::NotConfigured("no ROI plugin".into()))?
            .plugin_base()
            .clone();
        let image = controller.image_plugin().plugin_base();

        if let Some(source) = source {
            if roi.nd_array_port_rbv().await.ok().as_deref() != Some(source) {
                roi.set_nd_array_port(source).await?;
            }
        }
        image.set_nd_array_port(&roi.port_name_rbv().await?).await?;
        roi.enable_callbacks().await?;

        let min_time = image.min_callback_time_monitor().await?;
        roi.set_min_callback_time(image.min_callback_time_rbv().await?).await?;
        let forwarder = tokio::spawn(forward_min_callback_time(self.shared.clone(), roi, min_time));
        if let Some(previous) = self.tasks.lock().roi_forwarder.replace(forwarder) {
            previous.abort();
        }
        info!(service = controller.service_name(), "image plugin reads through ROI");
        Ok(())
    }

    /// Enables image plugin callbacks and follows its array counter.
    pub async fn start(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(GdaError::Configuration("live view has been disposed".into()));
        }
        let image = self.shared.controller.image_plugin().plugin_base();
        image.enable_callbacks().await?;

        if let Some(rx) = self.job_rx.lock().take() {
            let job = tokio::spawn(run_job(self.shared.clone(), rx));
            self.tasks.lock().job = Some(job);
        }

        let running = self
            .tasks
            .lock()
            .monitor
            .as_ref()
            .is_some_and(|monitor| !monitor.is_finished());
        if !running {
            let counter = image.array_counter_monitor().await?;
            let monitor = tokio::spawn(follow_counter(self.shared.clone(), counter));
            self.tasks.lock().monitor = Some(monitor);
        }

        self.shared.monitoring.set_unchecked(true);
        info!(service = self.shared.controller.service_name(), "live view started");
        Ok(())
    }

    /// Disables image plugin callbacks and stops following the counter.
    pub async fn stop(&self) -> Result<()> {
        let result = self
            .shared
            .controller
            .image_plugin()
            .plugin_base()
            .disable_callbacks()
            .await;
        if let Some(monitor) = self.tasks.lock().monitor.take() {
            monitor.abort();
        }
        self.shared.monitoring.set_unchecked(false);
        debug!(service = self.shared.controller.service_name(), "live view stopped");
        result
    }

    /// Stops for good. Later notifications are ignored.
    pub async fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        if let Err(e) = self.stop().await {
            error!(error = %e, "Error stopping live view");
        }
        self.tasks.lock().abort_all();
    }

    /// True once [`LiveView::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Hidden views record counter changes without updating; showing the
    /// view again updates it with the last counter seen.
    pub fn set_view_visible(&self, visible: bool) {
        self.shared.visible.store(visible, Ordering::SeqCst);
        if visible {
            self.shared.refresh();
        }
    }

    /// Copies the most recent live frame into a store.
    pub fn store_as(&self, key: StoreKey) -> Result<()> {
        let raw = self
            .shared
            .last_raw
            .lock()
            .clone()
            .ok_or_else(|| GdaError::Processing("no frame received yet".into()))?;
        self.shared.stores.write().store(key, raw);
        self.shared.refresh();
        Ok(())
    }

    /// Reference stores of this view.
    pub fn stores(&self) -> SharedStores {
        self.shared.stores.clone()
    }

    /// Changes the selection and redraws.
    pub fn set_show_option(&self, option: ShowOption) {
        if self.shared.show_option.set_if_changed(option).unwrap_or(false) {
            debug!(option = %option, "show option");
            self.shared.refresh();
        }
    }

    /// Current selection.
    pub fn show_option(&self) -> ShowOption {
        self.shared.show_option.get()
    }

    /// Switches auto-scaling and redraws.
    pub fn set_auto_scale(&self, auto_scale: bool) {
        if self.shared.auto_scale.set_if_changed(auto_scale).unwrap_or(false) {
            self.shared.refresh();
        }
    }

    /// Sets the image plugin's minimum callback time. Negative or NaN
    /// values are rejected without touching the plugin.
    pub async fn set_min_callback_time(&self, seconds: f64) -> Result<()> {
        self.shared.min_callback_time.validate(&seconds)?;
        self.shared
            .controller
            .image_plugin()
            .plugin_base()
            .set_min_callback_time(seconds)
            .await?;
        self.shared.min_callback_time.set(seconds)
    }

    /// Pins the display range; takes effect while auto-scale is off.
    pub fn set_range(&self, range: DisplayRange) {
        self.shared.tracker.lock().set_range(range);
        self.shared.refresh();
    }

    /// Selection observable.
    pub fn show_option_observable(&self) -> &Observable<ShowOption> {
        &self.shared.show_option
    }

    /// Auto-scale observable.
    pub fn auto_scale_observable(&self) -> &Observable<bool> {
        &self.shared.auto_scale
    }

    /// Minimum callback time observable, seconds.
    pub fn min_callback_time_observable(&self) -> &Observable<f64> {
        &self.shared.min_callback_time
    }

    /// Running / stopped observable.
    pub fn monitoring_observable(&self) -> &Observable<bool> {
        &self.shared.monitoring
    }

    /// Connection state of the image plugin's array counter.
    pub async fn connection_state(&self) -> Result<watch::Receiver<bool>> {
        self.shared
            .controller
            .image_plugin()
            .plugin_base()
            .connection_state_monitor()
            .await
    }

    /// Last published update.
    pub fn snapshot(&self) -> Option<LiveUpdate> {
        self.shared.latest.lock().clone()
    }

    /// Writes the last published frame as a PNG.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let update = self
            .snapshot()
            .ok_or_else(|| GdaError::Processing("nothing displayed yet".into()))?;
        snapshot::save_png(&update.frame.grid, update.range, path)
    }

    /// Saves the stores under `name`. Failures are logged.
    pub async fn save(&self, name: &str) -> Option<PathBuf> {
        let stores = self.shared.stores.read().clone();
        let settings = &self.shared.settings;
        match persist::save(stores, settings.state_dir.clone(), name.to_string(), settings.state_format).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, name, "Error saving state");
                None
            }
        }
    }

    /// Replaces the stores with those saved under `name`. Failures are
    /// logged and leave the stores empty.
    pub async fn restore(&self, name: &str) {
        let settings = &self.shared.settings;
        let restored =
            match persist::restore(settings.state_dir.clone(), name.to_string(), settings.state_format).await {
                Ok(stores) => stores,
                Err(e) => {
                    error!(error = %e, name, "Error reading saved state");
                    ReferenceStores::new()
                }
            };
        *self.shared.stores.write() = restored;
        self.shared.refresh();
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.tasks.lock().abort_all();
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::combine::{InvalidReason, Validity};
    use crate::controller::ControllerConfig;
    use gda_core::{ArrayData, PvValue, SimulatedIoc};
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const ARR: &str = "SIM:ARR:";

    fn pv(suffix: &str) -> String {
        format!("{ARR}{suffix}")
    }

    fn post_frame(ioc: &SimulatedIoc, counter: i64, values: &[u16]) {
        ioc.post(&pv("ArrayData"), PvValue::Array(ArrayData::UInt16(values.to_vec())));
        ioc.post(&pv("ArrayCounter_RBV"), PvValue::Int(counter));
    }

    struct Fixture {
        ioc: Arc<SimulatedIoc>,
        view: LiveView,
        surface: Arc<RecordingSurface>,
        dir: TempDir,
    }

    fn fixture(roi: bool) -> Fixture {
        let ioc = SimulatedIoc::new().shared();
        ioc.seed(&pv("ArraySize0_RBV"), PvValue::Int(2))
            .seed(&pv("ArraySize1_RBV"), PvValue::Int(2))
            .seed(&pv("ArrayCounter_RBV"), PvValue::Int(0))
            .seed(&pv("EnableCallbacks_RBV"), PvValue::Int(0))
            .seed(&pv("NDArrayPort_RBV"), PvValue::Str("SIM.CAM".into()))
            .seed(&pv("MinCallbackTime_RBV"), PvValue::Double(0.0))
            .seed("SIM:ROI:PortName_RBV", PvValue::Str("SIM.ROI".into()))
            .seed("SIM:ROI:NDArrayPort_RBV", PvValue::Str("SIM.CAM".into()));

        let mut config = ControllerConfig::new("sim", "SIM:");
        config.array_port_input = Some("SIM.PROC".into());
        config.min_callback_time = 0.2;
        config.hist_size = 4;
        if !roi {
            config.suffixes.roi = String::new();
        }
        let controller = Arc::new(AdController::new(ioc.clone(), config).unwrap());
        let dir = TempDir::new().unwrap();
        let surface = Arc::new(RecordingSurface::new());
        let settings = LiveSettings::for_controller(&controller, dir.path().to_path_buf(), StateFormat::Json);
        let view = LiveView::new(controller, surface.clone(), settings);
        Fixture {
            ioc,
            view,
            surface,
            dir,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_start_enables_callbacks_and_renders_frames() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        assert_eq!(f.ioc.puts_to(&pv("EnableCallbacks")), vec![PvValue::Int(1)]);
        assert!(f.view.monitoring_observable().get());

        post_frame(&f.ioc, 1, &[0, 10, 20, 30]);
        f.surface.wait_for(1).await;

        let update = f.surface.last().unwrap();
        assert_eq!(update.counter, 1);
        assert_eq!(update.frame.name, "1");
        assert_eq!(update.frame.grid, ndarray::array![[0.0, 10.0], [20.0, 30.0]]);
        assert_eq!(update.histogram.counts().len(), 4);
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        post_frame(&f.ioc, 1, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        settle().await;

        for _ in 0..5 {
            f.view.set_view_visible(true);
        }
        settle().await;
        assert_eq!(f.surface.len(), 2);
    }

    #[tokio::test]
    async fn test_hidden_view_shows_last_counter_when_shown() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        f.view.set_view_visible(false);

        post_frame(&f.ioc, 7, &[1, 2, 3, 4]);
        settle().await;
        post_frame(&f.ioc, 8, &[5, 6, 7, 8]);
        settle().await;
        assert!(f.surface.is_empty());

        f.view.set_view_visible(true);
        f.surface.wait_for(1).await;
        settle().await;
        let update = f.surface.last().unwrap();
        assert_eq!(f.surface.len(), 1);
        assert_eq!(update.counter, 8);
        assert_eq!(update.frame.grid, ndarray::array![[5.0, 6.0], [7.0, 8.0]]);
    }

    #[tokio::test]
    async fn test_undecodable_counter_update_keeps_monitoring() {
        let f = fixture(false);
        f.view.start().await.unwrap();

        f.ioc.post(&pv("ArrayCounter_RBV"), PvValue::Double(1.0));
        settle().await;
        assert!(f.surface.is_empty());
        assert!(f.view.monitoring_observable().get());

        post_frame(&f.ioc, 2, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        assert_eq!(f.surface.last().unwrap().counter, 2);
        assert!(f.view.monitoring_observable().get());
    }

    #[tokio::test]
    async fn test_dispose_drops_pending_renders() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        post_frame(&f.ioc, 1, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        settle().await;
        let shown = f.view.snapshot().unwrap();

        // The UI task cannot run the queued render before the next await.
        f.view.shared.publish(LiveUpdate {
            counter: 2,
            ..shown.clone()
        });
        f.view.dispose().await;
        f.view.shared.publish(LiveUpdate { counter: 3, ..shown });
        post_frame(&f.ioc, 4, &[1, 2, 3, 4]);
        settle().await;

        let counters: Vec<i64> = f.surface.updates().iter().map(|u| u.counter).collect();
        assert_eq!(counters, vec![1]);
    }

    #[tokio::test]
    async fn test_store_and_show_difference() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        f.view.set_show_option(ShowOption::IMinusA);
        post_frame(&f.ioc, 1, &[10, 20, 30, 40]);
        f.surface.wait_for(1).await;
        assert_eq!(
            f.surface.last().unwrap().frame.validity,
            Validity::Invalid(InvalidReason::AEmpty)
        );

        f.view.store_as(StoreKey::A).unwrap();
        f.surface.wait_for(2).await;

        post_frame(&f.ioc, 2, &[11, 22, 33, 44]);
        f.surface.wait_for(3).await;
        let update = f.surface.last().unwrap();
        assert!(update.frame.is_valid());
        assert_eq!(update.frame.name, "2 - A");
        assert_eq!(update.frame.grid, ndarray::array![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[tokio::test]
    async fn test_store_before_any_frame_fails() {
        let f = fixture(false);
        assert!(matches!(f.view.store_as(StoreKey::B), Err(GdaError::Processing(_))));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_monitoring() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        f.ioc.fail(&pv("ArrayData"));
        post_frame(&f.ioc, 1, &[1, 2, 3, 4]);
        settle().await;
        assert!(f.surface.is_empty());

        f.ioc.heal(&pv("ArrayData"));
        post_frame(&f.ioc, 2, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        assert_eq!(f.surface.last().unwrap().counter, 2);
    }

    #[tokio::test]
    async fn test_stop_and_dispose() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        f.view.stop().await.unwrap();
        assert_eq!(
            f.ioc.puts_to(&pv("EnableCallbacks")),
            vec![PvValue::Int(1), PvValue::Int(0)]
        );
        assert!(!f.view.monitoring_observable().get());

        post_frame(&f.ioc, 3, &[1, 2, 3, 4]);
        settle().await;
        assert!(f.surface.is_empty());

        f.view.dispose().await;
        assert!(f.view.is_disposed());
        assert!(f.view.start().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_without_roi() {
        let f = fixture(false);
        f.view.configure().await.unwrap();
        assert_eq!(f.ioc.puts_to(&pv("NDArrayPort")), vec![PvValue::Str("SIM.PROC".into())]);
        assert_eq!(f.ioc.puts_to(&pv("MinCallbackTime")), vec![PvValue::Double(0.2)]);
        assert_eq!(f.ioc.puts_to(&pv("EnableCallbacks")), vec![PvValue::Int(1)]);
        assert!(f.view.monitoring_observable().get());
    }

    #[tokio::test]
    async fn test_min_callback_time_is_validated_before_writing() {
        let f = fixture(false);
        let observable = f.view.min_callback_time_observable();
        assert_eq!(observable.get(), 0.2);

        assert!(matches!(
            f.view.set_min_callback_time(-1.0).await,
            Err(GdaError::Configuration(_))
        ));
        assert!(f.view.set_min_callback_time(f64::NAN).await.is_err());
        assert!(f.ioc.puts_to(&pv("MinCallbackTime")).is_empty());
        assert_eq!(observable.get(), 0.2);

        f.view.set_min_callback_time(0.5).await.unwrap();
        assert_eq!(observable.get(), 0.5);

        f.view.configure().await.unwrap();
        assert_eq!(
            f.ioc.puts_to(&pv("MinCallbackTime")),
            vec![PvValue::Double(0.5), PvValue::Double(0.5)]
        );
    }

    #[tokio::test]
    async fn test_configure_routes_through_roi_and_forwards_min_callback_time() {
        let f = fixture(true);
        f.view.configure().await.unwrap();

        assert_eq!(
            f.ioc.puts_to("SIM:ROI:NDArrayPort"),
            vec![PvValue::Str("SIM.PROC".into())]
        );
        assert_eq!(
            f.ioc.puts_to(&pv("NDArrayPort")),
            vec![PvValue::Str("SIM.PROC".into()), PvValue::Str("SIM.ROI".into())]
        );
        assert_eq!(f.ioc.puts_to("SIM:ROI:MinCallbackTime"), vec![PvValue::Double(0.2)]);

        f.view
            .controller()
            .image_plugin()
            .plugin_base()
            .set_min_callback_time(0.5)
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            f.ioc.puts_to("SIM:ROI:MinCallbackTime"),
            vec![PvValue::Double(0.2), PvValue::Double(0.5)]
        );
        assert_eq!(f.view.min_callback_time_observable().get(), 0.5);

        f.ioc.post(&pv("MinCallbackTime_RBV"), PvValue::Str("fast".into()));
        settle().await;
        f.view.set_min_callback_time(1.0).await.unwrap();
        settle().await;
        assert_eq!(
            f.ioc.puts_to("SIM:ROI:MinCallbackTime"),
            vec![PvValue::Double(0.2), PvValue::Double(0.5), PvValue::Double(1.0)]
        );
    }

    #[tokio::test]
    async fn test_save_and_restore_stores() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        post_frame(&f.ioc, 1, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        f.view.store_as(StoreKey::A).unwrap();
        f.view.store_as(StoreKey::B).unwrap();

        let path = f.view.save("beam").await.unwrap();
        assert!(path.ends_with("beam.json"));

        f.view.stores().write().clear();
        f.view.restore("beam").await;
        let stores = f.view.stores();
        let stores = stores.read();
        assert!(stores.get(StoreKey::A).is_some());
        assert_eq!(stores.a_minus_b().map(|d| d.sum()), Some(0.0));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_corrupt_saved_state_is_logged_and_ignored() {
        let f = fixture(false);
        f.view.start().await.unwrap();
        post_frame(&f.ioc, 1, &[1, 2, 3, 4]);
        f.surface.wait_for(1).await;
        f.view.store_as(StoreKey::A).unwrap();

        std::fs::write(f.dir.path().join("broken.json"), "{ not json").unwrap();
        f.view.restore("broken").await;

        assert!(f.view.stores().read().is_empty());
        assert!(logs_contain("Error reading saved state"));
    }

    #[tokio::test]
    async fn test_snapshot_png() {
        let f = fixture(false);
        assert!(f.view.save_snapshot(&f.dir.path().join("none.png")).is_err());

        f.view.start().await.unwrap();
        post_frame(&f.ioc, 1, &[0, 100, 200, 300]);
        f.surface.wait_for(1).await;
        settle().await;

        let path = f.dir.path().join("snap.png");
        f.view.save_snapshot(&path).unwrap();
        assert!(path.exists());
    }
}

//! `adviewer` command line
//!
//! Drives the viewer and collection strategies against the in-memory IOC:
//!
//! ```bash
//! # Ten live frames, storing A at frame 3 and showing I-A
//! adviewer live --service sim --frames 10 --store-a-at 3 --show I-A
//!
//! # One scan point through the configured collection chain
//! adviewer collect --service sim --time 0.2 --images 1
//!
//! # Inspect saved reference stores
//! adviewer restore --name beam-off
//! ```
//!
//! Without a configuration file a single `sim` controller on prefix `SIM:`
//! is used.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gda_epics::adviewer::{
    persist, AdController, ControllerConfig, ControllerRegistry, LiveSettings, LiveUpdate, LiveView,
    RecordingSurface, RenderSurface, ShowOption, StoreKey,
};
use gda_epics::areadetector::{AdBase, ImageMode, ScanInfo, SimDetector, TerminalSpec};
use gda_epics::gda_core::{PvName, PvValue, SimulatedIoc};
use gda_epics::{logging, ViewerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "adviewer")]
#[command(about = "EPICS area-detector live view and collection", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "adviewer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a simulated detector through the live view
    Live {
        /// Controller service name
        #[arg(long, default_value = "sim")]
        service: String,

        /// Renders to wait for before exiting
        #[arg(long, default_value_t = 10)]
        frames: usize,

        /// Selection to display: I, I-A, I/A, I-B, I/B, I-B/A-B, A or B
        #[arg(long, default_value = "I")]
        show: ShowOption,

        /// Store the current image as A after this many renders
        #[arg(long)]
        store_a_at: Option<usize>,

        /// Store the current image as B after this many renders
        #[arg(long)]
        store_b_at: Option<usize>,

        /// Save the reference stores under this name on exit
        #[arg(long)]
        save: Option<String>,

        /// Restore reference stores saved under this name before starting
        #[arg(long)]
        restore: Option<String>,

        /// Write the last displayed frame as PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Run one scan point through the configured collection chain
    Collect {
        /// Controller service name
        #[arg(long, default_value = "sim")]
        service: String,

        /// Collection time, seconds
        #[arg(long, default_value_t = 0.2)]
        time: f64,

        /// Images per point
        #[arg(long, default_value_t = 1)]
        images: i32,
    },

    /// Print the reference stores saved under a name
    Restore {
        /// Saved state name
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ViewerConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if config.controllers.is_empty() {
        config.controllers.push(demo_controller());
    }
    logging::init_from_config(&config).context("initialising logging")?;
    debug!(config = %cli.config.display(), controllers = config.controllers.len(), "configuration loaded");

    match cli.command {
        Commands::Live {
            service,
            frames,
            show,
            store_a_at,
            store_b_at,
            save,
            restore,
            snapshot,
        } => {
            let options = LiveOptions {
                frames,
                show,
                store_a_at,
                store_b_at,
                save,
                restore,
                snapshot,
            };
            run_live(&config, &service, options).await
        }
        Commands::Collect {
            service,
            time,
            images,
        } => run_collect(&config, &service, time, images).await,
        Commands::Restore { name } => print_saved(&config, &name),
    }
}

/// Controller used when the configuration lists none.
fn demo_controller() -> ControllerConfig {
    let mut controller = ControllerConfig::new("sim", "SIM:");
    controller.array_port_input = Some("SIM.CAM".into());
    controller.terminal = Some(TerminalSpec::SimpleAcquire { readout_time: 0.01 });
    controller
}

struct LiveOptions {
    frames: usize,
    show: ShowOption,
    store_a_at: Option<usize>,
    store_b_at: Option<usize>,
    save: Option<String>,
    restore: Option<String>,
    snapshot: Option<PathBuf>,
}

/// Logs each render and keeps them for the exit summary.
#[derive(Default)]
struct LoggingSurface {
    recorded: RecordingSurface,
}

impl RenderSurface for LoggingSurface {
    fn render(&self, update: &LiveUpdate) {
        info!(
            counter = update.counter,
            frame = %update.frame.name,
            valid = update.frame.is_valid(),
            min = update.range.min,
            max = update.range.max,
            "render"
        );
        self.recorded.render(update);
    }
}

/// In-memory IOC with a running simulated camera for `controller`.
async fn simulate(config: &ViewerConfig, ioc: &Arc<SimulatedIoc>, controller: &AdController) -> Result<SimDetector> {
    let entry = controller.config();
    if !entry.suffixes.roi.is_empty() {
        let roi = PvName::new(format!("{}{}", entry.pv_prefix, entry.suffixes.roi));
        ioc.seed(
            &roi.join("PortName_RBV"),
            PvValue::Str(format!("{}.ROI", controller.service_name().to_uppercase())),
        );
    }
    let detector = SimDetector::new(ioc.clone(), entry.cam_base(), entry.array_base(), config.simulation.clone());
    detector.start().await.context("starting simulated detector")?;
    Ok(detector)
}

async fn run_live(config: &ViewerConfig, service: &str, options: LiveOptions) -> Result<()> {
    if options.frames == 0 {
        bail!("--frames must be at least 1");
    }
    let ioc = SimulatedIoc::new().shared();
    let registry = ControllerRegistry::new(ioc.clone(), config.controllers.clone())?;
    let controller = registry.get_or_register(service)?;
    let detector = simulate(config, &ioc, &controller).await?;

    let surface = Arc::new(LoggingSurface::default());
    let settings = LiveSettings::for_controller(&controller, config.state_dir(), config.state_format);
    let view = LiveView::new(controller.clone(), surface.clone(), settings);
    if let Some(name) = &options.restore {
        view.restore(name).await;
    }
    view.set_show_option(options.show);
    view.configure().await.context("configuring live view")?;
    if controller.stats().is_some() {
        if let Err(e) = controller.start_stats().await {
            warn!(error = %e, "stats histogram not started");
        }
    }

    let ad_base = controller.ad_base();
    ad_base.set_image_mode_wait(ImageMode::Continuous).await?;
    ad_base.start_acquiring().await?;

    let mut marks: Vec<(usize, StoreKey)> = options
        .store_a_at
        .map(|n| (n, StoreKey::A))
        .into_iter()
        .chain(options.store_b_at.map(|n| (n, StoreKey::B)))
        .collect();
    marks.sort_by_key(|(n, _)| *n);
    for (at, key) in marks {
        surface.recorded.wait_for(at.clamp(1, options.frames)).await;
        view.store_as(key).with_context(|| format!("storing {key}"))?;
        info!(store = %key, after = at, "stored reference image");
    }
    surface.recorded.wait_for(options.frames).await;

    ad_base.stop_acquiring().await?;
    view.stop().await?;
    detector.shutdown();

    if let Some(path) = &options.snapshot {
        view.save_snapshot(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("snapshot: {}", path.display());
    }
    if let Some(name) = &options.save {
        match view.save(name).await {
            Some(path) => println!("saved stores: {}", path.display()),
            None => bail!("saving stores as '{name}' failed"),
        }
    }
    if let Some(last) = view.snapshot() {
        println!(
            "{} renders, {} frames emitted; last: {} [{}, {}]",
            surface.recorded.len(),
            detector.frames_emitted(),
            last.frame.name,
            last.range.min,
            last.range.max
        );
    }
    view.dispose().await;
    Ok(())
}

async fn run_collect(config: &ViewerConfig, service: &str, time: f64, images: i32) -> Result<()> {
    let ioc = SimulatedIoc::new().shared();
    let registry = ControllerRegistry::new(ioc.clone(), config.controllers.clone())?;
    let controller = registry.get_or_register(service)?;
    let detector = simulate(config, &ioc, &controller).await?;
    let chain = controller
        .collection_chain()
        .with_context(|| format!("building collection chain for '{service}'"))?;
    println!("chain: {}", chain.links().join(" -> "));

    ioc.clear_put_log();
    chain
        .collect_point(time, images, &ScanInfo::default())
        .await
        .context("collecting scan point")?;
    wait_idle(controller.ad_base(), Duration::from_secs_f64(time.max(0.0) * f64::from(images.max(1)) + 5.0)).await?;
    detector.shutdown();

    for put in ioc.put_log() {
        let kind = if put.wait { "put_wait" } else { "put" };
        println!("{kind:8} {} = {}", put.pv, put.value);
    }
    println!("{} frames emitted", detector.frames_emitted());
    Ok(())
}

async fn wait_idle(ad_base: &dyn AdBase, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, async {
        while ad_base.is_acquiring().await? {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok::<_, gda_epics::GdaError>(())
    })
    .await
    .context("detector still acquiring")??;
    Ok(())
}

fn print_saved(config: &ViewerConfig, name: &str) -> Result<()> {
    let dir = config.state_dir();
    let stores = persist::restore_blocking(&dir, name, config.state_format)
        .with_context(|| format!("reading '{name}' from {}", dir.display()))?;
    if stores.is_empty() {
        println!("no stores saved as '{name}' in {}", dir.display());
        return Ok(());
    }
    print_stores(&persist::state_path(&dir, name, config.state_format), &stores);
    Ok(())
}

fn print_stores(path: &Path, stores: &gda_epics::adviewer::ReferenceStores) {
    println!("{}", path.display());
    for (name, grid) in stores.named() {
        let (min, max) = grid
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        println!("  {name:4} {}x{}  min {min}  max {max}", grid.nrows(), grid.ncols());
    }
}

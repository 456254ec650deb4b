//! Building a strategy chain from configuration.
//!
//! ```toml
//! [terminal]
//! type = "software_start_stop"
//!
//! [[collection]]
//! type = "configure_acquire_time"
//! readout_time = 0.002
//!
//! [[collection]]
//! type = "trigger_mode"
//! trigger_mode = 0
//! ```
//!
//! Decorators are listed outermost first.

use gda_core::{GdaError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{
    CollectionStrategy, ConfigureAcquireTimeDecorator, ImageModeDecorator, ScanInfo, SimpleAcquire,
    SoftwareStartStop, StopBeforePrepareDecorator, TriggerModeDecorator,
    UnsynchronisedExternalShutterDecorator, DEFAULT_COLLECTION_EXTENSION_S,
};
use crate::adbase::{ImageMode, SharedAdBase};

fn default_readout_time() -> f64 {
    -1.0
}

fn default_collection_extension_s() -> f64 {
    DEFAULT_COLLECTION_EXTENSION_S
}

/// The strategy that ends a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalSpec {
    /// [`SoftwareStartStop`].
    SoftwareStartStop,
    /// [`SimpleAcquire`].
    SimpleAcquire {
        /// Readout time in seconds, negative for unknown.
        #[serde(default = "default_readout_time")]
        readout_time: f64,
    },
}

/// One decorator in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoratorSpec {
    /// [`ConfigureAcquireTimeDecorator`].
    ConfigureAcquireTime {
        /// Readout time in seconds, negative for unknown.
        #[serde(default = "default_readout_time")]
        readout_time: f64,
    },
    /// [`TriggerModeDecorator`].
    TriggerMode {
        /// Driver-specific trigger mode index.
        trigger_mode: u16,
    },
    /// [`ImageModeDecorator`].
    ImageMode {
        /// Image mode to set.
        image_mode: ImageMode,
    },
    /// [`UnsynchronisedExternalShutterDecorator`].
    UnsynchronisedExternalShutter {
        /// Extension added to every collection, seconds.
        #[serde(default = "default_collection_extension_s")]
        collection_extension_s: f64,
    },
    /// [`StopBeforePrepareDecorator`].
    StopBeforePrepare {
        /// Sleep after prepare, milliseconds.
        #[serde(default)]
        settle_ms: u64,
    },
}

/// An assembled chain of collection strategies.
pub struct CollectionChain {
    head: Box<dyn CollectionStrategy>,
    links: Vec<&'static str>,
}

impl std::fmt::Debug for CollectionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionChain")
            .field("links", &self.links)
            .finish()
    }
}

impl CollectionChain {
    /// Builds the chain once at configure time.
    ///
    /// `decorators` are listed outermost first. A missing terminal is a
    /// configuration error.
    pub fn build(
        ad_base: SharedAdBase,
        terminal: Option<&TerminalSpec>,
        decorators: &[DecoratorSpec],
    ) -> Result<Self> {
        let terminal = terminal.ok_or_else(|| {
            GdaError::NotConfigured("collection chain needs a terminal strategy".to_string())
        })?;

        let mut head: Box<dyn CollectionStrategy> = match terminal {
            TerminalSpec::SoftwareStartStop => Box::new(SoftwareStartStop::new(ad_base.clone())),
            TerminalSpec::SimpleAcquire { readout_time } => {
                Box::new(SimpleAcquire::new(ad_base.clone(), *readout_time))
            }
        };

        let mut links = vec![head.name()];
        for spec in decorators.iter().rev() {
            head = match spec {
                DecoratorSpec::ConfigureAcquireTime { readout_time } => Box::new(
                    ConfigureAcquireTimeDecorator::new(head, ad_base.clone(), *readout_time),
                ),
                DecoratorSpec::TriggerMode { trigger_mode } => {
                    Box::new(TriggerModeDecorator::new(head, ad_base.clone(), *trigger_mode))
                }
                DecoratorSpec::ImageMode { image_mode } => {
                    Box::new(ImageModeDecorator::new(head, ad_base.clone(), *image_mode))
                }
                DecoratorSpec::UnsynchronisedExternalShutter {
                    collection_extension_s,
                } => Box::new(UnsynchronisedExternalShutterDecorator::with_extension(
                    head,
                    *collection_extension_s,
                )),
                DecoratorSpec::StopBeforePrepare { settle_ms } => Box::new(
                    StopBeforePrepareDecorator::new(head, ad_base.clone(), Duration::from_millis(*settle_ms)),
                ),
            };
            links.push(head.name());
        }
        links.reverse();

        info!(links = ?links, "collection chain built");
        Ok(Self { head, links })
    }

    /// Outermost link.
    pub fn strategy(&self) -> &dyn CollectionStrategy {
        self.head.as_ref()
    }

    /// Link names, outermost first.
    pub fn links(&self) -> &[&'static str] {
        &self.links
    }

    /// Runs one scan point: prepare, collect, complete.
    ///
    /// On failure the chain's `at_command_failure` is called before the
    /// original error is returned.
    pub async fn collect_point(
        &self,
        collection_time: f64,
        num_images: i32,
        scan_info: &ScanInfo,
    ) -> Result<()> {
        let result = async {
            self.head
                .prepare_for_collection(collection_time, num_images, scan_info)
                .await?;
            self.head.collect_data().await?;
            self.head.complete_collection().await
        }
        .await;

        if let Err(e) = &result {
            tracing::warn!(error = %e, "collection failed");
            if let Err(cleanup) = self.head.at_command_failure().await {
                tracing::warn!(error = %cleanup, "at_command_failure failed");
            }
        }
        result
    }
}

//! Image array plugin (NDPluginStdArrays).
//!
//! Exposes the most recent detector array as a waveform record; the live
//! viewer reads it together with the dimension readbacks to build a
//! [`RawFrame`].

use gda_core::pv::{PvName, SharedClient};
use gda_core::{ArrayData, GdaError, RawFrame, Result};
use tracing::trace;

use crate::ndplugin::NdPluginBase;

/// Waveform record holding the array data.
pub const ARRAY_DATA: &str = "ArrayData";

/// NDPluginStdArrays wrapper.
#[derive(Debug, Clone)]
pub struct NdArrayPlugin {
    base: NdPluginBase,
}

impl NdArrayPlugin {
    /// Creates the wrapper over a plugin base such as `...:ARR:`.
    pub fn new(client: SharedClient, base: PvName) -> Result<Self> {
        Ok(Self {
            base: NdPluginBase::new(client, base)?,
        })
    }

    /// Wraps an already configured plugin base.
    pub fn from_base(base: NdPluginBase) -> Self {
        Self { base }
    }

    /// NDPluginBase records of this plugin.
    pub fn plugin_base(&self) -> &NdPluginBase {
        &self.base
    }

    /// Raw waveform contents.
    pub async fn array_data(&self) -> Result<ArrayData> {
        self.base.read(ARRAY_DATA).await
    }

    /// Reads the current image.
    ///
    /// The waveform may be longer than the image; only `width * height`
    /// elements are kept.
    pub async fn image_data(&self) -> Result<RawFrame> {
        let width = dimension(self.base.array_size0_rbv().await?, "ArraySize0_RBV")?;
        let height = dimension(self.base.array_size1_rbv().await?, "ArraySize1_RBV")?;
        let counter = self.base.array_counter_rbv().await?;
        let data = self.array_data().await?;

        let expected = width * height;
        if data.len() < expected {
            return Err(GdaError::Processing(format!(
                "array has {} elements, {}x{} image needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        trace!(base = %self.base.base(), width, height, counter, "image data");
        RawFrame::new(data.truncated(expected), width, height, counter)
    }
}

fn dimension(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| GdaError::Processing(format!("{what} is negative: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gda_core::{ElementType, PvValue, SimulatedIoc};

    const BASE: &str = "SIM:ARR:";

    #[tokio::test]
    async fn test_image_data_trims_waveform() {
        let ioc = SimulatedIoc::new().shared();
        ioc.seed(&format!("{BASE}ArraySize0_RBV"), PvValue::Int(3))
            .seed(&format!("{BASE}ArraySize1_RBV"), PvValue::Int(2))
            .seed(&format!("{BASE}ArrayCounter_RBV"), PvValue::Int(12))
            .seed(
                &format!("{BASE}ArrayData"),
                PvValue::Array(ArrayData::UInt16(vec![1, 2, 3, 4, 5, 6, 0, 0])),
            );

        let plugin = NdArrayPlugin::new(ioc.clone(), PvName::new(BASE)).unwrap();
        let frame = plugin.image_data().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.counter(), 12);
        assert_eq!(frame.element_type(), ElementType::UInt16);
        assert_eq!(frame.data().len(), 6);
    }

    #[tokio::test]
    async fn test_short_waveform_is_an_error() {
        let ioc = SimulatedIoc::new().shared();
        ioc.seed(&format!("{BASE}ArraySize0_RBV"), PvValue::Int(4))
            .seed(&format!("{BASE}ArraySize1_RBV"), PvValue::Int(4))
            .seed(&format!("{BASE}ArrayCounter_RBV"), PvValue::Int(1))
            .seed(&format!("{BASE}ArrayData"), PvValue::Array(ArrayData::UInt8(vec![0; 4])));

        let plugin = NdArrayPlugin::new(ioc.clone(), PvName::new(BASE)).unwrap();
        assert!(matches!(
            plugin.image_data().await.unwrap_err(),
            GdaError::Processing(_)
        ));
    }
}

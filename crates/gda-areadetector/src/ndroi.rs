//! Region-of-interest plugin (NDPluginROI).

use gda_core::pv::{PvName, SharedClient};
use gda_core::Result;
use serde::{Deserialize, Serialize};

use crate::ndplugin::NdPluginBase;

/// Output data type of the ROI plugin, by enum index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RoiDataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float64,
    Automatic,
}

impl RoiDataType {
    const ALL: [RoiDataType; 8] = [
        RoiDataType::Int8,
        RoiDataType::UInt8,
        RoiDataType::Int16,
        RoiDataType::UInt16,
        RoiDataType::Int32,
        RoiDataType::UInt32,
        RoiDataType::Float64,
        RoiDataType::Automatic,
    ];

    /// Enum index written to `DataTypeOut`.
    pub fn index(self) -> u16 {
        Self::ALL.iter().position(|t| *t == self).map_or(0, |i| i as u16)
    }

    /// Parses an enum index.
    pub fn from_index(index: u16) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// One ROI dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Columns.
    X,
    /// Rows.
    Y,
    /// Colour / third dimension.
    Z,
}

impl Dimension {
    fn letter(self) -> &'static str {
        match self {
            Dimension::X => "X",
            Dimension::Y => "Y",
            Dimension::Z => "Z",
        }
    }
}

/// Rectangular region in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// First column.
    pub min_x: i32,
    /// First row.
    pub min_y: i32,
    /// Number of columns.
    pub size_x: i32,
    /// Number of rows.
    pub size_y: i32,
}

/// NDPluginROI wrapper.
#[derive(Debug, Clone)]
pub struct NdRoi {
    base: NdPluginBase,
}

impl NdRoi {
    /// Creates the wrapper over a plugin base such as `...:ROI:`.
    pub fn new(client: SharedClient, base: PvName) -> Result<Self> {
        Ok(Self {
            base: NdPluginBase::new(client, base)?,
        })
    }

    /// NDPluginBase records of this plugin.
    pub fn plugin_base(&self) -> &NdPluginBase {
        &self.base
    }

    /// ROI name.
    pub async fn name(&self) -> Result<String> {
        self.base.read("Name").await
    }

    /// Sets the ROI name.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.base.write("Name", name.to_string()).await
    }

    /// Output data type.
    pub async fn data_type_out(&self) -> Result<Option<RoiDataType>> {
        Ok(RoiDataType::from_index(self.base.read("DataTypeOut").await?))
    }

    /// Sets the output data type.
    pub async fn set_data_type_out(&self, data_type: RoiDataType) -> Result<()> {
        self.base.write("DataTypeOut", data_type.index()).await
    }

    /// Scaling enabled readback.
    pub async fn enable_scale(&self) -> Result<bool> {
        self.base.read("EnableScale_RBV").await
    }

    /// Enables or disables scaling.
    pub async fn set_enable_scale(&self, enable: bool) -> Result<()> {
        self.base.write("EnableScale", enable).await
    }

    /// Scale divisor readback.
    pub async fn scale(&self) -> Result<i32> {
        self.base.read("Scale_RBV").await
    }

    /// Sets the scale divisor.
    pub async fn set_scale(&self, scale: i32) -> Result<()> {
        self.base.write("Scale", scale).await
    }

    /// Whether the ROI is applied along `dim`.
    pub async fn dimension_enabled(&self, dim: Dimension) -> Result<bool> {
        self.base.read(&format!("Enable{}_RBV", dim.letter())).await
    }

    /// Enables or disables the ROI along `dim`.
    pub async fn set_dimension_enabled(&self, dim: Dimension, enable: bool) -> Result<()> {
        self.base.write(&format!("Enable{}", dim.letter()), enable).await
    }

    /// Start of the ROI along `dim`.
    pub async fn min(&self, dim: Dimension) -> Result<i32> {
        self.base.read(&format!("Min{}_RBV", dim.letter())).await
    }

    /// Sets the start along `dim`.
    pub async fn set_min(&self, dim: Dimension, min: i32) -> Result<()> {
        self.base.write(&format!("Min{}", dim.letter()), min).await
    }

    /// Size of the ROI along `dim`.
    pub async fn size(&self, dim: Dimension) -> Result<i32> {
        self.base.read(&format!("Size{}_RBV", dim.letter())).await
    }

    /// Sets the size along `dim`.
    pub async fn set_size(&self, dim: Dimension, size: i32) -> Result<()> {
        self.base.write(&format!("Size{}", dim.letter()), size).await
    }

    /// Writes X/Y start and size.
    pub async fn set_region(&self, region: Region) -> Result<()> {
        self.set_min(Dimension::X, region.min_x).await?;
        self.set_min(Dimension::Y, region.min_y).await?;
        self.set_size(Dimension::X, region.size_x).await?;
        self.set_size(Dimension::Y, region.size_y).await
    }

    /// Reads back X/Y start and size.
    pub async fn region(&self) -> Result<Region> {
        Ok(Region {
            min_x: self.min(Dimension::X).await?,
            min_y: self.min(Dimension::Y).await?,
            size_x: self.size(Dimension::X).await?,
            size_y: self.size(Dimension::Y).await?,
        })
    }
}

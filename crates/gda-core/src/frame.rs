//! Detector frames.
//!
//! A [`RawFrame`] is one acquired image as delivered by an array plugin:
//! typed element data, dimensions and the plugin's array counter. Frames are
//! immutable once built; the viewer converts them to an `f64` grid for all
//! numeric work.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{GdaError, Result};

/// Element type of a frame's pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl ElementType {
    /// Maps the areaDetector `NDDataType_t` index (as read from
    /// `DataType_RBV`) to an element type.
    ///
    /// `NDUInt64` (7) has no lossless `f64` grid conversion and is rejected.
    pub fn from_nd_data_type(index: u16) -> Option<Self> {
        match index {
            0 => Some(ElementType::Int8),
            1 => Some(ElementType::UInt8),
            2 => Some(ElementType::Int16),
            3 => Some(ElementType::UInt16),
            4 => Some(ElementType::Int32),
            5 => Some(ElementType::UInt32),
            6 => Some(ElementType::Int64),
            8 => Some(ElementType::Float32),
            9 => Some(ElementType::Float64),
            _ => None,
        }
    }

    /// Inverse of [`ElementType::from_nd_data_type`].
    pub fn nd_data_type(self) -> u16 {
        match self {
            ElementType::Int8 => 0,
            ElementType::UInt8 => 1,
            ElementType::Int16 => 2,
            ElementType::UInt16 => 3,
            ElementType::Int32 => 4,
            ElementType::UInt32 => 5,
            ElementType::Int64 => 6,
            ElementType::Float32 => 8,
            ElementType::Float64 => 9,
        }
    }

    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Float64 => 8,
        }
    }
}

/// Typed waveform contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    /// `i8` elements.
    Int8(Vec<i8>),
    /// `u8` elements.
    UInt8(Vec<u8>),
    /// `i16` elements.
    Int16(Vec<i16>),
    /// `u16` elements.
    UInt16(Vec<u16>),
    /// `i32` elements.
    Int32(Vec<i32>),
    /// `u32` elements.
    UInt32(Vec<u32>),
    /// `i64` elements.
    Int64(Vec<i64>),
    /// `f32` elements.
    Float32(Vec<f32>),
    /// `f64` elements.
    Float64(Vec<f64>),
}

macro_rules! each_variant {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Int8($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
        }
    };
}

impl ArrayData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    /// True when there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of the contents.
    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayData::Int8(_) => ElementType::Int8,
            ArrayData::UInt8(_) => ElementType::UInt8,
            ArrayData::Int16(_) => ElementType::Int16,
            ArrayData::UInt16(_) => ElementType::UInt16,
            ArrayData::Int32(_) => ElementType::Int32,
            ArrayData::UInt32(_) => ElementType::UInt32,
            ArrayData::Int64(_) => ElementType::Int64,
            ArrayData::Float32(_) => ElementType::Float32,
            ArrayData::Float64(_) => ElementType::Float64,
        }
    }

    /// Widens every element to `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        each_variant!(self, v => v.iter().map(|&x| x as f64).collect())
    }

    /// Builds typed data from `f64` samples, saturating into the target type.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(element_type: ElementType, values: &[f64]) -> Self {
        match element_type {
            ElementType::Int8 => ArrayData::Int8(values.iter().map(|&x| x as i8).collect()),
            ElementType::UInt8 => ArrayData::UInt8(values.iter().map(|&x| x as u8).collect()),
            ElementType::Int16 => ArrayData::Int16(values.iter().map(|&x| x as i16).collect()),
            ElementType::UInt16 => ArrayData::UInt16(values.iter().map(|&x| x as u16).collect()),
            ElementType::Int32 => ArrayData::Int32(values.iter().map(|&x| x as i32).collect()),
            ElementType::UInt32 => ArrayData::UInt32(values.iter().map(|&x| x as u32).collect()),
            ElementType::Int64 => ArrayData::Int64(values.iter().map(|&x| x as i64).collect()),
            ElementType::Float32 => ArrayData::Float32(values.iter().map(|&x| x as f32).collect()),
            ElementType::Float64 => ArrayData::Float64(values.to_vec()),
        }
    }

    /// Keeps only the first `len` elements.
    ///
    /// Waveform records are sized for the largest image; the meaningful
    /// part is given by the array dimensions.
    pub fn truncated(mut self, len: usize) -> Self {
        each_variant!(&mut self, v => v.truncate(len));
        self
    }
}

/// A single acquired image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    data: ArrayData,
    width: usize,
    height: usize,
    counter: i64,
}

impl RawFrame {
    /// Builds a frame, checking that the element count matches the
    /// dimensions.
    pub fn new(data: ArrayData, width: usize, height: usize, counter: i64) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| GdaError::Processing(format!("frame {width}x{height} overflows")))?;
        if data.len() != expected {
            return Err(GdaError::Processing(format!(
                "frame {}x{} needs {} elements, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            counter,
        })
    }

    /// Pixel data.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Array counter of the plugin that produced this frame.
    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Element type of the pixel data.
    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Converts to a row-major `f64` grid of shape `(height, width)`.
    pub fn to_grid(&self) -> Result<Array2<f64>> {
        Array2::from_shape_vec((self.height, self.width), self.data.to_f64_vec())
            .map_err(|e| GdaError::Processing(format!("cannot shape frame: {e}")))
    }

    /// Minimum and maximum over finite values, `None` for an empty or
    /// all-NaN frame.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.data
            .to_f64_vec()
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_nd_data_type_mapping() {
        assert_eq!(ElementType::from_nd_data_type(3), Some(ElementType::UInt16));
        assert_eq!(ElementType::from_nd_data_type(9), Some(ElementType::Float64));
        assert_eq!(ElementType::from_nd_data_type(7), None);
        for t in [ElementType::Int8, ElementType::UInt32, ElementType::Float32] {
            assert_eq!(ElementType::from_nd_data_type(t.nd_data_type()), Some(t));
        }
    }

    #[test]
    fn test_frame_rejects_wrong_length() {
        let err = RawFrame::new(ArrayData::UInt8(vec![0; 5]), 2, 3, 1).unwrap_err();
        assert!(matches!(err, GdaError::Processing(_)));
    }

    #[test]
    fn test_grid_is_rows_by_columns() {
        let frame = RawFrame::new(ArrayData::UInt16(vec![1, 2, 3, 4, 5, 6]), 3, 2, 7).unwrap();
        let grid = frame.to_grid().unwrap();
        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[1, 0]], 4.0);
        assert_eq!(frame.counter(), 7);
        assert_eq!(frame.element_type(), ElementType::UInt16);
    }

    #[test]
    fn test_min_max_skips_nan() {
        let frame =
            RawFrame::new(ArrayData::Float64(vec![f64::NAN, -2.0, 8.5, 1.0]), 2, 2, 0).unwrap();
        assert_eq!(frame.min_max(), Some((-2.0, 8.5)));
    }

    #[test]
    fn test_from_f64_saturates() {
        let data = ArrayData::from_f64(ElementType::UInt8, &[-4.0, 12.7, 300.0]);
        assert_eq!(data, ArrayData::UInt8(vec![0, 12, 255]));
    }

    #[test]
    fn test_truncated() {
        let data = ArrayData::Int32(vec![1, 2, 3, 4]).truncated(2);
        assert_eq!(data, ArrayData::Int32(vec![1, 2]));
    }
}

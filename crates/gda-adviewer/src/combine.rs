//! Frame combination.
//!
//! Builds the frame to display from the live frame and the reference
//! stores, according to the operator's [`ShowOption`]. A missing or
//! differently shaped store is not an error: the result is a 2x2 zero
//! placeholder marked [`Validity::Invalid`] with the reason.

use gda_core::GdaError;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stores::{ReferenceStores, StoreKey};

/// What to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShowOption {
    /// The live image.
    #[default]
    I,
    /// Image minus store A.
    IMinusA,
    /// Image over store A.
    IOverA,
    /// Image minus store B.
    IMinusB,
    /// Image over store B.
    IOverB,
    /// `(I - B) / (A - B)`.
    INormalised,
    /// Store A on its own.
    A,
    /// Store B on its own.
    B,
}

impl ShowOption {
    /// Every option, in menu order.
    pub const ALL: [ShowOption; 8] = [
        ShowOption::I,
        ShowOption::IMinusA,
        ShowOption::IOverA,
        ShowOption::IMinusB,
        ShowOption::IOverB,
        ShowOption::INormalised,
        ShowOption::A,
        ShowOption::B,
    ];

    /// Menu label.
    pub fn label(self) -> &'static str {
        match self {
            ShowOption::I => "I",
            ShowOption::IMinusA => "I-A",
            ShowOption::IOverA => "I/A",
            ShowOption::IMinusB => "I-B",
            ShowOption::IOverB => "I/B",
            ShowOption::INormalised => "I-B/A-B",
            ShowOption::A => "A",
            ShowOption::B => "B",
        }
    }
}

impl fmt::Display for ShowOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ShowOption {
    type Err = GdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.label() == s)
            .ok_or_else(|| GdaError::Configuration(format!("unknown show option '{s}'")))
    }
}

/// Why a selection could not be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Store A was never captured.
    AEmpty,
    /// Store B was never captured.
    BEmpty,
    /// Store A has a different shape.
    AMismatch,
    /// Store B has a different shape.
    BMismatch,
    /// Normalisation inputs missing or mismatched.
    AOrBMismatch,
}

impl InvalidReason {
    /// Operator-facing explanation.
    pub fn explanation(self) -> &'static str {
        match self {
            InvalidReason::AEmpty => "A is empty",
            InvalidReason::BEmpty => "B is empty",
            InvalidReason::AMismatch => "A does not match current image",
            InvalidReason::BMismatch => "B does not match current image",
            InvalidReason::AOrBMismatch => "A or B does not match current image",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.explanation())
    }
}

/// Whether a [`DisplayFrame`] holds real data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Combined data.
    Valid,
    /// Placeholder.
    Invalid(InvalidReason),
}

/// A frame ready for ranging and rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    /// Title, e.g. `12 - A` or `Invalid selection:A is empty`.
    pub name: String,
    /// Pixel values, rows by columns.
    pub grid: Array2<f64>,
    /// Real data or placeholder.
    pub validity: Validity,
}

impl DisplayFrame {
    /// A valid frame.
    pub fn valid(name: impl Into<String>, grid: Array2<f64>) -> Self {
        Self {
            name: name.into(),
            grid,
            validity: Validity::Valid,
        }
    }

    /// The 2x2 zero placeholder for `reason`.
    pub fn placeholder(reason: InvalidReason) -> Self {
        Self {
            name: format!("Invalid selection:{reason}"),
            grid: Array2::zeros((2, 2)),
            validity: Validity::Invalid(reason),
        }
    }

    /// True for real data.
    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }
}

/// Element-wise division, 0 where the divisor is 0.
pub fn divide_or_zero(numerator: &Array2<f64>, denominator: &Array2<f64>) -> Array2<f64> {
    Zip::from(numerator)
        .and(denominator)
        .map_collect(|&n, &d| if d == 0.0 { 0.0 } else { n / d })
}

fn against_store(
    raw: &Array2<f64>,
    raw_name: &str,
    stores: &ReferenceStores,
    key: StoreKey,
    over: bool,
) -> DisplayFrame {
    let (empty, mismatch) = match key {
        StoreKey::A => (InvalidReason::AEmpty, InvalidReason::AMismatch),
        StoreKey::B => (InvalidReason::BEmpty, InvalidReason::BMismatch),
    };
    match stores.get(key) {
        None => DisplayFrame::placeholder(empty),
        Some(store) if store.dim() != raw.dim() => DisplayFrame::placeholder(mismatch),
        Some(store) if over => DisplayFrame::valid(format!("{raw_name} / {key}"), raw / store),
        Some(store) => DisplayFrame::valid(format!("{raw_name} - {key}"), raw - store),
    }
}

fn show_store(stores: &ReferenceStores, key: StoreKey) -> DisplayFrame {
    match stores.get(key) {
        Some(store) => DisplayFrame::valid(key.name(), store.clone()),
        None => DisplayFrame::placeholder(match key {
            StoreKey::A => InvalidReason::AEmpty,
            StoreKey::B => InvalidReason::BEmpty,
        }),
    }
}

/// Combines the live frame with the stores. Never mutates the stores.
pub fn combine(
    raw: &Array2<f64>,
    raw_name: &str,
    option: ShowOption,
    stores: &ReferenceStores,
) -> DisplayFrame {
    match option {
        ShowOption::I => DisplayFrame::valid(raw_name, raw.clone()),
        ShowOption::IMinusA => against_store(raw, raw_name, stores, StoreKey::A, false),
        ShowOption::IOverA => against_store(raw, raw_name, stores, StoreKey::A, true),
        ShowOption::IMinusB => against_store(raw, raw_name, stores, StoreKey::B, false),
        ShowOption::IOverB => against_store(raw, raw_name, stores, StoreKey::B, true),
        ShowOption::A => show_store(stores, StoreKey::A),
        ShowOption::B => show_store(stores, StoreKey::B),
        ShowOption::INormalised => match (stores.get(StoreKey::B), stores.a_minus_b()) {
            (Some(b), Some(a_minus_b)) if b.dim() == raw.dim() => DisplayFrame::valid(
                format!("({raw_name}-B)/(A-B)"),
                divide_or_zero(&(raw - b), a_minus_b),
            ),
            _ => DisplayFrame::placeholder(InvalidReason::AOrBMismatch),
        },
    }
}

//! Reference stores.
//!
//! Operators capture the current frame as store "A" or "B" for later
//! arithmetic against live frames. The derived store "A-B" is rebuilt on
//! every store action: present only while both inputs exist with the same
//! shape.

use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of the derived store.
pub const DERIVED_STORE: &str = "A-B";

/// An operator-writable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    /// Store "A".
    A,
    /// Store "B".
    B,
}

impl StoreKey {
    /// Store name as shown to the operator and used in state files.
    pub fn name(self) -> &'static str {
        match self {
            StoreKey::A => "A",
            StoreKey::B => "B",
        }
    }

    /// Parses a store name; the derived store is not a key.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "A" => Some(StoreKey::A),
            "B" => Some(StoreKey::B),
            _ => None,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stores A, B and the derived A-B.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceStores {
    a: Option<Array2<f64>>,
    b: Option<Array2<f64>>,
    a_minus_b: Option<Array2<f64>>,
}

impl ReferenceStores {
    /// Empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps into the shared handle used by views and background jobs.
    pub fn shared(self) -> SharedStores {
        Arc::new(RwLock::new(self))
    }

    /// Replaces a store and rebuilds A-B.
    pub fn store(&mut self, key: StoreKey, grid: Array2<f64>) {
        debug!(store = %key, shape = ?grid.dim(), "store");
        match key {
            StoreKey::A => self.a = Some(grid),
            StoreKey::B => self.b = Some(grid),
        }
        self.a_minus_b = match (&self.a, &self.b) {
            (Some(a), Some(b)) if a.dim() == b.dim() => Some(a - b),
            _ => None,
        };
    }

    /// Contents of a store.
    pub fn get(&self, key: StoreKey) -> Option<&Array2<f64>> {
        match key {
            StoreKey::A => self.a.as_ref(),
            StoreKey::B => self.b.as_ref(),
        }
    }

    /// The derived store.
    pub fn a_minus_b(&self) -> Option<&Array2<f64>> {
        self.a_minus_b.as_ref()
    }

    /// Every present store by name, inputs first.
    pub fn named(&self) -> Vec<(&'static str, &Array2<f64>)> {
        [
            (StoreKey::A.name(), self.a.as_ref()),
            (StoreKey::B.name(), self.b.as_ref()),
            (DERIVED_STORE, self.a_minus_b.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, grid)| grid.map(|g| (name, g)))
        .collect()
    }

    /// Drops every store.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.a.is_none() && self.b.is_none()
    }
}

/// Stores shared between the UI side (store/restore actions) and the
/// background update job.
pub type SharedStores = Arc<RwLock<ReferenceStores>>;

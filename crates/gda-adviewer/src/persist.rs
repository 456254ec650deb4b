//! Persisted reference stores.
//!
//! Stores survive restarts as one file per saved state, `<dir>/<name>.hdf`
//! (HDF5, `storage_hdf5` feature) or `<dir>/<name>.json`. Both formats
//! share the same logical layout:
//!
//! ```text
//! /entry                 NX_class = NXentry, saved_at
//!   /stores              NX_class = NXdata
//!     A                  2-D f64, NX_class = SDS
//!     B
//!     A-B
//! ```
//!
//! JSON has no NaN or infinity, so those samples are written as the strings
//! `"NaN"`, `"Infinity"` and `"-Infinity"`; `null` samples read back as NaN.
//!
//! The derived store is written for the benefit of external readers but is
//! never restored; restoring re-stores A and B so A-B is rebuilt.
//!
//! File I/O runs on the blocking pool via `spawn_blocking`.

use chrono::{DateTime, Utc};
use gda_core::{GdaError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::stores::{ReferenceStores, StoreKey, DERIVED_STORE};

/// On-disk format of saved stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFormat {
    /// JSON, always available.
    #[default]
    Json,
    /// NeXus-style HDF5.
    Hdf5,
}

impl StateFormat {
    /// File extension for the format.
    pub fn extension(self) -> &'static str {
        match self {
            StateFormat::Json => "json",
            StateFormat::Hdf5 => "hdf",
        }
    }
}

/// Path of the state file `name` under `dir`.
pub fn state_path(dir: &Path, name: &str, format: StateFormat) -> PathBuf {
    dir.join(format!("{name}.{}", format.extension()))
}

/// Per-user default directory for saved state.
pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gda")
        .join("adviewer")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum JsonSample {
    Number(f64),
    Text(String),
    Null,
}

impl JsonSample {
    fn encode(value: f64) -> Self {
        if value.is_nan() {
            JsonSample::Text("NaN".into())
        } else if value.is_infinite() {
            let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
            JsonSample::Text(text.into())
        } else {
            JsonSample::Number(value)
        }
    }

    fn decode(self, store: &str) -> Result<f64> {
        match self {
            JsonSample::Number(value) => Ok(value),
            JsonSample::Null => Ok(f64::NAN),
            JsonSample::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                _ => Err(GdaError::Storage(format!(
                    "store '{store}' holds '{text}' where a number was expected"
                ))),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredGrid {
    shape: [usize; 2],
    data: Vec<JsonSample>,
}

impl StoredGrid {
    fn from_grid(grid: &Array2<f64>) -> Self {
        let (rows, cols) = grid.dim();
        Self {
            shape: [rows, cols],
            data: grid.iter().copied().map(JsonSample::encode).collect(),
        }
    }

    fn into_grid(self, name: &str) -> Result<Array2<f64>> {
        let data = self
            .data
            .into_iter()
            .map(|sample| sample.decode(name))
            .collect::<Result<Vec<_>>>()?;
        Array2::from_shape_vec((self.shape[0], self.shape[1]), data)
            .map_err(|e| GdaError::Storage(format!("store '{name}' is malformed: {e}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonEntry {
    saved_at: DateTime<Utc>,
    stores: BTreeMap<String, StoredGrid>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonState {
    entry: JsonEntry,
}

fn rebuild(named: Vec<(String, Array2<f64>)>) -> ReferenceStores {
    let mut stores = ReferenceStores::new();
    for (name, grid) in named {
        if name == DERIVED_STORE {
            continue;
        }
        match StoreKey::from_name(&name) {
            Some(key) => stores.store(key, grid),
            None => warn!(store = %name, "ignoring unknown store in saved state"),
        }
    }
    stores
}

fn save_json(stores: &ReferenceStores, path: &Path) -> Result<()> {
    let state = JsonState {
        entry: JsonEntry {
            saved_at: Utc::now(),
            stores: stores
                .named()
                .into_iter()
                .map(|(name, grid)| (name.to_string(), StoredGrid::from_grid(grid)))
                .collect(),
        },
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), &state)?;
    Ok(())
}

fn restore_json(path: &Path) -> Result<ReferenceStores> {
    let file = std::fs::File::open(path)?;
    let state: JsonState = serde_json::from_reader(std::io::BufReader::new(file))?;
    debug!(saved_at = %state.entry.saved_at, "restoring JSON state");
    let named = state
        .entry
        .stores
        .into_iter()
        .map(|(name, stored)| stored.into_grid(&name).map(|grid| (name, grid)))
        .collect::<Result<Vec<_>>>()?;
    Ok(rebuild(named))
}

#[cfg(feature = "storage_hdf5")]
mod nexus {
    use super::*;
    use hdf5::types::VarLenUnicode;

    fn storage(err: hdf5::Error) -> GdaError {
        GdaError::Storage(err.to_string())
    }

    fn write_string_attr(location: &hdf5::Location, name: &str, value: &str) -> Result<()> {
        let value = value
            .parse::<VarLenUnicode>()
            .map_err(|e| GdaError::Storage(format!("attribute '{name}': {e}")))?;
        location
            .new_attr::<VarLenUnicode>()
            .create(name)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(storage)
    }

    pub(super) fn save(stores: &ReferenceStores, path: &Path) -> Result<()> {
        let file = hdf5::File::create(path).map_err(storage)?;
        let entry = file.create_group("entry").map_err(storage)?;
        write_string_attr(&entry, "NX_class", "NXentry")?;
        write_string_attr(&entry, "saved_at", &Utc::now().to_rfc3339())?;

        let group = entry.create_group("stores").map_err(storage)?;
        write_string_attr(&group, "NX_class", "NXdata")?;

        for (name, grid) in stores.named() {
            let standard = grid.as_standard_layout();
            let raw = standard
                .as_slice()
                .ok_or_else(|| GdaError::Storage(format!("store '{name}' is not contiguous")))?;
            let dataset = group
                .new_dataset::<f64>()
                .shape((grid.nrows(), grid.ncols()))
                .create(name)
                .map_err(storage)?;
            dataset.write_raw(raw).map_err(storage)?;
            write_string_attr(&dataset, "NX_class", "SDS")?;
        }
        Ok(())
    }

    pub(super) fn restore(path: &Path) -> Result<ReferenceStores> {
        let file = hdf5::File::open(path).map_err(storage)?;
        let group = file.group("entry/stores").map_err(storage)?;
        let mut named = Vec::new();
        for name in group.member_names().map_err(storage)? {
            let dataset = group.dataset(&name).map_err(storage)?;
            let shape = dataset.shape();
            let [rows, cols] = shape.as_slice() else {
                warn!(store = %name, ?shape, "skipping store that is not 2-D");
                continue;
            };
            let data = dataset.read_raw::<f64>().map_err(storage)?;
            let grid = Array2::from_shape_vec((*rows, *cols), data)
                .map_err(|e| GdaError::Storage(format!("store '{name}' is malformed: {e}")))?;
            named.push((name, grid));
        }
        Ok(rebuild(named))
    }
}

/// Writes `stores` to `<dir>/<name>.<ext>`, creating `dir` if needed.
pub fn save_blocking(
    stores: &ReferenceStores,
    dir: &Path,
    name: &str,
    format: StateFormat,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = state_path(dir, name, format);
    match format {
        StateFormat::Json => save_json(stores, &path)?,
        #[cfg(feature = "storage_hdf5")]
        StateFormat::Hdf5 => nexus::save(stores, &path)?,
        #[cfg(not(feature = "storage_hdf5"))]
        StateFormat::Hdf5 => return Err(GdaError::FeatureNotEnabled("storage_hdf5".to_string())),
    }
    info!(path = %path.display(), "saved reference stores");
    Ok(path)
}

/// Reads `<dir>/<name>.<ext>`. A missing file yields empty stores.
pub fn restore_blocking(dir: &Path, name: &str, format: StateFormat) -> Result<ReferenceStores> {
    let path = state_path(dir, name, format);
    if !path.exists() {
        debug!(path = %path.display(), "no saved state");
        return Ok(ReferenceStores::new());
    }
    let stores = match format {
        StateFormat::Json => restore_json(&path)?,
        #[cfg(feature = "storage_hdf5")]
        StateFormat::Hdf5 => nexus::restore(&path)?,
        #[cfg(not(feature = "storage_hdf5"))]
        StateFormat::Hdf5 => return Err(GdaError::FeatureNotEnabled("storage_hdf5".to_string())),
    };
    info!(path = %path.display(), "restored reference stores");
    Ok(stores)
}

fn join_error(err: tokio::task::JoinError) -> GdaError {
    GdaError::Storage(format!("state file task failed: {err}"))
}

/// Async [`save_blocking`] on the blocking pool.
pub async fn save(
    stores: ReferenceStores,
    dir: PathBuf,
    name: String,
    format: StateFormat,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || save_blocking(&stores, &dir, &name, format))
        .await
        .map_err(join_error)?
}

/// Async [`restore_blocking`] on the blocking pool.
pub async fn restore(dir: PathBuf, name: String, format: StateFormat) -> Result<ReferenceStores> {
    tokio::task::spawn_blocking(move || restore_blocking(&dir, &name, format))
        .await
        .map_err(join_error)?
}

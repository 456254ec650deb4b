//! Control-system client seam and typed process variables.
//!
//! The wire protocol belongs to an external client library. Everything in
//! this workspace talks to it through [`ControlClient`]; [`crate::sim`]
//! provides an in-memory implementation for tests and demos.
//!
//! Device wrappers hold [`Pv<T>`] handles built from a base name plus a
//! field suffix:
//!
//! ```rust,ignore
//! let base = PvName::new("BL13I-EA-DET-01:ARR:");
//! let counter: Pv<i64> = Pv::new(client.clone(), base.join("ArrayCounter_RBV"));
//! let mut monitor = counter.monitor().await?;
//! let next = monitor.changed().await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{GdaError, Result};
use crate::frame::ArrayData;

/// A value carried by a process variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PvValue {
    /// Integer record (longout, longin, mbbo raw value).
    Int(i64),
    /// Floating point record (ao, ai).
    Double(f64),
    /// String record.
    Str(String),
    /// Enumerated record, by index.
    Enum(u16),
    /// Waveform record.
    Array(ArrayData),
}

impl PvValue {
    /// Short type name used in mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            PvValue::Int(_) => "int",
            PvValue::Double(_) => "double",
            PvValue::Str(_) => "string",
            PvValue::Enum(_) => "enum",
            PvValue::Array(_) => "array",
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(v) => write!(f, "{v}"),
            PvValue::Double(v) => write!(f, "{v}"),
            PvValue::Str(v) => write!(f, "\"{v}\""),
            PvValue::Enum(v) => write!(f, "enum({v})"),
            PvValue::Array(v) => write!(f, "array[{}]", v.len()),
        }
    }
}

/// Get/put/monitor access to named records over the control system.
#[async_trait]
pub trait ControlClient: Send + Sync {
    /// Reads the current value of `pv`.
    async fn get(&self, pv: &str) -> Result<PvValue>;

    /// Writes `value` without waiting for record processing to finish.
    async fn put(&self, pv: &str, value: PvValue) -> Result<()>;

    /// Writes `value` and waits for the completion callback.
    async fn put_wait(&self, pv: &str, value: PvValue) -> Result<()>;

    /// Subscribes to value changes of `pv`.
    async fn monitor(&self, pv: &str) -> Result<watch::Receiver<PvValue>>;

    /// Subscribes to the connection state of the channel for `pv`.
    async fn connection(&self, pv: &str) -> Result<watch::Receiver<bool>>;
}

/// Shared handle to a control-system client.
pub type SharedClient = Arc<dyn ControlClient>;

/// Conversion between Rust types and [`PvValue`].
pub trait PvType: Sized + Send + Sync + 'static {
    /// Name used in [`GdaError::TypeMismatch`].
    const TYPE_NAME: &'static str;

    /// Extracts a typed value, `None` if the record holds something else.
    fn from_pv(value: &PvValue) -> Option<Self>;

    /// Wraps a typed value for a put.
    fn into_pv(self) -> PvValue;
}

impl PvType for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_pv(value: &PvValue) -> Option<Self> {
        match value {
            PvValue::Int(v) => Some(*v),
            PvValue::Enum(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    fn into_pv(self) -> PvValue {
        PvValue::Int(self)
    }
}

impl PvType for i32 {
    const TYPE_NAME: &'static str = "int";

    fn from_pv(value: &PvValue) -> Option<Self> {
        i64::from_pv(value).and_then(|v| i32::try_from(v).ok())
    }

    fn into_pv(self) -> PvValue {
        PvValue::Int(i64::from(self))
    }
}

impl PvType for f64 {
    const TYPE_NAME: &'static str = "double";

    #[allow(clippy::cast_precision_loss)]
    fn from_pv(value: &PvValue) -> Option<Self> {
        match value {
            PvValue::Double(v) => Some(*v),
            PvValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn into_pv(self) -> PvValue {
        PvValue::Double(self)
    }
}

impl PvType for bool {
    const TYPE_NAME: &'static str = "int";

    fn from_pv(value: &PvValue) -> Option<Self> {
        i64::from_pv(value).map(|v| v != 0)
    }

    fn into_pv(self) -> PvValue {
        PvValue::Int(i64::from(self))
    }
}

impl PvType for u16 {
    const TYPE_NAME: &'static str = "enum";

    fn from_pv(value: &PvValue) -> Option<Self> {
        match value {
            PvValue::Enum(v) => Some(*v),
            PvValue::Int(v) => u16::try_from(*v).ok(),
            _ => None,
        }
    }

    fn into_pv(self) -> PvValue {
        PvValue::Enum(self)
    }
}

impl PvType for String {
    const TYPE_NAME: &'static str = "string";

    fn from_pv(value: &PvValue) -> Option<Self> {
        match value {
            PvValue::Str(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn into_pv(self) -> PvValue {
        PvValue::Str(self)
    }
}

impl PvType for ArrayData {
    const TYPE_NAME: &'static str = "array";

    fn from_pv(value: &PvValue) -> Option<Self> {
        match value {
            PvValue::Array(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn into_pv(self) -> PvValue {
        PvValue::Array(self)
    }
}

fn decode<T: PvType>(pv: &str, value: &PvValue) -> Result<T> {
    T::from_pv(value).ok_or_else(|| GdaError::TypeMismatch {
        pv: pv.to_string(),
        expected: T::TYPE_NAME,
        found: value.type_name(),
    })
}

/// Base name of a device or plugin, e.g. `BL13I-EA-DET-01:ARR:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PvName(String);

impl PvName {
    /// Wraps a base name.
    pub fn new(base: impl Into<String>) -> Self {
        Self(base.into())
    }

    /// Full record name for `suffix`.
    pub fn join(&self, suffix: &str) -> String {
        format!("{}{}", self.0, suffix)
    }

    /// Child base, e.g. device prefix + `ROI:`.
    pub fn child(&self, suffix: &str) -> PvName {
        PvName(self.join(suffix))
    }

    /// The base name itself.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for an unset base.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed handle to one record.
pub struct Pv<T> {
    client: SharedClient,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Pv<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Pv<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pv").field("name", &self.name).finish()
    }
}

impl<T: PvType> Pv<T> {
    /// Creates a handle; no channel is opened until first use.
    pub fn new(client: SharedClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Full record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the current value.
    pub async fn get(&self) -> Result<T> {
        let value = self.client.get(&self.name).await?;
        decode(&self.name, &value)
    }

    /// Writes without waiting for completion.
    pub async fn put(&self, value: T) -> Result<()> {
        self.client.put(&self.name, value.into_pv()).await
    }

    /// Writes and waits for the record to finish processing.
    pub async fn put_wait(&self, value: T) -> Result<()> {
        self.client.put_wait(&self.name, value.into_pv()).await
    }

    /// Subscribes to changes of this record.
    pub async fn monitor(&self) -> Result<PvMonitor<T>> {
        let rx = self.client.monitor(&self.name).await?;
        Ok(PvMonitor {
            name: self.name.clone(),
            rx,
            _marker: PhantomData,
        })
    }

    /// Subscribes to the channel's connection state.
    pub async fn connection(&self) -> Result<watch::Receiver<bool>> {
        self.client.connection(&self.name).await
    }
}

/// Push-style observable of one record.
///
/// Dropping the monitor ends the subscription.
pub struct PvMonitor<T> {
    name: String,
    rx: watch::Receiver<PvValue>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for PvMonitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PvMonitor").field("name", &self.name).finish()
    }
}

impl<T: PvType> PvMonitor<T> {
    /// Waits for the next update and returns it.
    pub async fn changed(&mut self) -> Result<T> {
        self.rx
            .changed()
            .await
            .map_err(|_| GdaError::control(&self.name, "monitor closed"))?;
        let value = self.rx.borrow_and_update().clone();
        decode(&self.name, &value)
    }

    /// Last value received.
    pub fn current(&self) -> Result<T> {
        let value = self.rx.borrow().clone();
        decode(&self.name, &value)
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

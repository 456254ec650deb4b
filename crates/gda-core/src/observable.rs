//! Observable values
//!
//! View-local state (show option, auto-scale flag, monitoring status,
//! minimum callback time) that
//! widgets and background tasks both need to watch. Backed by
//! `tokio::sync::watch`, so any number of subscribers see the latest value
//! without polling and a slow subscriber never blocks the writer.
//!
//! ```rust,ignore
//! let auto_scale = Observable::new("auto_scale", true)
//!     .with_description("Fast colour map");
//!
//! let mut rx = auto_scale.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         tracing::debug!(value = *rx.borrow(), "auto scale changed");
//!     }
//! });
//!
//! auto_scale.set(false)?;
//! ```

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{GdaError, Result};

type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

struct SharedState<T> {
    name: String,
    description: Option<String>,
    read_only: bool,
    validator: Option<Validator<T>>,
}

/// A thread-safe, observable value with change notifications.
///
/// Clones share the same watch channel, name and validation.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<SharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("name", &shared.name)
            .field("description", &shared.description)
            .field("read_only", &shared.read_only)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(SharedState {
                name: name.into(),
                description: None,
                read_only: false,
                validator: None,
            })),
        }
    }

    /// Add a description to this observable.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().description = Some(description.into());
        self
    }

    /// Mark this observable as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().read_only = true;
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the name.
    pub fn name(&self) -> String {
        self.shared.read().name.clone()
    }

    /// Get the description, if one was given.
    pub fn description(&self) -> Option<String> {
        self.shared.read().description.clone()
    }

    /// Validate a value without setting it.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.read_only {
            return Err(GdaError::Configuration(format!("'{}' is read-only", guard.name)));
        }
        if let Some(validator) = &guard.validator {
            validator(value)?;
        }
        Ok(())
    }

    /// Set a new value, notifying all subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Set without validation; used by owners updating read-only state.
    pub fn set_unchecked(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Set the value only when it differs from the current one.
    ///
    /// Returns `true` when subscribers were notified.
    pub fn set_if_changed(&self, value: T) -> Result<bool> {
        self.validate(&value)?;
        Ok(self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        }))
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialOrd + Debug + 'static,
{
    /// Add min/max range validation. Values that do not compare with the
    /// bounds (NaN) are rejected.
    pub fn with_range(self, min: T, max: T) -> Self {
        self.shared.write().validator = Some(Arc::new(move |value: &T| {
            let above_min = matches!(value.partial_cmp(&min), Some(Ordering::Greater | Ordering::Equal));
            let below_max = matches!(value.partial_cmp(&max), Some(Ordering::Less | Ordering::Equal));
            if !(above_min && below_max) {
                Err(GdaError::Configuration(format!(
                    "Value {:?} out of range [{:?}, {:?}]",
                    value, min, max
                )))
            } else {
                Ok(())
            }
        }));
        self
    }
}

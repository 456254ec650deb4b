//! Error types shared by every GDA EPICS crate.
//!
//! `GdaError` follows the taxonomy used throughout the detector and viewer
//! layers:
//!
//! - **Control-system failures** (`ControlSystem`, `Timeout`, `TypeMismatch`):
//!   channel creation, get and put problems. These are logged at the accessor
//!   that failed and re-thrown to the scan / operator layer.
//! - **Configuration errors** (`NotConfigured`, `Configuration`, `Config`):
//!   raised at configure time so a component never reaches a configured state
//!   with a missing PV base or required part.
//! - **Processing errors** (`Processing`): numeric pipeline failures. The live
//!   view logs and swallows these so one bad frame does not stop monitoring.
//! - **Storage errors** (`Storage`, `Io`, `Serialization`, `FeatureNotEnabled`):
//!   persisted reference-store state.
//!
//! Shape mismatches in frame combination are deliberately *not* errors; see
//! the viewer's combine module.

use thiserror::Error;

/// Convenience alias for results using [`GdaError`].
pub type Result<T> = std::result::Result<T, GdaError>;

/// Primary error type for the GDA EPICS crates.
#[derive(Error, Debug)]
pub enum GdaError {
    /// A control-system operation on a PV failed.
    ///
    /// Covers channel creation, get and put failures reported by the
    /// control-system client. Not retried; surfaced to the caller.
    #[error("Control system error on '{pv}': {message}")]
    ControlSystem {
        /// Full PV name.
        pv: String,
        /// Client-provided failure description.
        message: String,
    },

    /// A get or put did not complete in time.
    #[error("Timeout waiting for '{pv}'")]
    Timeout {
        /// Full PV name.
        pv: String,
    },

    /// A PV delivered a value of a different type than requested.
    #[error("PV '{pv}' holds {found}, expected {expected}")]
    TypeMismatch {
        /// Full PV name.
        pv: String,
        /// Requested type.
        expected: &'static str,
        /// Type actually held by the record.
        found: &'static str,
    },

    /// A required part of a component was never configured.
    ///
    /// **Recovery Strategy**: fix the configuration; the component must not be
    /// used until configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Device-level failure surfaced to the scan layer.
    #[error("Device error: {0}")]
    Device(String),

    /// Failure while processing frame data.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// Persisted state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required feature not enabled at compile time.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl GdaError {
    /// Builds a [`GdaError::ControlSystem`] for `pv`.
    pub fn control(pv: impl Into<String>, message: impl Into<String>) -> Self {
        GdaError::ControlSystem {
            pv: pv.into(),
            message: message.into(),
        }
    }

    /// True for the control-system family of errors (taxonomy a).
    pub fn is_control_system(&self) -> bool {
        matches!(
            self,
            GdaError::ControlSystem { .. } | GdaError::Timeout { .. } | GdaError::TypeMismatch { .. }
        )
    }
}

impl From<figment::Error> for GdaError {
    fn from(err: figment::Error) -> Self {
        GdaError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GdaError::control("BL13I-EA-DET-01:ARR:ArrayCounter_RBV", "channel not found");
        assert_eq!(
            err.to_string(),
            "Control system error on 'BL13I-EA-DET-01:ARR:ArrayCounter_RBV': channel not found"
        );
    }

    #[test]
    fn test_control_system_family() {
        assert!(GdaError::Timeout { pv: "X".into() }.is_control_system());
        assert!(GdaError::control("X", "boom").is_control_system());
        assert!(!GdaError::NotConfigured("basePVName".into()).is_control_system());
        assert!(!GdaError::Processing("nan".into()).is_control_system());
    }

    #[test]
    fn test_feature_not_enabled_message() {
        let err = GdaError::FeatureNotEnabled("storage_hdf5".into());
        assert!(err.to_string().contains("--features storage_hdf5"));
    }
}

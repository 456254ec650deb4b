//! NDPluginBase wrapper.
//!
//! Every areaDetector plugin (array, ROI, stats, file writers) shares the
//! NDPluginBase records. [`NdPluginBase`] exposes them as typed accessors
//! over a base PV name such as `BL13I-EA-DET-01:ARR:`.
//!
//! Failed accessors log at `warn` with the accessor name and return the
//! error unchanged; recovery is left to the caller.

use gda_core::pv::{Pv, PvMonitor, PvName, PvType, SharedClient};
use gda_core::{GdaError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

/// NDPluginBase record suffixes.
pub mod suffix {
    #![allow(missing_docs)]
    pub const PORT_NAME_RBV: &str = "PortName_RBV";
    pub const PLUGIN_TYPE_RBV: &str = "PluginType_RBV";
    pub const ND_ARRAY_PORT: &str = "NDArrayPort";
    pub const ND_ARRAY_PORT_RBV: &str = "NDArrayPort_RBV";
    pub const ND_ARRAY_ADDRESS: &str = "NDArrayAddress";
    pub const ND_ARRAY_ADDRESS_RBV: &str = "NDArrayAddress_RBV";
    pub const ENABLE_CALLBACKS: &str = "EnableCallbacks";
    pub const ENABLE_CALLBACKS_RBV: &str = "EnableCallbacks_RBV";
    pub const MIN_CALLBACK_TIME: &str = "MinCallbackTime";
    pub const MIN_CALLBACK_TIME_RBV: &str = "MinCallbackTime_RBV";
    pub const BLOCKING_CALLBACKS: &str = "BlockingCallbacks";
    pub const BLOCKING_CALLBACKS_RBV: &str = "BlockingCallbacks_RBV";
    pub const ARRAY_COUNTER: &str = "ArrayCounter";
    pub const ARRAY_COUNTER_RBV: &str = "ArrayCounter_RBV";
    pub const ARRAY_RATE_RBV: &str = "ArrayRate_RBV";
    pub const DROPPED_ARRAYS: &str = "DroppedArrays";
    pub const DROPPED_ARRAYS_RBV: &str = "DroppedArrays_RBV";
    pub const N_DIMENSIONS_RBV: &str = "NDimensions_RBV";
    pub const ARRAY_SIZE0_RBV: &str = "ArraySize0_RBV";
    pub const ARRAY_SIZE1_RBV: &str = "ArraySize1_RBV";
    pub const ARRAY_SIZE2_RBV: &str = "ArraySize2_RBV";
    pub const DATA_TYPE_RBV: &str = "DataType_RBV";
    pub const COLOR_MODE_RBV: &str = "ColorMode_RBV";
    pub const UNIQUE_ID_RBV: &str = "UniqueId_RBV";
    pub const TIME_STAMP_RBV: &str = "TimeStamp_RBV";
    pub const ND_ATTRIBUTES_FILE: &str = "NDAttributesFile";
}

/// Values re-applied by [`NdPluginBase::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInitialValues {
    /// Upstream port the plugin reads from.
    pub array_port: Option<String>,
    /// Upstream address.
    pub array_address: Option<i32>,
    /// Blocking callbacks on/off.
    pub blocking_callbacks: Option<bool>,
    /// Callbacks enabled on reset.
    pub enable_callbacks: Option<bool>,
}

/// Typed access to the NDPluginBase records of one plugin.
#[derive(Clone)]
pub struct NdPluginBase {
    client: SharedClient,
    base: PvName,
    initial: PluginInitialValues,
}

impl std::fmt::Debug for NdPluginBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdPluginBase")
            .field("base", &self.base)
            .field("initial", &self.initial)
            .finish()
    }
}

impl NdPluginBase {
    /// Creates the wrapper; an empty base name is a configuration error.
    pub fn new(client: SharedClient, base: PvName) -> Result<Self> {
        if base.is_empty() {
            return Err(GdaError::NotConfigured(
                "'basePVName' needs to be declared".to_string(),
            ));
        }
        Ok(Self {
            client,
            base,
            initial: PluginInitialValues::default(),
        })
    }

    /// Sets the values applied by [`NdPluginBase::reset`].
    pub fn with_initial_values(mut self, initial: PluginInitialValues) -> Self {
        self.initial = initial;
        self
    }

    /// Base PV name.
    pub fn base(&self) -> &PvName {
        &self.base
    }

    /// Shared control-system client.
    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    /// Values applied on reset.
    pub fn initial_values(&self) -> &PluginInitialValues {
        &self.initial
    }

    /// Typed handle for a record under this plugin's base.
    pub fn pv<T: PvType>(&self, suffix: &str) -> Pv<T> {
        Pv::new(self.client.clone(), self.base.join(suffix))
    }

    pub(crate) async fn read<T: PvType>(&self, suffix: &str) -> Result<T> {
        let pv = self.pv::<T>(suffix);
        pv.get().await.map_err(|e| {
            warn!(pv = pv.name(), error = %e, "Cannot get{}", suffix);
            e
        })
    }

    pub(crate) async fn write<T: PvType>(&self, suffix: &str, value: T) -> Result<()> {
        let pv = self.pv::<T>(suffix);
        pv.put(value).await.map_err(|e| {
            warn!(pv = pv.name(), error = %e, "Cannot set{}", suffix);
            e
        })
    }

    pub(crate) async fn write_wait<T: PvType>(&self, suffix: &str, value: T) -> Result<()> {
        let pv = self.pv::<T>(suffix);
        pv.put_wait(value).await.map_err(|e| {
            warn!(pv = pv.name(), error = %e, "Cannot set{}", suffix);
            e
        })
    }

    /// Asyn port name of the plugin.
    pub async fn port_name_rbv(&self) -> Result<String> {
        self.read(suffix::PORT_NAME_RBV).await
    }

    /// Plugin type string, e.g. `NDPluginROI`.
    pub async fn plugin_type_rbv(&self) -> Result<String> {
        self.read(suffix::PLUGIN_TYPE_RBV).await
    }

    /// Upstream port setpoint.
    pub async fn nd_array_port(&self) -> Result<String> {
        self.read(suffix::ND_ARRAY_PORT).await
    }

    /// Routes the plugin to read arrays from `port`.
    pub async fn set_nd_array_port(&self, port: &str) -> Result<()> {
        self.write(suffix::ND_ARRAY_PORT, port.to_string()).await
    }

    /// Upstream port readback.
    pub async fn nd_array_port_rbv(&self) -> Result<String> {
        self.read(suffix::ND_ARRAY_PORT_RBV).await
    }

    /// Upstream address setpoint.
    pub async fn nd_array_address(&self) -> Result<i32> {
        self.read(suffix::ND_ARRAY_ADDRESS).await
    }

    /// Sets the upstream address.
    pub async fn set_nd_array_address(&self, address: i32) -> Result<()> {
        self.write(suffix::ND_ARRAY_ADDRESS, address).await
    }

    /// Upstream address readback.
    pub async fn nd_array_address_rbv(&self) -> Result<i32> {
        self.read(suffix::ND_ARRAY_ADDRESS_RBV).await
    }

    /// Callback enable setpoint.
    pub async fn is_callback_enabled(&self) -> Result<bool> {
        self.read(suffix::ENABLE_CALLBACKS).await
    }

    /// Enables callbacks and waits for completion.
    pub async fn enable_callbacks(&self) -> Result<()> {
        debug!(base = %self.base, "enable callbacks");
        self.write_wait(suffix::ENABLE_CALLBACKS, true).await
    }

    /// Disables callbacks and waits for completion.
    pub async fn disable_callbacks(&self) -> Result<()> {
        debug!(base = %self.base, "disable callbacks");
        self.write_wait(suffix::ENABLE_CALLBACKS, false).await
    }

    /// Callback enable readback.
    pub async fn is_callbacks_enabled_rbv(&self) -> Result<bool> {
        self.read(suffix::ENABLE_CALLBACKS_RBV).await
    }

    /// Minimum time between callbacks, in seconds.
    pub async fn min_callback_time(&self) -> Result<f64> {
        self.read(suffix::MIN_CALLBACK_TIME).await
    }

    /// Sets the minimum time between callbacks, in seconds.
    pub async fn set_min_callback_time(&self, seconds: f64) -> Result<()> {
        self.write(suffix::MIN_CALLBACK_TIME, seconds).await
    }

    /// Minimum callback time readback.
    pub async fn min_callback_time_rbv(&self) -> Result<f64> {
        self.read(suffix::MIN_CALLBACK_TIME_RBV).await
    }

    /// Blocking callbacks setpoint.
    pub async fn blocking_callbacks(&self) -> Result<bool> {
        self.read(suffix::BLOCKING_CALLBACKS).await
    }

    /// Sets blocking callbacks.
    pub async fn set_blocking_callbacks(&self, blocking: bool) -> Result<()> {
        self.write(suffix::BLOCKING_CALLBACKS, blocking).await
    }

    /// Blocking callbacks readback.
    pub async fn blocking_callbacks_rbv(&self) -> Result<bool> {
        self.read(suffix::BLOCKING_CALLBACKS_RBV).await
    }

    /// Array counter setpoint.
    pub async fn array_counter(&self) -> Result<i64> {
        self.read(suffix::ARRAY_COUNTER).await
    }

    /// Sets the array counter.
    pub async fn set_array_counter(&self, counter: i64) -> Result<()> {
        self.write(suffix::ARRAY_COUNTER, counter).await
    }

    /// Number of arrays processed.
    pub async fn array_counter_rbv(&self) -> Result<i64> {
        self.read(suffix::ARRAY_COUNTER_RBV).await
    }

    /// Arrays per second.
    pub async fn array_rate_rbv(&self) -> Result<f64> {
        self.read(suffix::ARRAY_RATE_RBV).await
    }

    /// Dropped arrays setpoint.
    pub async fn dropped_arrays(&self) -> Result<i64> {
        self.read(suffix::DROPPED_ARRAYS).await
    }

    /// Sets (usually clears) the dropped arrays count.
    pub async fn set_dropped_arrays(&self, dropped: i64) -> Result<()> {
        self.write(suffix::DROPPED_ARRAYS, dropped).await
    }

    /// Dropped arrays readback.
    pub async fn dropped_arrays_rbv(&self) -> Result<i64> {
        self.read(suffix::DROPPED_ARRAYS_RBV).await
    }

    /// Number of dimensions of the last array.
    pub async fn n_dimensions_rbv(&self) -> Result<i32> {
        self.read(suffix::N_DIMENSIONS_RBV).await
    }

    /// Size of dimension 0 (width).
    pub async fn array_size0_rbv(&self) -> Result<i32> {
        self.read(suffix::ARRAY_SIZE0_RBV).await
    }

    /// Size of dimension 1 (height).
    pub async fn array_size1_rbv(&self) -> Result<i32> {
        self.read(suffix::ARRAY_SIZE1_RBV).await
    }

    /// Size of dimension 2.
    pub async fn array_size2_rbv(&self) -> Result<i32> {
        self.read(suffix::ARRAY_SIZE2_RBV).await
    }

    /// `NDDataType_t` index of the last array.
    pub async fn data_type_rbv(&self) -> Result<u16> {
        self.read(suffix::DATA_TYPE_RBV).await
    }

    /// `NDColorMode_t` index of the last array.
    pub async fn color_mode_rbv(&self) -> Result<u16> {
        self.read(suffix::COLOR_MODE_RBV).await
    }

    /// Unique id of the last array.
    pub async fn unique_id_rbv(&self) -> Result<i64> {
        self.read(suffix::UNIQUE_ID_RBV).await
    }

    /// Timestamp of the last array.
    pub async fn time_stamp_rbv(&self) -> Result<f64> {
        self.read(suffix::TIME_STAMP_RBV).await
    }

    /// Attributes XML file.
    pub async fn nd_attributes_file(&self) -> Result<String> {
        self.read(suffix::ND_ATTRIBUTES_FILE).await
    }

    /// Sets the attributes XML file.
    pub async fn set_nd_attributes_file(&self, path: &str) -> Result<()> {
        self.write(suffix::ND_ATTRIBUTES_FILE, path.to_string()).await
    }

    /// Re-applies the configured initial values.
    pub async fn reset(&self) -> Result<()> {
        if let Some(address) = self.initial.array_address {
            self.set_nd_array_address(address).await?;
        }
        if let Some(port) = &self.initial.array_port {
            self.set_nd_array_port(port).await?;
        }
        if let Some(blocking) = self.initial.blocking_callbacks {
            self.set_blocking_callbacks(blocking).await?;
        }
        match self.initial.enable_callbacks {
            Some(true) => self.enable_callbacks().await?,
            Some(false) => self.disable_callbacks().await?,
            None => {}
        }
        Ok(())
    }

    /// Observable of the array counter readback.
    pub async fn array_counter_monitor(&self) -> Result<PvMonitor<i64>> {
        self.pv::<i64>(suffix::ARRAY_COUNTER_RBV).monitor().await
    }

    /// Connection state of the array counter channel.
    pub async fn connection_state_monitor(&self) -> Result<watch::Receiver<bool>> {
        self.pv::<i64>(suffix::ARRAY_COUNTER_RBV).connection().await
    }

    /// Observable of the callback enable readback.
    pub async fn enable_monitor(&self) -> Result<PvMonitor<bool>> {
        self.pv::<bool>(suffix::ENABLE_CALLBACKS_RBV).monitor().await
    }

    /// Observable of the minimum callback time readback.
    pub async fn min_callback_time_monitor(&self) -> Result<PvMonitor<f64>> {
        self.pv::<f64>(suffix::MIN_CALLBACK_TIME_RBV).monitor().await
    }

    /// Observable of the dropped arrays readback.
    pub async fn dropped_frames_monitor(&self) -> Result<PvMonitor<i64>> {
        self.pv::<i64>(suffix::DROPPED_ARRAYS_RBV).monitor().await
    }

    /// Fails when the plugin reports dropped arrays.
    pub async fn check_dropped_frames(&self) -> Result<()> {
        let dropped = self.dropped_arrays_rbv().await?;
        if dropped > 0 {
            return Err(GdaError::Device(format!("NDPlugin dropped frames : {dropped}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gda_core::{PvValue, SimulatedIoc};
    use std::sync::Arc;

    const BASE: &str = "BL13I-EA-DET-01:ARR:";

    fn plugin(ioc: &Arc<SimulatedIoc>) -> NdPluginBase {
        NdPluginBase::new(ioc.clone(), PvName::new(BASE)).unwrap()
    }

    #[test]
    fn test_empty_base_fails_fast() {
        let ioc = SimulatedIoc::new().shared();
        let err = NdPluginBase::new(ioc, PvName::new("")).unwrap_err();
        assert_eq!(err.to_string(), "Not configured: 'basePVName' needs to be declared");
    }

    #[tokio::test]
    async fn test_enable_callbacks_waits() {
        let ioc = SimulatedIoc::new().shared();
        let plugin = plugin(&ioc);
        plugin.enable_callbacks().await.unwrap();

        let log = ioc.put_log();
        assert_eq!(log[0].pv, format!("{BASE}EnableCallbacks"));
        assert_eq!(log[0].value, PvValue::Int(1));
        assert!(log[0].wait);
        assert!(plugin.is_callbacks_enabled_rbv().await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_applies_initial_values_in_order() {
        let ioc = SimulatedIoc::new().shared();
        let plugin = plugin(&ioc).with_initial_values(PluginInitialValues {
            array_port: Some("ADSIM.CAM".into()),
            array_address: Some(0),
            blocking_callbacks: Some(false),
            enable_callbacks: Some(true),
        });
        plugin.reset().await.unwrap();

        let names: Vec<_> = ioc.put_log().into_iter().map(|p| p.pv).collect();
        assert_eq!(
            names,
            vec![
                format!("{BASE}NDArrayAddress"),
                format!("{BASE}NDArrayPort"),
                format!("{BASE}BlockingCallbacks"),
                format!("{BASE}EnableCallbacks"),
            ]
        );
        assert_eq!(plugin.nd_array_port_rbv().await.unwrap(), "ADSIM.CAM");
    }

    #[tokio::test]
    async fn test_failed_get_is_propagated() {
        let ioc = SimulatedIoc::new().shared();
        ioc.fail(&format!("{BASE}PortName_RBV"));
        let err = plugin(&ioc).port_name_rbv().await.unwrap_err();
        assert!(err.is_control_system());
    }

    #[tokio::test]
    async fn test_check_dropped_frames() {
        let ioc = SimulatedIoc::new().shared();
        let plugin = plugin(&ioc);
        ioc.post(&format!("{BASE}DroppedArrays_RBV"), PvValue::Int(0));
        assert!(plugin.check_dropped_frames().await.is_ok());

        ioc.post(&format!("{BASE}DroppedArrays_RBV"), PvValue::Int(3));
        let err = plugin.check_dropped_frames().await.unwrap_err();
        assert_eq!(err.to_string(), "Device error: NDPlugin dropped frames : 3");
    }

    #[tokio::test]
    async fn test_array_counter_monitor() {
        let ioc = SimulatedIoc::new().shared();
        let plugin = plugin(&ioc);
        let mut counter = plugin.array_counter_monitor().await.unwrap();

        ioc.post(&format!("{BASE}ArrayCounter_RBV"), PvValue::Int(41));
        assert_eq!(counter.changed().await.unwrap(), 41);
    }
}

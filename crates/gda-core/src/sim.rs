//! In-memory control-system client.
//!
//! `SimulatedIoc` behaves like a set of IOC records: values survive between
//! calls, monitors are notified on every write and a put to `X` updates
//! `X_RBV`. Every client put is appended to an ordered log so tests can
//! check the exact sequence of hardware writes a component made.
//!
//! Failure injection ([`SimulatedIoc::fail`]) makes every operation on a
//! record return [`GdaError::ControlSystem`], like a channel that cannot be
//! created.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{GdaError, Result};
use crate::pv::{ControlClient, PvValue};

/// One client write, as recorded in the put log.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecord {
    /// Full record name.
    pub pv: String,
    /// Value written.
    pub value: PvValue,
    /// True for a put with completion callback.
    pub wait: bool,
}

struct Record {
    value: watch::Sender<PvValue>,
    connected: watch::Sender<bool>,
    written: bool,
}

impl Record {
    fn new(initial: PvValue, written: bool) -> Self {
        let (value, _) = watch::channel(initial);
        let (connected, _) = watch::channel(true);
        Self {
            value,
            connected,
            written,
        }
    }
}

#[derive(Default)]
struct IocState {
    records: HashMap<String, Record>,
    put_log: Vec<PutRecord>,
    failing: HashSet<String>,
}

impl IocState {
    fn check(&self, pv: &str) -> Result<()> {
        if self.failing.contains(pv) {
            return Err(GdaError::control(pv, "channel access failure"));
        }
        Ok(())
    }

    fn write(&mut self, pv: &str, value: PvValue) {
        match self.records.get_mut(pv) {
            Some(record) => {
                record.written = true;
                record.value.send_replace(value);
            }
            None => {
                self.records.insert(pv.to_string(), Record::new(value, true));
            }
        }
    }

    fn record_mut(&mut self, pv: &str) -> &mut Record {
        self.records
            .entry(pv.to_string())
            .or_insert_with(|| Record::new(PvValue::Int(0), false))
    }
}

/// Simulated IOC implementing [`ControlClient`].
pub struct SimulatedIoc {
    state: Mutex<IocState>,
    auto_readback: bool,
}

impl std::fmt::Debug for SimulatedIoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedIoc")
            .field("records", &state.records.len())
            .field("puts", &state.put_log.len())
            .field("auto_readback", &self.auto_readback)
            .finish()
    }
}

impl Default for SimulatedIoc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedIoc {
    /// Creates an empty IOC with `_RBV` auto-readback enabled.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IocState::default()),
            auto_readback: true,
        }
    }

    /// Only mirror puts into `_RBV` records that already exist.
    pub fn without_auto_readback(mut self) -> Self {
        self.auto_readback = false;
        self
    }

    /// Wraps into a shared handle.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Sets a record value from the IOC side, without logging a put.
    pub fn seed(&self, pv: &str, value: PvValue) -> &Self {
        self.post(pv, value);
        self
    }

    /// IOC-side record update; notifies monitors but is not a client put.
    pub fn post(&self, pv: &str, value: PvValue) {
        trace!(pv, %value, "post");
        self.state.lock().write(pv, value);
    }

    /// Current value of a record, if it was ever written.
    pub fn value(&self, pv: &str) -> Option<PvValue> {
        let state = self.state.lock();
        state
            .records
            .get(pv)
            .filter(|r| r.written)
            .map(|r| r.value.borrow().clone())
    }

    /// Ordered log of client puts.
    pub fn put_log(&self) -> Vec<PutRecord> {
        self.state.lock().put_log.clone()
    }

    /// Values put to one record, in order.
    pub fn puts_to(&self, pv: &str) -> Vec<PvValue> {
        self.state
            .lock()
            .put_log
            .iter()
            .filter(|p| p.pv == pv)
            .map(|p| p.value.clone())
            .collect()
    }

    /// Empties the put log.
    pub fn clear_put_log(&self) {
        self.state.lock().put_log.clear();
    }

    /// Makes every operation on `pv` fail.
    pub fn fail(&self, pv: &str) {
        self.state.lock().failing.insert(pv.to_string());
    }

    /// Clears an injected failure.
    pub fn heal(&self, pv: &str) {
        self.state.lock().failing.remove(pv);
    }

    /// Flips the connection state of `pv` to disconnected.
    pub fn disconnect(&self, pv: &str) {
        self.state.lock().record_mut(pv).connected.send_replace(false);
    }

    /// Flips the connection state of `pv` back to connected.
    pub fn reconnect(&self, pv: &str) {
        self.state.lock().record_mut(pv).connected.send_replace(true);
    }

    fn do_put(&self, pv: &str, value: PvValue, wait: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.check(pv)?;
        trace!(pv, %value, wait, "put");
        state.put_log.push(PutRecord {
            pv: pv.to_string(),
            value: value.clone(),
            wait,
        });
        if !pv.ends_with("_RBV") {
            let rbv = format!("{pv}_RBV");
            if self.auto_readback || state.records.contains_key(&rbv) {
                state.write(&rbv, value.clone());
            }
        }
        state.write(pv, value);
        Ok(())
    }
}

#[async_trait]
impl ControlClient for SimulatedIoc {
    async fn get(&self, pv: &str) -> Result<PvValue> {
        let state = self.state.lock();
        state.check(pv)?;
        match state.records.get(pv) {
            Some(record) if record.written => Ok(record.value.borrow().clone()),
            _ => Err(GdaError::control(pv, "no such record")),
        }
    }

    async fn put(&self, pv: &str, value: PvValue) -> Result<()> {
        self.do_put(pv, value, false)
    }

    async fn put_wait(&self, pv: &str, value: PvValue) -> Result<()> {
        self.do_put(pv, value, true)
    }

    async fn monitor(&self, pv: &str) -> Result<watch::Receiver<PvValue>> {
        let mut state = self.state.lock();
        state.check(pv)?;
        Ok(state.record_mut(pv).value.subscribe())
    }

    async fn connection(&self, pv: &str) -> Result<watch::Receiver<bool>> {
        let mut state = self.state.lock();
        state.check(pv)?;
        Ok(state.record_mut(pv).connected.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pv::Pv;

    #[tokio::test]
    async fn test_get_unwritten_record_fails() {
        let ioc = SimulatedIoc::new();
        assert!(ioc.get("X:Missing").await.unwrap_err().is_control_system());
    }

    #[tokio::test]
    async fn test_put_updates_readback_and_log() {
        let ioc = SimulatedIoc::new();
        ioc.put("CAM:AcquireTime", PvValue::Double(0.5)).await.unwrap();
        ioc.put_wait("CAM:ImageMode", PvValue::Enum(0)).await.unwrap();

        assert_eq!(ioc.get("CAM:AcquireTime_RBV").await.unwrap(), PvValue::Double(0.5));
        let log = ioc.put_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].pv, "CAM:AcquireTime");
        assert!(!log[0].wait);
        assert!(log[1].wait);
    }

    #[tokio::test]
    async fn test_readback_only_when_existing() {
        let ioc = SimulatedIoc::new().without_auto_readback();
        ioc.put("A:X", PvValue::Int(1)).await.unwrap();
        assert!(ioc.value("A:X_RBV").is_none());

        ioc.seed("A:Y_RBV", PvValue::Int(0));
        ioc.put("A:Y", PvValue::Int(4)).await.unwrap();
        assert_eq!(ioc.value("A:Y_RBV"), Some(PvValue::Int(4)));
    }

    #[tokio::test]
    async fn test_monitor_sees_posts() {
        let ioc = SimulatedIoc::new().shared();
        let pv: Pv<i64> = Pv::new(ioc.clone(), "ARR:ArrayCounter_RBV");
        let mut monitor = pv.monitor().await.unwrap();

        ioc.post("ARR:ArrayCounter_RBV", PvValue::Int(3));
        assert_eq!(monitor.changed().await.unwrap(), 3);
        assert_eq!(monitor.current().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fail_and_heal() {
        let ioc = SimulatedIoc::new();
        ioc.fail("CAM:Acquire");
        assert!(ioc.put("CAM:Acquire", PvValue::Int(1)).await.is_err());
        assert!(ioc.put_log().is_empty());

        ioc.heal("CAM:Acquire");
        assert!(ioc.put("CAM:Acquire", PvValue::Int(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let ioc = SimulatedIoc::new();
        let mut rx = ioc.connection("ARR:ArrayCounter_RBV").await.unwrap();
        assert!(*rx.borrow());
        ioc.disconnect("ARR:ArrayCounter_RBV");
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}

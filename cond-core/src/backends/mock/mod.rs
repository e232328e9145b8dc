//! Scripted in-memory driver. Backs the integration tests and the
//! daemon's mock build; no hardware interaction.
//!
//! Scan, associate and WPS consume scripted outcomes in order, falling
//! back to a default when the script runs dry. A `None` outcome means
//! the driver never completes, which exercises the core's watchdogs.

use crate::ops::{AssocDone, OpOutcome, ScanDone, WpsDone};
use crate::scan::ScanResult;
use crate::traits::{ApParams, AssocTarget, PlatformDriver, WpsCredentials};
use crate::types::Ssid;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Driver calls recorded for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    StationStart,
    StationStop,
    ApStart,
    ApStop,
    Scan,
    Associate,
    AssociateCancel,
    LeaveNetwork,
    WpsStart,
    WpsCancel,
}

#[derive(Debug, Default)]
struct Inner {
    station: bool,
    ap: bool,
    calls: Vec<Call>,
    scan_script: VecDeque<Vec<ScanResult>>,
    scan_default: Vec<ScanResult>,
    assoc_script: VecDeque<Option<OpOutcome>>,
    assoc_default: Option<OpOutcome>,
    wps_script: VecDeque<Option<(OpOutcome, Option<WpsCredentials>)>>,
    last_assoc: Option<AssocTarget>,
    last_ap: Option<ApParams>,
    reject_station_start: bool,
    reject_ap_start: bool,
    reject_associate: bool,
}

#[derive(Debug)]
pub struct MockDriver {
    inner: Mutex<Inner>,
    simultaneous: bool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                assoc_default: Some(OpOutcome::Success),
                ..Default::default()
            }),
            simultaneous: true,
        }
    }

    pub fn time_multiplexed() -> Self {
        Self { simultaneous: false, ..Self::new() }
    }

    /// Results for the next scan; later scans fall back to the default.
    pub fn push_scan(&self, results: Vec<ScanResult>) {
        self.inner.lock().unwrap().scan_script.push_back(results);
    }

    pub fn set_scan_default(&self, results: Vec<ScanResult>) {
        self.inner.lock().unwrap().scan_default = results;
    }

    /// Outcome for the next associate; `None` hangs until the watchdog.
    pub fn push_assoc(&self, outcome: Option<OpOutcome>) {
        self.inner.lock().unwrap().assoc_script.push_back(outcome);
    }

    pub fn set_assoc_default(&self, outcome: Option<OpOutcome>) {
        self.inner.lock().unwrap().assoc_default = outcome;
    }

    pub fn push_wps(&self, outcome: Option<(OpOutcome, Option<WpsCredentials>)>) {
        self.inner.lock().unwrap().wps_script.push_back(outcome);
    }

    pub fn reject_station_start(&self) {
        self.inner.lock().unwrap().reject_station_start = true;
    }

    pub fn reject_ap_start(&self) {
        self.inner.lock().unwrap().reject_ap_start = true;
    }

    pub fn reject_associate(&self) {
        self.inner.lock().unwrap().reject_associate = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, call: Call) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|&&c| c == call).count()
    }

    pub fn last_assoc_target(&self) -> Option<AssocTarget> {
        self.inner.lock().unwrap().last_assoc.clone()
    }

    pub fn last_ap_params(&self) -> Option<ApParams> {
        self.inner.lock().unwrap().last_ap.clone()
    }
}

#[async_trait]
impl PlatformDriver for MockDriver {
    async fn station_start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::StationStart);
        if inner.reject_station_start {
            return Err(Error::Driver("station start rejected".into()));
        }
        inner.station = true;
        Ok(())
    }

    async fn station_stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::StationStop);
        inner.station = false;
        Ok(())
    }

    async fn station_enabled(&self) -> bool {
        self.inner.lock().unwrap().station
    }

    async fn ap_start(&self, params: &ApParams) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::ApStart);
        if inner.reject_ap_start {
            return Err(Error::Driver("AP start rejected".into()));
        }
        inner.last_ap = Some(params.clone());
        inner.ap = true;
        Ok(())
    }

    async fn ap_stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::ApStop);
        inner.ap = false;
        Ok(())
    }

    async fn ap_enabled(&self) -> bool {
        self.inner.lock().unwrap().ap
    }

    async fn ap_stations_connected(&self) -> usize {
        0
    }

    async fn scan(&self, hidden: Option<Ssid>, done: ScanDone) -> Result<()> {
        debug!(directed = hidden.is_some(), "mock scan");
        let results = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call::Scan);
            inner
                .scan_script
                .pop_front()
                .unwrap_or_else(|| inner.scan_default.clone())
        };
        done.complete(OpOutcome::Success, results);
        Ok(())
    }

    async fn associate(&self, target: AssocTarget, done: AssocDone) -> Result<()> {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call::Associate);
            if inner.reject_associate {
                return Err(Error::Driver("associate rejected".into()));
            }
            inner.last_assoc = Some(target);
            inner.assoc_script.pop_front().unwrap_or(inner.assoc_default)
        };
        match outcome {
            Some(o) => done.complete(o),
            None => drop(done), // hang; the join watchdog settles it
        }
        Ok(())
    }

    async fn associate_cancel(&self) {
        self.inner.lock().unwrap().calls.push(Call::AssociateCancel);
    }

    async fn leave_network(&self) {
        self.inner.lock().unwrap().calls.push(Call::LeaveNetwork);
    }

    async fn wps_start(&self, done: WpsDone) -> Result<()> {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call::WpsStart);
            inner.wps_script.pop_front().unwrap_or(None)
        };
        match outcome {
            Some((o, creds)) => done.complete(o, creds),
            None => drop(done),
        }
        Ok(())
    }

    async fn wps_cancel(&self) {
        self.inner.lock().unwrap().calls.push(Call::WpsCancel);
    }

    async fn wps_started(&self) -> bool {
        false
    }

    fn simultaneous_ap_sta(&self) -> bool {
        self.simultaneous
    }
}

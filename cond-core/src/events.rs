//! Inbound events and the handle the external IPC layer drives the
//! manager through. Requests that can fail validation are
//! request/response (oneshot); everything else is fire-and-forget into
//! the single event queue.

use crate::ops::OpOutcome;
use crate::scan::ScanResult;
use crate::status::Status;
use crate::timer::TimerKind;
use crate::traits::WpsCredentials;
use crate::types::{IpInfo, Key, Security, Ssid};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// A connect request: SSID plus optional credentials. With an empty key
/// and a matching saved profile, the saved profile is targeted instead.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub ssid: Ssid,
    pub security: Option<Security>,
    pub key: Key,
    pub hidden: bool,
}

type Responder = oneshot::Sender<Result<()>>;

#[derive(Debug)]
pub enum Event {
    // External connectivity signals.
    NetworkUp { up: bool, ip: Option<IpInfo> },
    CloudUp(bool),

    // User commands.
    Connect { spec: JoinSpec, resp: Responder },
    Delete { ssid: Ssid, resp: Responder },
    ScanRequest { hidden: Option<Ssid>, resp: Responder },
    WpsRequest { resp: Responder },
    ApWindowOpen { duration: Option<Duration> },
    ApStopRequest,
    FactoryReset,
    EnableChanged(bool),
    Shutdown,

    // Driver completions (generation-guarded, see ops).
    ScanDone { gen: u64, outcome: OpOutcome, results: Vec<ScanResult> },
    AssocDone { gen: u64, outcome: OpOutcome },
    WpsDone { gen: u64, outcome: OpOutcome, creds: Option<WpsCredentials> },

    // Internal: deferred re-evaluation and timer expiry.
    Step,
    Timer(TimerKind),
}

/// Cloneable handle to a running connection manager.
#[derive(Debug, Clone)]
pub struct CondHandle {
    tx: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<Status>,
}

impl CondHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>, status: watch::Receiver<Status>) -> Self {
        Self { tx, status }
    }

    fn send(&self, ev: Event) -> Result<()> {
        self.tx.send(ev).map_err(|_| Error::Closed)
    }

    async fn request(
        &self,
        make: impl FnOnce(Responder) -> Event,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Latest status snapshot.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Watch channel for status updates.
    pub fn status_watch(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn network_up(&self, up: bool, ip: Option<IpInfo>) -> Result<()> {
        self.send(Event::NetworkUp { up, ip })
    }

    pub fn cloud_up(&self, up: bool) -> Result<()> {
        self.send(Event::CloudUp(up))
    }

    /// Connect to a network. Resolves synchronously with a validation
    /// error (invalid key, SSID not in scan cache) or acceptance; the
    /// attempt outcome itself arrives through status and history.
    pub async fn connect(&self, spec: JoinSpec) -> Result<()> {
        self.request(|resp| Event::Connect { spec, resp }).await
    }

    pub async fn delete(&self, ssid: Ssid) -> Result<()> {
        self.request(|resp| Event::Delete { ssid, resp }).await
    }

    pub async fn scan_request(&self, hidden: Option<Ssid>) -> Result<()> {
        self.request(|resp| Event::ScanRequest { hidden, resp }).await
    }

    pub async fn wps_request(&self) -> Result<()> {
        self.request(|resp| Event::WpsRequest { resp }).await
    }

    pub fn ap_window_open(&self, duration: Option<Duration>) -> Result<()> {
        self.send(Event::ApWindowOpen { duration })
    }

    pub fn ap_stop(&self) -> Result<()> {
        self.send(Event::ApStopRequest)
    }

    pub fn factory_reset(&self) -> Result<()> {
        self.send(Event::FactoryReset)
    }

    pub fn enable_changed(&self, enable: bool) -> Result<()> {
        self.send(Event::EnableChanged(enable))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Event::Shutdown)
    }
}

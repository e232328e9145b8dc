//! The connection state machine. Owns the profile store, scan cache,
//! history log and AP-window policy; drives the platform driver; and is
//! the sole arbiter of the radio between station and AP roles.
//!
//! All mutation happens inside `handle`, one event at a time, on one
//! task. Callbacks and timers never re-enter: they post to the same
//! queue the loop drains, so a step is never active twice.

use crate::ap_window::ApWindow;
use crate::config::{Config, SaveMode};
use crate::events::{CondHandle, Event, JoinSpec};
use crate::history::History;
use crate::ops::{AssocDone, OpKind, OpOutcome, Ops, ScanDone, WpsDone};
use crate::profile::{Profile, ProfileId, ProfileStore, PREF_TRY_LIMIT};
use crate::scan::ScanCache;
use crate::status::{ProfileEntry, ScanEntry, Status, WpsState};
use crate::timer::{TimerKind, Timers};
use crate::traits::{ApParams, AssocTarget, PlatformDriver};
use crate::types::{signal_bars, IpInfo, Ssid, WifiErr};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Scan cache age beyond which SELECT triggers a fresh scan.
pub const SCAN_MAX_AGE: Duration = Duration::from_secs(60);
/// Watchdog for a scan the driver accepted but never finished.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(20);
/// Bound on one associate attempt.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(30);
/// WPS walk time.
pub const WPS_TIMEOUT: Duration = Duration::from_secs(120);
/// Address acquisition deadline after association.
pub const DHCP_TIMEOUT: Duration = Duration::from_secs(30);
/// Cloud connectivity deadline after an address is obtained.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Periodic re-evaluation while IDLE.
pub const IDLE_REEVAL: Duration = Duration::from_secs(10);
/// Grace period before stopping AP mode, letting clients disconnect.
pub const AP_STOP_DELAY: Duration = Duration::from_secs(3);
/// Cooldown in ERR before the manager shuts itself down.
pub const ERR_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disabled,
    Select,
    Idle,
    Join,
    Dhcp,
    WaitClient,
    Up,
    Err,
}

impl ConnState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnState::Disabled => "DISABLED",
            ConnState::Select => "SELECT",
            ConnState::Idle => "IDLE",
            ConnState::Join => "JOIN",
            ConnState::Dhcp => "DHCP",
            ConnState::WaitClient => "WAIT_CLIENT",
            ConnState::Up => "UP",
            ConnState::Err => "ERR",
        }
    }

    fn associated(&self) -> bool {
        matches!(self, ConnState::Join | ConnState::Dhcp | ConnState::WaitClient | ConnState::Up)
    }
}

pub struct Cond {
    config: Config,
    driver: Arc<dyn PlatformDriver>,
    state: ConnState,
    profiles: ProfileStore,
    scan: ScanCache,
    history: History,
    ap_window: ApWindow,
    ops: Ops,
    timers: Timers,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<Status>,
    /// Profile currently joining or joined. At most one at a time.
    current: Option<ProfileId>,
    /// Profile pinned by an explicit connect request.
    preferred: Option<ProfileId>,
    /// Skip the staleness-triggered scan once (explicit connect).
    scan_bypass: bool,
    wps: WpsState,
    station_up: bool,
    ap_active: bool,
    step_queued: bool,
    finished: bool,
}

impl Cond {
    pub fn new(config: Config, driver: Arc<dyn PlatformDriver>) -> (Self, CondHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::default());

        let mut profiles = ProfileStore::new();
        for p in &config.profiles {
            if let Err(e) = profiles.add(p.clone()) {
                warn!(ssid = %p.ssid, error = %e, "dropping configured profile");
            }
        }
        let (ap_window, ap_profile) = match &config.ap {
            Some(ap) => {
                // `window == None` means an indefinite window.
                let window = ApWindow::new(ap.secure, ap.window);
                let profile = Profile {
                    ssid: ap.ssid,
                    security: crate::types::Security::open(),
                    key: crate::types::Key::default(),
                    enabled: ap.enabled,
                    hidden: false,
                    join_errs: 0,
                    scan_link: None,
                };
                (window, Some(profile))
            }
            None => (ApWindow::new(false, None), None),
        };
        profiles.set_ap(ap_profile);

        let handle = CondHandle::new(tx.clone(), status_rx);
        let cond = Self {
            config,
            driver,
            state: ConnState::Disabled,
            profiles,
            scan: ScanCache::new(),
            history: History::new(),
            ap_window,
            ops: Ops::new(),
            timers: Timers::new(),
            tx,
            rx,
            status_tx,
            current: None,
            preferred: None,
            scan_bypass: false,
            wps: WpsState::Idle,
            station_up: false,
            ap_active: false,
            step_queued: false,
            finished: false,
        };
        (cond, handle)
    }

    /// Spawns the machine onto the runtime and returns its handle.
    pub fn spawn(config: Config, driver: Arc<dyn PlatformDriver>) -> CondHandle {
        let (cond, handle) = Self::new(config, driver);
        tokio::spawn(cond.run());
        handle
    }

    pub async fn run(mut self) {
        if self.config.enable {
            self.start().await;
        } else {
            info!("wifi disabled by config");
        }
        self.publish();
        while !self.finished {
            let Some(ev) = self.next_event().await else { break };
            self.handle(ev).await;
            self.publish();
        }
        debug!("event loop finished");
    }

    async fn next_event(&mut self) -> Option<Event> {
        match self.timers.next() {
            Some((kind, at)) => tokio::select! {
                ev = self.rx.recv() => ev,
                _ = tokio::time::sleep_until(at) => {
                    self.timers.clear(kind);
                    Some(Event::Timer(kind))
                }
            },
            None => self.rx.recv().await,
        }
    }

    /// Defers a re-evaluation to the next loop iteration instead of
    /// recursing into `step` from wherever we are. Coalesced.
    fn queue_step(&mut self) {
        if !self.step_queued {
            self.step_queued = true;
            let _ = self.tx.send(Event::Step);
        }
    }

    async fn handle(&mut self, ev: Event) {
        match ev {
            Event::Step => {
                self.step_queued = false;
                self.step().await;
            }
            Event::Timer(kind) => self.on_timer(kind).await,
            Event::NetworkUp { up, ip } => self.on_network(up, ip),
            Event::CloudUp(up) => self.on_cloud(up).await,
            Event::Connect { spec, resp } => {
                let r = self.on_connect(spec).await;
                let _ = resp.send(r);
            }
            Event::Delete { ssid, resp } => {
                let r = self.on_delete(&ssid).await;
                let _ = resp.send(r);
            }
            Event::ScanRequest { hidden, resp } => {
                let r = self.on_scan_request(hidden).await;
                let _ = resp.send(r);
            }
            Event::WpsRequest { resp } => {
                let r = self.on_wps_request().await;
                let _ = resp.send(r);
            }
            Event::ApWindowOpen { duration } => self.on_ap_window_open(duration).await,
            Event::ApStopRequest => {
                self.ap_window.close();
                self.timers.clear(TimerKind::ApWindowClose);
                self.schedule_ap_stop();
            }
            Event::FactoryReset => self.on_factory_reset().await,
            Event::EnableChanged(enable) => self.on_enable_changed(enable).await,
            Event::Shutdown => {
                info!("shutdown requested");
                self.enter_disabled().await;
                self.finished = true;
            }
            Event::ScanDone { gen, outcome, results } => {
                self.on_scan_done(gen, outcome, results).await
            }
            Event::AssocDone { gen, outcome } => self.on_assoc_done(gen, outcome).await,
            Event::WpsDone { gen, outcome, creds } => {
                self.on_wps_done(gen, outcome, creds).await
            }
        }
    }

    // --- startup / teardown -------------------------------------------------

    async fn start(&mut self) {
        if let Err(e) = self.driver.station_start().await {
            error!(error = %e, "station start rejected");
            self.enter_err().await;
            return;
        }
        self.station_up = true;
        self.state = ConnState::Select;
        if let Some(ap) = &self.config.ap {
            if ap.enabled && ap.start_open {
                let d = self.ap_window.open(None);
                self.arm_window_close(d);
            }
        }
        self.queue_step();
    }

    async fn enter_disabled(&mut self) {
        self.cancel_all_ops().await;
        if self.driver.wps_started().await {
            self.driver.wps_cancel().await;
        }
        self.stop_ap_now().await;
        if self.station_up {
            if let Err(e) = self.driver.station_stop().await {
                warn!(error = %e, "station stop failed");
            }
            self.station_up = false;
        }
        self.timers.clear_all();
        self.ap_window.close();
        self.current = None;
        self.preferred = None;
        self.wps = WpsState::Idle;
        self.state = ConnState::Disabled;
    }

    async fn enter_err(&mut self) {
        error!("critical driver error, entering ERR");
        self.cancel_all_ops().await;
        self.timers.clear_all();
        self.timers.arm(TimerKind::ErrCooldown, ERR_COOLDOWN);
        self.state = ConnState::Err;
    }

    async fn cancel_all_ops(&mut self) {
        if self.ops.settle_local(OpKind::Assoc) {
            self.driver.associate_cancel().await;
        }
        if self.ops.settle_local(OpKind::Wps) {
            self.driver.wps_cancel().await;
            self.wps = WpsState::Idle;
        }
        self.ops.settle_local(OpKind::Scan);
        self.timers.clear(TimerKind::Scan);
        self.timers.clear(TimerKind::Join);
        self.timers.clear(TimerKind::Wps);
    }

    /// Drops the current association, if any. A no-op in SELECT, IDLE and
    /// DISABLED: no counters or history are touched.
    async fn teardown_association(&mut self) {
        if !self.state.associated() {
            return;
        }
        if self.ops.settle_local(OpKind::Assoc) {
            self.driver.associate_cancel().await;
        }
        self.timers.clear(TimerKind::Join);
        self.timers.clear(TimerKind::Dhcp);
        self.timers.clear(TimerKind::Client);
        self.driver.leave_network().await;
        self.current = None;
        self.state = ConnState::Select;
    }

    fn enter_select(&mut self) {
        self.state = ConnState::Select;
        self.timers.clear(TimerKind::Idle);
        self.queue_step();
    }

    // --- SELECT evaluation --------------------------------------------------

    /// The step: run only from the queue, never recursively.
    async fn step(&mut self) {
        if self.state != ConnState::Select {
            return;
        }
        if self.ops.any_active() {
            return;
        }
        if self.scan.is_stale(SCAN_MAX_AGE) && !self.scan_bypass {
            if let Err(e) = self.start_scan(None).await {
                error!(error = %e, "scan start rejected");
                self.enter_err().await;
            }
            return;
        }
        self.scan_bypass = false;
        match self.choose() {
            Some(id) => self.join(id).await,
            None => {
                // Nobody eligible: forgive all past failures so no profile
                // is blacklisted forever, then wait in IDLE.
                self.profiles.reset_join_errs();
                self.enter_idle().await;
            }
        }
    }

    fn choose(&mut self) -> Option<ProfileId> {
        if let Some(id) = self.preferred {
            match self.profiles.get(id) {
                Some(p) if p.join_errs < PREF_TRY_LIMIT => return Some(id),
                _ => {
                    debug!("clearing preferred profile");
                    self.preferred = None;
                }
            }
        }
        self.profiles.best_candidate()
    }

    async fn enter_idle(&mut self) {
        self.state = ConnState::Idle;
        self.timers.arm(TimerKind::Idle, IDLE_REEVAL);
        self.maybe_start_ap().await;
    }

    async fn maybe_start_ap(&mut self) {
        if self.ap_active || !self.ap_window.is_open() {
            return;
        }
        let Some(ap) = self.config.ap.clone() else { return };
        if !ap.enabled {
            return;
        }
        // Radio mutual exclusion: only reachable here with no station
        // association in progress.
        let params = ApParams {
            ssid: ap.ssid,
            security: crate::types::Security::open(),
            key: crate::types::Key::default(),
            channel: ap.channel,
            ip_cidr: ap.ip_cidr.clone(),
        };
        match self.driver.ap_start(&params).await {
            Ok(()) => {
                info!(ssid = %params.ssid, channel = params.channel, "AP mode started");
                self.ap_active = true;
                self.timers.clear(TimerKind::ApStopDelay);
            }
            Err(e) => {
                error!(error = %e, "AP start rejected");
                self.enter_err().await;
            }
        }
    }

    fn schedule_ap_stop(&mut self) {
        if self.ap_active && !self.timers.is_armed(TimerKind::ApStopDelay) {
            self.timers.arm(TimerKind::ApStopDelay, AP_STOP_DELAY);
        }
    }

    async fn stop_ap_now(&mut self) {
        self.timers.clear(TimerKind::ApStopDelay);
        if self.ap_active {
            if let Err(e) = self.driver.ap_stop().await {
                warn!(error = %e, "AP stop failed");
            }
            self.ap_active = false;
        }
    }

    fn arm_window_close(&mut self, duration: Option<Duration>) {
        match duration {
            Some(d) => self.timers.arm(TimerKind::ApWindowClose, d),
            None => self.timers.clear(TimerKind::ApWindowClose),
        }
    }

    /// Secure-mode windows close the moment real credentials exist.
    fn after_profiles_changed(&mut self) {
        if self.ap_window.profile_enabled_hook(self.profiles.any_station_enabled()) {
            self.timers.clear(TimerKind::ApWindowClose);
            self.schedule_ap_stop();
        }
    }

    // --- scanning -----------------------------------------------------------

    async fn start_scan(&mut self, hidden: Option<Ssid>) -> Result<()> {
        let gen = self.ops.begin(OpKind::Scan);
        let done = ScanDone::new(self.tx.clone(), gen);
        match self.driver.scan(hidden, done).await {
            Ok(()) => {
                debug!(directed = hidden.is_some(), "scan started");
                self.timers.arm(TimerKind::Scan, SCAN_TIMEOUT);
                Ok(())
            }
            Err(e) => {
                self.ops.settle_local(OpKind::Scan);
                Err(e)
            }
        }
    }

    async fn on_scan_done(
        &mut self,
        gen: u64,
        outcome: OpOutcome,
        results: Vec<crate::scan::ScanResult>,
    ) {
        if !self.ops.settle(OpKind::Scan, gen) {
            debug!("stale scan completion dropped");
            return;
        }
        self.timers.clear(TimerKind::Scan);
        match outcome {
            OpOutcome::Success => {
                info!(count = results.len(), "scan complete");
                self.scan.replace(results);
                self.profiles.relink(&self.scan);
            }
            OpOutcome::Failure(WifiErr::Mem) => {
                self.enter_err().await;
                return;
            }
            OpOutcome::Failure(kind) => {
                warn!(error = %kind, "scan failed");
                // Keep the old cache; age it forward so SELECT does not
                // spin on an immediate re-scan.
                self.scan.touch();
            }
            OpOutcome::Canceled => {}
        }
        if self.state == ConnState::Select {
            self.queue_step();
        }
    }

    // --- joining ------------------------------------------------------------

    async fn join(&mut self, id: ProfileId) {
        let Some(p) = self.profiles.get(id) else {
            self.queue_step();
            return;
        };
        let link = p.scan_link;
        let target = AssocTarget {
            ssid: p.ssid,
            security: link.map(|l| l.security).unwrap_or(p.security),
            key: p.key,
            bssid: link.map(|l| l.bssid),
            channel: link.map(|l| l.channel),
            hidden: p.hidden,
        };

        // The radio is exclusive unless the driver says otherwise.
        if !self.driver.simultaneous_ap_sta() && self.ap_active {
            self.stop_ap_now().await;
        }

        info!(ssid = %target.ssid, signal = ?link.map(|l| l.signal), "joining");
        self.history.begin(target.ssid, target.bssid);
        self.current = Some(id);
        let gen = self.ops.begin(OpKind::Assoc);
        let done = AssocDone::new(self.tx.clone(), gen);
        match self.driver.associate(target, done).await {
            Ok(()) => {
                self.state = ConnState::Join;
                self.timers.arm(TimerKind::Join, JOIN_TIMEOUT);
            }
            Err(e) => {
                error!(error = %e, "associate rejected");
                self.ops.settle_local(OpKind::Assoc);
                self.history.finish(WifiErr::Mem);
                self.enter_err().await;
            }
        }
    }

    async fn on_assoc_done(&mut self, gen: u64, outcome: OpOutcome) {
        if !self.ops.settle(OpKind::Assoc, gen) {
            debug!("stale associate completion dropped");
            return;
        }
        self.timers.clear(TimerKind::Join);
        if self.state != ConnState::Join {
            return;
        }
        match outcome {
            OpOutcome::Success => self.assoc_success().await,
            OpOutcome::Failure(WifiErr::Mem) => {
                self.history.finish(WifiErr::Mem);
                self.enter_err().await;
            }
            OpOutcome::Failure(kind) => self.join_failed(kind).await,
            OpOutcome::Canceled => {
                self.current = None;
                self.driver.leave_network().await;
                self.enter_select();
            }
        }
    }

    async fn assoc_success(&mut self) {
        info!("associated");
        if self.config.save_mode == SaveMode::OnConnect {
            self.commit_staging();
        }
        if self.config.dhcp_events {
            self.state = ConnState::Dhcp;
            self.timers.arm(TimerKind::Dhcp, DHCP_TIMEOUT);
        } else {
            self.state = ConnState::WaitClient;
            self.timers.arm(TimerKind::Client, CLIENT_TIMEOUT);
        }
    }

    /// Recoverable join failure: record, count, disconnect, reselect.
    async fn join_failed(&mut self, kind: WifiErr) {
        self.timers.clear(TimerKind::Join);
        self.timers.clear(TimerKind::Dhcp);
        self.timers.clear(TimerKind::Client);
        self.history.finish(kind);
        if let Some(id) = self.current {
            if let Some(p) = self.profiles.get_mut(id) {
                p.join_errs = p.join_errs.saturating_add(1);
                warn!(ssid = %p.ssid, error = %kind, tries = p.join_errs, "join failed");
            }
        }
        self.current = None;
        self.driver.leave_network().await;
        self.enter_select();
    }

    fn commit_staging(&mut self) {
        if self.profiles.staging().is_none() {
            return;
        }
        match self.profiles.commit_staging() {
            Ok(Some(id)) => {
                if self.current == Some(ProfileId::Staging) {
                    self.current = Some(id);
                }
                if self.preferred == Some(ProfileId::Staging) {
                    self.preferred = Some(id);
                }
                if let Some(p) = self.profiles.get(id) {
                    info!(ssid = %p.ssid, "profile committed");
                }
                self.after_profiles_changed();
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not commit staged profile"),
        }
    }

    // --- connectivity events ------------------------------------------------

    fn on_network(&mut self, up: bool, ip: Option<IpInfo>) {
        if up {
            if let Some(ip) = ip {
                self.history.record_ip(ip);
            }
            if self.state == ConnState::Dhcp {
                self.timers.clear(TimerKind::Dhcp);
                self.state = ConnState::WaitClient;
                self.timers.arm(TimerKind::Client, CLIENT_TIMEOUT);
            }
        } else if self.config.dhcp_events
            && matches!(self.state, ConnState::Up | ConnState::WaitClient)
        {
            info!("network down, waiting for address");
            self.timers.clear(TimerKind::Client);
            self.state = ConnState::Dhcp;
            self.timers.arm(TimerKind::Dhcp, DHCP_TIMEOUT);
        }
    }

    async fn on_cloud(&mut self, up: bool) {
        if up {
            if self.state == ConnState::WaitClient {
                self.enter_up();
            }
        } else if self.state == ConnState::Up {
            info!("cloud connection lost");
            self.state = ConnState::WaitClient;
            self.timers.arm(TimerKind::Client, CLIENT_TIMEOUT);
        }
    }

    fn enter_up(&mut self) {
        self.timers.clear(TimerKind::Client);
        self.state = ConnState::Up;
        self.history.finish(WifiErr::None);
        if let Some(id) = self.current {
            if let Some(p) = self.profiles.get_mut(id) {
                p.join_errs = 0;
                info!(ssid = %p.ssid, "up");
            }
        }
        if self.config.save_mode == SaveMode::OnCloudUp {
            self.commit_staging();
        }
        self.scan_bypass = false;
        // A concurrently running setup AP is no longer needed.
        self.schedule_ap_stop();
    }

    // --- timers -------------------------------------------------------------

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Idle => {
                if self.state == ConnState::Idle {
                    self.enter_select();
                }
            }
            TimerKind::Scan => {
                if self.ops.settle_local(OpKind::Scan) {
                    warn!("scan timed out");
                    self.scan.touch();
                    if self.state == ConnState::Select {
                        self.queue_step();
                    }
                }
            }
            TimerKind::Join => {
                if self.ops.settle_local(OpKind::Assoc) {
                    self.driver.associate_cancel().await;
                }
                if self.state == ConnState::Join {
                    self.join_failed(WifiErr::Time).await;
                }
            }
            TimerKind::Wps => {
                if self.ops.settle_local(OpKind::Wps) {
                    self.driver.wps_cancel().await;
                    warn!("WPS timed out");
                    self.wps = WpsState::Failure;
                    self.history.finish(WifiErr::Time);
                    if self.state == ConnState::Select {
                        self.queue_step();
                    }
                }
            }
            TimerKind::Dhcp => {
                if self.state == ConnState::Dhcp {
                    self.join_failed(WifiErr::NoIp).await;
                }
            }
            TimerKind::Client => {
                if self.state == ConnState::WaitClient {
                    self.join_failed(WifiErr::ClientTime).await;
                }
            }
            TimerKind::ApWindowClose => {
                self.ap_window.close();
                self.schedule_ap_stop();
            }
            TimerKind::ApStopDelay => self.stop_ap_now().await,
            TimerKind::ErrCooldown => {
                error!("ERR cooldown elapsed, shutting down");
                self.enter_disabled().await;
                self.finished = true;
            }
        }
    }

    // --- user commands ------------------------------------------------------

    async fn on_connect(&mut self, spec: JoinSpec) -> Result<()> {
        if matches!(self.state, ConnState::Disabled | ConnState::Err) {
            return Err(Error::Disabled);
        }

        // An empty request for a known SSID re-targets the saved profile.
        let id = if spec.key.is_empty() && spec.security.is_none() {
            match self.profiles.find(&spec.ssid) {
                Some(id) => id,
                None => self.stage_from_spec(spec)?,
            }
        } else {
            self.stage_from_spec(spec)?
        };

        if let Some(p) = self.profiles.get_mut(id) {
            p.enabled = true;
            p.join_errs = 0;
        }
        self.preferred = Some(id);
        self.scan_bypass = true;
        self.after_profiles_changed();
        self.teardown_association().await;
        self.enter_select();
        Ok(())
    }

    fn stage_from_spec(&mut self, spec: JoinSpec) -> Result<ProfileId> {
        let security = match spec.security {
            Some(s) => s,
            // Take the mode from what the AP advertises.
            None => match self.scan.find(&spec.ssid) {
                Some(entry) => entry.best_security(),
                None => crate::types::Security::open(),
            },
        };
        if !spec.hidden && !self.scan.contains_ssid(&spec.ssid) {
            return Err(Error::NotFound(format!("SSID {} not in scan results", spec.ssid)));
        }
        let mut p = Profile::new(spec.ssid, security, spec.key)?;
        p.hidden = spec.hidden;
        let id = self.profiles.stage(p);
        if self.config.save_mode == SaveMode::OnAdd {
            self.commit_staging();
            return Ok(self
                .profiles
                .find(&spec.ssid)
                .unwrap_or(ProfileId::Staging));
        }
        Ok(id)
    }

    async fn on_delete(&mut self, ssid: &Ssid) -> Result<()> {
        let id = self
            .profiles
            .find(ssid)
            .ok_or_else(|| Error::NotFound(format!("no profile for SSID {}", ssid)))?;
        if self.current == Some(id) {
            self.teardown_association().await;
            self.enter_select();
        }
        if self.preferred == Some(id) {
            self.preferred = None;
        }
        self.profiles.delete(ssid)?;
        info!(%ssid, "profile deleted");
        Ok(())
    }

    async fn on_scan_request(&mut self, hidden: Option<Ssid>) -> Result<()> {
        if matches!(self.state, ConnState::Disabled | ConnState::Err) {
            return Err(Error::Disabled);
        }
        if self.ops.active(OpKind::Scan) {
            return Err(Error::Busy);
        }
        match self.start_scan(hidden).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                self.enter_err().await;
                Err(Error::Driver(msg))
            }
        }
    }

    async fn on_wps_request(&mut self) -> Result<()> {
        if matches!(self.state, ConnState::Disabled | ConnState::Err) {
            return Err(Error::Disabled);
        }
        if self.ops.active(OpKind::Wps) {
            return Err(Error::Busy);
        }
        self.teardown_association().await;
        if !self.driver.simultaneous_ap_sta() && self.ap_active {
            self.stop_ap_now().await;
        }
        let gen = self.ops.begin(OpKind::Wps);
        let done = WpsDone::new(self.tx.clone(), gen);
        match self.driver.wps_start(done).await {
            Ok(()) => {
                info!("WPS started");
                self.wps = WpsState::Active;
                self.history.begin(Ssid::default(), None);
                self.timers.arm(TimerKind::Wps, WPS_TIMEOUT);
                self.state = ConnState::Select;
                Ok(())
            }
            Err(e) => {
                self.ops.settle_local(OpKind::Wps);
                let msg = e.to_string();
                self.enter_err().await;
                Err(Error::Driver(msg))
            }
        }
    }

    async fn on_wps_done(
        &mut self,
        gen: u64,
        outcome: OpOutcome,
        creds: Option<crate::traits::WpsCredentials>,
    ) {
        if !self.ops.settle(OpKind::Wps, gen) {
            debug!("stale WPS completion dropped");
            return;
        }
        self.timers.clear(TimerKind::Wps);
        match outcome {
            OpOutcome::Success => {
                info!("WPS exchange complete");
                self.wps = WpsState::Success;
                self.history.finish(WifiErr::None);
                if let Some(c) = creds {
                    match Profile::new(c.ssid, c.security, c.key) {
                        Ok(p) => {
                            let id = self.profiles.stage(p);
                            self.preferred = Some(id);
                            self.scan_bypass = false; // rescan to find the new AP
                            if self.config.save_mode == SaveMode::OnAdd {
                                self.commit_staging();
                            }
                            self.after_profiles_changed();
                        }
                        Err(e) => warn!(error = %e, "WPS credentials rejected"),
                    }
                }
            }
            OpOutcome::Failure(WifiErr::Mem) => {
                self.wps = WpsState::Failure;
                self.history.finish(WifiErr::Mem);
                self.enter_err().await;
                return;
            }
            OpOutcome::Failure(kind) => {
                warn!(error = %kind, "WPS failed");
                self.wps = WpsState::Failure;
                self.history.finish(kind);
            }
            OpOutcome::Canceled => {
                self.wps = WpsState::Idle;
            }
        }
        if self.state == ConnState::Select {
            self.queue_step();
        }
    }

    async fn on_ap_window_open(&mut self, duration: Option<Duration>) {
        let d = self.ap_window.open(duration);
        self.arm_window_close(d);
        if self.state == ConnState::Idle {
            self.maybe_start_ap().await;
        }
    }

    async fn on_factory_reset(&mut self) {
        info!("factory reset");
        self.cancel_all_ops().await;
        self.teardown_association().await;
        self.profiles.clear();
        self.history.clear();
        self.preferred = None;
        self.wps = WpsState::Idle;
        if let Some(ap) = &self.config.ap {
            if ap.enabled && ap.start_open {
                let d = self.ap_window.open(None);
                self.arm_window_close(d);
            }
        }
        if self.state != ConnState::Disabled {
            self.enter_select();
        }
    }

    async fn on_enable_changed(&mut self, enable: bool) {
        self.config.enable = enable;
        if enable {
            if self.state == ConnState::Disabled {
                self.start().await;
            }
        } else if self.state != ConnState::Disabled {
            self.enter_disabled().await;
        }
    }

    // --- status -------------------------------------------------------------

    fn publish(&self) {
        let current = self
            .current
            .filter(|_| {
                matches!(self.state, ConnState::Dhcp | ConnState::WaitClient | ConnState::Up)
            })
            .and_then(|id| self.profiles.get(id));
        let signal = current.and_then(|p| p.scan_link).map(|l| l.signal);

        let mut scan: Vec<ScanEntry> = self
            .scan
            .entries()
            .iter()
            .map(|e| ScanEntry {
                ssid: e.ssid,
                bss_type: e.bss_type,
                channel: e.channel,
                signal: e.signal,
                bars: signal_bars(e.signal),
                security: e.best_security().name(),
                bssid: e.bssid,
            })
            .collect();
        scan.sort_by_key(|e| std::cmp::Reverse(e.signal));

        let profiles: Vec<ProfileEntry> = self
            .profiles
            .station_ids()
            .filter_map(|id| self.profiles.get(id))
            .map(|p| ProfileEntry {
                ssid: p.ssid,
                security: p.security.name(),
                enabled: p.enabled,
                hidden: p.hidden,
            })
            .collect();

        let status = Status {
            state: self.state.name(),
            connected_ssid: current.map(|p| p.ssid),
            signal,
            bars: signal.map(signal_bars).unwrap_or(0),
            wps: self.wps,
            ap_active: self.ap_active,
            history: self.history.entries().cloned().collect(),
            scan,
            profiles,
        };
        self.status_tx.send_replace(status);
    }
}

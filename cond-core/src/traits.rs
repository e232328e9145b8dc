//! The platform driver contract: the one seam between the connection
//! manager core and the interchangeable hardware backends.

use crate::ops::{AssocDone, ScanDone, WpsDone};
use crate::types::{Bssid, Key, Security, Ssid};
use crate::Result;
use async_trait::async_trait;

/// Parameters for starting AP mode.
#[derive(Debug, Clone)]
pub struct ApParams {
    pub ssid: Ssid,
    pub security: Security,
    pub key: Key,
    pub channel: u8,
    /// Gateway address in CIDR form, e.g. "192.168.0.1/24".
    pub ip_cidr: String,
}

/// Parameters for one associate attempt, derived from a profile and its
/// scan link.
#[derive(Debug, Clone)]
pub struct AssocTarget {
    pub ssid: Ssid,
    pub security: Security,
    pub key: Key,
    pub bssid: Option<Bssid>,
    pub channel: Option<u8>,
    pub hidden: bool,
}

/// Credentials provisioned by a successful WPS exchange.
#[derive(Debug, Clone)]
pub struct WpsCredentials {
    pub ssid: Ssid,
    pub security: Security,
    pub key: Key,
}

/// Hardware control contract implemented by each backend.
///
/// Start-style calls accept or reject synchronously (an `Err` is a
/// rejection). An accepted scan/associate/WPS eventually fires its
/// completion token exactly once, unless the core's watchdog settles the
/// operation first, in which case the late completion is discarded by its
/// stale generation.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    async fn station_start(&self) -> Result<()>;
    async fn station_stop(&self) -> Result<()>;
    async fn station_enabled(&self) -> bool;

    async fn ap_start(&self, params: &ApParams) -> Result<()>;
    async fn ap_stop(&self) -> Result<()>;
    async fn ap_enabled(&self) -> bool;
    async fn ap_stations_connected(&self) -> usize;

    /// Starts a scan; `hidden` requests a directed probe for one SSID.
    async fn scan(&self, hidden: Option<Ssid>, done: ScanDone) -> Result<()>;

    async fn associate(&self, target: AssocTarget, done: AssocDone) -> Result<()>;
    /// Abandons an in-flight associate, best effort.
    async fn associate_cancel(&self);
    /// Drops the current association cleanly.
    async fn leave_network(&self);

    async fn wps_start(&self, done: WpsDone) -> Result<()>;
    async fn wps_cancel(&self);
    async fn wps_started(&self) -> bool;

    /// Whether the radio supports AP and station roles at the same time.
    /// When false the machine strictly time-multiplexes the radio.
    fn simultaneous_ap_sta(&self) -> bool;
}

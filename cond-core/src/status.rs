//! Outbound status snapshot for the external IPC layer. Keys are never
//! exported here.

use crate::history::HistoryEntry;
use crate::scan::BssType;
use crate::types::{Bssid, Ssid};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WpsState {
    #[default]
    Idle,
    Active,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    pub ssid: Ssid,
    pub bss_type: BssType,
    pub channel: u8,
    pub signal: i16,
    pub bars: u8,
    pub security: &'static str,
    pub bssid: Bssid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileEntry {
    pub ssid: Ssid,
    pub security: &'static str,
    pub enabled: bool,
    pub hidden: bool,
}

/// One self-contained snapshot, republished after every handled event.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: &'static str,
    pub connected_ssid: Option<Ssid>,
    pub signal: Option<i16>,
    pub bars: u8,
    pub wps: WpsState,
    pub ap_active: bool,
    /// Newest first.
    pub history: Vec<HistoryEntry>,
    /// Scan cache order.
    pub scan: Vec<ScanEntry>,
    pub profiles: Vec<ProfileEntry>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: "DISABLED",
            connected_ssid: None,
            signal: None,
            bars: 0,
            wps: WpsState::Idle,
            ap_active: false,
            history: Vec::new(),
            scan: Vec::new(),
            profiles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WifiErr;
    use std::time::SystemTime;

    #[test]
    fn json_snapshot_never_exports_keys() {
        let status = Status {
            state: "UP",
            connected_ssid: Some("Home".parse().unwrap()),
            signal: Some(-40),
            bars: 5,
            wps: WpsState::Idle,
            ap_active: false,
            history: vec![crate::history::HistoryEntry {
                ssid: "Home".parse().unwrap(),
                bssid: None,
                error: WifiErr::None,
                time: SystemTime::now(),
                ip: None,
                last: true,
            }],
            scan: Vec::new(),
            profiles: vec![ProfileEntry {
                ssid: "Home".parse().unwrap(),
                security: "WPA2 Personal",
                enabled: true,
                hidden: false,
            }],
        };

        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], "UP");
        assert_eq!(v["wps"], "idle");
        assert_eq!(v["history"][0]["error"], "none");
        assert_eq!(v["profiles"][0]["ssid"], "Home");
        assert_eq!(v["profiles"][0]["security"], "WPA2 Personal");
        // A profile entry has no key field of any kind.
        assert!(v["profiles"][0].get("key").is_none());
        assert!(v["profiles"][0].get("psk").is_none());
    }
}

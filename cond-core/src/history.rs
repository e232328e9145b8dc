//! Ring buffer of past connection attempts, newest first. Entries are
//! created when a join or WPS attempt starts and updated in place until a
//! newer attempt supersedes them.

use crate::types::{Bssid, IpInfo, Ssid, WifiErr};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::SystemTime;

/// History ring capacity.
pub const HISTORY_CT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub ssid: Ssid,
    pub bssid: Option<Bssid>,
    pub error: WifiErr,
    pub time: SystemTime,
    pub ip: Option<IpInfo>,
    /// Set on the entry for the most recent attempt.
    pub last: bool,
}

#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self { entries: VecDeque::with_capacity(HISTORY_CT) }
    }

    /// Starts a new attempt record; the oldest entry drops past capacity.
    pub fn begin(&mut self, ssid: Ssid, bssid: Option<Bssid>) {
        for e in self.entries.iter_mut() {
            e.last = false;
        }
        self.entries.push_front(HistoryEntry {
            ssid,
            bssid,
            error: WifiErr::InProgress,
            time: SystemTime::now(),
            ip: None,
            last: true,
        });
        self.entries.truncate(HISTORY_CT);
    }

    /// The in-flight entry, if the newest one is still current.
    pub fn current_mut(&mut self) -> Option<&mut HistoryEntry> {
        self.entries.front_mut().filter(|e| e.last)
    }

    pub fn finish(&mut self, error: WifiErr) {
        if let Some(e) = self.current_mut() {
            e.error = error;
        }
    }

    pub fn record_ip(&mut self, ip: IpInfo) {
        if let Some(e) = self.current_mut() {
            e.ip = Some(ip);
        }
    }

    /// Newest-first view.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

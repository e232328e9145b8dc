//! Bounded cache of access points observed during the latest scan cycles.
//!
//! The cache is wholly replaced at the start of each scan cycle. Insertion
//! prefers merging an entry for the same network (same SSID, same best
//! security, same band); otherwise an empty slot is used, and when full the
//! weakest-signal entry is evicted.

use crate::types::{Band, Bssid, Security, Ssid};
use serde::Serialize;
use tokio::time::Instant;

/// Scan cache capacity.
pub const SCAN_CACHE_SIZE: usize = 30;

/// Maximum security descriptors kept per scan result.
pub const SCAN_SEC_CT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BssType {
    Infrastructure,
    AdHoc,
    Unknown,
}

/// One observed access point.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub bssid: Bssid,
    pub ssid: Ssid,
    pub channel: u8,
    /// Signal level in dBm.
    pub signal: i16,
    pub securities: Vec<Security>,
    pub bss_type: BssType,
    pub wps: bool,
    pub seen: Instant,
}

impl ScanResult {
    pub fn band(&self) -> Band {
        Band::from_channel(self.channel)
    }

    /// Strongest advertised security mode, for status output.
    pub fn best_security(&self) -> Security {
        self.securities
            .iter()
            .copied()
            .max_by_key(Security::rank)
            .unwrap_or_else(Security::open)
    }

    /// Best advertised mode a profile configured with `configured` can use
    /// without downgrading. `None` when the AP offers no acceptable mode.
    pub fn security_match(&self, configured: &Security) -> Option<Security> {
        self.securities
            .iter()
            .copied()
            .filter(|desc| {
                if !desc.is_valid() {
                    false
                } else if configured.is_open() {
                    desc.is_open()
                } else if configured.has(Security::WEP) {
                    desc.has(Security::WEP)
                } else {
                    desc.has(Security::PSK) && !desc.downgrades(configured)
                }
            })
            .max_by_key(Security::rank)
    }

    /// Merge key: two results describe the same logical network when SSID,
    /// best security and band all agree.
    fn same_network(&self, other: &ScanResult) -> bool {
        self.ssid == other.ssid
            && self.best_security() == other.best_security()
            && self.band() == other.band()
    }
}

#[derive(Debug, Default)]
pub struct ScanCache {
    entries: Vec<ScanResult>,
    /// Completion time of the last successful scan.
    last_scan: Option<Instant>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(SCAN_CACHE_SIZE), last_scan: None }
    }

    pub fn entries(&self) -> &[ScanResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no scan has completed within `max_age`.
    pub fn is_stale(&self, max_age: std::time::Duration) -> bool {
        match self.last_scan {
            Some(at) => at.elapsed() >= max_age,
            None => true,
        }
    }

    /// Replaces the cache contents with a fresh cycle's results.
    pub fn replace(&mut self, results: Vec<ScanResult>) {
        self.entries.clear();
        for r in results {
            self.insert(r);
        }
        self.last_scan = Some(Instant::now());
    }

    /// Refreshes the freshness timestamp without touching the entries.
    /// Used after a failed scan so SELECT does not spin on re-scans.
    pub fn touch(&mut self) {
        self.last_scan = Some(Instant::now());
    }

    /// Inserts one result: merge with a same-network entry first, then an
    /// empty slot, then evict the weakest-signal entry if weaker than the
    /// newcomer.
    pub fn insert(&mut self, result: ScanResult) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.same_network(&result)) {
            if result.signal >= existing.signal {
                *existing = result;
            } else {
                existing.seen = result.seen;
            }
            return;
        }
        if self.entries.len() < SCAN_CACHE_SIZE {
            self.entries.push(result);
            return;
        }
        if let Some((idx, weakest)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.signal)
            .map(|(i, e)| (i, e.signal))
        {
            if result.signal > weakest {
                self.entries[idx] = result;
            }
        }
    }

    /// All cached results matching `ssid`, any security.
    pub fn contains_ssid(&self, ssid: &Ssid) -> bool {
        self.entries.iter().any(|e| &e.ssid == ssid)
    }

    pub fn find(&self, ssid: &Ssid) -> Option<&ScanResult> {
        self.entries.iter().filter(|e| &e.ssid == ssid).max_by_key(|e| e.signal)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_scan = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Security;

    fn result(ssid: &str, bssid_last: u8, channel: u8, signal: i16, sec: Security) -> ScanResult {
        ScanResult {
            bssid: Bssid([0, 0x11, 0x22, 0x33, 0x44, bssid_last]),
            ssid: ssid.parse().unwrap(),
            channel,
            signal,
            securities: vec![sec],
            bss_type: BssType::Infrastructure,
            wps: false,
            seen: Instant::now(),
        }
    }

    #[tokio::test]
    async fn merges_same_network_keeping_stronger() {
        let mut cache = ScanCache::new();
        let sec = Security::wpa2_psk(Security::CCMP);
        cache.insert(result("Home", 1, 6, -70, sec));
        cache.insert(result("Home", 2, 11, -50, sec));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries()[0].signal, -50);
        assert_eq!(cache.entries()[0].bssid, Bssid([0, 0x11, 0x22, 0x33, 0x44, 2]));

        // Different band: no merge.
        cache.insert(result("Home", 3, 36, -60, sec));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn capacity_evicts_weakest() {
        let mut cache = ScanCache::new();
        for i in 0..SCAN_CACHE_SIZE {
            cache.insert(result(&format!("net{}", i), i as u8, 6, -80 + i as i16, Security::open()));
        }
        assert_eq!(cache.len(), SCAN_CACHE_SIZE);

        // Weakest is net0 at -80; a stronger newcomer replaces it.
        cache.insert(result("strong", 0xff, 6, -40, Security::open()));
        assert_eq!(cache.len(), SCAN_CACHE_SIZE);
        assert!(!cache.contains_ssid(&"net0".parse().unwrap()));
        assert!(cache.contains_ssid(&"strong".parse().unwrap()));

        // A weaker newcomer is dropped.
        cache.insert(result("weak", 0xfe, 6, -95, Security::open()));
        assert!(!cache.contains_ssid(&"weak".parse().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn staleness_tracks_last_scan() {
        let mut cache = ScanCache::new();
        let max_age = std::time::Duration::from_secs(60);
        assert!(cache.is_stale(max_age));
        cache.replace(vec![result("a", 1, 1, -50, Security::open())]);
        assert!(!cache.is_stale(max_age));
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        assert!(cache.is_stale(max_age));
    }

    #[tokio::test]
    async fn security_match_refuses_downgrade() {
        let mut r = result("Home", 1, 6, -50, Security::wpa2_psk(Security::CCMP));
        r.securities.push(Security::wpa_psk(Security::TKIP));

        let wpa2 = Security::wpa2_psk(Security::CCMP);
        let wpa = Security::wpa_psk(Security::TKIP);
        assert_eq!(r.security_match(&wpa2).unwrap().rank(), 3);
        // WPA profile may use the stronger advertised WPA2 mode.
        assert_eq!(r.security_match(&wpa).unwrap().rank(), 3);

        let open_ap = result("Open", 2, 6, -50, Security::open());
        assert!(open_ap.security_match(&wpa2).is_none());
        assert!(open_ap.security_match(&Security::open()).is_some());
    }
}

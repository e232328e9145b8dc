//! Fixed-capacity table of known networks: N regular slots, one AP-mode
//! profile and one unsaved staging profile for credentials that have not
//! been committed yet.

use crate::scan::ScanCache;
use crate::types::{Bssid, Key, Security, Ssid};
use crate::{Error, Result};

/// Regular profile slot count.
pub const PROFILE_CT: usize = 10;

/// Join attempts before a profile is excluded from selection.
pub const JOIN_TRY_LIMIT: u8 = 3;

/// Attempts allowed for an explicitly requested (preferred) profile.
/// Kept one below the general limit to match long-standing behavior.
pub const PREF_TRY_LIMIT: u8 = JOIN_TRY_LIMIT - 1;

/// Snapshot of the best currently visible AP for a profile, refreshed
/// after every scan cycle. SSID always matches the owning profile and the
/// recorded security is never a downgrade of the configured one.
#[derive(Debug, Clone, Copy)]
pub struct ScanLink {
    pub bssid: Bssid,
    pub channel: u8,
    pub signal: i16,
    /// Best mutually supported mode for the join.
    pub security: Security,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub ssid: Ssid,
    pub security: Security,
    pub key: Key,
    pub enabled: bool,
    pub hidden: bool,
    pub join_errs: u8,
    pub scan_link: Option<ScanLink>,
}

impl Profile {
    /// Builds a profile, validating the key against the security family.
    pub fn new(ssid: Ssid, security: Security, key: Key) -> Result<Self> {
        if ssid.is_empty() {
            return Err(Error::Config("empty SSID".into()));
        }
        if !security.key_ok(&key) {
            return Err(Error::InvalidKey(format!(
                "key not valid for {}",
                security.name()
            )));
        }
        Ok(Self {
            ssid,
            security,
            key,
            enabled: true,
            hidden: false,
            join_errs: 0,
            scan_link: None,
        })
    }
}

/// Identifies a profile within the store. Slot ids stay stable across
/// deletion of other slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileId {
    Slot(usize),
    Ap,
    Staging,
}

#[derive(Debug, Default)]
pub struct ProfileStore {
    slots: [Option<Profile>; PROFILE_CT],
    ap: Option<Profile>,
    staging: Option<Profile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ProfileId) -> Option<&Profile> {
        match id {
            ProfileId::Slot(i) => self.slots.get(i)?.as_ref(),
            ProfileId::Ap => self.ap.as_ref(),
            ProfileId::Staging => self.staging.as_ref(),
        }
    }

    pub fn get_mut(&mut self, id: ProfileId) -> Option<&mut Profile> {
        match id {
            ProfileId::Slot(i) => self.slots.get_mut(i)?.as_mut(),
            ProfileId::Ap => self.ap.as_mut(),
            ProfileId::Staging => self.staging.as_mut(),
        }
    }

    /// Station profiles: regular slots plus the staging slot.
    pub fn station_ids(&self) -> impl Iterator<Item = ProfileId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| ProfileId::Slot(i)))
            .chain(self.staging.iter().map(|_| ProfileId::Staging))
    }

    pub fn find(&self, ssid: &Ssid) -> Option<ProfileId> {
        self.station_ids()
            .find(|&id| self.get(id).map(|p| &p.ssid == ssid).unwrap_or(false))
    }

    /// Adds (or replaces, by SSID) a saved profile.
    pub fn add(&mut self, profile: Profile) -> Result<ProfileId> {
        if let Some(id) = self.find(&profile.ssid) {
            if let ProfileId::Slot(i) = id {
                self.slots[i] = Some(profile);
                return Ok(id);
            }
        }
        match self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            Some((i, slot)) => {
                *slot = Some(profile);
                Ok(ProfileId::Slot(i))
            }
            None => Err(Error::TableFull),
        }
    }

    /// Places credentials into the unsaved staging slot, replacing any
    /// previous staging content.
    pub fn stage(&mut self, profile: Profile) -> ProfileId {
        self.staging = Some(profile);
        ProfileId::Staging
    }

    pub fn staging(&self) -> Option<&Profile> {
        self.staging.as_ref()
    }

    pub fn drop_staging(&mut self) {
        self.staging = None;
    }

    /// Commits the staging profile into the permanent table. Any saved
    /// profile with the same SSID is replaced so the two never coexist.
    pub fn commit_staging(&mut self) -> Result<Option<ProfileId>> {
        let Some(profile) = self.staging.take() else {
            return Ok(None);
        };
        match self.add(profile.clone()) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                // Table full: keep the credentials staged.
                self.staging = Some(profile);
                Err(e)
            }
        }
    }

    pub fn delete(&mut self, ssid: &Ssid) -> Result<ProfileId> {
        match self.find(ssid) {
            Some(ProfileId::Slot(i)) => {
                self.slots[i] = None;
                Ok(ProfileId::Slot(i))
            }
            Some(ProfileId::Staging) => {
                self.staging = None;
                Ok(ProfileId::Staging)
            }
            _ => Err(Error::NotFound(format!("no profile for SSID {}", ssid))),
        }
    }

    pub fn set_ap(&mut self, profile: Option<Profile>) {
        self.ap = profile;
    }

    pub fn ap(&self) -> Option<&Profile> {
        self.ap.as_ref()
    }

    /// True when any station profile is enabled. Drives the secure
    /// AP-window auto-close.
    pub fn any_station_enabled(&self) -> bool {
        self.station_ids()
            .any(|id| self.get(id).map(|p| p.enabled).unwrap_or(false))
    }

    pub fn reset_join_errs(&mut self) {
        let ids: Vec<_> = self.station_ids().collect();
        for id in ids {
            if let Some(p) = self.get_mut(id) {
                p.join_errs = 0;
            }
        }
    }

    /// Strongest-signal enabled profile under the try limit with a live
    /// scan link. First-found wins ties.
    pub fn best_candidate(&self) -> Option<ProfileId> {
        let mut best: Option<(ProfileId, i16)> = None;
        for id in self.station_ids() {
            let Some(p) = self.get(id) else { continue };
            if !p.enabled || p.join_errs >= JOIN_TRY_LIMIT {
                continue;
            }
            let Some(link) = p.scan_link else { continue };
            match best {
                Some((_, signal)) if link.signal <= signal => {}
                _ => best = Some((id, link.signal)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Recomputes every station profile's scan link from a fresh cache,
    /// keeping the strongest matching AP per profile.
    pub fn relink(&mut self, cache: &ScanCache) {
        let ids: Vec<_> = self.station_ids().collect();
        for id in ids {
            let Some(p) = self.get(id) else { continue };
            let (ssid, configured) = (p.ssid, p.security);
            let mut link: Option<ScanLink> = None;
            for entry in cache.entries().iter().filter(|e| e.ssid == ssid) {
                let Some(security) = entry.security_match(&configured) else {
                    continue;
                };
                let stronger = link.map(|l| entry.signal > l.signal).unwrap_or(true);
                if stronger {
                    link = Some(ScanLink {
                        bssid: entry.bssid,
                        channel: entry.channel,
                        signal: entry.signal,
                        security,
                    });
                }
            }
            if let Some(p) = self.get_mut(id) {
                p.scan_link = link;
            }
        }
    }

    /// Drops every scan link (cache no longer valid).
    pub fn unlink_all(&mut self) {
        let ids: Vec<_> = self.station_ids().collect();
        for id in ids {
            if let Some(p) = self.get_mut(id) {
                p.scan_link = None;
            }
        }
    }

    /// Factory reset: every station profile and the staging slot go away.
    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.staging = None;
    }
}

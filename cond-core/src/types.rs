//! Shared wire-level types: SSIDs, security descriptors, keys and the
//! error-kind taxonomy recorded in the history log.

use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum SSID length in raw bytes (802.11 limit).
pub const SSID_MAX_LEN: usize = 32;

/// An SSID: up to 32 raw bytes. Compared byte-exact; non-printable bytes
/// are hex-escaped only when rendered as text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ssid {
    len: u8,
    bytes: [u8; SSID_MAX_LEN],
}

impl Ssid {
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.len() > SSID_MAX_LEN {
            return Err(Error::Config(format!("SSID longer than {} bytes", SSID_MAX_LEN)));
        }
        let mut bytes = [0u8; SSID_MAX_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { len: raw.len() as u8, bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromStr for Ssid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ssid::new(s.as_bytes())
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.as_bytes() {
            if (0x20..0x7f).contains(&b) && b != b'\\' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ssid(\"{}\")", self)
    }
}

impl Serialize for Ssid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// BSSID: the MAC address of one access-point radio.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Bssid(pub [u8; 6]);

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bssid({})", self)
    }
}

impl Serialize for Bssid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Bssid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 6];
        let mut n = 0;
        for part in s.split(':') {
            if n >= 6 {
                return Err(Error::Config(format!("bad BSSID: {}", s)));
            }
            out[n] = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Config(format!("bad BSSID: {}", s)))?;
            n += 1;
        }
        if n != 6 {
            return Err(Error::Config(format!("bad BSSID: {}", s)));
        }
        Ok(Bssid(out))
    }
}

/// Security descriptor: a bitmask of protocol family, key management and
/// cipher. A scan result may carry several (one per advertised mode).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Security(u16);

impl Security {
    pub const WEP: u16 = 0x0001;
    pub const WPA: u16 = 0x0002;
    pub const WPA2: u16 = 0x0004;
    pub const PSK: u16 = 0x0010;
    pub const TKIP: u16 = 0x0100;
    pub const CCMP: u16 = 0x0200;
    pub const VALID: u16 = 0x8000;

    pub fn open() -> Self {
        Security(Self::VALID)
    }

    pub fn wep() -> Self {
        Security(Self::VALID | Self::WEP)
    }

    pub fn wpa_psk(cipher: u16) -> Self {
        Security(Self::VALID | Self::WPA | Self::PSK | cipher)
    }

    pub fn wpa2_psk(cipher: u16) -> Self {
        Security(Self::VALID | Self::WPA2 | Self::PSK | cipher)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 & Self::VALID != 0
    }

    pub fn is_open(&self) -> bool {
        self.0 & (Self::WEP | Self::WPA | Self::WPA2) == 0
    }

    pub fn has(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    /// Strength ordering used both for best-mode selection among a scan
    /// result's descriptors and for the no-downgrade rule on scan links.
    pub fn rank(&self) -> u8 {
        if self.has(Self::WPA2) {
            3
        } else if self.has(Self::WPA) {
            2
        } else if self.has(Self::WEP) {
            1
        } else {
            0
        }
    }

    /// True when joining `self` would be a security downgrade for a
    /// profile configured with `configured`.
    pub fn downgrades(&self, configured: &Security) -> bool {
        self.rank() < configured.rank()
    }

    pub fn name(&self) -> &'static str {
        if self.has(Self::WPA2) {
            "WPA2 Personal"
        } else if self.has(Self::WPA) {
            "WPA Personal"
        } else if self.has(Self::WEP) {
            "WEP"
        } else {
            "None"
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" | "None" => Ok(Self::open()),
            "WEP" | "wep" => Ok(Self::wep()),
            "WPA Personal" | "wpa" => Ok(Self::wpa_psk(Self::TKIP)),
            "WPA2 Personal" | "wpa2" => Ok(Self::wpa2_psk(Self::CCMP)),
            other => Err(Error::Config(format!("unknown security mode: {}", other))),
        }
    }

    /// Validates `key` against this descriptor's family.
    pub fn key_ok(&self, key: &Key) -> bool {
        if self.is_open() {
            return key.is_empty();
        }
        let k = key.as_bytes();
        if self.has(Self::WEP) {
            return match k.len() {
                5 | 13 => true,
                10 | 26 => k.iter().all(u8::is_ascii_hexdigit),
                _ => false,
            };
        }
        // WPA/WPA2-PSK: 8-63 byte passphrase or 64 hex digits.
        match k.len() {
            8..=63 => true,
            64 => k.iter().all(u8::is_ascii_hexdigit),
            _ => false,
        }
    }
}

impl fmt::Debug for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Security({}, {:#06x})", self.name(), self.0)
    }
}

impl Serialize for Security {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Maximum key length in bytes (64 hex digits for a raw PSK).
pub const KEY_MAX_LEN: usize = 64;

/// A network key. Never logged and never exported in status output.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key {
    len: u8,
    bytes: [u8; KEY_MAX_LEN],
}

// Arrays longer than 32 have no derived Default.
impl Default for Key {
    fn default() -> Self {
        Self { len: 0, bytes: [0u8; KEY_MAX_LEN] }
    }
}

impl Key {
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.len() > KEY_MAX_LEN {
            return Err(Error::InvalidKey(format!("key longer than {} bytes", KEY_MAX_LEN)));
        }
        let mut bytes = [0u8; KEY_MAX_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { len: raw.len() as u8, bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // redacted
        write!(f, "Key(len={})", self.len)
    }
}

/// Error kinds recorded in the history log and surfaced in status output.
/// This is data, not control flow: recoverable kinds route the machine
/// back to selection, only `Mem` is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiErr {
    None,
    InProgress,
    WrongKey,
    Time,
    NoIp,
    ClientTime,
    NotFound,
    InvKey,
    Mem,
}

impl WifiErr {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiErr::None => "none",
            WifiErr::InProgress => "in progress",
            WifiErr::WrongKey => "incorrect key",
            WifiErr::Time => "connection timed out",
            WifiErr::NoIp => "failed to get IP address from DHCP",
            WifiErr::ClientTime => "cloud connection timed out",
            WifiErr::NotFound => "SSID not found",
            WifiErr::InvKey => "invalid key",
            WifiErr::Mem => "internal failure",
        }
    }
}

impl fmt::Display for WifiErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing information delivered with a network-up event and recorded
/// into the current history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpInfo {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

/// Radio band, derived from the channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Band2G,
    Band5G,
}

impl Band {
    pub fn from_channel(channel: u8) -> Self {
        if channel <= 14 {
            Band::Band2G
        } else {
            Band::Band5G
        }
    }
}

/// Buckets a dBm signal level into 0-5 bars for status output.
pub fn signal_bars(dbm: i16) -> u8 {
    match dbm {
        d if d >= -50 => 5,
        d if d >= -60 => 4,
        d if d >= -67 => 3,
        d if d >= -75 => 2,
        d if d >= -85 => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_display_escapes_non_printable() {
        let ssid = Ssid::new(b"caf\xc3\xa9").unwrap();
        assert_eq!(ssid.to_string(), "caf\\xc3\\xa9");
        let plain: Ssid = "Home".parse().unwrap();
        assert_eq!(plain.to_string(), "Home");
    }

    #[test]
    fn ssid_rejects_overlong() {
        assert!(Ssid::new(&[b'a'; 33]).is_err());
        assert!(Ssid::new(&[b'a'; 32]).is_ok());
    }

    #[test]
    fn ssid_compares_byte_exact() {
        let a = Ssid::new(b"net\x00").unwrap();
        let b = Ssid::new(b"net").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bssid_parse_roundtrip() {
        let b: Bssid = "00:11:22:aa:bb:cc".parse().unwrap();
        assert_eq!(b.to_string(), "00:11:22:aa:bb:cc");
        assert!("00:11:22:aa:bb".parse::<Bssid>().is_err());
    }

    #[test]
    fn psk_key_validation() {
        let sec = Security::wpa2_psk(Security::CCMP);
        assert!(sec.key_ok(&Key::new(b"password").unwrap()));
        assert!(!sec.key_ok(&Key::new(b"short").unwrap()));
        assert!(sec.key_ok(&Key::new(&[b'a'; 64]).unwrap()));
        assert!(!sec.key_ok(&Key::new(&[b'z'; 64]).unwrap()));
        assert!(!sec.key_ok(&Key::default()));
    }

    #[test]
    fn wep_key_validation() {
        let sec = Security::wep();
        assert!(sec.key_ok(&Key::new(b"12345").unwrap()));
        assert!(sec.key_ok(&Key::new(b"abcdef1234").unwrap()));
        assert!(!sec.key_ok(&Key::new(b"xyzdef1234").unwrap()));
        assert!(!sec.key_ok(&Key::new(b"1234").unwrap()));
    }

    #[test]
    fn default_key_is_empty() {
        let key = Key::default();
        assert!(key.is_empty());
        assert_eq!(key.as_bytes(), b"");
        assert_eq!(key, Key::new(b"").unwrap());
    }

    #[test]
    fn open_requires_empty_key() {
        let sec = Security::open();
        assert!(sec.key_ok(&Key::default()));
        assert!(!sec.key_ok(&Key::new(b"password").unwrap()));
    }

    #[test]
    fn security_rank_ordering() {
        assert!(Security::wpa2_psk(Security::CCMP).rank() > Security::wpa_psk(Security::TKIP).rank());
        assert!(Security::wep().downgrades(&Security::wpa2_psk(Security::CCMP)));
        assert!(!Security::wpa2_psk(Security::CCMP).downgrades(&Security::wpa_psk(Security::TKIP)));
    }

    #[test]
    fn bars_buckets() {
        assert_eq!(signal_bars(-40), 5);
        assert_eq!(signal_bars(-65), 3);
        assert_eq!(signal_bars(-90), 0);
    }
}

//! TOML config model for the manager: enable flag, interface names, AP
//! setup (with `$MAC`/`$DSN` SSID substitution), profile-save policy and
//! the configured station profiles.

use crate::profile::Profile;
use crate::types::{Key, Security, Ssid};
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// When staged credentials are committed into the permanent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveMode {
    Never,
    OnAdd,
    #[default]
    OnConnect,
    OnCloudUp,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DeviceFile {
    #[serde(default)]
    mac: String,
    #[serde(default)]
    dsn: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApFile {
    #[serde(default)]
    enabled: bool,
    ssid: String,
    #[serde(default = "default_channel")]
    channel: u8,
    #[serde(default = "default_ap_ip")]
    ip: String,
    /// Window length in seconds; omit for an indefinite window.
    window_secs: Option<u64>,
    /// Open the window at startup.
    #[serde(default)]
    start_open: bool,
    /// Close the window once a station profile is enabled.
    #[serde(default)]
    secure: bool,
}

fn default_channel() -> u8 {
    6
}

fn default_ap_ip() -> String {
    "192.168.0.1/24".into()
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileFile {
    ssid: String,
    #[serde(default = "default_security")]
    security: String,
    #[serde(default)]
    key: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    hidden: bool,
}

fn default_security() -> String {
    "none".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_true")]
    enable: bool,
    #[serde(default = "default_iface")]
    iface: String,
    ap_iface: Option<String>,
    #[serde(default)]
    dhcp_events: bool,
    #[serde(default)]
    save_mode: SaveMode,
    #[serde(default)]
    device: DeviceFile,
    ap: Option<ApFile>,
    #[serde(default)]
    profiles: Vec<ProfileFile>,
}

fn default_iface() -> String {
    "wlan0".into()
}

/// AP-mode setup after SSID substitution.
#[derive(Debug, Clone)]
pub struct ApSetup {
    pub enabled: bool,
    pub ssid: Ssid,
    pub channel: u8,
    pub ip_cidr: String,
    pub window: Option<Duration>,
    pub start_open: bool,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enable: bool,
    pub iface: String,
    pub ap_iface: String,
    /// Whether the environment delivers explicit network-up/down events.
    /// When false, association success goes straight to WAIT_CLIENT.
    pub dhcp_events: bool,
    pub save_mode: SaveMode,
    pub ap: Option<ApSetup>,
    pub profiles: Vec<Profile>,
}

/// Expands `$MAC` (colon-stripped) and `$DSN` in an AP SSID template.
fn substitute(template: &str, device: &DeviceFile) -> String {
    template
        .replace("$MAC", &device.mac.replace(':', ""))
        .replace("$DSN", &device.dsn)
}

pub fn from_toml_str(s: &str) -> Result<Config> {
    let file: ConfigFile = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;

    let mut profiles = Vec::with_capacity(file.profiles.len());
    for pf in &file.profiles {
        let security = Security::from_name(&pf.security)?;
        let key = Key::new(pf.key.as_bytes())?;
        let mut p = Profile::new(pf.ssid.parse()?, security, key)?;
        p.enabled = pf.enabled;
        p.hidden = pf.hidden;
        profiles.push(p);
    }

    let ap = match &file.ap {
        Some(apf) => {
            let ssid: Ssid = substitute(&apf.ssid, &file.device).parse()?;
            Some(ApSetup {
                enabled: apf.enabled,
                ssid,
                channel: apf.channel,
                ip_cidr: apf.ip.clone(),
                window: apf.window_secs.map(Duration::from_secs),
                start_open: apf.start_open,
                secure: apf.secure,
            })
        }
        None => None,
    };

    Ok(Config {
        enable: file.enable,
        ap_iface: file.ap_iface.clone().unwrap_or_else(|| file.iface.clone()),
        iface: file.iface,
        dhcp_events: file.dhcp_events,
        save_mode: file.save_mode,
        ap,
        profiles,
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            iface: default_iface(),
            ap_iface: default_iface(),
            dhcp_events: false,
            save_mode: SaveMode::default(),
            ap: None,
            profiles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let cfg = from_toml_str(
            r#"
            enable = true
            iface = "wlan0"
            dhcp_events = true
            save_mode = "on-cloud-up"

            [device]
            mac = "00:11:22:33:44:55"
            dsn = "AC000W000000001"

            [ap]
            enabled = true
            ssid = "SETUP-$DSN"
            channel = 11
            window_secs = 120
            start_open = true
            secure = true

            [[profiles]]
            ssid = "Home"
            security = "wpa2"
            key = "password"

            [[profiles]]
            ssid = "Guest"
            security = "none"
            enabled = false
            "#,
        )
        .unwrap();

        assert!(cfg.enable);
        assert!(cfg.dhcp_events);
        assert_eq!(cfg.save_mode, SaveMode::OnCloudUp);
        let ap = cfg.ap.unwrap();
        assert_eq!(ap.ssid.to_string(), "SETUP-AC000W000000001");
        assert_eq!(ap.channel, 11);
        assert_eq!(ap.window, Some(Duration::from_secs(120)));
        assert!(ap.secure);
        assert_eq!(cfg.profiles.len(), 2);
        assert!(cfg.profiles[0].enabled);
        assert!(!cfg.profiles[1].enabled);
    }

    #[test]
    fn mac_substitution_strips_colons() {
        let cfg = from_toml_str(
            r#"
            [device]
            mac = "00:11:22:33:44:55"

            [ap]
            ssid = "AP-$MAC"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ap.unwrap().ssid.to_string(), "AP-001122334455");
    }

    #[test]
    fn invalid_profile_key_rejected() {
        let err = from_toml_str(
            r#"
            [[profiles]]
            ssid = "Home"
            security = "wpa2"
            key = "short"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn defaults_apply() {
        let cfg = from_toml_str("").unwrap();
        assert!(cfg.enable);
        assert_eq!(cfg.iface, "wlan0");
        assert_eq!(cfg.save_mode, SaveMode::OnConnect);
        assert!(cfg.ap.is_none());
    }
}

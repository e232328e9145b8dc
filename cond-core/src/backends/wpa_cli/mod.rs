//! Shell-driven backend: wpa_supplicant/wpa_cli for the station role,
//! hostapd + dnsmasq for the AP role, udhcpc for addressing.
//! 通过 wpa_cli 轮询驱动，无 D-Bus 依赖。

use crate::ops::{AssocDone, OpOutcome, ScanDone, WpsDone};
use crate::scan::{BssType, ScanResult};
use crate::traits::{ApParams, AssocTarget, PlatformDriver};
use crate::types::{Bssid, Key, Security, Ssid, WifiErr};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Settle time between triggering a scan and reading results.
const SCAN_SETTLE: Duration = Duration::from_secs(5);
/// Association status polls, one second apart.
const ASSOC_POLLS: u32 = 25;
/// WPS status polls, two seconds apart.
const WPS_POLLS: u32 = 55;

pub struct WpaCliDriver {
    iface: String,
    ap_iface: String,
    hostapd: Mutex<Option<Child>>,
    dnsmasq: Mutex<Option<Child>>,
    station: AtomicBool,
    ap: AtomicBool,
    assoc_cancel: Arc<AtomicBool>,
    wps_active: Arc<AtomicBool>,
}

impl WpaCliDriver {
    pub fn new(iface: &str, ap_iface: &str) -> Self {
        Self {
            iface: iface.to_string(),
            ap_iface: ap_iface.to_string(),
            hostapd: Mutex::new(None),
            dnsmasq: Mutex::new(None),
            station: AtomicBool::new(false),
            ap: AtomicBool::new(false),
            assoc_cancel: Arc::new(AtomicBool::new(false)),
            wps_active: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn wpa_cli(iface: &str, args: &[&str]) -> Result<String> {
        let output = Command::new("wpa_cli").arg("-i").arg(iface).args(args).output().await?;
        if !output.status.success() {
            return Err(Error::Driver(format!(
                "wpa_cli {:?}: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parses `wpa_cli scan_results` output (bssid / frequency / signal
    /// level / flags / ssid, tab separated, one header line).
    fn parse_scan_results(output: &str) -> Vec<ScanResult> {
        let mut results = Vec::new();
        for line in output.lines().skip(1) {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 5 {
                continue;
            }
            let Ok(bssid) = parts[0].parse::<Bssid>() else { continue };
            let freq: u32 = parts[1].parse().unwrap_or(0);
            let signal: i16 = parts[2].parse().unwrap_or(-100);
            let flags = parts[3];
            let Ok(ssid) = unescape_ssid(parts[4]) else { continue };
            if ssid.is_empty() {
                continue;
            }
            results.push(ScanResult {
                bssid,
                ssid,
                channel: freq_to_channel(freq),
                signal,
                securities: parse_flags(flags),
                bss_type: if flags.contains("[IBSS]") {
                    BssType::AdHoc
                } else {
                    BssType::Infrastructure
                },
                wps: flags.contains("[WPS"),
                seen: tokio::time::Instant::now(),
            });
        }
        results
    }
}

/// Frequency in MHz to channel number.
fn freq_to_channel(mhz: u32) -> u8 {
    match mhz {
        2412..=2472 => ((mhz - 2407) / 5) as u8,
        2484 => 14,
        5170..=5825 => ((mhz - 5000) / 5) as u8,
        _ => 0,
    }
}

/// wpa_cli escapes non-printable SSID bytes as `\xNN`.
fn unescape_ssid(s: &str) -> Result<Ssid> {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'x') {
            chars.next();
            let hi = chars.next().and_then(|c| c.to_digit(16));
            let lo = chars.next().and_then(|c| c.to_digit(16));
            if let (Some(hi), Some(lo)) = (hi, lo) {
                bytes.push((hi * 16 + lo) as u8);
                continue;
            }
            return Err(Error::Driver(format!("bad SSID escape in {:?}", s)));
        }
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
    Ssid::new(&bytes)
}

/// One security descriptor per advertised mode in the flags column,
/// e.g. `[WPA2-PSK-CCMP][WPA-PSK-TKIP][ESS]`.
fn parse_flags(flags: &str) -> Vec<Security> {
    let mut out = Vec::new();
    for group in flags.split(['[', ']']).filter(|g| !g.is_empty()) {
        let cipher = if group.contains("CCMP") {
            Security::CCMP
        } else if group.contains("TKIP") {
            Security::TKIP
        } else {
            0
        };
        if group.starts_with("WPA2") && group.contains("PSK") {
            out.push(Security::wpa2_psk(cipher));
        } else if group.starts_with("WPA-") && group.contains("PSK") {
            out.push(Security::wpa_psk(cipher));
        } else if group.starts_with("WEP") {
            out.push(Security::wep());
        }
    }
    if out.is_empty() {
        out.push(Security::open());
    }
    out
}

fn quoted(bytes: &[u8]) -> String {
    format!("\"{}\"", String::from_utf8_lossy(bytes))
}

/// wpa_supplicant takes ASCII WEP keys quoted and hex keys bare.
fn wep_key_arg(key: &Key) -> String {
    let k = key.as_bytes();
    if matches!(k.len(), 10 | 26) && k.iter().all(u8::is_ascii_hexdigit) {
        String::from_utf8_lossy(k).into_owned()
    } else {
        quoted(k)
    }
}

#[async_trait]
impl PlatformDriver for WpaCliDriver {
    async fn station_start(&self) -> Result<()> {
        // 清理残留进程后重新拉起 wpa_supplicant
        let _ = Command::new("killall").arg("-9").arg("wpa_supplicant").status().await;
        Command::new("wpa_supplicant")
            .arg("-B")
            .arg(format!("-i{}", self.iface))
            .arg("-c/etc/wpa_supplicant.conf")
            .spawn()?;
        self.station.store(true, Ordering::SeqCst);
        info!(iface = %self.iface, "wpa_supplicant started");
        Ok(())
    }

    async fn station_stop(&self) -> Result<()> {
        let _ = Self::wpa_cli(&self.iface, &["terminate"]).await;
        self.station.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn station_enabled(&self) -> bool {
        self.station.load(Ordering::SeqCst)
    }

    async fn ap_start(&self, params: &ApParams) -> Result<()> {
        let output = Command::new("ip")
            .args(["addr", "add", &params.ip_cidr, "dev", &self.ap_iface])
            .output()
            .await?;
        if !output.status.success() {
            let msg = String::from_utf8_lossy(&output.stderr);
            if !msg.contains("File exists") {
                return Err(Error::Driver(format!("set AP address: {}", msg)));
            }
        }

        let conf = format!(
            "interface={}\nssid={}\nchannel={}\n",
            self.ap_iface, params.ssid, params.channel
        );
        tokio::fs::write("/tmp/cond-hostapd.conf", conf).await?;
        let child = Command::new("hostapd").arg("/tmp/cond-hostapd.conf").spawn()?;
        *self.hostapd.lock().await = Some(child);

        let gw = params.ip_cidr.split('/').next().unwrap_or_default();
        let dnsmasq = Command::new("dnsmasq")
            .arg(format!("--interface={}", self.ap_iface))
            .arg("--dhcp-range=192.168.0.100,192.168.0.200,12h")
            .arg(format!("--address=/#/{}", gw))
            .arg("--no-resolv")
            .arg("--no-hosts")
            .arg("--no-daemon")
            .spawn()?;
        *self.dnsmasq.lock().await = Some(dnsmasq);
        self.ap.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ap_stop(&self) -> Result<()> {
        if let Some(mut child) = self.dnsmasq.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Some(mut child) = self.hostapd.lock().await.take() {
            let _ = child.kill().await;
        }
        self.ap.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ap_enabled(&self) -> bool {
        self.ap.load(Ordering::SeqCst)
    }

    async fn ap_stations_connected(&self) -> usize {
        // hostapd_cli not always present; report none rather than fail.
        0
    }

    async fn scan(&self, hidden: Option<Ssid>, done: ScanDone) -> Result<()> {
        let trigger = match &hidden {
            // Directed probe for one hidden SSID.
            Some(ssid) => {
                Self::wpa_cli(&self.iface, &["scan", &format!("ssid {}", ssid)]).await
            }
            None => Self::wpa_cli(&self.iface, &["scan"]).await,
        };
        if let Err(e) = trigger {
            return Err(e);
        }
        let iface = self.iface.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SCAN_SETTLE).await;
            match Self::wpa_cli(&iface, &["scan_results"]).await {
                Ok(out) => {
                    let results = Self::parse_scan_results(&out);
                    debug!(count = results.len(), "scan_results parsed");
                    done.complete(OpOutcome::Success, results);
                }
                Err(e) => {
                    warn!(error = %e, "scan_results failed");
                    done.complete(OpOutcome::Failure(WifiErr::Time), Vec::new());
                }
            }
        });
        Ok(())
    }

    async fn associate(&self, target: AssocTarget, done: AssocDone) -> Result<()> {
        let id = Self::wpa_cli(&self.iface, &["add_network"]).await?;
        let id = id.trim().to_string();
        if id.parse::<u32>().is_err() {
            return Err(Error::Driver(format!("add_network returned {:?}", id)));
        }

        let ssid = quoted(target.ssid.as_bytes());
        Self::wpa_cli(&self.iface, &["set_network", &id, "ssid", &ssid]).await?;
        if target.hidden {
            Self::wpa_cli(&self.iface, &["set_network", &id, "scan_ssid", "1"]).await?;
        }
        if target.security.is_open() {
            Self::wpa_cli(&self.iface, &["set_network", &id, "key_mgmt", "NONE"]).await?;
        } else if target.security.has(Security::WEP) {
            // WEP runs without WPA key management.
            Self::wpa_cli(&self.iface, &["set_network", &id, "key_mgmt", "NONE"]).await?;
            let key = wep_key_arg(&target.key);
            Self::wpa_cli(&self.iface, &["set_network", &id, "wep_key0", &key]).await?;
            Self::wpa_cli(&self.iface, &["set_network", &id, "wep_tx_keyidx", "0"]).await?;
        } else {
            let psk = quoted(target.key.as_bytes());
            Self::wpa_cli(&self.iface, &["set_network", &id, "psk", &psk]).await?;
        }
        Self::wpa_cli(&self.iface, &["select_network", &id]).await?;

        self.assoc_cancel.store(false, Ordering::SeqCst);
        let cancel = Arc::clone(&self.assoc_cancel);
        let iface = self.iface.clone();
        tokio::spawn(async move {
            for _ in 0..ASSOC_POLLS {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if cancel.load(Ordering::SeqCst) {
                    let _ = Self::wpa_cli(&iface, &["remove_network", &id]).await;
                    done.complete(OpOutcome::Canceled);
                    return;
                }
                let status = match Self::wpa_cli(&iface, &["status"]).await {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if status.contains("wpa_state=COMPLETED") {
                    // 关联成功后台获取地址
                    let _ = Command::new("udhcpc").arg("-i").arg(&iface).arg("-b").spawn();
                    done.complete(OpOutcome::Success);
                    return;
                }
                if status.contains("reason=WRONG_KEY")
                    || status.contains("HANDSHAKE_FAILED")
                {
                    let _ = Self::wpa_cli(&iface, &["remove_network", &id]).await;
                    done.complete(OpOutcome::Failure(WifiErr::WrongKey));
                    return;
                }
            }
            let _ = Self::wpa_cli(&iface, &["remove_network", &id]).await;
            done.complete(OpOutcome::Failure(WifiErr::Time));
        });
        Ok(())
    }

    async fn associate_cancel(&self) {
        self.assoc_cancel.store(true, Ordering::SeqCst);
    }

    async fn leave_network(&self) {
        let _ = Self::wpa_cli(&self.iface, &["disconnect"]).await;
    }

    async fn wps_start(&self, done: WpsDone) -> Result<()> {
        Self::wpa_cli(&self.iface, &["wps_pbc"]).await?;
        self.wps_active.store(true, Ordering::SeqCst);
        let active = Arc::clone(&self.wps_active);
        let iface = self.iface.clone();
        tokio::spawn(async move {
            for _ in 0..WPS_POLLS {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if !active.load(Ordering::SeqCst) {
                    done.complete(OpOutcome::Canceled, None);
                    return;
                }
                if let Ok(status) = Self::wpa_cli(&iface, &["status"]).await {
                    if status.contains("wpa_state=COMPLETED") {
                        // wpa_supplicant holds the provisioned credentials;
                        // a rescan will find the network.
                        active.store(false, Ordering::SeqCst);
                        done.complete(OpOutcome::Success, None);
                        return;
                    }
                }
            }
            active.store(false, Ordering::SeqCst);
            done.complete(OpOutcome::Failure(WifiErr::Time), None);
        });
        Ok(())
    }

    async fn wps_cancel(&self) {
        self.wps_active.store(false, Ordering::SeqCst);
        let _ = Self::wpa_cli(&self.iface, &["wps_cancel"]).await;
    }

    async fn wps_started(&self) -> bool {
        self.wps_active.load(Ordering::SeqCst)
    }

    fn simultaneous_ap_sta(&self) -> bool {
        // Single radio driven through one wpa_supplicant instance.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_scan_results_table() {
        let out = "bssid / frequency / signal level / flags / ssid\n\
                   aa:bb:cc:dd:ee:ff\t2437\t-52\t[WPA2-PSK-CCMP][WPS][ESS]\tHome\n\
                   11:22:33:44:55:66\t5180\t-70\t[ESS]\tOpenNet\n\
                   de:ad:be:ef:00:01\t2412\t-80\t[WPA-PSK-TKIP][ESS]\tcaf\\xc3\\xa9\n";
        let results = WpaCliDriver::parse_scan_results(out);
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].ssid.to_string(), "Home");
        assert_eq!(results[0].channel, 6);
        assert_eq!(results[0].signal, -52);
        assert!(results[0].wps);
        assert!(results[0].securities[0].has(Security::WPA2));

        assert_eq!(results[1].channel, 36);
        assert!(results[1].securities[0].is_open());

        assert_eq!(results[2].ssid.as_bytes(), b"caf\xc3\xa9");
        assert!(results[2].securities[0].has(Security::WPA));
    }

    #[test]
    fn channel_mapping() {
        assert_eq!(freq_to_channel(2412), 1);
        assert_eq!(freq_to_channel(2462), 11);
        assert_eq!(freq_to_channel(2484), 14);
        assert_eq!(freq_to_channel(5180), 36);
        assert_eq!(freq_to_channel(0), 0);
    }

    #[test]
    fn wep_key_quoting() {
        // ASCII keys are quoted, hex keys are passed bare.
        assert_eq!(wep_key_arg(&Key::new(b"12345").unwrap()), "\"12345\"");
        assert_eq!(wep_key_arg(&Key::new(b"hello WEP key").unwrap()), "\"hello WEP key\"");
        assert_eq!(wep_key_arg(&Key::new(b"abcdef1234").unwrap()), "abcdef1234");
        assert_eq!(
            wep_key_arg(&Key::new(b"0123456789abcdef0123456789").unwrap()),
            "0123456789abcdef0123456789"
        );
    }

    #[test]
    fn flags_multiple_modes() {
        let secs = parse_flags("[WPA2-PSK-CCMP][WPA-PSK-TKIP][ESS]");
        assert_eq!(secs.len(), 2);
        assert!(secs[0].has(Security::WPA2) && secs[0].has(Security::CCMP));
        assert!(secs[1].has(Security::WPA) && secs[1].has(Security::TKIP));
        assert!(parse_flags("[ESS]")[0].is_open());
    }
}

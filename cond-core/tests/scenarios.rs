//! Full-machine scenarios: the state machine driven end to end against
//! the scripted mock driver, with paused time so every watchdog and
//! window path runs instantly.

use cond_core::backends::mock::{Call, MockDriver};
use cond_core::config::{self, Config};
use cond_core::events::JoinSpec;
use cond_core::machine::Cond;
use cond_core::ops::OpOutcome;
use cond_core::scan::{BssType, ScanResult};
use cond_core::status::{Status, WpsState};
use cond_core::traits::WpsCredentials;
use cond_core::types::{Bssid, IpInfo, Key, Security, WifiErr};
use cond_core::Error;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn wpa2() -> Security {
    Security::wpa2_psk(Security::CCMP)
}

fn ap(ssid: &str, last: u8, signal: i16, sec: Security) -> ScanResult {
    ScanResult {
        bssid: Bssid([0x02, 0x11, 0x22, 0x33, 0x44, last]),
        ssid: ssid.parse().unwrap(),
        channel: 6,
        signal,
        securities: vec![sec],
        bss_type: BssType::Infrastructure,
        wps: false,
        seen: tokio::time::Instant::now(),
    }
}

fn cfg(toml: &str) -> Config {
    config::from_toml_str(toml).unwrap()
}

fn ip_info() -> IpInfo {
    IpInfo {
        addr: Ipv4Addr::new(192, 168, 1, 50),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        dns: vec![Ipv4Addr::new(8, 8, 8, 8)],
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<Status>,
    what: &str,
    pred: impl Fn(&Status) -> bool,
) -> Status {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            {
                let s = rx.borrow_and_update();
                if pred(&s) {
                    return s.clone();
                }
            }
            if rx.changed().await.is_err() {
                let s = rx.borrow().clone();
                assert!(pred(&s), "status channel closed waiting for {}", what);
                return s;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn wait_state(rx: &mut watch::Receiver<Status>, want: &'static str) -> Status {
    wait_for(rx, want, |s| s.state == want).await
}

const HOME_CONF: &str = r#"
    [[profiles]]
    ssid = "Home"
    security = "wpa2"
    key = "correct horse"
"#;

const AP_CONF: &str = r#"
    [device]
    dsn = "AC000W000000001"

    [ap]
    enabled = true
    ssid = "SETUP-$DSN"
    channel = 11
    window_secs = 300
    start_open = true
"#;

// Scenario A: no profiles, empty scan, AP window open at startup.
#[tokio::test(start_paused = true)]
async fn no_candidates_idles_and_starts_ap() {
    let driver = Arc::new(MockDriver::new());
    let handle = Cond::spawn(cfg(AP_CONF), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.ap_active);
    let params = driver.last_ap_params().unwrap();
    assert_eq!(params.ssid.to_string(), "SETUP-AC000W000000001");
    assert_eq!(params.channel, 11);
    assert_eq!(driver.call_count(Call::Associate), 0);
}

// Scenario B: one matching profile joins through to UP.
#[tokio::test(start_paused = true)]
async fn join_flow_reaches_up() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    handle.network_up(true, Some(ip_info())).unwrap();
    handle.cloud_up(true).unwrap();

    let s = wait_state(&mut rx, "UP").await;
    assert_eq!(s.connected_ssid.unwrap().to_string(), "Home");
    assert_eq!(s.signal, Some(-40));
    assert_eq!(s.bars, 5);
    assert_eq!(s.history.len(), 1);
    assert_eq!(s.history[0].error, WifiErr::None);
    assert_eq!(s.history[0].ip.as_ref().unwrap().addr, Ipv4Addr::new(192, 168, 1, 50));
    assert_eq!(driver.call_count(Call::Associate), 1);
}

// Scenario C: repeated failures exhaust the try limit, counters reset,
// machine idles instead of thrashing.
#[tokio::test(start_paused = true)]
async fn join_failures_exhaust_and_reset() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    driver.set_assoc_default(Some(OpOutcome::Failure(WifiErr::WrongKey)));
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert_eq!(driver.call_count(Call::Associate), 3);
    assert_eq!(s.history[0].error, WifiErr::WrongKey);
    assert_eq!(driver.call_count(Call::LeaveNetwork), 3);
}

// Scenario D: an explicit connect while UP preempts the current
// association and is attempted next regardless of signal.
#[tokio::test(start_paused = true)]
async fn connect_request_preempts_current() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2()), ap("Other", 2, -75, wpa2())]);
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    handle.network_up(true, None).unwrap();
    handle.cloud_up(true).unwrap();
    wait_state(&mut rx, "UP").await;

    handle
        .connect(JoinSpec {
            ssid: "Other".parse().unwrap(),
            security: Some(wpa2()),
            key: Key::new(b"other-passphrase").unwrap(),
            hidden: false,
        })
        .await
        .unwrap();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    let target = driver.last_assoc_target().unwrap();
    assert_eq!(target.ssid.to_string(), "Other");
    assert_eq!(driver.call_count(Call::Associate), 2);
}

// A preferred profile gets its lower try limit, then selection falls
// back to signal order.
#[tokio::test(start_paused = true)]
async fn preferred_limit_then_fallback() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2()), ap("Other", 2, -60, wpa2())]);
    driver.push_assoc(Some(OpOutcome::Failure(WifiErr::WrongKey)));
    driver.push_assoc(Some(OpOutcome::Failure(WifiErr::WrongKey)));
    let conf = r#"
        [[profiles]]
        ssid = "Home"
        security = "wpa2"
        key = "correct horse"

        [[profiles]]
        ssid = "Other"
        security = "wpa2"
        key = "battery staple"
    "#;
    let handle = Cond::spawn(cfg(conf), driver.clone());
    let mut rx = handle.status_watch();

    // Pin "Other" despite its weaker signal.
    handle
        .connect(JoinSpec {
            ssid: "Other".parse().unwrap(),
            security: None,
            key: Key::default(),
            hidden: false,
        })
        .await
        .unwrap();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    // Two preferred attempts at Other, then fallback to Home.
    assert_eq!(driver.call_count(Call::Associate), 3);
    assert_eq!(driver.last_assoc_target().unwrap().ssid.to_string(), "Home");
}

// A driver that never completes the associate is settled by the join
// watchdog and retried.
#[tokio::test(start_paused = true)]
async fn join_watchdog_synthesizes_timeout() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    driver.push_assoc(None); // hang
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "WAIT_CLIENT").await;
    assert_eq!(driver.call_count(Call::Associate), 2);
    assert!(driver.call_count(Call::AssociateCancel) >= 1);
    assert_eq!(s.history.len(), 2);
    assert_eq!(s.history[1].error, WifiErr::Time);
    assert_eq!(s.history[0].error, WifiErr::InProgress);
}

// DHCP is a distinct state only when the environment delivers explicit
// network-up/down events.
#[tokio::test(start_paused = true)]
async fn dhcp_state_with_explicit_network_events() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let conf = format!("dhcp_events = true\n{}", HOME_CONF);
    let handle = Cond::spawn(cfg(&conf), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "DHCP").await;
    handle.network_up(true, Some(ip_info())).unwrap();
    wait_state(&mut rx, "WAIT_CLIENT").await;
    handle.cloud_up(true).unwrap();
    wait_state(&mut rx, "UP").await;

    // Network loss while UP goes back to address acquisition.
    handle.network_up(false, None).unwrap();
    wait_state(&mut rx, "DHCP").await;
    handle.network_up(true, None).unwrap();
    handle.cloud_up(true).unwrap();
    wait_state(&mut rx, "UP").await;
}

#[tokio::test(start_paused = true)]
async fn dhcp_timeout_records_no_ip() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let conf = format!("dhcp_events = true\n{}", HOME_CONF);
    let handle = Cond::spawn(cfg(&conf), driver.clone());
    let mut rx = handle.status_watch();

    wait_for(&mut rx, "NO_IP history", |s| {
        s.history.iter().any(|e| e.error == WifiErr::NoIp)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn cloud_timeout_records_client_time() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    handle.network_up(true, None).unwrap();
    // No cloud signal: the client deadline fires.
    wait_for(&mut rx, "CLIENT_TIME history", |s| {
        s.history.iter().any(|e| e.error == WifiErr::ClientTime)
    })
    .await;
}

// Safety: shutdown from any state lands in DISABLED with the radio off.
#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    handle.shutdown().unwrap();
    let s = wait_state(&mut rx, "DISABLED").await;
    assert!(!s.ap_active);
    assert_eq!(driver.call_count(Call::StationStop), 1);
}

// Idempotence: disabling from SELECT/IDLE mutates no counters and no
// history; a second disable is a no-op.
#[tokio::test(start_paused = true)]
async fn disable_when_not_associated_is_clean() {
    let driver = Arc::new(MockDriver::new());
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "IDLE").await;
    handle.enable_changed(false).unwrap();
    let s = wait_state(&mut rx, "DISABLED").await;
    assert!(s.history.is_empty());
    assert_eq!(driver.call_count(Call::LeaveNetwork), 0);

    handle.enable_changed(false).unwrap();
    let calls = driver.call_count(Call::StationStop);
    handle.enable_changed(true).unwrap();
    wait_state(&mut rx, "IDLE").await;
    assert_eq!(driver.call_count(Call::StationStop), calls);
}

// Validation errors resolve synchronously and leave the machine alone.
#[tokio::test(start_paused = true)]
async fn connect_validation_rejects() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();
    wait_state(&mut rx, "IDLE").await;

    let bad_key = handle
        .connect(JoinSpec {
            ssid: "Home".parse().unwrap(),
            security: Some(wpa2()),
            key: Key::new(b"short").unwrap(),
            hidden: false,
        })
        .await;
    assert!(matches!(bad_key, Err(Error::InvalidKey(_))));

    let unseen = handle
        .connect(JoinSpec {
            ssid: "Nowhere".parse().unwrap(),
            security: Some(wpa2()),
            key: Key::new(b"a valid key").unwrap(),
            hidden: false,
        })
        .await;
    assert!(matches!(unseen, Err(Error::NotFound(_))));

    let s = rx.borrow().clone();
    assert!(s.profiles.is_empty());
    assert_eq!(driver.call_count(Call::Associate), 0);
}

// A secure window closes as soon as credentials exist, with a delayed
// AP stop.
#[tokio::test(start_paused = true)]
async fn secure_window_closes_on_credentials() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let conf = r#"
        save_mode = "on-add"

        [ap]
        enabled = true
        ssid = "SETUP"
        start_open = true
        secure = true
    "#;
    let handle = Cond::spawn(cfg(conf), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.ap_active);

    handle
        .connect(JoinSpec {
            ssid: "Home".parse().unwrap(),
            security: Some(wpa2()),
            key: Key::new(b"correct horse").unwrap(),
            hidden: false,
        })
        .await
        .unwrap();

    let s = wait_for(&mut rx, "AP stopped", |s| !s.ap_active).await;
    // on-add committed the profile; keys are not exported.
    assert_eq!(s.profiles.len(), 1);
    assert_eq!(s.profiles[0].ssid.to_string(), "Home");
    assert_eq!(driver.call_count(Call::ApStop), 1);
}

// Without simultaneous AP+station support the AP is torn down before
// the radio associates.
#[tokio::test(start_paused = true)]
async fn time_multiplexed_radio_stops_ap_before_join() {
    let driver = Arc::new(MockDriver::time_multiplexed());
    let handle = Cond::spawn(cfg(AP_CONF), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.ap_active);

    handle
        .connect(JoinSpec {
            ssid: "Hidden".parse().unwrap(),
            security: Some(wpa2()),
            key: Key::new(b"correct horse").unwrap(),
            hidden: true,
        })
        .await
        .unwrap();

    wait_state(&mut rx, "WAIT_CLIENT").await;
    let calls = driver.calls();
    let ap_stop = calls.iter().position(|&c| c == Call::ApStop).unwrap();
    let assoc = calls.iter().position(|&c| c == Call::Associate).unwrap();
    assert!(ap_stop < assoc, "AP must stop before associate: {:?}", calls);
}

// WPS success stages the provisioned credentials and joins them next.
#[tokio::test(start_paused = true)]
async fn wps_provisions_and_joins() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    driver.push_wps(Some((
        OpOutcome::Success,
        Some(WpsCredentials {
            ssid: "Home".parse().unwrap(),
            security: wpa2(),
            key: Key::new(b"wps provisioned key").unwrap(),
        }),
    )));
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();
    wait_state(&mut rx, "IDLE").await;

    handle.wps_request().await.unwrap();
    let s = wait_state(&mut rx, "WAIT_CLIENT").await;
    assert_eq!(s.wps, WpsState::Success);
    assert_eq!(driver.last_assoc_target().unwrap().ssid.to_string(), "Home");
}

// WPS that never completes is settled by its walk-time watchdog.
#[tokio::test(start_paused = true)]
async fn wps_watchdog_fires() {
    let driver = Arc::new(MockDriver::new());
    driver.push_wps(None); // hang
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();
    wait_state(&mut rx, "IDLE").await;

    handle.wps_request().await.unwrap();
    let s = wait_for(&mut rx, "WPS failure", |s| s.wps == WpsState::Failure).await;
    assert_eq!(s.history[0].error, WifiErr::Time);
    assert!(driver.call_count(Call::WpsCancel) >= 1);
}

// Critical driver errors put the machine in ERR, then shut it down
// after the cooldown.
#[tokio::test(start_paused = true)]
async fn critical_error_cools_down_and_shuts_down() {
    let driver = Arc::new(MockDriver::new());
    driver.reject_station_start();
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();

    wait_state(&mut rx, "ERR").await;
    wait_state(&mut rx, "DISABLED").await;
}

// Deleting the current profile tears the association down; deleting an
// unknown SSID is a clean error.
#[tokio::test(start_paused = true)]
async fn delete_current_profile_reselects() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let handle = Cond::spawn(cfg(HOME_CONF), driver.clone());
    let mut rx = handle.status_watch();
    wait_state(&mut rx, "WAIT_CLIENT").await;

    assert!(matches!(
        handle.delete("Missing".parse().unwrap()).await,
        Err(Error::NotFound(_))
    ));

    handle.delete("Home".parse().unwrap()).await.unwrap();
    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.profiles.is_empty());
    assert!(driver.call_count(Call::LeaveNetwork) >= 1);
}

// Factory reset clears profiles and history and re-opens the window.
#[tokio::test(start_paused = true)]
async fn factory_reset_clears_and_reopens_window() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![ap("Home", 1, -40, wpa2())]);
    let conf = format!("{}\n{}", AP_CONF, HOME_CONF);
    let handle = Cond::spawn(cfg(&conf), driver.clone());
    let mut rx = handle.status_watch();
    wait_state(&mut rx, "WAIT_CLIENT").await;

    handle.factory_reset().unwrap();
    let s = wait_for(&mut rx, "reset to IDLE", |s| {
        s.state == "IDLE" && s.profiles.is_empty() && s.history.is_empty()
    })
    .await;
    assert!(s.ap_active);
}

// An AP setup without window_secs keeps its window open indefinitely.
#[tokio::test(start_paused = true)]
async fn omitted_window_duration_is_indefinite() {
    let driver = Arc::new(MockDriver::new());
    let conf = r#"
        [ap]
        enabled = true
        ssid = "SETUP"
        start_open = true
    "#;
    let handle = Cond::spawn(cfg(conf), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.ap_active);

    tokio::time::sleep(Duration::from_secs(310)).await;
    assert!(handle.status().ap_active);
    assert_eq!(driver.call_count(Call::ApStop), 0);
}

// A bounded window closes on its timer, with the delayed AP stop.
#[tokio::test(start_paused = true)]
async fn configured_window_duration_closes_ap() {
    let driver = Arc::new(MockDriver::new());
    let handle = Cond::spawn(cfg(AP_CONF), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_state(&mut rx, "IDLE").await;
    assert!(s.ap_active);

    let s = wait_for(&mut rx, "AP stopped", |s| !s.ap_active).await;
    assert_eq!(s.state, "IDLE");
    assert_eq!(driver.call_count(Call::ApStop), 1);
}

// Status carries the ordered scan list with labels and never any keys.
#[tokio::test(start_paused = true)]
async fn status_scan_list_is_ordered() {
    let driver = Arc::new(MockDriver::new());
    driver.set_scan_default(vec![
        ap("Weak", 1, -80, Security::open()),
        ap("Strong", 2, -45, wpa2()),
    ]);
    let handle = Cond::spawn(cfg(""), driver.clone());
    let mut rx = handle.status_watch();

    let s = wait_for(&mut rx, "scan results", |s| s.scan.len() == 2).await;
    assert_eq!(s.scan[0].ssid.to_string(), "Strong");
    assert_eq!(s.scan[0].security, "WPA2 Personal");
    assert_eq!(s.scan[0].bars, 5);
    assert_eq!(s.scan[1].ssid.to_string(), "Weak");
    assert_eq!(s.scan[1].security, "None");
}

use anyhow::Context;
use cond_core::config;
use cond_core::machine::Cond;
use cond_core::traits::PlatformDriver;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONF: &str = "/etc/cond.toml";

// --- 后端选择（编译期） ---

#[cfg(all(feature = "backend_mock", not(feature = "backend_wpa_cli")))]
fn get_driver(_cfg: &config::Config) -> Arc<dyn PlatformDriver> {
    info!("using mock driver");
    Arc::new(cond_core::backends::mock::MockDriver::new())
}

#[cfg(feature = "backend_wpa_cli")]
fn get_driver(cfg: &config::Config) -> Arc<dyn PlatformDriver> {
    info!(iface = %cfg.iface, "using wpa_cli driver");
    Arc::new(cond_core::backends::wpa_cli::WpaCliDriver::new(&cfg.iface, &cfg.ap_iface))
}

#[cfg(not(any(feature = "backend_mock", feature = "backend_wpa_cli")))]
compile_error!(
    "No backend feature selected. Build with e.g. --features cond-daemon/backend_wpa_cli"
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONF.to_string());
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path))?;
    let cfg = config::from_toml_str(&raw).with_context(|| format!("parsing {}", path))?;

    let driver = get_driver(&cfg);
    let handle = Cond::spawn(cfg, driver);

    // Log state transitions until we are told to stop.
    let mut status = handle.status_watch();
    let watcher = tokio::spawn(async move {
        let mut last = status.borrow().state;
        while status.changed().await.is_ok() {
            let s = status.borrow().clone();
            if s.state != last {
                info!(state = s.state, ssid = ?s.connected_ssid.map(|s| s.to_string()), "state");
                last = s.state;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("signal received, shutting down");
    let _ = handle.shutdown();
    watcher.abort();
    Ok(())
}

//! Platform driver backends. The mock driver is always built; hardware
//! backends are selected by feature flags.

pub mod mock;

#[cfg(feature = "backend_wpa_cli")]
pub mod wpa_cli;

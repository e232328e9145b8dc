//! Policy deciding whether fallback/concurrent AP mode is currently
//! permitted. A window is duration-bound, indefinite, or (in secure mode)
//! lasts only until a station profile becomes enabled.

use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct ApWindow {
    /// Close the window as soon as real credentials exist.
    secure: bool,
    /// Duration for opens that do not specify one; `None` = indefinite.
    default_duration: Option<Duration>,
    open: bool,
}

impl ApWindow {
    pub fn new(secure: bool, default_duration: Option<Duration>) -> Self {
        Self { secure, default_duration, open: false }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Opens the window. Returns the duration after which it must close,
    /// or `None` for an indefinite window; the caller arms the timer.
    pub fn open(&mut self, duration: Option<Duration>) -> Option<Duration> {
        self.open = true;
        let d = duration.or(self.default_duration);
        info!(duration = ?d, "AP window open");
        d
    }

    pub fn close(&mut self) {
        if self.open {
            info!("AP window closed");
        }
        self.open = false;
    }

    /// Called whenever the set of enabled station profiles may have
    /// changed. In secure mode the window closes the instant credentials
    /// exist; returns true when this call closed it.
    pub fn profile_enabled_hook(&mut self, any_station_enabled: bool) -> bool {
        if self.secure && self.open && any_station_enabled {
            self.close();
            true
        } else {
            false
        }
    }
}

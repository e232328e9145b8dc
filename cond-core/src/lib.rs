//! Core library for the Wi-Fi connection manager daemon.
//!
//! This crate holds the connection state machine and the data stores it
//! arbitrates (profiles, scan cache, history), the async-operation
//! primitive used for scan/associate/WPS, and the `PlatformDriver` trait
//! implemented by the hardware backends selected by feature flags.

pub mod ap_window;
pub mod backends;
pub mod config;
pub mod events;
pub mod history;
pub mod machine;
pub mod ops;
pub mod profile;
pub mod scan;
pub mod status;
pub mod timer;
pub mod traits;
pub mod types;

use thiserror::Error;

/// Errors returned synchronously to the originator of a request.
///
/// Join failures discovered after a request was accepted are not `Error`s;
/// they are recorded as a [`types::WifiErr`] in the history log and drive
/// the state machine back to candidate selection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation already in progress")]
    Busy,

    #[error("wifi is disabled")]
    Disabled,

    #[error("profile table is full")]
    TableFull,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("driver rejected request: {0}")]
    Driver(String),

    #[error("manager is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Controller API
//!
//! Operations a supervisor (the watchdog, `main`, a GUI) may invoke on a heart
//! rate session.
use crate::model::device::DeviceDescriptor;
use async_trait::async_trait;
use thiserror::Error;

/// Failures of [`SessionApi::reinitiate`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no heart rate device found")]
    NoDeviceFound,
    /// The adapter may be busy or powered off.
    #[error("could not open {0}; check that Bluetooth is on and the device is not in use")]
    ServiceUnavailable(String),
    #[error("{0} has no heart rate measurement characteristic")]
    CharacteristicNotFound(String),
    #[error("session has been disposed")]
    Disposed,
    #[error("bluetooth error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// SessionApi trait
///
/// Lifecycle of the single live heart rate connection.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Tear down any connection and establish a new one from scratch.
    ///
    /// # Returns
    /// The device the new connection is open to.
    async fn reinitiate(&self) -> Result<DeviceDescriptor, SessionError>;

    /// Permanently shut the session down. Idempotent.
    async fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

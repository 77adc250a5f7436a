//! Transport API
//!
//! The capabilities the session needs from a Bluetooth LE stack: enumerate
//! heart rate devices, open a device, look up a characteristic, enable and
//! receive notifications, and release the device again.
use crate::model::device::DeviceDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Receiver of raw characteristic values, invoked on the transport's task.
pub type ValueCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Outcome of enabling notifications. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyStatus {
    Enabled,
    Failed(String),
}

impl fmt::Display for NotifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyStatus::Enabled => write!(f, "enabled"),
            NotifyStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Transport trait
///
/// Asynchronous access to a BLE stack. Handles returned by `open_service` are
/// owned by the caller and must be given back through `dispose`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connected device handle.
    type Service: Send + Sync + 'static;
    /// Characteristic handle on a connected device.
    type Characteristic: Send + Sync + 'static;

    /// Enumerate devices advertising `service`, in transport order.
    async fn find_devices(&self, service: Uuid) -> Result<Vec<DeviceDescriptor>>;

    /// Open the device. `None` means it is unreachable or the adapter is busy.
    async fn open_service(&self, device: &DeviceDescriptor) -> Result<Option<Self::Service>>;

    /// Look up a characteristic on an opened device.
    async fn get_characteristic(
        &self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Option<Self::Characteristic>>;

    /// Ask the peripheral to start notifying value changes.
    async fn enable_notifications(
        &self,
        service: &Self::Service,
        characteristic: &Self::Characteristic,
    ) -> NotifyStatus;

    /// Route every value change of `characteristic` to `callback`.
    async fn on_value_changed(
        &self,
        service: &Self::Service,
        characteristic: &Self::Characteristic,
        callback: ValueCallback,
    ) -> Result<()>;

    /// Release the device and stop notification delivery. Idempotent.
    async fn dispose(&self, service: &Self::Service);
}

//! Heart Rate Session
//!
//! Owns the single live connection to a heart rate sensor. `reinitiate` and
//! `dispose` are the only code paths touching the connection slot, and both
//! run inside the same async mutex, so a watchdog-triggered reconnect and an
//! external shutdown can never leave two live handles behind.
use crate::api::controller::{SessionApi, SessionError};
use crate::api::transport::{NotifyStatus, Transport, ValueCallback};
use crate::components::bridge::NotificationBridge;
use crate::core::constants::{HEARTRATE_MEASUREMENT_UUID, HEARTRATE_SERVICE_UUID};
use crate::core::events::AppEvent;
use crate::model::device::{DeviceDescriptor, DeviceSelector};
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast::Sender;
use tokio::sync::Mutex;

/// The live subscription, exclusively owned by the session.
struct ConnectionHandle<T: Transport> {
    device: DeviceDescriptor,
    service: T::Service,
    connected_since: OffsetDateTime,
}

/// Guarded by the session mutex.
struct Slot<T: Transport> {
    disposed: bool,
    handle: Option<ConnectionHandle<T>>,
}

/// Snapshot of the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub device: DeviceDescriptor,
    pub connected_since: OffsetDateTime,
}

pub struct HeartRateSession<T: Transport> {
    transport: Arc<T>,
    bridge: Arc<NotificationBridge>,
    selector: DeviceSelector,
    slot: Mutex<Slot<T>>,
    /// Mirrors `Slot::disposed` for lock-free queries.
    disposed: AtomicBool,
    event_bus: Option<Sender<AppEvent>>,
}

impl<T: Transport> HeartRateSession<T> {
    /// Creates a disconnected session. Nothing happens until `reinitiate`.
    ///
    /// # Arguments
    /// - `transport`: The BLE stack to connect through.
    /// - `bridge`: Receiver of the raw notifications of every connection.
    pub fn new(transport: Arc<T>, bridge: Arc<NotificationBridge>) -> Self {
        Self {
            transport,
            bridge,
            selector: DeviceSelector::default(),
            slot: Mutex::new(Slot {
                disposed: false,
                handle: None,
            }),
            disposed: AtomicBool::new(false),
            event_bus: None,
        }
    }

    pub fn with_selector(mut self, selector: DeviceSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_event_bus(mut self, tx: Sender<AppEvent>) -> Self {
        self.event_bus = Some(tx);
        self
    }

    pub fn bridge(&self) -> &Arc<NotificationBridge> {
        &self.bridge
    }

    /// Returns the current connection, waiting for an in-flight reinitiate.
    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        let slot = self.slot.lock().await;
        slot.handle.as_ref().map(|handle| ConnectionInfo {
            device: handle.device.clone(),
            connected_since: handle.connected_since,
        })
    }

    fn publish(&self, event: AppEvent) {
        if let Some(tx) = &self.event_bus {
            // a bus without receivers is fine
            let _ = tx.send(event);
        }
    }

    async fn teardown(&self, slot: &mut Slot<T>) {
        if let Some(handle) = slot.handle.take() {
            self.transport.dispose(&handle.service).await;
            info!("Disconnected from {}.", handle.device);
        }
    }

    /// Opens `device` and wires its notifications into the bridge.
    async fn connect(&self, device: &DeviceDescriptor) -> Result<T::Service, SessionError> {
        let service = self
            .transport
            .open_service(device)
            .await?
            .ok_or_else(|| SessionError::ServiceUnavailable(device.to_string()))?;

        let characteristic = match self
            .transport
            .get_characteristic(&service, HEARTRATE_MEASUREMENT_UUID)
            .await
        {
            Ok(Some(characteristic)) => characteristic,
            Ok(None) => {
                self.transport.dispose(&service).await;
                return Err(SessionError::CharacteristicNotFound(device.to_string()));
            }
            Err(e) => {
                self.transport.dispose(&service).await;
                return Err(e.into());
            }
        };

        match self
            .transport
            .enable_notifications(&service, &characteristic)
            .await
        {
            NotifyStatus::Enabled => debug!("Notifications enabled on {}.", device),
            status => warn!("Enabling notifications on {}: {}", device, status),
        }

        let bridge = self.bridge.clone();
        let callback: ValueCallback = Arc::new(move |data: &[u8]| bridge.deliver(data));
        if let Err(e) = self
            .transport
            .on_value_changed(&service, &characteristic, callback)
            .await
        {
            self.transport.dispose(&service).await;
            return Err(e.into());
        }
        Ok(service)
    }
}

#[async_trait]
impl<T: Transport> SessionApi for HeartRateSession<T> {
    async fn reinitiate(&self) -> Result<DeviceDescriptor, SessionError> {
        trace!("Reinitiating heart rate session.");
        // discovery may take a while; dispose is not blocked meanwhile
        let candidates = self.transport.find_devices(HEARTRATE_SERVICE_UUID).await;

        let mut slot = self.slot.lock().await;
        if slot.disposed {
            return Err(SessionError::Disposed);
        }
        self.teardown(&mut slot).await;

        let candidates = candidates?;
        debug!("Found {} heart rate device(s).", candidates.len());
        let device = self
            .selector
            .select(&candidates)
            .ok_or(SessionError::NoDeviceFound)?
            .clone();

        let service = self.connect(&device).await?;
        slot.handle = Some(ConnectionHandle {
            device: device.clone(),
            service,
            connected_since: OffsetDateTime::now_utc(),
        });
        info!("Connected to {}.", device);
        self.publish(AppEvent::Connected(device.clone()));
        Ok(device)
    }

    async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        if !slot.disposed {
            slot.disposed = true;
            self.disposed.store(true, Ordering::SeqCst);
            self.publish(AppEvent::Disposed);
        }
        self.teardown(&mut slot).await;
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

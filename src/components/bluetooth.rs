//! Bluetooth Transport
//!
//! [`Transport`] implementation on top of `btleplug`. Handles scanning for heart
//! rate sensors, connecting, subscribing to the measurement characteristic and
//! forwarding its notifications to a callback on a tokio task.
use crate::api::transport::{NotifyStatus, Transport, ValueCallback};
use crate::model::device::DeviceDescriptor;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, Peripheral, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager};
use futures::StreamExt;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A connected peripheral together with its notification forwarding task.
#[derive(Debug)]
pub struct BluetoothService<P: Peripheral> {
    peripheral: P,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    subscribed: Mutex<Option<Characteristic>>,
    released: AtomicBool,
}

impl<P: Peripheral> BluetoothService<P> {
    fn new(peripheral: P) -> Self {
        Self {
            peripheral,
            listener_handle: Mutex::new(None),
            subscribed: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    fn replace_listener(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = match self.listener_handle.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = std::mem::replace(&mut *slot, handle) {
            old.abort();
        }
    }

    fn take_subscription(&self) -> Option<Characteristic> {
        match self.subscribed.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<P: Peripheral> Drop for BluetoothService<P> {
    /// Stops notification forwarding even if `dispose` was never called.
    fn drop(&mut self) {
        self.replace_listener(None);
    }
}

/// Manages Bluetooth operations on a single adapter.
///
/// # Type Parameters
/// - `A`: Bluetooth adapter type
#[derive(Debug)]
pub struct BluetoothTransport<A: Central + 'static> {
    adapter: A,
    scan_window: Duration,
}

impl<A: Central + 'static> BluetoothTransport<A> {
    /// Creates a transport scanning for `scan_window` before each enumeration.
    pub fn new(adapter: A, scan_window: Duration) -> Self {
        Self {
            adapter,
            scan_window,
        }
    }

    async fn find_peripheral(&self, address: BDAddr) -> Result<Option<A::Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.address() == address))
    }
}

impl BluetoothTransport<Adapter> {
    /// Opens the first adapter of the platform manager.
    pub async fn with_default_adapter(scan_window: Duration) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(anyhow!("no Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter {}.", adapter.adapter_info().await?);
        Ok(Self::new(adapter, scan_window))
    }
}

/// Builds a descriptor if the advertisement lists `service`.
fn descriptor_for(
    address: BDAddr,
    properties: &PeripheralProperties,
    service: Uuid,
) -> Option<DeviceDescriptor> {
    if !properties.services.contains(&service) {
        return None;
    }
    Some(DeviceDescriptor::new(
        properties.local_name.clone().unwrap_or_default(),
        address,
    ))
}

#[async_trait]
impl<A: Central + 'static> Transport for BluetoothTransport<A>
where
    A::Peripheral: 'static,
{
    type Service = BluetoothService<A::Peripheral>;
    type Characteristic = Characteristic;

    async fn find_devices(&self, service: Uuid) -> Result<Vec<DeviceDescriptor>> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        trace!("Scanning for {:?}.", self.scan_window);
        tokio::time::sleep(self.scan_window).await;
        let peripherals = self.adapter.peripherals().await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("could not stop scan: {}", e);
        }

        let mut devices = Vec::new();
        for peripheral in peripherals? {
            let address = peripheral.address();
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("no properties for {}: {}", address, e);
                    continue;
                }
            };
            // connected sensors stop advertising but still expose the service
            let connected_with_service = peripheral.services().iter().any(|s| s.uuid == service);
            if let Some(desc) = descriptor_for(address, &properties, service) {
                devices.push(desc);
            } else if connected_with_service {
                devices.push(DeviceDescriptor::new(
                    properties.local_name.unwrap_or_default(),
                    address,
                ));
            }
        }
        Ok(devices)
    }

    async fn open_service(&self, device: &DeviceDescriptor) -> Result<Option<Self::Service>> {
        let Some(peripheral) = self.find_peripheral(device.address).await? else {
            warn!("{} is no longer known to the adapter.", device);
            return Ok(None);
        };
        if !peripheral.is_connected().await? {
            if let Err(e) = peripheral.connect().await {
                warn!("could not connect to {}: {}", device, e);
                return Ok(None);
            }
        }
        let service = BluetoothService::new(peripheral);
        if let Err(e) = service.peripheral.discover_services().await {
            self.dispose(&service).await;
            return Err(anyhow!("service discovery on {} failed: {}", device, e));
        }
        Ok(Some(service))
    }

    async fn get_characteristic(
        &self,
        service: &Self::Service,
        characteristic: Uuid,
    ) -> Result<Option<Characteristic>> {
        Ok(service
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic))
    }

    async fn enable_notifications(
        &self,
        service: &Self::Service,
        characteristic: &Characteristic,
    ) -> NotifyStatus {
        match service.peripheral.subscribe(characteristic).await {
            Ok(()) => {
                if let Ok(mut slot) = service.subscribed.lock() {
                    *slot = Some(characteristic.clone());
                }
                NotifyStatus::Enabled
            }
            Err(e) => NotifyStatus::Failed(e.to_string()),
        }
    }

    async fn on_value_changed(
        &self,
        service: &Self::Service,
        characteristic: &Characteristic,
        callback: ValueCallback,
    ) -> Result<()> {
        let mut notification_stream = service.peripheral.notifications().await?;
        let uuid = characteristic.uuid;
        let address = service.peripheral.address();
        let handle = tokio::spawn(async move {
            while let Some(data) = notification_stream.next().await {
                if data.uuid == uuid {
                    callback(&data.value);
                }
            }
            warn!("Notification stream of {} terminated.", address);
        });
        service.replace_listener(Some(handle));
        Ok(())
    }

    async fn dispose(&self, service: &Self::Service) {
        if service.released.swap(true, Ordering::SeqCst) {
            return;
        }
        service.replace_listener(None);
        if let Some(characteristic) = service.take_subscription() {
            if let Err(e) = service.peripheral.unsubscribe(&characteristic).await {
                debug!("could not unsubscribe: {}", e);
            }
        }
        match service.peripheral.is_connected().await {
            Ok(true) => {
                if let Err(e) = service.peripheral.disconnect().await {
                    warn!("could not disconnect {}: {}", service.peripheral.address(), e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("connection state unknown: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::HEARTRATE_SERVICE_UUID;
    use btleplug::api::{
        CentralEvent, CentralState, Descriptor, Service, ValueNotification, WriteType,
    };
    use btleplug::platform::PeripheralId;
    use futures::stream::Stream;
    use mockall::mock;
    use std::collections::BTreeSet;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    mock! {
        Peripheral {}

        impl Clone for Peripheral {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Peripheral {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Peripheral for Peripheral {
            fn id(&self) -> PeripheralId;
            fn address(&self) -> BDAddr;
            async fn properties(&self) -> btleplug::Result<Option<PeripheralProperties>>;
            fn services(&self) -> BTreeSet<Service>;
            fn characteristics(&self) -> BTreeSet<Characteristic>;
            async fn is_connected(&self) -> btleplug::Result<bool>;
            async fn connect(&self) -> btleplug::Result<()>;
            async fn disconnect(&self) -> btleplug::Result<()>;
            async fn discover_services(&self) -> btleplug::Result<()>;
            async fn write(
                &self,
                characteristic: &Characteristic,
                data: &[u8],
                write_type: WriteType,
            ) -> btleplug::Result<()>;
            async fn read(&self, characteristic: &Characteristic) -> btleplug::Result<Vec<u8>>;
            async fn subscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn unsubscribe(&self, characteristic: &Characteristic) -> btleplug::Result<()>;
            async fn notifications(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>>;
            async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> btleplug::Result<()>;
            async fn read_descriptor(&self, descriptor: &Descriptor) -> btleplug::Result<Vec<u8>>;
        }
    }

    mock! {
        Adapter {}

        impl Clone for Adapter {
            fn clone(&self) -> Self;
        }

        impl std::fmt::Debug for Adapter {
            fn fmt<'a>(&self, f: &mut std::fmt::Formatter<'a>) -> std::fmt::Result;
        }

        #[async_trait]
        impl Central for Adapter {
            type Peripheral = MockPeripheral;

            async fn events(&self) -> btleplug::Result<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>;
            async fn start_scan(&self, filter: ScanFilter) -> btleplug::Result<()>;
            async fn stop_scan(&self) -> btleplug::Result<()>;
            async fn peripherals(&self) -> btleplug::Result<Vec<MockPeripheral>>;
            async fn peripheral(&self, id: &PeripheralId) -> btleplug::Result<MockPeripheral>;
            async fn add_peripheral(&self, address: &PeripheralId) -> btleplug::Result<MockPeripheral>;
            async fn adapter_info(&self) -> btleplug::Result<String>;
            async fn adapter_state(&self) -> btleplug::Result<CentralState>;
        }
    }

    const SENSOR: [u8; 6] = [0xA0, 0x9E, 0x1A, 0x00, 0x00, 0x01];

    /// Adapter knowing one disconnected sensor whose service discovery
    /// returns `discovery`. Counts `disconnect` calls.
    fn adapter_with_sensor(
        discovery: fn() -> btleplug::Result<()>,
        disconnects: Arc<AtomicUsize>,
    ) -> MockAdapter {
        let mut adapter = MockAdapter::default();
        adapter.expect_peripherals().returning(move || {
            let mut peripheral = MockPeripheral::default();
            peripheral
                .expect_address()
                .returning(|| BDAddr::from(SENSOR));
            let connected = Arc::new(AtomicBool::new(false));
            let state = connected.clone();
            peripheral
                .expect_is_connected()
                .returning(move || Ok(state.load(Ordering::SeqCst)));
            peripheral.expect_connect().returning(move || {
                connected.store(true, Ordering::SeqCst);
                Ok(())
            });
            peripheral
                .expect_discover_services()
                .returning(move || discovery());
            let disconnects = disconnects.clone();
            peripheral.expect_disconnect().returning(move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(vec![peripheral])
        });
        adapter
    }

    fn sensor() -> DeviceDescriptor {
        DeviceDescriptor::new("Polar H10", BDAddr::from(SENSOR))
    }

    #[tokio::test]
    async fn test_open_service_connects_and_discovers() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let transport = BluetoothTransport::new(
            adapter_with_sensor(|| Ok(()), disconnects.clone()),
            Duration::from_millis(1),
        );
        let service = transport.open_service(&sensor()).await.unwrap();
        assert!(service.is_some());
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_discovery_disconnects_peripheral() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let transport = BluetoothTransport::new(
            adapter_with_sensor(|| Err(btleplug::Error::NotConnected), disconnects.clone()),
            Duration::from_millis(1),
        );
        let result = transport.open_service(&sensor()).await;
        assert!(result.is_err());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_device_is_unavailable() {
        let mut adapter = MockAdapter::default();
        adapter.expect_peripherals().returning(|| Ok(vec![]));
        let transport = BluetoothTransport::new(adapter, Duration::from_millis(1));
        assert!(transport.open_service(&sensor()).await.unwrap().is_none());
    }

    #[test]
    fn test_descriptor_requires_advertised_service() {
        let address = BDAddr::from([1, 2, 3, 4, 5, 6]);
        let mut properties = PeripheralProperties::default();
        properties.local_name = Some("Polar H10".to_string());
        assert!(descriptor_for(address, &properties, HEARTRATE_SERVICE_UUID).is_none());

        properties.services.push(HEARTRATE_SERVICE_UUID);
        let desc = descriptor_for(address, &properties, HEARTRATE_SERVICE_UUID).unwrap();
        assert_eq!(desc, DeviceDescriptor::new("Polar H10", address));
    }

    #[test]
    fn test_descriptor_without_name() {
        let address = BDAddr::from([6, 5, 4, 3, 2, 1]);
        let mut properties = PeripheralProperties::default();
        properties.services.push(HEARTRATE_SERVICE_UUID);
        let desc = descriptor_for(address, &properties, HEARTRATE_SERVICE_UUID).unwrap();
        assert!(desc.name.is_empty());
        assert_eq!(desc.address, address);
    }
}

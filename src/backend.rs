//! Platform implementation on top of btleplug.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic as BtleCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter as BtleAdapter, Manager, Peripheral};
use futures::StreamExt;
use stream_cancel::{Trigger, Valved};
use uuid::Uuid;

use crate::platform::{Adapter, GattLink, GrantAll, LinkCallbacks, ScanCallbacks, WriteKind};
use crate::{ControllerConfig, DeviceRecord, Error, GattController, GattService, Result};

/// Adapter backed by the system's BLE stack.
///
/// Desktop stacks expose no bond list; the devices the adapter already knows
/// about are reported as bonded instead.
pub struct BtleplugAdapter {
    _manager: Manager,
    adapter: BtleAdapter,
    scan_stopper: Mutex<Option<Trigger>>,
}

impl BtleplugAdapter {
    pub async fn new(adapter_index: usize) -> Result<Self> {
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if adapter_index >= adapters.len() {
            return Err(Error::Platform(format!(
                "no bluetooth adapter at index {}",
                adapter_index
            )));
        }

        let adapter = adapters.swap_remove(adapter_index);

        log::trace!("Using adapter: {:?}", adapter);

        Ok(Self {
            _manager: manager,
            adapter,
            scan_stopper: Mutex::new(None),
        })
    }

    async fn peripheral(&self, address: &str) -> Option<Peripheral> {
        self.adapter
            .peripherals()
            .await
            .ok()?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
    }

    async fn known_devices(&self, connected_only: bool) -> Vec<DeviceRecord> {
        let peripherals = match self.adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(e) => {
                log::warn!("Could not list peripherals: {:?}", e);
                return Vec::new();
            }
        };

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            if connected_only && !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            devices.push(DeviceRecord::from_peripheral(&peripheral).await);
        }

        devices
    }
}

#[async_trait]
impl Adapter for BtleplugAdapter {
    async fn is_enabled(&self) -> bool {
        radio_enabled(self.adapter.adapter_state().await)
    }

    async fn local_name(&self) -> Option<String> {
        self.adapter.adapter_info().await.ok()
    }

    async fn bonded_devices(&self) -> Vec<DeviceRecord> {
        self.known_devices(false).await
    }

    async fn start_scan(&self, callbacks: ScanCallbacks) -> Result<()> {
        let (stopper, mut events) = Valved::new(self.adapter.events().await?);

        self.adapter.start_scan(ScanFilter::default()).await?;

        // Replacing the trigger ends the previous scan's event pump.
        *self
            .scan_stopper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stopper);

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        if let Ok(peripheral) = adapter.peripheral(&id).await {
                            callbacks.device_discovered(DeviceRecord::from_peripheral(&peripheral).await);
                        }
                    }
                    _ => {}
                }
            }

            log::debug!("Scan event pump stopped.");
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        self.scan_stopper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        Ok(())
    }

    async fn connect(&self, address: &str, callbacks: LinkCallbacks) -> Option<Box<dyn GattLink>> {
        let peripheral = match self.peripheral(address).await {
            Some(peripheral) => peripheral,
            None => {
                log::warn!("Device {} is not known to the adapter", address);
                return None;
            }
        };

        let (watch_stopper, mut events) = match self.adapter.events().await {
            Ok(events) => Valved::new(events),
            Err(e) => {
                log::warn!("Could not watch {}: {:?}", address, e);
                return None;
            }
        };

        // Report link-down when the adapter loses the device.
        {
            let id = peripheral.id();
            let callbacks = callbacks.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(lost) = event {
                        if lost == id {
                            callbacks.disconnected();
                            break;
                        }
                    }
                }
            });
        }

        {
            let peripheral = peripheral.clone();
            let callbacks = callbacks.clone();
            tokio::spawn(async move {
                match peripheral.connect().await {
                    Ok(()) => callbacks.connected(),
                    Err(e) => {
                        log::warn!("Could not connect to {}: {:?}", peripheral.address(), e);
                        callbacks.disconnected();
                    }
                }
            });
        }

        Some(Box::new(BtleplugLink {
            peripheral,
            callbacks,
            watch_stopper: Mutex::new(Some(watch_stopper)),
        }))
    }

    async fn connected_devices(&self) -> Vec<DeviceRecord> {
        self.known_devices(true).await
    }
}

struct BtleplugLink {
    peripheral: Peripheral,
    callbacks: LinkCallbacks,
    watch_stopper: Mutex<Option<Trigger>>,
}

impl BtleplugLink {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<BtleCharacteristic> {
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic)
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn discover_services(&self) {
        let peripheral = self.peripheral.clone();
        let callbacks = self.callbacks.clone();

        tokio::spawn(async move {
            log::debug!("Discovering services of {}", peripheral.address());

            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral.services().iter().map(GattService::from).collect()),
                Err(e) => Err(Error::DiscoveryFailure(e.to_string())),
            };
            callbacks.services_discovered(result);
        });
    }

    fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.characteristic(service, characteristic).is_some()
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, data: Vec<u8>, kind: WriteKind) {
        let target = match self.characteristic(service, characteristic) {
            Some(target) => target,
            None => {
                self.callbacks.write_completed(Err(Error::NotReady));
                return;
            }
        };
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };

        let peripheral = self.peripheral.clone();
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            let result = peripheral
                .write(&target, &data, write_type)
                .await
                .map_err(|e| Error::WriteFailure(e.to_string()));
            callbacks.write_completed(result);
        });
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) {
        let target = match self.characteristic(service, characteristic) {
            Some(target) => target,
            None => {
                self.callbacks.read_completed(Err(Error::NotReady));
                return;
            }
        };

        let peripheral = self.peripheral.clone();
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            let result = peripheral
                .read(&target)
                .await
                .map_err(|e| Error::ReadFailure(e.to_string()));
            callbacks.read_completed(result);
        });
    }

    async fn close(&self) {
        self.watch_stopper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Err(e) = self.peripheral.disconnect().await {
            log::warn!("Could not disconnect {}: {:?}", self.peripheral.address(), e);
        }

        // The watcher is gone, so report the link-down ourselves.
        self.callbacks.disconnected();
    }
}

/// Stacks that cannot report a power state get the benefit of the doubt; the
/// scan itself fails if the radio is off.
fn radio_enabled(state: btleplug::Result<CentralState>) -> bool {
    match state {
        Ok(CentralState::PoweredOff) => false,
        Ok(_) => true,
        Err(e) => {
            log::warn!("Could not read the adapter state: {:?}", e);
            false
        }
    }
}

impl GattController {
    /// Create a controller on the system's BLE stack.
    ///
    /// Desktop stacks have no runtime permission model, so every permission is granted.
    pub async fn with_btleplug(config: ControllerConfig) -> Result<Self> {
        let adapter = BtleplugAdapter::new(config.adapter()).await?;

        Ok(GattController::new(
            Arc::new(adapter),
            Arc::new(GrantAll),
            config,
        ))
    }
}

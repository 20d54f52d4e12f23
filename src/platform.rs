//! Boundary between the controller and the BLE stack underneath it.
//!
//! Commands go down through [`Adapter`] and [`GattLink`] and return as soon as the
//! request is issued. Outcomes come back up through the callback handles the
//! controller passes along with each command ([`ScanCallbacks`], [`LinkCallbacks`]).
//! Both feed the same queue, which the controller drains from a single task.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{DeviceRecord, GattService, Result};

/// How a characteristic write is issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteKind {
    /// Acknowledged by the peripheral.
    #[default]
    WithResponse,
    /// Fire and forget.
    WithoutResponse,
}

/// Permission check keyed by permission name, see [`common::permissions`](crate::common::permissions).
pub trait Permissions: Send + Sync {
    fn is_granted(&self, permission: &str) -> bool;
}

/// Grants everything. Desktop stacks have no runtime permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl Permissions for GrantAll {
    fn is_granted(&self, _permission: &str) -> bool {
        true
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Whether the radio is powered.
    async fn is_enabled(&self) -> bool;

    /// Name this adapter advertises, if the platform exposes one.
    async fn local_name(&self) -> Option<String>;

    /// Devices with an established bond, in platform order.
    async fn bonded_devices(&self) -> Vec<DeviceRecord>;

    /// Begin scanning. Found devices are reported through `callbacks`.
    async fn start_scan(&self, callbacks: ScanCallbacks) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// Open a link to `address`. `None` means the platform could not produce a handle.
    /// Link-up arrives later through `callbacks`.
    async fn connect(&self, address: &str, callbacks: LinkCallbacks) -> Option<Box<dyn GattLink>>;

    /// Devices currently connected at the GATT level, whoever opened the link.
    async fn connected_devices(&self) -> Vec<DeviceRecord>;
}

/// One open connection handle.
///
/// Every request method only issues the request; its outcome is reported
/// through the [`LinkCallbacks`] given to [`Adapter::connect`].
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn discover_services(&self);

    /// Whether the handle's cached topology contains the characteristic.
    fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;

    async fn write(&self, service: Uuid, characteristic: Uuid, data: Vec<u8>, kind: WriteKind);

    async fn read(&self, service: Uuid, characteristic: Uuid);

    /// Close the link and release platform resources. Must tolerate repeated calls.
    async fn close(&self);
}

#[derive(Debug)]
pub(crate) enum HardwareEvent {
    DeviceFound(DeviceRecord),
    Link { generation: u64, event: LinkEvent },
}

#[derive(Debug)]
pub(crate) enum LinkEvent {
    Up,
    Down,
    ServicesDiscovered(Result<Vec<GattService>>),
    WriteCompleted(Result<()>),
    ReadCompleted(Result<Vec<u8>>),
}

/// Callback handle for scan results.
#[derive(Debug, Clone)]
pub struct ScanCallbacks {
    sender: UnboundedSender<HardwareEvent>,
}

impl ScanCallbacks {
    pub(crate) fn new(sender: UnboundedSender<HardwareEvent>) -> Self {
        Self { sender }
    }

    pub fn device_discovered(&self, device: DeviceRecord) {
        // The controller is gone once the receiver is dropped.
        self.sender.send(HardwareEvent::DeviceFound(device)).ok();
    }
}

/// Callback handle bound to a single connection attempt.
///
/// Events sent through a handle whose attempt has been superseded are dropped
/// by the controller.
#[derive(Debug, Clone)]
pub struct LinkCallbacks {
    generation: u64,
    sender: UnboundedSender<HardwareEvent>,
}

impl LinkCallbacks {
    pub(crate) fn new(generation: u64, sender: UnboundedSender<HardwareEvent>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connected(&self) {
        self.send(LinkEvent::Up);
    }

    pub fn disconnected(&self) {
        self.send(LinkEvent::Down);
    }

    pub fn services_discovered(&self, result: Result<Vec<GattService>>) {
        self.send(LinkEvent::ServicesDiscovered(result));
    }

    pub fn write_completed(&self, result: Result<()>) {
        self.send(LinkEvent::WriteCompleted(result));
    }

    pub fn read_completed(&self, result: Result<Vec<u8>>) {
        self.send(LinkEvent::ReadCompleted(result));
    }

    fn send(&self, event: LinkEvent) {
        self.sender
            .send(HardwareEvent::Link {
                generation: self.generation,
                event,
            })
            .ok();
    }
}

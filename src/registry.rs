use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::common::permissions::BLUETOOTH_CONNECT;
use crate::platform::{Adapter, Permissions};
use crate::DeviceRecord;

/// Immutable snapshot of a device list.
pub type DeviceList = Arc<Vec<DeviceRecord>>;

/// Keeps the paired and scanned device lists.
///
/// Each list is published as a whole snapshot, so observers always see either
/// the previous list or the next one.
pub struct DeviceRegistry {
    adapter: Arc<dyn Adapter>,
    permissions: Arc<dyn Permissions>,
    paired: watch::Sender<DeviceList>,
    scanned: watch::Sender<DeviceList>,
}

impl DeviceRegistry {
    pub fn new(adapter: Arc<dyn Adapter>, permissions: Arc<dyn Permissions>) -> Self {
        let (paired, _) = watch::channel(DeviceList::default());
        let (scanned, _) = watch::channel(DeviceList::default());

        Self {
            adapter,
            permissions,
            paired,
            scanned,
        }
    }

    /// Replace the paired list with the adapter's bonded devices.
    ///
    /// Skipped without connect permission; callers must not assume the list changed.
    pub async fn refresh_paired(&self) {
        if !self.permissions.is_granted(BLUETOOTH_CONNECT) {
            log::debug!("Skipping paired device refresh, {} not granted", BLUETOOTH_CONNECT);
            return;
        }

        let mut devices: Vec<DeviceRecord> = Vec::new();
        for device in self.adapter.bonded_devices().await {
            if !devices.iter().any(|d| d.has_address(&device.address)) {
                devices.push(device);
            }
        }

        log::trace!("Paired devices: {:?}", devices);
        self.paired.send_replace(Arc::new(devices));
    }

    /// Record a device found by the scan. Known addresses are ignored.
    pub fn on_device_discovered(&self, device: DeviceRecord) {
        let added = self.scanned.send_if_modified(|list| {
            if list.iter().any(|d| d.has_address(&device.address)) {
                return false;
            }

            let mut next = Vec::with_capacity(list.len() + 1);
            next.extend(list.iter().cloned());
            next.push(device.clone());
            *list = Arc::new(next);
            true
        });

        if added {
            log::info!("Found device: {}", device);
        }
    }

    pub fn clear_scanned(&self) {
        self.scanned.send_replace(DeviceList::default());
    }

    pub fn paired(&self) -> DeviceList {
        self.paired.borrow().clone()
    }

    pub fn scanned(&self) -> DeviceList {
        self.scanned.borrow().clone()
    }

    /// Stream of paired lists, starting with the current one.
    pub fn paired_stream(&self) -> impl Stream<Item = DeviceList> + Send + 'static {
        WatchStream::new(self.paired.subscribe())
    }

    /// Stream of scanned lists, starting with the current one.
    pub fn scanned_stream(&self) -> impl Stream<Item = DeviceList> + Send + 'static {
        WatchStream::new(self.scanned.subscribe())
    }
}

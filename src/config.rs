use uuid::Uuid;

use crate::platform::WriteKind;
use crate::GattService;

pub struct ControllerConfig {
    /// Index of the Bluetooth adapter to use with the btleplug backend. The first adapter is used by default.
    adapter_index: usize,
    /// Label put on outgoing messages. Falls back to the adapter's name, then "Unknown".
    sender_label: Option<String>,
    /// Picks the target service. The first passing service with a matching characteristic wins.
    service_filter: Option<Box<dyn Fn(Uuid) -> bool + Send + Sync>>,
    /// Picks the target characteristic within the chosen service.
    characteristic_filter: Option<Box<dyn Fn(Uuid) -> bool + Send + Sync>>,
    /// How messages are written.
    write_kind: WriteKind,
    /// Buffer size of the result and log streams. Slow subscribers lag past this.
    channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            sender_label: None,
            service_filter: None,
            characteristic_filter: None,
            write_kind: WriteKind::default(),
            channel_capacity: 16,
        }
    }
}

impl ControllerConfig {
    /// Index of bluetooth adapter to use
    pub fn adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Label used as the sender of outgoing messages
    pub fn sender_label(mut self, label: impl Into<String>) -> Self {
        self.sender_label = Some(label.into());
        self
    }

    /// Select the target service by UUID
    pub fn filter_service(mut self, func: impl Fn(Uuid) -> bool + Send + Sync + 'static) -> Self {
        self.service_filter = Some(Box::new(func));
        self
    }

    /// Select the target characteristic by UUID
    pub fn filter_characteristic(
        mut self,
        func: impl Fn(Uuid) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.characteristic_filter = Some(Box::new(func));
        self
    }

    /// Target exactly this service and characteristic
    pub fn target(self, service: Uuid, characteristic: Uuid) -> Self {
        self.filter_service(move |uuid| uuid == service)
            .filter_characteristic(move |uuid| uuid == characteristic)
    }

    /// Write messages without waiting for an acknowledgement
    pub fn write_without_response(mut self) -> Self {
        self.write_kind = WriteKind::WithoutResponse;
        self
    }

    /// Capacity of the event and log streams
    ///
    /// A subscriber that falls more than this many events behind skips ahead;
    /// the stream returned by a connect call ends instead.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub(crate) fn adapter(&self) -> usize {
        self.adapter_index
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.sender_label.as_deref()
    }

    pub(crate) fn write_kind(&self) -> WriteKind {
        self.write_kind
    }

    pub(crate) fn capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Pick the service and characteristic to talk to from a discovered topology.
    ///
    /// Without filters this is the first characteristic of the first service.
    pub(crate) fn select(&self, services: &[GattService]) -> Option<(Uuid, Uuid)> {
        services
            .iter()
            .filter(|service| {
                self.service_filter
                    .as_ref()
                    .map_or(true, |filter| filter(service.uuid))
            })
            .find_map(|service| {
                service
                    .characteristics
                    .iter()
                    .copied()
                    .find(|&uuid| {
                        self.characteristic_filter
                            .as_ref()
                            .map_or(true, |filter| filter(uuid))
                    })
                    .map(|characteristic| (service.uuid, characteristic))
            })
    }
}

use btleplug::api::Service as BtleService;
use uuid::Uuid;

/// A discovered GATT service and the characteristics it exposes, in the
/// order the platform reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            uuid,
            characteristics: characteristics.into_iter().collect(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.contains(&uuid)
    }
}

impl From<&BtleService> for GattService {
    fn from(service: &BtleService) -> Self {
        GattService::new(
            service.uuid,
            service.characteristics.iter().map(|c| c.uuid),
        )
    }
}

/// Service and characteristic resolved on the current link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topology {
    pub service: Option<Uuid>,
    pub characteristic: Option<Uuid>,
}

impl Topology {
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.characteristic.is_none()
    }

    /// Fill in missing ids from `self`. Yields a pair only when both ends resolve.
    pub fn resolve(
        &self,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> Option<(Uuid, Uuid)> {
        Some((service.or(self.service)?, characteristic.or(self.characteristic)?))
    }
}

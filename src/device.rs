use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use std::fmt;

/// Lightweight record of a BLE device.
///
/// The address is the stable hardware identifier and is what the registry
/// de-duplicates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceRecord {
    pub name: Option<String>,
    pub address: String,
}

impl DeviceRecord {
    pub fn new(name: Option<impl Into<String>>, address: impl Into<String>) -> Self {
        Self {
            name: name.map(Into::into),
            address: address.into(),
        }
    }

    /// Whether this record refers to the given hardware address. Case is ignored.
    #[inline]
    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }

    /// Project a btleplug peripheral into a record.
    pub(crate) async fn from_peripheral(peripheral: &Peripheral) -> Self {
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|props| props.local_name);

        Self {
            name,
            address: peripheral.address().to_string(),
        }
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

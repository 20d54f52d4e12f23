/// Names of the platform permissions the controller checks through
/// [`Permissions`](crate::Permissions).
pub mod permissions {
    /// Needed to start or stop scanning.
    pub const BLUETOOTH_SCAN: &str = "BLUETOOTH_SCAN";
    /// Needed to open a link, send or read, and to enumerate bonded devices.
    pub const BLUETOOTH_CONNECT: &str = "BLUETOOTH_CONNECT";
    /// Scan results are only delivered when location access is granted.
    pub const ACCESS_FINE_LOCATION: &str = "ACCESS_FINE_LOCATION";

    /// Permissions that must all be granted before a scan is started.
    pub const SCAN: [&str; 2] = [BLUETOOTH_SCAN, ACCESS_FINE_LOCATION];
}

use thiserror::Error;

/// Failures surfaced by the controller.
///
/// Hardware-reported failures never leave the controller as a returned `Err`; they are
/// published as [`ConnectionEvent::Error`](crate::ConnectionEvent::Error) instead. The enum is
/// `Clone` so that it can travel on multicast channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A named platform permission has not been granted.
    #[error("missing permission: {0}")]
    PermissionDenied(String),

    #[error("bluetooth disabled")]
    RadioDisabled,

    /// Opening or keeping a link failed.
    #[error("{0}")]
    LinkFailure(LinkFailure),

    #[error("failed to discover GATT services: {0}")]
    DiscoveryFailure(String),

    #[error("failed to write data to characteristic: {0}")]
    WriteFailure(String),

    #[error("failed to read data from characteristic: {0}")]
    ReadFailure(String),

    /// No service or characteristic could be resolved for the operation.
    #[error("service or characteristic not discovered yet")]
    NotReady,

    /// Characteristic payload was not valid UTF-8.
    #[error("received malformed UTF-8: {0}")]
    Decode(String),

    /// A platform call failed before the hardware got involved.
    #[error("platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkFailure {
    #[error("failed to connect")]
    Connect,
    #[error("disconnected")]
    Disconnected,
}

impl Error {
    pub(crate) fn permission(name: &str) -> Self {
        Error::PermissionDenied(name.to_string())
    }
}

impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        Error::Platform(e.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

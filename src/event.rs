use uuid::Uuid;

use crate::Error;

/// Outcome of a controller step, published on the connection-result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The platform produced a connection handle. Link-up follows asynchronously.
    Established,
    Error(Error),
    /// Service discovery resolved a target service and characteristic.
    UuidsDiscovered {
        service: Uuid,
        characteristic: Uuid,
    },
    /// A characteristic read completed with a UTF-8 payload.
    DataRead(String),
}

impl ConnectionEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionEvent::Error(_))
    }
}

impl From<Error> for ConnectionEvent {
    fn from(e: Error) -> Self {
        ConnectionEvent::Error(e)
    }
}

/// Event as carried internally, tagged with the connection attempt it belongs to.
#[derive(Debug, Clone)]
pub(crate) struct Tagged {
    pub(crate) generation: u64,
    pub(crate) event: ConnectionEvent,
    /// Nothing else will be published for this attempt.
    pub(crate) last: bool,
}

/// A text message handed to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub sender_label: String,
    pub origin_local: bool,
}

impl OutboundMessage {
    pub fn local(text: impl Into<String>, sender_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_label: sender_label.into(),
            origin_local: true,
        }
    }

    /// Wire payload: the raw UTF-8 bytes of the text, unframed.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.text.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_unframed_utf8() {
        let message = OutboundMessage::local("TOTAL 12.50 €", "till");
        assert_eq!(message.to_bytes(), "TOTAL 12.50 €".as_bytes());
        assert!(message.origin_local);
    }
}

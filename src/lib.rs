//! Single-link BLE GATT connection controller.
//!
//! [`GattController`] owns at most one GATT link at a time and drives the
//! scan → connect → discover → read/write → disconnect sequence. Everything the
//! hardware reports comes back as values on a handful of streams: connection
//! status, connection events, log lines and the paired/scanned device lists.
//!
//! The platform underneath is reached through the [`Adapter`], [`GattLink`] and
//! [`Permissions`] traits. A btleplug implementation is included.
//!
//! ## Usage
//!
//! Scan for a while, connect to the first device found and send it a line of
//! text once its characteristic has been discovered:
//!
//! ```rust,no_run
//! use blelink::{ConnectionEvent, ControllerConfig, Error, GattController};
//! use futures::StreamExt;
//! use tokio::time::{sleep, Duration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     pretty_env_logger::init();
//!
//!     let controller = GattController::with_btleplug(ControllerConfig::default()).await?;
//!
//!     controller.start_discovery().await;
//!     sleep(Duration::from_secs(5)).await;
//!     controller.stop_discovery().await;
//!
//!     let device = controller.scanned_devices().first().cloned().unwrap();
//!     let mut events = controller.connect_to_device(&device).await;
//!
//!     while let Some(event) = events.next().await {
//!         if let ConnectionEvent::UuidsDiscovered { .. } = event {
//!             controller.try_send_message("TOTAL 12.50", None, None).await;
//!             break;
//!         }
//!     }
//!
//!     controller.release().await;
//!
//!     Ok(())
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use config::ControllerConfig;
pub use controller::{ControllerState, EventStream, GattController};
pub use device::DeviceRecord;
pub use error::{Error, LinkFailure, Result};
pub use event::{ConnectionEvent, OutboundMessage};
pub use platform::{
    Adapter, GattLink, GrantAll, LinkCallbacks, Permissions, ScanCallbacks, WriteKind,
};
pub use registry::{DeviceList, DeviceRegistry};
pub use service::{GattService, Topology};

pub use backend::BtleplugAdapter;

mod backend;
mod config;
mod controller;
mod device;
mod error;
mod event;
mod platform;
mod registry;
mod service;

pub mod common;

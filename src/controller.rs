use std::iter;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use futures::{future, stream};
use futures::{Stream, StreamExt};
use stream_cancel::{Trigger, Valve, Valved};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream, WatchStream};
use uuid::Uuid;

use crate::common::permissions::{BLUETOOTH_CONNECT, BLUETOOTH_SCAN, SCAN};
use crate::error::LinkFailure;
use crate::event::Tagged;
use crate::platform::{
    Adapter, GattLink, HardwareEvent, LinkCallbacks, LinkEvent, Permissions, ScanCallbacks,
};
use crate::registry::{DeviceList, DeviceRegistry};
use crate::{
    ConnectionEvent, ControllerConfig, DeviceRecord, Error, OutboundMessage, Topology,
};

/// Stream handed out by the controller. Ends when the controller is released.
pub type EventStream<T> = Valved<Pin<Box<dyn Stream<Item = T> + Send>>>;

/// Events not tied to a connection attempt carry this generation.
const NO_ATTEMPT: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Scanning,
    /// A handle exists, waiting for the hardware to report link-up.
    Connecting,
    ServicesDiscovering,
    /// Service and characteristic are resolved.
    Ready,
    /// Close was requested, waiting for the hardware to report link-down.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    ServicesDiscovering,
    Ready,
    Closing,
}

/// The one link the controller may own, and the attempt it belongs to.
struct Slot {
    generation: u64,
    link: Option<Box<dyn GattLink>>,
    phase: Phase,
    topology: Topology,
}

struct Shared {
    config: ControllerConfig,
    adapter: Arc<dyn Adapter>,
    permissions: Arc<dyn Permissions>,
    registry: DeviceRegistry,
    slot: Mutex<Slot>,
    /// Last generation handed to a connection attempt.
    generation: AtomicU64,
    scanning: AtomicBool,
    connected: watch::Sender<bool>,
    results: broadcast::Sender<Tagged>,
    logs: broadcast::Sender<String>,
    hardware: mpsc::UnboundedSender<HardwareEvent>,
}

/// Owns at most one GATT link and mediates every interaction with the adapter.
///
/// Commands return once the request is issued. Their outcomes, and everything
/// else the hardware reports, are published on the controller's streams.
pub struct GattController {
    shared: Arc<Shared>,
    ingest_stopper: StdMutex<Option<Trigger>>,
    /// Every stream handed out is wrapped in this valve and ends with `streams_stopper`.
    streams: Valve,
    streams_stopper: StdMutex<Option<Trigger>>,
}

impl GattController {
    /// Create a controller on top of a platform adapter.
    ///
    /// Must be called from within a Tokio runtime, the hardware callbacks are
    /// drained by a spawned task.
    pub fn new(
        adapter: Arc<dyn Adapter>,
        permissions: Arc<dyn Permissions>,
        config: ControllerConfig,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        let (results, _) = broadcast::channel(config.capacity());
        let (logs, _) = broadcast::channel(config.capacity());
        let (hardware, receiver) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            registry: DeviceRegistry::new(adapter.clone(), permissions.clone()),
            config,
            adapter,
            permissions,
            slot: Mutex::new(Slot {
                generation: NO_ATTEMPT,
                link: None,
                phase: Phase::Idle,
                topology: Topology::default(),
            }),
            generation: AtomicU64::new(NO_ATTEMPT),
            scanning: AtomicBool::new(false),
            connected,
            results,
            logs,
            hardware,
        });

        let (stopper, events) = Valved::new(UnboundedReceiverStream::new(receiver));
        tokio::spawn(shared.clone().ingest(events));

        let (streams_stopper, streams) = Valve::new();

        Self {
            shared,
            ingest_stopper: StdMutex::new(Some(stopper)),
            streams,
            streams_stopper: StdMutex::new(Some(streams_stopper)),
        }
    }

    /// Refresh the paired list and start scanning.
    ///
    /// Missing permissions or a powered-off radio are published as errors and
    /// nothing is started.
    pub async fn start_discovery(&self) {
        let shared = &self.shared;

        if let Some(missing) = SCAN.iter().find(|p| !shared.permissions.is_granted(p)) {
            shared.publish(NO_ATTEMPT, Error::permission(missing).into(), false);
            return;
        }

        if !shared.adapter.is_enabled().await {
            shared.publish(NO_ATTEMPT, Error::RadioDisabled.into(), false);
            return;
        }

        if shared.scanning.load(Ordering::SeqCst) {
            log::info!("Scan already running, restarting it.");
            if let Err(e) = shared.adapter.stop_scan().await {
                log::warn!("Could not stop the running scan: {:?}", e);
            }
        }

        shared.registry.refresh_paired().await;
        shared.registry.clear_scanned();

        log::info!("Starting the scan");

        match shared
            .adapter
            .start_scan(ScanCallbacks::new(shared.hardware.clone()))
            .await
        {
            Ok(()) => shared.scanning.store(true, Ordering::SeqCst),
            Err(e) => {
                shared.scanning.store(false, Ordering::SeqCst);
                shared.publish(NO_ATTEMPT, e.into(), false);
            }
        }
    }

    /// Stop scanning. Device callbacks already queued may still land in the scanned list.
    pub async fn stop_discovery(&self) {
        let shared = &self.shared;

        if !shared.permissions.is_granted(BLUETOOTH_SCAN) {
            shared.publish(NO_ATTEMPT, Error::permission(BLUETOOTH_SCAN).into(), false);
            return;
        }

        match shared.adapter.stop_scan().await {
            Ok(()) => {
                shared.scanning.store(false, Ordering::SeqCst);
                log::info!("Scanner was stopped.");
            }
            Err(e) => shared.publish(NO_ATTEMPT, e.into(), false),
        }
    }

    /// Open a link to `device`, closing any link owned before.
    ///
    /// The returned stream carries the events of this attempt only and ends once
    /// the attempt is over (failed to connect, or disconnected).
    pub async fn connect_to_device(&self, device: &DeviceRecord) -> EventStream<ConnectionEvent> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Subscribe before anything of this attempt can be published.
        let events = self.attempt_stream(generation);
        self.shared.connect(generation, device).await;

        events
    }

    /// Write `text` to a characteristic of the connected device.
    ///
    /// Missing ids fall back to the ones found by service discovery. Returns the
    /// message handed to the link, which does not mean the write succeeded; that
    /// outcome arrives later on the log or result stream.
    pub async fn try_send_message(
        &self,
        text: &str,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> Option<OutboundMessage> {
        let shared = &self.shared;

        if !shared.permissions.is_granted(BLUETOOTH_CONNECT) {
            shared.publish(NO_ATTEMPT, Error::permission(BLUETOOTH_CONNECT).into(), false);
            return None;
        }

        let slot = shared.slot.lock().await;
        let (link, service, characteristic) = match shared.target(&slot, service, characteristic) {
            Some(target) => target,
            None => {
                shared.publish(slot.generation, Error::NotReady.into(), false);
                return None;
            }
        };

        let label = match shared.config.label() {
            Some(label) => label.to_string(),
            None => shared
                .adapter
                .local_name()
                .await
                .unwrap_or_else(|| "Unknown".to_string()),
        };
        let message = OutboundMessage::local(text, label);

        log::debug!(
            "Writing {} bytes to {} on {}",
            message.text.len(),
            characteristic,
            service
        );
        link.write(
            service,
            characteristic,
            message.to_bytes(),
            shared.config.write_kind(),
        )
        .await;

        Some(message)
    }

    /// Request a read of a characteristic of the connected device.
    ///
    /// Id resolution works as in [`try_send_message`](Self::try_send_message). The
    /// payload arrives as [`ConnectionEvent::DataRead`]. Returns whether a read was issued.
    pub async fn try_read_message(
        &self,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> bool {
        let shared = &self.shared;

        if !shared.permissions.is_granted(BLUETOOTH_CONNECT) {
            shared.publish(NO_ATTEMPT, Error::permission(BLUETOOTH_CONNECT).into(), false);
            return false;
        }

        let slot = shared.slot.lock().await;
        match shared.target(&slot, service, characteristic) {
            Some((link, service, characteristic)) => {
                link.read(service, characteristic).await;
                true
            }
            None => {
                shared.publish(slot.generation, Error::NotReady.into(), false);
                false
            }
        }
    }

    /// Ask the platform to close the owned link and give up the handle.
    ///
    /// Link-down is still reported by the hardware afterwards. Does nothing
    /// when no link is owned.
    pub async fn close_connection(&self) {
        let mut slot = self.shared.slot.lock().await;

        if let Some(link) = slot.link.take() {
            log::info!("Closing link #{}", slot.generation);
            slot.phase = Phase::Closing;
            link.close().await;
        } else {
            log::debug!("No link to close.");
        }
    }

    /// Close the link, stop scanning and end every stream handed out.
    pub async fn release(&self) {
        self.close_connection().await;

        {
            // The ingestion loop stops below, so finish the close here.
            let mut slot = self.shared.slot.lock().await;
            if slot.phase != Phase::Idle {
                self.shared.link_down(&mut slot).await;
            }
        }

        if self.shared.scanning.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.shared.adapter.stop_scan().await {
                log::warn!("Could not stop the scan: {:?}", e);
            }
        }

        self.ingest_stopper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.streams_stopper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        log::info!("Controller released.");
    }

    /// Devices connected at the GATT level, including links this controller does not own.
    pub async fn get_connected_gatt_devices(&self) -> Vec<DeviceRecord> {
        self.shared.adapter.connected_devices().await
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub async fn state(&self) -> ControllerState {
        let phase = self.shared.slot.lock().await.phase;

        match phase {
            Phase::Idle if self.shared.scanning.load(Ordering::SeqCst) => {
                ControllerState::Scanning
            }
            Phase::Idle => ControllerState::Idle,
            Phase::Connecting => ControllerState::Connecting,
            Phase::ServicesDiscovering => ControllerState::ServicesDiscovering,
            Phase::Ready => ControllerState::Ready,
            Phase::Closing => ControllerState::Closing,
        }
    }

    /// Service and characteristic resolved on the current link.
    pub async fn topology(&self) -> Topology {
        self.shared.slot.lock().await.topology
    }

    pub fn paired_devices(&self) -> DeviceList {
        self.shared.registry.paired()
    }

    pub fn scanned_devices(&self) -> DeviceList {
        self.shared.registry.scanned()
    }

    /// Create a new stream of connection status changes, starting with the current status.
    pub fn connection_status_stream(&self) -> EventStream<bool> {
        self.valve(Box::pin(WatchStream::new(self.shared.connected.subscribe())))
    }

    /// Create a new stream that receives every connection event published from now on.
    pub fn connection_result_stream(&self) -> EventStream<ConnectionEvent> {
        let receiver = self.shared.results.subscribe();

        self.valve(Box::pin(
            BroadcastStream::new(receiver).filter_map(|x| async move { x.ok().map(|t| t.event) }),
        ))
    }

    /// Create a new stream of human-readable log lines.
    pub fn log_stream(&self) -> EventStream<String> {
        let receiver = self.shared.logs.subscribe();

        self.valve(Box::pin(
            BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }),
        ))
    }

    pub fn paired_devices_stream(&self) -> EventStream<DeviceList> {
        self.valve(Box::pin(self.shared.registry.paired_stream()))
    }

    pub fn scanned_devices_stream(&self) -> EventStream<DeviceList> {
        self.valve(Box::pin(self.shared.registry.scanned_stream()))
    }

    fn attempt_stream(&self, generation: u64) -> EventStream<ConnectionEvent> {
        let receiver = self.shared.results.subscribe();

        let stream = BroadcastStream::new(receiver)
            .filter_map(move |x| {
                future::ready(match x {
                    Ok(tagged) if tagged.generation == generation => Some(Ok(tagged)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Err(skipped)),
                })
            })
            // The last event of an attempt is followed by an end marker, so the
            // stream finishes without waiting for another event.
            .flat_map(move |x| {
                let items: Vec<Option<ConnectionEvent>> = match x {
                    Ok(tagged) => {
                        let end = if tagged.last { Some(None) } else { None };
                        iter::once(Some(tagged.event)).chain(end).collect()
                    }
                    // The end of the attempt may be among the skipped events.
                    Err(skipped) => {
                        log::warn!(
                            "Attempt #{} stream lagged by {} events, ending it",
                            generation,
                            skipped
                        );
                        vec![None]
                    }
                };
                stream::iter(items)
            })
            .take_while(|event| future::ready(event.is_some()))
            .filter_map(future::ready);

        self.valve(Box::pin(stream))
    }

    fn valve<T>(&self, stream: Pin<Box<dyn Stream<Item = T> + Send>>) -> EventStream<T> {
        self.streams.wrap(stream)
    }
}

impl Shared {
    async fn ingest(self: Arc<Self>, events: Valved<UnboundedReceiverStream<HardwareEvent>>) {
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                HardwareEvent::DeviceFound(device) => {
                    log::trace!("Device discovered: {:?}", device);
                    self.registry.on_device_discovered(device);
                }
                HardwareEvent::Link { generation, event } => {
                    self.on_link_event(generation, event).await;
                }
            }
        }

        log::debug!("Hardware event loop stopped.");
    }

    async fn connect(&self, generation: u64, device: &DeviceRecord) {
        if !self.permissions.is_granted(BLUETOOTH_CONNECT) {
            self.publish(generation, Error::permission(BLUETOOTH_CONNECT).into(), true);
            return;
        }

        let mut slot = self.slot.lock().await;

        if slot.phase != Phase::Idle {
            log::debug!(
                "Closing link #{} before connecting to {}",
                slot.generation,
                device
            );
            self.link_down(&mut slot).await;
        }

        slot.generation = generation;

        log::info!("Connecting to device {}", device);

        let callbacks = LinkCallbacks::new(generation, self.hardware.clone());
        match self.adapter.connect(&device.address, callbacks).await {
            Some(link) => {
                slot.link = Some(link);
                slot.phase = Phase::Connecting;
                self.publish(generation, ConnectionEvent::Established, false);
            }
            None => {
                self.publish(
                    generation,
                    Error::LinkFailure(LinkFailure::Connect).into(),
                    true,
                );
            }
        }
    }

    async fn on_link_event(&self, generation: u64, event: LinkEvent) {
        let mut slot = self.slot.lock().await;

        if generation != slot.generation {
            log::trace!("Dropping {:?} from stale link #{}", event, generation);
            return;
        }

        match event {
            LinkEvent::Up => {
                if slot.phase != Phase::Connecting {
                    log::trace!("Ignoring link-up in {:?}", slot.phase);
                    return;
                }

                self.connected.send_replace(true);
                slot.phase = Phase::ServicesDiscovering;

                log::info!("Link #{} is up, discovering services", generation);
                if let Some(link) = slot.link.as_ref() {
                    link.discover_services().await;
                }
            }
            LinkEvent::Down => {
                if slot.phase == Phase::Idle {
                    log::trace!("Link #{} already down", generation);
                    return;
                }

                self.link_down(&mut slot).await;
            }
            LinkEvent::ServicesDiscovered(result) => {
                if slot.phase != Phase::ServicesDiscovering {
                    log::trace!("Ignoring service discovery result in {:?}", slot.phase);
                    return;
                }

                let services = match result {
                    Ok(services) => services,
                    Err(e) => {
                        self.publish(generation, classify(e, Error::DiscoveryFailure).into(), false);
                        return;
                    }
                };

                match self.config.select(&services) {
                    Some((service, characteristic)) => {
                        slot.topology = Topology {
                            service: Some(service),
                            characteristic: Some(characteristic),
                        };
                        slot.phase = Phase::Ready;

                        self.log_line(format!("Discovered service UUID: {}", service));
                        self.log_line(format!("Discovered characteristic UUID: {}", characteristic));
                        self.publish(
                            generation,
                            ConnectionEvent::UuidsDiscovered {
                                service,
                                characteristic,
                            },
                            false,
                        );
                    }
                    None => {
                        let reason = format!(
                            "no usable characteristic among {} services",
                            services.len()
                        );
                        self.publish(generation, Error::DiscoveryFailure(reason).into(), false);
                    }
                }
            }
            LinkEvent::WriteCompleted(result) => {
                if slot.link.is_none() {
                    log::trace!("Ignoring write result of released link #{}", generation);
                    return;
                }

                match result {
                    Ok(()) => self.log_line("Data successfully written to characteristic.".into()),
                    Err(e) => {
                        self.publish(generation, classify(e, Error::WriteFailure).into(), false)
                    }
                }
            }
            LinkEvent::ReadCompleted(result) => {
                if slot.link.is_none() {
                    log::trace!("Ignoring read result of released link #{}", generation);
                    return;
                }

                let event = match result {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => ConnectionEvent::DataRead(text),
                        Err(e) => Error::from(e.utf8_error()).into(),
                    },
                    Err(e) => classify(e, Error::ReadFailure).into(),
                };
                self.publish(generation, event, false);
            }
        }
    }

    /// Single exit path of a link: reset state, release the handle and report the loss.
    async fn link_down(&self, slot: &mut Slot) {
        self.connected.send_replace(false);
        slot.topology = Topology::default();
        slot.phase = Phase::Idle;

        if let Some(link) = slot.link.take() {
            link.close().await;
        }

        log::info!("Link #{} is down", slot.generation);
        self.publish(
            slot.generation,
            Error::LinkFailure(LinkFailure::Disconnected).into(),
            true,
        );
    }

    /// Owned link plus the resolved target, if both ends resolve and the link knows them.
    fn target<'a>(
        &self,
        slot: &'a Slot,
        service: Option<Uuid>,
        characteristic: Option<Uuid>,
    ) -> Option<(&'a dyn GattLink, Uuid, Uuid)> {
        let link = slot.link.as_deref()?;
        let (service, characteristic) = slot.topology.resolve(service, characteristic)?;

        if link.has_characteristic(service, characteristic) {
            Some((link, service, characteristic))
        } else {
            log::debug!("Link does not know {} on {}", characteristic, service);
            None
        }
    }

    fn publish(&self, generation: u64, event: ConnectionEvent, last: bool) {
        if let ConnectionEvent::Error(e) = &event {
            log::warn!("{}", e);
        } else {
            log::debug!("{:?}", event);
        }

        // Nobody listening is fine, events are not replayed.
        self.results
            .send(Tagged {
                generation,
                event,
                last,
            })
            .ok();
    }

    fn log_line(&self, line: String) {
        log::info!("{}", line);
        self.logs.send(line).ok();
    }
}

/// Give platform failures the category of the step they happened in.
fn classify(e: Error, category: fn(String) -> Error) -> Error {
    match e {
        Error::Platform(reason) => category(reason),
        other => other,
    }
}

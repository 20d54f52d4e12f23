#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blelink::common::permissions;
use blelink::{
    Adapter, ConnectionEvent, ControllerConfig, DeviceRecord, Error, EventStream, GattController,
    GattLink, GattService, LinkCallbacks, Permissions, Result, ScanCallbacks, WriteKind,
};
use futures::StreamExt;
use uuid::Uuid;

pub const S1: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const C1: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const C2: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const S2: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);
pub const C3: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(50);

pub fn pos1() -> DeviceRecord {
    DeviceRecord::new(Some("POS-1"), "AA:BB:CC:DD:EE:01")
}

pub fn pos2() -> DeviceRecord {
    DeviceRecord::new(Some("POS-2"), "AA:BB:CC:DD:EE:02")
}

pub fn topology() -> Vec<GattService> {
    vec![GattService::new(S1, [C1, C2]), GattService::new(S2, [C3])]
}

/// Everything the mock platform has been asked to do.
#[derive(Default)]
pub struct Journal {
    pub enabled: bool,
    pub local_name: Option<String>,
    pub bonded: Vec<DeviceRecord>,
    pub gatt_connected: Vec<DeviceRecord>,
    pub refuse_connect: bool,
    /// Topology every new link reports as cached.
    pub services: Vec<GattService>,
    pub scanning: bool,
    pub scan_starts: usize,
    pub refuse_stop_scan: bool,
    pub scan_callbacks: Option<ScanCallbacks>,
    pub links: Vec<Arc<MockLinkState>>,
    pub open_links: usize,
    pub max_open_links: usize,
    /// "open <address>" and "close <address>" in the order they happened.
    pub history: Vec<String>,
}

pub struct MockLinkState {
    pub address: String,
    pub callbacks: LinkCallbacks,
    pub services: Vec<GattService>,
    pub discover_requests: AtomicUsize,
    pub writes: Mutex<Vec<(Uuid, Uuid, Vec<u8>, WriteKind)>>,
    pub reads: Mutex<Vec<(Uuid, Uuid)>>,
    pub closes: AtomicUsize,
}

impl MockLinkState {
    pub fn writes(&self) -> Vec<(Uuid, Uuid, Vec<u8>, WriteKind)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }
}

#[derive(Clone)]
pub struct MockAdapter {
    pub journal: Arc<Mutex<Journal>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let journal = Journal {
            enabled: true,
            services: topology(),
            ..Journal::default()
        };

        Self {
            journal: Arc::new(Mutex::new(journal)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Journal) -> R) -> R {
        f(&mut self.journal.lock().unwrap())
    }

    pub fn link(&self, index: usize) -> Arc<MockLinkState> {
        self.with(|j| j.links[index].clone())
    }

    pub fn last_link(&self) -> Arc<MockLinkState> {
        self.with(|j| j.links.last().cloned().expect("no link opened"))
    }

    pub fn link_count(&self) -> usize {
        self.with(|j| j.links.len())
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn is_enabled(&self) -> bool {
        self.with(|j| j.enabled)
    }

    async fn local_name(&self) -> Option<String> {
        self.with(|j| j.local_name.clone())
    }

    async fn bonded_devices(&self) -> Vec<DeviceRecord> {
        self.with(|j| j.bonded.clone())
    }

    async fn start_scan(&self, callbacks: ScanCallbacks) -> Result<()> {
        self.with(|j| {
            j.scanning = true;
            j.scan_starts += 1;
            j.scan_callbacks = Some(callbacks);
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.with(|j| {
            if j.refuse_stop_scan {
                return Err(Error::Platform("scan stuck".into()));
            }
            j.scanning = false;
            Ok(())
        })
    }

    async fn connect(&self, address: &str, callbacks: LinkCallbacks) -> Option<Box<dyn GattLink>> {
        let state = self.with(|j| {
            if j.refuse_connect {
                return None;
            }

            let state = Arc::new(MockLinkState {
                address: address.to_string(),
                callbacks,
                services: j.services.clone(),
                discover_requests: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                reads: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            });
            j.links.push(state.clone());
            j.open_links += 1;
            j.max_open_links = j.max_open_links.max(j.open_links);
            j.history.push(format!("open {}", address));
            Some(state)
        })?;

        Some(Box::new(MockLink {
            state,
            journal: self.journal.clone(),
        }))
    }

    async fn connected_devices(&self) -> Vec<DeviceRecord> {
        self.with(|j| j.gatt_connected.clone())
    }
}

struct MockLink {
    state: Arc<MockLinkState>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl GattLink for MockLink {
    async fn discover_services(&self) {
        self.state.discover_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.state
            .services
            .iter()
            .any(|s| s.uuid == service && s.has_characteristic(characteristic))
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, data: Vec<u8>, kind: WriteKind) {
        self.state
            .writes
            .lock()
            .unwrap()
            .push((service, characteristic, data, kind));
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) {
        self.state.reads.lock().unwrap().push((service, characteristic));
    }

    async fn close(&self) {
        if self.state.closes.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut journal = self.journal.lock().unwrap();
            journal.open_links -= 1;
            journal.history.push(format!("close {}", self.state.address));
        }
    }
}

pub struct MockPermissions {
    granted: Mutex<HashSet<String>>,
}

impl MockPermissions {
    pub fn all() -> Self {
        let granted = [
            permissions::BLUETOOTH_SCAN,
            permissions::BLUETOOTH_CONNECT,
            permissions::ACCESS_FINE_LOCATION,
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();

        Self {
            granted: Mutex::new(granted),
        }
    }

    pub fn revoke(&self, permission: &str) {
        self.granted.lock().unwrap().remove(permission);
    }
}

impl Permissions for MockPermissions {
    fn is_granted(&self, permission: &str) -> bool {
        self.granted.lock().unwrap().contains(permission)
    }
}

/// Controller wired to the mock platform, with result and log streams subscribed up front.
pub struct Harness {
    pub controller: GattController,
    pub platform: MockAdapter,
    pub permissions: Arc<MockPermissions>,
    pub results: EventStream<ConnectionEvent>,
    pub logs: EventStream<String>,
    fences: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let platform = MockAdapter::new();
        let permissions = Arc::new(MockPermissions::all());
        let controller = GattController::new(
            Arc::new(platform.clone()),
            permissions.clone(),
            config,
        );
        let results = controller.connection_result_stream();
        let logs = controller.log_stream();

        Self {
            controller,
            platform,
            permissions,
            results,
            logs,
            fences: AtomicUsize::new(0),
        }
    }

    pub async fn next_result(&mut self) -> ConnectionEvent {
        next(&mut self.results).await
    }

    pub async fn next_log(&mut self) -> String {
        next(&mut self.logs).await
    }

    pub async fn expect_error(&mut self) -> Error {
        match self.next_result().await {
            ConnectionEvent::Error(e) => e,
            other => panic!("expected an error, got {:?}", other),
        }
    }

    /// Assert nothing more has been published on the result stream.
    pub async fn assert_quiet(&mut self) {
        assert_quiet(&mut self.results).await;
    }

    /// Wait until every hardware callback injected so far has been applied.
    ///
    /// Needs a running scan: pushes a marker device through the scan callbacks
    /// and waits for it to reach the scanned list.
    pub async fn fence(&self) {
        let callbacks = self
            .platform
            .with(|j| j.scan_callbacks.clone())
            .expect("fence needs a running scan");
        let n = self.fences.fetch_add(1, Ordering::SeqCst);
        let address = format!("FE:NC:E0:00:00:{:02X}", n);

        let mut scanned = self.controller.scanned_devices_stream();
        callbacks.device_discovered(DeviceRecord::new(None::<String>, address.clone()));

        tokio::time::timeout(WAIT, async {
            while let Some(list) = scanned.next().await {
                if list.iter().any(|d| d.address == address) {
                    return;
                }
            }
            panic!("scanned list stream ended");
        })
        .await
        .expect("fence timed out");
    }

    /// Connect to `device` and confirm link-up, leaving the controller discovering services.
    pub async fn connect_up(&mut self, device: &DeviceRecord) -> EventStream<ConnectionEvent> {
        let events = self.controller.connect_to_device(device).await;
        assert_eq!(self.next_result().await, ConnectionEvent::Established);

        self.platform.last_link().callbacks.connected();
        wait_for(|| self.platform.last_link().discover_requests.load(Ordering::SeqCst) > 0).await;

        events
    }

    /// Connect to `device` and run service discovery against [`topology`].
    pub async fn connect_ready(&mut self, device: &DeviceRecord) -> EventStream<ConnectionEvent> {
        let events = self.connect_up(device).await;

        self.platform
            .last_link()
            .callbacks
            .services_discovered(Ok(topology()));
        assert_eq!(
            self.next_result().await,
            ConnectionEvent::UuidsDiscovered {
                service: S1,
                characteristic: C1
            }
        );

        events
    }
}

pub async fn next<T>(stream: &mut EventStream<T>) -> T {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for an event")
        .expect("stream ended")
}

/// Next item, or `None` once the stream has ended.
pub async fn next_or_end<T>(stream: &mut EventStream<T>) -> Option<T> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for an event")
}

pub async fn assert_quiet<T: std::fmt::Debug>(stream: &mut EventStream<T>) {
    if let Ok(item) = tokio::time::timeout(QUIET, stream.next()).await {
        panic!("unexpected item: {:?}", item);
    }
}

/// Poll `condition` until it holds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

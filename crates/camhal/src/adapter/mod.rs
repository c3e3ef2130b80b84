// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Multiplexing of vendor camera modules.
//!
//! [`CameraHalAdapter`] composes every loaded [`CameraModule`] into one
//! external camera id space. Built-in cameras are numbered from zero, sorted
//! by `(facing, module, internal id)`; hot-plugged cameras get the following
//! ids in arrival order and are never renumbered.
//!
//! Clients reach the adapter through a [`CameraModuleClient`] obtained from
//! [`CameraHalAdapter::open_camera_hal`]. Module-level calls run on the
//! adapter's module worker. Status changes are fanned out to every client that
//! called `set_callbacks`, from a shared callbacks worker, and a client that
//! connects late is first sent the latest status the adapter cached.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use camhal::adapter::{AdapterConfig, CameraHalAdapter, CameraModuleOps, FacingFilter};
//! use camhal::camera3::CameraFacing;
//! use camhal::hal::CameraModule;
//!
//! # fn run(modules: Vec<Arc<dyn CameraModule>>) -> Result<(), camhal::Error> {
//! let adapter = CameraHalAdapter::new(modules, Vec::new(), None, AdapterConfig::default())?;
//! adapter.start()?;
//!
//! // Expose the front cameras only, renumbered from zero.
//! let front = FacingFilter::new(Arc::new(adapter.open_camera_hal()?), &[CameraFacing::Front])?;
//! println!("{} front cameras", front.get_number_of_cameras()?);
//! # Ok(())
//! # }
//! ```

mod client;
mod filter;
mod vendor_tags;

pub use client::CameraModuleClient;
pub use filter::FacingFilter;
pub use vendor_tags::VendorTagOps;

use crate::{
    buffer::DEFAULT_FENCE_WAIT,
    camera3::{CameraDeviceStatus, CameraFacing, CameraInfo, StatusCallbacks, TorchModeStatus},
    delegate::RemoteProxy,
    device::{
        abort_on_fatal_error, CameraDeviceClient, CameraDeviceSession, FatalErrorHandler,
        SessionOptions, ZslHelper, ZslSelection,
    },
    hal::{CameraModule, ModuleCallbacks},
    mapper::BufferMapper,
    metadata::{serialize, tags, CameraMetadata},
    reprocess::{ReprocessEffect, ReprocessEffectManager},
    worker::Worker,
    Error,
};
use log::{debug, error, info, trace, warn};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};

/// Settings shared by every device session the adapter opens.
#[derive(Clone)]
pub struct AdapterConfig {
    /// Used when a camera's characteristics lack a partial result count.
    pub default_partial_result_count: u32,
    pub fence_wait: Duration,
    /// Run when a device reports an unrecoverable error.
    pub on_fatal_error: FatalErrorHandler,
    /// Zero shutter lag frame selection, `None` to turn it off. Also needs a
    /// buffer mapper.
    pub zsl_selection: Option<ZslSelection>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            default_partial_result_count: 1,
            fence_wait: DEFAULT_FENCE_WAIT,
            on_fatal_error: abort_on_fatal_error(),
            zsl_selection: Some(ZslSelection::default()),
        }
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field(
                "default_partial_result_count",
                &self.default_partial_result_count,
            )
            .field("fence_wait", &self.fence_wait)
            .field("zsl_selection", &self.zsl_selection)
            .finish_non_exhaustive()
    }
}

/// Module-level operations offered to clients.
///
/// Implemented by [`CameraModuleClient`] and by decorators such as
/// [`FacingFilter`] that restrict or renumber the camera set.
pub trait CameraModuleOps: Send + Sync {
    /// Opens `camera_id`.
    ///
    /// Fails with `EINVAL` for an unknown id, `EBUSY` when it is already open
    /// and `ENODEV` when the session cannot be started.
    fn open_device(&self, camera_id: u32) -> Result<CameraDeviceClient, Error>;

    /// Number of built-in cameras. Hot-plugged cameras are announced through
    /// status callbacks instead.
    fn get_number_of_cameras(&self) -> Result<u32, Error>;

    fn get_camera_info(&self, camera_id: u32) -> Result<CameraInfo, Error>;

    /// Registers a status listener and replays the cached status to it.
    fn set_callbacks(&self, callbacks: Arc<dyn StatusCallbacks>) -> Result<(), Error>;

    fn set_torch_mode(&self, camera_id: u32, enabled: bool) -> Result<(), Error>;

    fn init(&self) -> Result<(), Error>;

    fn get_vendor_tag_ops(&self) -> Result<VendorTagOps, Error>;
}

type StatusProxy = RemoteProxy<dyn StatusCallbacks>;

#[derive(Default)]
struct CameraTable {
    started: bool,
    /// External id to `(module index, internal id)`.
    ids: BTreeMap<u32, (usize, u32)>,
    /// Per module, internal id to external id.
    reverse: Vec<BTreeMap<u32, u32>>,
    num_builtin: u32,
    next_external_id: u32,
    device_status: BTreeMap<u32, CameraDeviceStatus>,
    torch: BTreeMap<u32, TorchModeStatus>,
    default_torch: BTreeMap<u32, TorchModeStatus>,
    /// Open sessions with the serial they were opened under.
    devices: BTreeMap<u32, (u64, Arc<CameraDeviceSession>)>,
    next_session_serial: u64,
}

impl CameraTable {
    fn resolve(&self, camera_id: u32) -> Result<(usize, u32), Error> {
        self.ids
            .get(&camera_id)
            .copied()
            .ok_or_else(|| Error::invalid(format!("unknown camera {}", camera_id)))
    }

    fn external_id(&self, module_index: usize, internal_id: u32) -> Option<u32> {
        self.reverse
            .get(module_index)
            .and_then(|m| m.get(&internal_id))
            .copied()
    }
}

struct CameraRecord {
    facing: CameraFacing,
    module_index: usize,
    internal_id: u32,
    has_flash: bool,
}

pub(crate) struct AdapterInner {
    this: Weak<AdapterInner>,
    modules: Vec<Arc<dyn CameraModule>>,
    pending_effects: Mutex<Vec<Arc<dyn ReprocessEffect>>>,
    effects: Mutex<Option<Arc<ReprocessEffectManager>>>,
    mapper: Option<Arc<dyn BufferMapper>>,
    config: AdapterConfig,
    module_worker: Arc<Worker>,
    callbacks_worker: Arc<Worker>,
    table: Mutex<CameraTable>,
    listeners: Mutex<BTreeMap<u64, Arc<StatusProxy>>>,
}

/// The camera module multiplexer.
pub struct CameraHalAdapter {
    inner: Arc<AdapterInner>,
    next_client_id: AtomicU64,
}

impl CameraHalAdapter {
    /// Creates the adapter and its module and callbacks workers.
    ///
    /// Reprocessing `effects` need a buffer `mapper`; without one they are
    /// disabled.
    pub fn new(
        modules: Vec<Arc<dyn CameraModule>>,
        effects: Vec<Arc<dyn ReprocessEffect>>,
        mapper: Option<Arc<dyn BufferMapper>>,
        config: AdapterConfig,
    ) -> Result<Self, Error> {
        let module_worker = Arc::new(Worker::start("camhal-module")?);
        let callbacks_worker = Arc::new(Worker::start("camhal-status")?);
        let inner = Arc::new_cyclic(|this| AdapterInner {
            this: this.clone(),
            modules,
            pending_effects: Mutex::new(effects),
            effects: Mutex::new(None),
            mapper,
            config,
            module_worker,
            callbacks_worker,
            table: Mutex::new(CameraTable::default()),
            listeners: Mutex::new(BTreeMap::new()),
        });
        Ok(CameraHalAdapter {
            inner,
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Initializes every module and builds the camera id map.
    ///
    /// Runs on the module worker and returns once enumeration finished.
    pub fn start(&self) -> Result<(), Error> {
        let inner = self.inner.clone();
        self.inner.module_worker.post_and_wait(move || inner.start())?
    }

    /// Connects a new client.
    pub fn open_camera_hal(&self) -> Result<CameraModuleClient, Error> {
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        debug!("client {} connected", client_id);
        Ok(CameraModuleClient::bind(
            client_id,
            self.inner.module_worker.clone(),
            self.inner.clone(),
        ))
    }

    /// Number of currently open devices.
    pub fn open_devices(&self) -> usize {
        self.inner.table().map(|t| t.devices.len()).unwrap_or(0)
    }

    /// Closes every open device and stops the workers.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<CameraDeviceSession>> = match self.inner.table() {
            Ok(mut table) => std::mem::take(&mut table.devices)
                .into_values()
                .map(|(_, session)| session)
                .collect(),
            Err(_) => Vec::new(),
        };
        for session in sessions {
            if let Err(err) = session.close() {
                warn!("camera {}: close on shutdown: {}", session.camera_id(), err);
            }
        }
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.clear();
        }
        self.inner.module_worker.stop();
        self.inner.callbacks_worker.stop();
        info!("camera HAL adapter stopped");
    }
}

/// Receives status changes of one module and forwards them to the module
/// worker translated to external ids.
struct ModuleCallbacksAux {
    module_index: usize,
    adapter: Weak<AdapterInner>,
}

impl ModuleCallbacks for ModuleCallbacksAux {
    fn camera_device_status_change(&self, camera_id: u32, status: CameraDeviceStatus) {
        let Some(adapter) = self.adapter.upgrade() else {
            return;
        };
        let module_index = self.module_index;
        let posted = adapter.module_worker.post({
            let adapter = adapter.clone();
            move || adapter.on_device_status_change(module_index, camera_id, status)
        });
        if posted.is_err() {
            debug!("module worker stopped, dropping device status change");
        }
    }

    fn torch_mode_status_change(&self, camera_id: u32, status: TorchModeStatus) {
        let Some(adapter) = self.adapter.upgrade() else {
            return;
        };
        let module_index = self.module_index;
        let posted = adapter.module_worker.post({
            let adapter = adapter.clone();
            move || adapter.on_torch_status_change(module_index, camera_id, status)
        });
        if posted.is_err() {
            debug!("module worker stopped, dropping torch status change");
        }
    }
}

impl AdapterInner {
    fn table(&self) -> Result<MutexGuard<'_, CameraTable>, Error> {
        self.table
            .lock()
            .map_err(|_| Error::Poisoned("camera table"))
    }

    fn effects(&self) -> Option<Arc<ReprocessEffectManager>> {
        self.effects.lock().ok().and_then(|e| e.clone())
    }

    fn start(&self) -> Result<(), Error> {
        if self.table()?.started {
            warn!("camera HAL adapter already started");
            return Ok(());
        }

        for module in &self.modules {
            module.init().map_err(|err| {
                error!("failed to initialize module {}: {}", module.name(), err);
                err
            })?;
        }

        let mut records = Vec::new();
        for (module_index, module) in self.modules.iter().enumerate() {
            let count = module.get_number_of_cameras();
            module.set_callbacks(Arc::new(ModuleCallbacksAux {
                module_index,
                adapter: self.this.clone(),
            }))?;
            for internal_id in 0..count {
                let info = module.get_camera_info(internal_id)?;
                let flash = info
                    .static_camera_characteristics
                    .find(tags::ANDROID_FLASH_INFO_AVAILABLE)
                    .and_then(|e| e.first::<u8>());
                let Some(flash) = flash else {
                    error!(
                        "camera {} of module {} has no flash info",
                        internal_id,
                        module.name()
                    );
                    return Err(Error::invalid("flash info missing"));
                };
                records.push(CameraRecord {
                    facing: info.facing,
                    module_index,
                    internal_id,
                    has_flash: flash == tags::ANDROID_FLASH_INFO_AVAILABLE_TRUE,
                });
            }
        }
        records.sort_by_key(|r| (r.facing, r.module_index, r.internal_id));

        let effects = {
            let pending = {
                let mut guard = self
                    .pending_effects
                    .lock()
                    .map_err(|_| Error::Poisoned("effect list"))?;
                std::mem::take(&mut *guard)
            };
            match (&self.mapper, pending.is_empty()) {
                (_, true) => None,
                (Some(mapper), false) => Some(Arc::new(ReprocessEffectManager::new(
                    pending,
                    mapper.clone(),
                )?)),
                (None, false) => {
                    warn!("no buffer mapper, reprocessing effects disabled");
                    None
                }
            }
        };
        if let Ok(mut current) = self.effects.lock() {
            *current = effects;
        }

        let mut table = self.table()?;
        table.reverse = vec![BTreeMap::new(); self.modules.len()];
        for (external_id, record) in (0u32..).zip(&records) {
            table
                .ids
                .insert(external_id, (record.module_index, record.internal_id));
            table.reverse[record.module_index].insert(record.internal_id, external_id);
            let torch = if record.has_flash {
                TorchModeStatus::AvailableOff
            } else {
                TorchModeStatus::NotAvailable
            };
            table.torch.insert(external_id, torch);
            table.default_torch.insert(external_id, torch);
            table
                .device_status
                .insert(external_id, CameraDeviceStatus::Present);
            debug!(
                "camera {} is {:?} camera {} of {}",
                external_id,
                record.facing,
                record.internal_id,
                self.modules[record.module_index].name()
            );
        }
        let count = u32::try_from(records.len()).unwrap_or(u32::MAX);
        table.num_builtin = count;
        table.next_external_id = count;
        table.started = true;

        info!(
            "{} cameras from {} modules",
            count,
            self.modules.len()
        );
        Ok(())
    }

    fn on_device_status_change(
        &self,
        module_index: usize,
        internal_id: u32,
        status: CameraDeviceStatus,
    ) {
        let (camera_id, unplugged) = {
            let Ok(mut table) = self.table() else {
                return;
            };
            match (status, table.external_id(module_index, internal_id)) {
                (CameraDeviceStatus::Present, None) => {
                    let camera_id = table.next_external_id;
                    table.next_external_id += 1;
                    table.ids.insert(camera_id, (module_index, internal_id));
                    if let Some(reverse) = table.reverse.get_mut(module_index) {
                        reverse.insert(internal_id, camera_id);
                    }
                    table
                        .torch
                        .insert(camera_id, TorchModeStatus::NotAvailable);
                    table
                        .default_torch
                        .insert(camera_id, TorchModeStatus::NotAvailable);
                    table.device_status.insert(camera_id, status);
                    info!("camera {} plugged", camera_id);
                    (camera_id, None)
                }
                (CameraDeviceStatus::Present, Some(camera_id)) => {
                    warn!("camera {} reported present twice", camera_id);
                    table.device_status.insert(camera_id, status);
                    (camera_id, None)
                }
                (CameraDeviceStatus::NotPresent, Some(camera_id)) => {
                    table.ids.remove(&camera_id);
                    if let Some(reverse) = table.reverse.get_mut(module_index) {
                        reverse.remove(&internal_id);
                    }
                    table.torch.remove(&camera_id);
                    table.default_torch.remove(&camera_id);
                    table.device_status.remove(&camera_id);
                    let session = table.devices.remove(&camera_id).map(|(_, s)| s);
                    info!("camera {} unplugged", camera_id);
                    (camera_id, session)
                }
                (CameraDeviceStatus::Enumerating, Some(camera_id)) => {
                    table.device_status.insert(camera_id, status);
                    (camera_id, None)
                }
                (_, None) => {
                    warn!(
                        "status {:?} for unknown camera {} of module {}",
                        status, internal_id, module_index
                    );
                    return;
                }
            }
        };

        if let Some(session) = unplugged {
            if let Err(err) = session.close() {
                warn!("camera {}: close on unplug: {}", camera_id, err);
            }
        }

        for listener in self.listeners() {
            listener.post(move |cb| cb.camera_device_status_change(camera_id, status));
        }
    }

    fn on_torch_status_change(&self, module_index: usize, internal_id: u32, status: TorchModeStatus) {
        let camera_id = {
            let Ok(mut table) = self.table() else {
                return;
            };
            let Some(camera_id) = table.external_id(module_index, internal_id) else {
                warn!(
                    "torch status {:?} for unknown camera {} of module {}",
                    status, internal_id, module_index
                );
                return;
            };
            table.torch.insert(camera_id, status);
            camera_id
        };
        trace!("camera {}: torch {:?}", camera_id, status);

        for listener in self.listeners() {
            listener.post(move |cb| cb.torch_mode_status_change(camera_id, status));
        }
    }

    fn listeners(&self) -> Vec<Arc<StatusProxy>> {
        self.listeners
            .lock()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn remove_listener(&self, client_id: u64) {
        let removed = self
            .listeners
            .lock()
            .ok()
            .and_then(|mut l| l.remove(&client_id));
        if removed.is_some() {
            debug!("client {}: status listener removed", client_id);
        }
    }

    fn remove_device(&self, camera_id: u32, serial: u64) {
        let Ok(mut table) = self.table() else {
            return;
        };
        let current = table
            .devices
            .get(&camera_id)
            .is_some_and(|(s, _)| *s == serial);
        if current {
            table.devices.remove(&camera_id);
            debug!("camera {} closed", camera_id);
        }
    }

    fn partial_result_count(&self, characteristics: &CameraMetadata) -> u32 {
        characteristics
            .find(tags::ANDROID_REQUEST_PARTIAL_RESULT_COUNT)
            .and_then(|e| e.first::<i32>())
            .and_then(|count| u32::try_from(count).ok())
            .filter(|count| *count > 0)
            .unwrap_or(self.config.default_partial_result_count)
    }

    fn zsl_helper(
        &self,
        camera_id: u32,
        characteristics: &CameraMetadata,
    ) -> Option<Arc<ZslHelper>> {
        let strategy = self.config.zsl_selection?;
        let mapper = self.mapper.as_ref()?;
        match ZslHelper::new(
            camera_id,
            characteristics,
            mapper.as_ref(),
            strategy,
            self.config.fence_wait,
        ) {
            Ok(helper) => Some(Arc::new(helper)),
            Err(Error::NotSupported) => {
                debug!("camera {}: no zero shutter lag", camera_id);
                None
            }
            Err(err) => {
                warn!("camera {}: zero shutter lag unavailable: {}", camera_id, err);
                None
            }
        }
    }

    pub(crate) fn open_device(&self, camera_id: u32) -> Result<CameraDeviceClient, Error> {
        let (module_index, internal_id) = {
            let table = self.table()?;
            let resolved = table.resolve(camera_id)?;
            if table.devices.contains_key(&camera_id) {
                warn!("camera {} is already open", camera_id);
                return Err(Error::Busy);
            }
            resolved
        };
        let module = self.modules[module_index].clone();

        let info = module.get_camera_info(internal_id)?;
        let partial_result_count = self.partial_result_count(&info.static_camera_characteristics);
        let device = module.open(internal_id).map_err(|err| {
            error!("failed to open camera {}: {}", camera_id, err);
            err
        })?;

        let options = SessionOptions {
            partial_result_count,
            fence_wait: self.config.fence_wait,
            on_fatal_error: self.config.on_fatal_error.clone(),
            zsl: self.zsl_helper(camera_id, &info.static_camera_characteristics),
        };
        let session =
            CameraDeviceSession::new(camera_id, module, device, self.effects(), options)
                .map_err(|err| {
                    error!("camera {}: session did not start: {}", camera_id, err);
                    Error::NoDevice
                })?;

        let serial = {
            let mut table = self.table()?;
            table.next_session_serial += 1;
            let serial = table.next_session_serial;
            table.devices.insert(camera_id, (serial, session.clone()));
            serial
        };
        let adapter = self.this.clone();
        session.set_close_callback(move || {
            if let Some(adapter) = adapter.upgrade() {
                adapter.remove_device(camera_id, serial);
            }
        });

        info!("camera {} opened", camera_id);
        Ok(CameraDeviceClient::bind(session))
    }

    pub(crate) fn get_number_of_cameras(&self) -> Result<u32, Error> {
        Ok(self.table()?.num_builtin)
    }

    pub(crate) fn get_camera_info(&self, camera_id: u32) -> Result<CameraInfo, Error> {
        let (module_index, internal_id) = self.table()?.resolve(camera_id)?;
        let info = self.modules[module_index].get_camera_info(internal_id)?;
        let mut characteristics = info.static_camera_characteristics;

        if let Some(effects) = self.effects() {
            let vendor_tags: Vec<i32> = effects.vendor_tags().map(|t| t.tag as i32).collect();
            for key in [
                tags::ANDROID_REQUEST_AVAILABLE_REQUEST_KEYS,
                tags::ANDROID_REQUEST_AVAILABLE_RESULT_KEYS,
                tags::ANDROID_REQUEST_AVAILABLE_CHARACTERISTICS_KEYS,
            ] {
                match characteristics.find(key).and_then(|e| e.values::<i32>()) {
                    Some(mut keys) => {
                        keys.extend_from_slice(&vendor_tags);
                        characteristics.update(key, &keys)?;
                    }
                    None => error!("camera {}: key list {:#x} missing", camera_id, key),
                }
            }
            for tag in effects.vendor_tags() {
                characteristics.update_raw(
                    tag.tag,
                    tag.entry_type,
                    1,
                    tag.default_value.clone(),
                )?;
            }
        }

        Ok(CameraInfo {
            facing: info.facing,
            orientation: info.orientation,
            device_version: info.device_version,
            static_camera_characteristics: serialize(&characteristics)?,
        })
    }

    pub(crate) fn set_callbacks(
        &self,
        client_id: u64,
        callbacks: Arc<dyn StatusCallbacks>,
    ) -> Result<(), Error> {
        let proxy = Arc::new(StatusProxy::with_worker(
            self.callbacks_worker.clone(),
            callbacks,
        ));
        let adapter = self.this.clone();
        proxy.set_connection_error_handler(move || {
            if let Some(adapter) = adapter.upgrade() {
                adapter.remove_listener(client_id);
            }
        });
        self.listeners
            .lock()
            .map_err(|_| Error::Poisoned("listener table"))?
            .insert(client_id, proxy);

        // Replayed after this call returned to the client.
        let adapter = self.this.upgrade().ok_or(Error::NoDevice)?;
        self.module_worker
            .post(move || adapter.send_latest_status(client_id))
    }

    fn send_latest_status(&self, client_id: u64) {
        let Some(listener) = self
            .listeners
            .lock()
            .ok()
            .and_then(|l| l.get(&client_id).cloned())
        else {
            return;
        };
        let Ok(table) = self.table() else {
            return;
        };

        for (&camera_id, &status) in &table.device_status {
            if camera_id >= table.num_builtin || status != CameraDeviceStatus::Present {
                listener.post(move |cb| cb.camera_device_status_change(camera_id, status));
            }
        }
        for (&camera_id, &status) in &table.torch {
            if table.default_torch.get(&camera_id) != Some(&status) {
                listener.post(move |cb| cb.torch_mode_status_change(camera_id, status));
            }
        }
        trace!("client {}: latest status sent", client_id);
    }

    pub(crate) fn set_torch_mode(&self, camera_id: u32, enabled: bool) -> Result<(), Error> {
        let (module_index, internal_id) = self.table()?.resolve(camera_id)?;
        self.modules[module_index].set_torch_mode(internal_id, enabled)
    }

    pub(crate) fn get_vendor_tag_ops(&self) -> VendorTagOps {
        VendorTagOps::new(self.effects())
    }
}

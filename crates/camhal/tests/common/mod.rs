// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Fakes shared by the integration tests: a scriptable vendor module and
// device, file-backed NV12 buffers with a matching buffer mapper, and
// recorders for the client callback interfaces.

#![allow(dead_code)]

use camhal::{
    adapter::{AdapterConfig, CameraHalAdapter, CameraModuleClient},
    buffer::BufferHandle,
    camera3::{
        BufferRegistration, BufferStatus, CameraDeviceStatus, CameraFacing, CaptureCallbacks,
        CaptureResult, ErrorCode, HalCaptureRequest, HalCaptureResult, HalStreamBuffer,
        NotifyMessage, RequestTemplate, StatusCallbacks, TorchModeStatus,
    },
    format::HalPixelFormat,
    fourcc::FourCC,
    hal::{CameraDevice, CameraModule, DeviceCallbacks, HalCameraInfo, ModuleCallbacks},
    mapper::{AllocationDescriptor, BufferMapper, MappedImage},
    metadata::{tags, CameraMetadata},
    reprocess::ReprocessEffect,
    stream::Stream,
    Error,
};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    os::{fd::OwnedFd, unix::fs::FileExt},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

/// Written by the fake device into every default request.
pub const TEMPLATE_TAG: u32 = 0x0001_0000;

/// Partial `n` of a fake result carries this tag plus `n`.
pub const PARTIAL_TAG: u32 = 0x0017_0000;

/// Pipeline depth advertised by cameras built `with_zsl`.
pub const ZSL_PIPELINE_DEPTH: u8 = 4;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// =============================================================================
// Vendor module
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeCamera {
    pub facing: CameraFacing,
    pub has_flash: bool,
    pub flash_info: bool,
    pub partial_result_count: i32,
    pub zsl: bool,
}

impl FakeCamera {
    pub fn new(facing: CameraFacing) -> Self {
        FakeCamera {
            facing,
            has_flash: false,
            flash_info: true,
            partial_result_count: 1,
            zsl: false,
        }
    }

    pub fn with_flash(mut self) -> Self {
        self.has_flash = true;
        self
    }

    pub fn with_partials(mut self, count: i32) -> Self {
        self.partial_result_count = count;
        self
    }

    pub fn without_flash_info(mut self) -> Self {
        self.flash_info = false;
        self
    }

    /// Advertises private reprocessing with a 64x48 private input size.
    pub fn with_zsl(mut self) -> Self {
        self.zsl = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub frame_number: u32,
    pub input_buffer: Option<u64>,
    pub output_buffers: Vec<u64>,
}

/// What a fake device saw, and switches changing how it answers.
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub requests: Mutex<Vec<SubmittedRequest>>,
    pub configured: Mutex<Vec<Stream>>,
    pub closed: AtomicU32,
    pub flushes: AtomicU32,
    /// The next request gets ERROR_DEVICE instead of results.
    pub inject_device_error: AtomicBool,
    /// The next request gets its first partial, then ERROR_RESULT.
    pub lose_result_after_first_partial: AtomicBool,
    /// Requests are kept unanswered until the next flush.
    pub hold_requests: AtomicBool,
}

impl DeviceLog {
    pub fn requests(&self) -> Vec<SubmittedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Vec<Stream> {
        self.configured.lock().unwrap().clone()
    }
}

pub struct FakeModule {
    name: String,
    builtin: u32,
    cameras: Mutex<Vec<FakeCamera>>,
    callbacks: Mutex<Option<Arc<dyn ModuleCallbacks>>>,
    logs: Mutex<BTreeMap<u32, Arc<DeviceLog>>>,
    pub opened: Mutex<Vec<u32>>,
}

impl FakeModule {
    pub fn new(name: &str, cameras: Vec<FakeCamera>) -> Arc<Self> {
        Arc::new(FakeModule {
            name: name.to_owned(),
            builtin: cameras.len() as u32,
            cameras: Mutex::new(cameras),
            callbacks: Mutex::new(None),
            logs: Mutex::new(BTreeMap::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn device_log(&self, camera_id: u32) -> Arc<DeviceLog> {
        self.logs
            .lock()
            .unwrap()
            .entry(camera_id)
            .or_default()
            .clone()
    }

    fn callbacks(&self) -> Arc<dyn ModuleCallbacks> {
        self.callbacks
            .lock()
            .unwrap()
            .clone()
            .expect("set_callbacks was not called")
    }

    pub fn emit_device_status(&self, camera_id: u32, status: CameraDeviceStatus) {
        self.callbacks().camera_device_status_change(camera_id, status);
    }

    pub fn emit_torch_status(&self, camera_id: u32, status: TorchModeStatus) {
        self.callbacks().torch_mode_status_change(camera_id, status);
    }

    /// Adds a camera and reports it present. Returns its internal id.
    pub fn plug(&self, camera: FakeCamera) -> u32 {
        let id = {
            let mut cameras = self.cameras.lock().unwrap();
            cameras.push(camera);
            cameras.len() as u32 - 1
        };
        self.emit_device_status(id, CameraDeviceStatus::Present);
        id
    }

    fn camera(&self, camera_id: u32) -> Result<FakeCamera, Error> {
        self.cameras
            .lock()
            .unwrap()
            .get(camera_id as usize)
            .cloned()
            .ok_or(Error::Vendor(-libc::EINVAL))
    }
}

impl CameraModule for FakeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_number_of_cameras(&self) -> u32 {
        self.builtin
    }

    fn get_camera_info(&self, camera_id: u32) -> Result<HalCameraInfo, Error> {
        let camera = self.camera(camera_id)?;
        let mut md = CameraMetadata::new();
        if camera.flash_info {
            md.update(tags::ANDROID_FLASH_INFO_AVAILABLE, &[u8::from(camera.has_flash)])?;
        }
        md.update(tags::ANDROID_LENS_FACING, &[camera.facing as u8])?;
        md.update(
            tags::ANDROID_REQUEST_PARTIAL_RESULT_COUNT,
            &[camera.partial_result_count],
        )?;
        md.update(
            tags::ANDROID_REQUEST_AVAILABLE_REQUEST_KEYS,
            &[TEMPLATE_TAG as i32],
        )?;
        md.update(
            tags::ANDROID_REQUEST_AVAILABLE_RESULT_KEYS,
            &[tags::ANDROID_SENSOR_TIMESTAMP as i32],
        )?;
        md.update(
            tags::ANDROID_REQUEST_AVAILABLE_CHARACTERISTICS_KEYS,
            &[tags::ANDROID_LENS_FACING as i32],
        )?;
        if camera.zsl {
            md.update(
                tags::ANDROID_REQUEST_AVAILABLE_CAPABILITIES,
                &[0u8, tags::ANDROID_REQUEST_AVAILABLE_CAPABILITIES_PRIVATE_REPROCESSING],
            )?;
            md.update(
                tags::ANDROID_SCALER_AVAILABLE_STREAM_CONFIGURATIONS,
                &[
                    0x22i32, 64, 48, 1, //
                    0x22, 64, 48, 0, //
                    0x21, 64, 48, 0,
                ],
            )?;
            md.update(tags::ANDROID_REQUEST_PIPELINE_MAX_DEPTH, &[ZSL_PIPELINE_DEPTH])?;
            md.update(tags::ANDROID_REQUEST_MAX_NUM_INPUT_STREAMS, &[1i32])?;
        }
        Ok(HalCameraInfo {
            facing: camera.facing,
            orientation: 90,
            device_version: 0x0305,
            static_camera_characteristics: md,
        })
    }

    fn set_callbacks(&self, callbacks: Arc<dyn ModuleCallbacks>) -> Result<(), Error> {
        *self.callbacks.lock().unwrap() = Some(callbacks);
        Ok(())
    }

    fn open(&self, camera_id: u32) -> Result<Box<dyn CameraDevice>, Error> {
        let camera = self.camera(camera_id)?;
        self.opened.lock().unwrap().push(camera_id);
        Ok(Box::new(FakeDevice {
            camera_id,
            partials: camera.partial_result_count.max(1) as u32,
            log: self.device_log(camera_id),
            callbacks: None,
            held: Vec::new(),
        }))
    }
}

/// Answers every request synchronously: a shutter, then one result per
/// partial with the buffers in the first.
pub struct FakeDevice {
    camera_id: u32,
    partials: u32,
    log: Arc<DeviceLog>,
    callbacks: Option<Arc<dyn DeviceCallbacks>>,
    held: Vec<HalCaptureRequest>,
}

impl CameraDevice for FakeDevice {
    fn initialize(&mut self, callbacks: Arc<dyn DeviceCallbacks>) -> Result<(), Error> {
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn configure_streams(&mut self, streams: &mut [Stream], _: u32) -> Result<(), Error> {
        for stream in streams.iter_mut() {
            stream.usage |= 0x2_0000;
            stream.max_buffers = 4;
        }
        *self.log.configured.lock().unwrap() = streams.to_vec();
        Ok(())
    }

    fn construct_default_request_settings(
        &mut self,
        template: RequestTemplate,
    ) -> Result<CameraMetadata, Error> {
        let mut md = CameraMetadata::new();
        md.update(TEMPLATE_TAG, &[template as i32])?;
        Ok(md)
    }

    fn process_capture_request(&mut self, request: HalCaptureRequest) -> Result<(), Error> {
        let callbacks = self.callbacks.clone().ok_or(Error::NoDevice)?;
        let frame_number = request.frame_number;
        self.log.requests.lock().unwrap().push(SubmittedRequest {
            frame_number,
            input_buffer: request.input_buffer.as_ref().map(|b| b.buffer.buffer_id()),
            output_buffers: request
                .output_buffers
                .iter()
                .map(|b| b.buffer.buffer_id())
                .collect(),
        });

        if self.log.inject_device_error.swap(false, Ordering::SeqCst) {
            callbacks.notify(NotifyMessage::Error {
                frame_number,
                stream_id: None,
                code: ErrorCode::Device,
            });
            return Ok(());
        }
        if self.log.hold_requests.load(Ordering::SeqCst) {
            self.held.push(request);
            return Ok(());
        }
        let lose_result = self
            .log
            .lose_result_after_first_partial
            .swap(false, Ordering::SeqCst);

        let timestamp = 1_000_000 * (u64::from(frame_number) + 1);
        callbacks.notify(NotifyMessage::Shutter {
            frame_number,
            timestamp,
        });

        let mut input_buffer = request.input_buffer;
        let mut output_buffers = request.output_buffers;
        for index in 1..=self.partials {
            let mut md = CameraMetadata::new();
            md.update(PARTIAL_TAG + index, &[index as i32])?;
            if index == self.partials {
                md.update(tags::ANDROID_SENSOR_TIMESTAMP, &[timestamp as i64])?;
            }
            callbacks.process_capture_result(HalCaptureResult {
                frame_number,
                result: Some(md),
                output_buffers: std::mem::take(&mut output_buffers),
                input_buffer: input_buffer.take(),
                partial_result: index,
            });
            if lose_result {
                callbacks.notify(NotifyMessage::Error {
                    frame_number,
                    stream_id: None,
                    code: ErrorCode::Result,
                });
                break;
            }
        }
        Ok(())
    }

    /// Fails every held request: ERROR_REQUEST, then its buffers back with
    /// an error status.
    fn flush(&mut self) -> Result<(), Error> {
        self.log.flushes.fetch_add(1, Ordering::SeqCst);
        let Some(callbacks) = self.callbacks.clone() else {
            return Ok(());
        };
        let failed = |mut buffer: HalStreamBuffer| {
            buffer.status = BufferStatus::Error;
            buffer
        };
        for request in self.held.drain(..) {
            callbacks.notify(NotifyMessage::Error {
                frame_number: request.frame_number,
                stream_id: None,
                code: ErrorCode::Request,
            });
            callbacks.process_capture_result(HalCaptureResult {
                frame_number: request.frame_number,
                result: None,
                output_buffers: request.output_buffers.into_iter().map(failed).collect(),
                input_buffer: request.input_buffer.map(failed),
                partial_result: 0,
            });
        }
        Ok(())
    }

    fn dump(&self, out: &mut dyn Write) -> Result<(), Error> {
        writeln!(out, "fake camera {}", self.camera_id)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Buffers
// =============================================================================

static NEXT_FILE: AtomicU64 = AtomicU64::new(0);

fn anonymous_file(len: u64) -> File {
    let path = std::env::temp_dir().join(format!(
        "camhal-test-{}-{}",
        std::process::id(),
        NEXT_FILE.fetch_add(1, Ordering::SeqCst)
    ));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)
        .unwrap();
    fs::remove_file(&path).unwrap();
    file.set_len(len).unwrap();
    file
}

/// An NV12 image in an unlinked file, both planes in the same file.
pub struct TestBuffer {
    pub file: File,
    pub width: u32,
    pub height: u32,
}

impl TestBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let buffer = TestBuffer {
            file: anonymous_file(0),
            width,
            height,
        };
        buffer.file.set_len(buffer.size() as u64).unwrap();
        buffer
    }

    pub fn luma_size(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn size(&self) -> usize {
        self.luma_size() + (self.width * ((self.height + 1) / 2)) as usize
    }

    pub fn fill(&self, luma: u8, chroma: u8) {
        let mut data = vec![luma; self.luma_size()];
        data.resize(self.size(), chroma);
        self.file.write_all_at(&data, 0).unwrap();
    }

    pub fn contents(&self) -> Vec<u8> {
        let mut data = vec![0; self.size()];
        self.file.read_exact_at(&mut data, 0).unwrap();
        data
    }

    pub fn registration(&self, buffer_id: u64) -> BufferRegistration {
        self.registration_as(buffer_id, HalPixelFormat::ImplementationDefined)
    }

    pub fn registration_as(&self, buffer_id: u64, hal_format: HalPixelFormat) -> BufferRegistration {
        let fd = || OwnedFd::from(self.file.try_clone().unwrap());
        BufferRegistration {
            buffer_id,
            drm_format: FourCC::NV12,
            hal_format,
            width: self.width,
            height: self.height,
            fds: vec![fd(), fd()],
            strides: vec![self.width, self.width],
            offsets: vec![0, self.width * self.height],
        }
    }
}

/// Allocates [`TestBuffer`]s and maps them by reading and writing the file.
#[derive(Default)]
pub struct FileMapper {
    pub allocations: AtomicU32,
    /// Allocations and reads fail with ENOMEM while set.
    pub broken: AtomicBool,
}

impl FileMapper {
    fn check(&self) -> Result<(), Error> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Vendor(-libc::ENOMEM));
        }
        Ok(())
    }
}

fn mapped_size(buffer: &BufferHandle) -> usize {
    let planes = buffer.num_planes();
    let rows = if planes > 1 {
        (buffer.height() + 1) / 2
    } else {
        buffer.height()
    };
    match (buffer.offsets().last(), buffer.strides().last()) {
        (Some(offset), Some(stride)) => (offset + stride * rows) as usize,
        _ => 0,
    }
}

fn plane_file(buffer: &BufferHandle) -> Result<File, Error> {
    let fd = buffer
        .plane(0)
        .ok_or(Error::NoDevice)?
        .try_clone_to_owned()?;
    Ok(File::from(fd))
}

impl BufferMapper for FileMapper {
    fn allocate(&self, descriptor: &AllocationDescriptor) -> Result<BufferHandle, Error> {
        self.check()?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        let buffer = TestBuffer::new(descriptor.width, descriptor.height);
        BufferHandle::try_from(buffer.registration_as(descriptor.buffer_id, descriptor.format))
    }

    fn read(&self, buffer: &BufferHandle) -> Result<MappedImage, Error> {
        self.check()?;
        let mut data = vec![0; mapped_size(buffer)];
        plane_file(buffer)?.read_exact_at(&mut data, 0)?;
        Ok(MappedImage {
            width: buffer.width(),
            height: buffer.height(),
            drm_format: buffer.drm_format(),
            strides: buffer.strides().to_vec(),
            offsets: buffer.offsets().to_vec(),
            data,
        })
    }

    fn write(&self, buffer: &BufferHandle, image: &MappedImage) -> Result<(), Error> {
        plane_file(buffer)?.write_all_at(&image.data, 0)?;
        Ok(())
    }
}

// =============================================================================
// Client callbacks
// =============================================================================

#[derive(Default)]
pub struct Captured {
    pub results: Vec<CaptureResult>,
    pub notifies: Vec<NotifyMessage>,
}

#[derive(Default)]
pub struct CaptureRecorder {
    captured: Mutex<Captured>,
    changed: Condvar,
}

impl CaptureRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(CaptureRecorder::default())
    }

    /// Waits until `done` holds, returning whether it did in time.
    pub fn wait_for(&self, done: impl Fn(&Captured) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut captured = self.captured.lock().unwrap();
        while !done(&captured) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            captured = self.changed.wait_timeout(captured, deadline - now).unwrap().0;
        }
        true
    }

    pub fn wait_results(&self, count: usize) -> bool {
        self.wait_for(|c| c.results.len() >= count)
    }

    pub fn take_results(&self) -> Vec<CaptureResult> {
        std::mem::take(&mut self.captured.lock().unwrap().results)
    }

    pub fn notifies(&self) -> Vec<NotifyMessage> {
        self.captured.lock().unwrap().notifies.clone()
    }
}

impl CaptureCallbacks for CaptureRecorder {
    fn process_capture_result(&self, result: CaptureResult) -> Result<(), Error> {
        self.captured.lock().unwrap().results.push(result);
        self.changed.notify_all();
        Ok(())
    }

    fn notify(&self, message: NotifyMessage) -> Result<(), Error> {
        self.captured.lock().unwrap().notifies.push(message);
        self.changed.notify_all();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Device(u32, CameraDeviceStatus),
    Torch(u32, TorchModeStatus),
}

#[derive(Default)]
pub struct StatusRecorder {
    events: Mutex<Vec<StatusEvent>>,
    changed: Condvar,
}

impl StatusRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(StatusRecorder::default())
    }

    pub fn wait_events(&self, count: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut events = self.events.lock().unwrap();
        while events.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self.changed.wait_timeout(events, deadline - now).unwrap().0;
        }
        true
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_all();
    }
}

impl StatusCallbacks for StatusRecorder {
    fn camera_device_status_change(
        &self,
        camera_id: u32,
        status: CameraDeviceStatus,
    ) -> Result<(), Error> {
        self.push(StatusEvent::Device(camera_id, status));
        Ok(())
    }

    fn torch_mode_status_change(
        &self,
        camera_id: u32,
        status: TorchModeStatus,
    ) -> Result<(), Error> {
        self.push(StatusEvent::Torch(camera_id, status));
        Ok(())
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Config whose fatal-error policy counts instead of aborting.
pub fn counting_config(fatal_errors: Arc<AtomicU32>) -> AdapterConfig {
    AdapterConfig {
        on_fatal_error: Arc::new(move |_| {
            fatal_errors.fetch_add(1, Ordering::SeqCst);
        }),
        ..AdapterConfig::default()
    }
}

pub fn start_adapter(
    modules: Vec<Arc<FakeModule>>,
    effects: Vec<Arc<dyn ReprocessEffect>>,
    mapper: Option<Arc<dyn BufferMapper>>,
) -> (CameraHalAdapter, CameraModuleClient) {
    let config = counting_config(Arc::new(AtomicU32::new(0)));
    start_adapter_with(modules, effects, mapper, config)
}

pub fn start_adapter_with(
    modules: Vec<Arc<FakeModule>>,
    effects: Vec<Arc<dyn ReprocessEffect>>,
    mapper: Option<Arc<dyn BufferMapper>>,
    config: AdapterConfig,
) -> (CameraHalAdapter, CameraModuleClient) {
    init_logging();
    let modules: Vec<Arc<dyn CameraModule>> = modules
        .into_iter()
        .map(|m| m as Arc<dyn CameraModule>)
        .collect();
    let adapter = CameraHalAdapter::new(modules, effects, mapper, config).unwrap();
    adapter.start().unwrap();
    let client = adapter.open_camera_hal().unwrap();
    (adapter, client)
}

/// Polls `cond` until it holds or the wait times out.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

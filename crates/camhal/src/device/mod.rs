// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Per-device capture pipeline.
//!
//! A [`CameraDeviceSession`] owns one opened vendor device. Every call into the
//! device runs on the session's ops worker; vendor callbacks are posted to the
//! callback worker of the client's result channel; buffers are reclaimed on
//! the fence worker of the session's [`BufferRegistry`]; and reprocessing
//! requests that ask for a software effect take a detour through the
//! reprocess worker. Sessions of cameras with zero shutter lag also run a
//! [`ZslHelper`] with its own fence worker.
//!
//! ```text
//!            ┌───────────────┐   process_capture_request   ┌──────────────┐
//!  client ──▶│  ops worker   │────────────────────────────▶│ vendor device│
//!            └──────┬────────┘                              └──────┬───────┘
//!                   │ effect requested                             │ results
//!            ┌──────▼────────┐  scratch input / synthesized  ┌──────▼───────┐
//!            │reprocess worker│─────────────────────────────▶│callback worker│──▶ client
//!            └───────────────┘                               └──────────────┘
//! ```
//!
//! States move `Uninitialized → Initialized → StreamsConfigured → Capturing`
//! and end in `Closed`. Frame numbers are assigned on submission and strictly
//! increase. A frame number is never reused while a reprocessing pass for it
//! is outstanding, so reprocessing metadata is keyed by frame number alone.

mod client;
mod partial;
mod pipeline;
mod zsl;

pub use client::CameraDeviceClient;
pub use partial::PartialResultAccumulator;
pub use zsl::{
    is_3a_converged, is_zsl_requested, ZslBufferPool, ZslHelper, ZslSelection, ZslTicket,
    USAGE_STILL_CAPTURE, ZSL_BUFFER_ID_BASE, ZSL_LOOKBACK_NS, ZSL_RING_SIZE, ZSL_STREAM_ID,
};

use crate::{
    buffer::{BufferRegistry, BufferState, DEFAULT_FENCE_WAIT},
    camera3::{
        BufferRegistration, BufferStatus, CaptureCallbacks, CaptureRequest, ErrorCode,
        HalCaptureRequest, HalCaptureResult, HalStreamBuffer, NotifyMessage, RequestTemplate,
        StreamBufferRef, StreamConfiguration,
    },
    delegate::RemoteProxy,
    fence,
    hal::{CameraDevice, CameraModule, DeviceCallbacks},
    mapper::AllocationDescriptor,
    metadata::{deserialize, serialize, tags, CameraMetadata, WireMetadata},
    reprocess::ReprocessEffectManager,
    stream::{Stream, StreamSet, StreamTable, StreamType},
    worker::Worker,
    Error,
};
use log::{debug, error, info, trace, warn};
use pipeline::{InputSubstitution, ResultPipeline};
use std::{
    collections::HashSet,
    fmt,
    fs::File,
    io,
    os::fd::{AsFd, OwnedFd},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Called with the camera id when a device reports an unrecoverable error.
pub type FatalErrorHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// Logs the error and aborts the process so a supervisor restarts it.
pub fn abort_on_fatal_error() -> FatalErrorHandler {
    Arc::new(|camera_id| {
        error!(
            "camera {}: unrecoverable device error, terminating",
            camera_id
        );
        std::process::abort();
    })
}

/// Scratch buffers allocated for reprocessing use ids from this bit up.
pub const SCRATCH_BUFFER_ID_BASE: u64 = 1 << 63;

const ACQUIRE_FENCE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SessionOptions {
    /// Partial results the device delivers per frame.
    pub partial_result_count: u32,
    /// Bound of one release fence wait before the reclamation is re-posted.
    pub fence_wait: Duration,
    pub on_fatal_error: FatalErrorHandler,
    /// Zero shutter lag state, for cameras that support it.
    pub zsl: Option<Arc<ZslHelper>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            partial_result_count: 1,
            fence_wait: DEFAULT_FENCE_WAIT,
            on_fatal_error: abort_on_fatal_error(),
            zsl: None,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("partial_result_count", &self.partial_result_count)
            .field("fence_wait", &self.fence_wait)
            .field("zsl", &self.zsl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    StreamsConfigured,
    Capturing,
    Closed,
}

type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// One opened camera device.
pub struct CameraDeviceSession {
    camera_id: u32,
    this: Weak<CameraDeviceSession>,
    module: Arc<dyn CameraModule>,
    device: Mutex<Box<dyn CameraDevice>>,
    state: Mutex<SessionState>,
    ops: Arc<Worker>,
    reprocess: Worker,
    streams: StreamTable,
    buffers: Arc<BufferRegistry>,
    pipeline: Arc<ResultPipeline>,
    effects: Option<Arc<ReprocessEffectManager>>,
    zsl: Option<Arc<ZslHelper>>,
    next_frame_number: AtomicU32,
    next_scratch_id: AtomicU64,
    close_callback: Mutex<Option<CloseCallback>>,
}

impl CameraDeviceSession {
    /// Wraps an opened vendor device and starts the session workers.
    ///
    /// Fails with [`Error::NoDevice`] when a worker cannot be started.
    pub fn new(
        camera_id: u32,
        module: Arc<dyn CameraModule>,
        device: Box<dyn CameraDevice>,
        effects: Option<Arc<ReprocessEffectManager>>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, Error> {
        let ops = Arc::new(Worker::start(&format!("camhal-ops-{}", camera_id))?);
        let reprocess = Worker::start(&format!("camhal-rep-{}", camera_id))?;
        let buffers = Arc::new(BufferRegistry::new(
            &format!("camhal-fence-{}", camera_id),
            options.fence_wait,
        )?);
        let pipeline = ResultPipeline::new(
            camera_id,
            options.partial_result_count,
            buffers.clone(),
            options.zsl.clone(),
            options.on_fatal_error,
        );

        debug!("camera {}: session created on {}", camera_id, module.name());
        Ok(Arc::new_cyclic(|this| CameraDeviceSession {
            camera_id,
            this: this.clone(),
            module,
            device: Mutex::new(device),
            state: Mutex::new(SessionState::Uninitialized),
            ops,
            reprocess,
            streams: StreamTable::new(),
            buffers,
            pipeline,
            effects,
            zsl: options.zsl,
            next_frame_number: AtomicU32::new(0),
            next_scratch_id: AtomicU64::new(0),
            close_callback: Mutex::new(None),
        }))
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut current) = self.state.lock() {
            trace!("camera {}: {:?} -> {:?}", self.camera_id, *current, state);
            *current = state;
        }
    }

    /// Registers the closure run once the session is closed.
    pub fn set_close_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut current) = self.close_callback.lock() {
            *current = Some(Box::new(callback));
        }
    }

    pub(crate) fn ops_worker(&self) -> &Arc<Worker> {
        &self.ops
    }

    /// Lifecycle state of a registered buffer.
    pub fn buffer_state(&self, buffer_id: u64) -> Option<BufferState> {
        self.buffers.state(buffer_id)
    }

    /// Frames with partial results received but not yet complete.
    pub fn pending_partial_results(&self) -> usize {
        self.pipeline.pending_frames()
    }

    pub fn zsl(&self) -> Option<&Arc<ZslHelper>> {
        self.zsl.as_ref()
    }

    fn device(&self) -> Result<MutexGuard<'_, Box<dyn CameraDevice>>, Error> {
        self.device.lock().map_err(|_| Error::NoDevice)
    }

    /// Runs `f` on the ops worker, inline when already there.
    fn on_ops<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(&CameraDeviceSession) -> R + Send + 'static,
    {
        let this = self.this.upgrade().ok_or(Error::NoDevice)?;
        self.ops
            .post_and_wait(move || f(&this))
            .map_err(|_| Error::NoDevice)
    }

    /// Binds the client's result channel and initializes the vendor device.
    pub fn initialize(&self, callbacks: Arc<dyn CaptureCallbacks>) -> Result<(), Error> {
        self.on_ops(move |s| s.initialize_on_ops(callbacks))?
    }

    fn initialize_on_ops(&self, callbacks: Arc<dyn CaptureCallbacks>) -> Result<(), Error> {
        match self.state() {
            SessionState::Closed => return Err(Error::NoDevice),
            SessionState::Uninitialized => {}
            _ => {
                return Err(Error::invalid(format!(
                    "camera {} is already initialized",
                    self.camera_id
                )))
            }
        }

        let proxy = Arc::new(RemoteProxy::new(
            &format!("camhal-cb-{}", self.camera_id),
            callbacks,
        )?);
        self.pipeline.attach(proxy.clone());

        let device_callbacks: Arc<dyn DeviceCallbacks> = self.pipeline.clone();
        if let Err(err) = self.device()?.initialize(device_callbacks) {
            error!("camera {}: initialize failed: {}", self.camera_id, err);
            self.pipeline.detach();
            proxy.stop();
            return Err(err);
        }

        self.set_state(SessionState::Initialized);
        Ok(())
    }

    /// Configures the streams and returns them with the vendor's `usage` and
    /// `max_buffers`.
    ///
    /// On failure the session has no configured streams.
    pub fn configure_streams(&self, config: StreamConfiguration) -> Result<Vec<Stream>, Error> {
        self.on_ops(move |s| s.configure_streams_on_ops(config))?
    }

    fn configure_streams_on_ops(&self, config: StreamConfiguration) -> Result<Vec<Stream>, Error> {
        if matches!(
            self.state(),
            SessionState::Uninitialized | SessionState::Closed
        ) {
            return Err(Error::NoDevice);
        }
        if config.streams.is_empty() {
            return Err(Error::invalid("no streams to configure"));
        }
        let mut ids = HashSet::new();
        for spec in &config.streams {
            if !ids.insert(spec.id) {
                return Err(Error::invalid(format!("duplicate stream id {}", spec.id)));
            }
        }
        let inputs = config
            .streams
            .iter()
            .filter(|s| s.stream_type.is_input())
            .count();
        if inputs > 1 {
            return Err(Error::invalid(format!("{} input streams", inputs)));
        }

        let mut streams: Vec<Stream> = config.streams.iter().map(Stream::from).collect();
        let mut adjusted = streams.clone();
        let zsl = self.zsl.as_ref().filter(|zsl| zsl.can_enable(&streams));
        if let Some(zsl) = zsl {
            adjusted.push(zsl.stream_template());
        }
        let configured = self
            .device()?
            .configure_streams(&mut adjusted, config.operation_mode);
        if let Err(err) = configured {
            error!(
                "camera {}: configure_streams failed: {}",
                self.camera_id, err
            );
            self.streams.clear();
            if let Some(zsl) = &self.zsl {
                zsl.set_stream(None)?;
            }
            self.set_state(SessionState::Initialized);
            return Err(err);
        }
        if let Some(helper) = &self.zsl {
            let hidden = zsl.and_then(|zsl| {
                let vendor = adjusted.iter().find(|s| s.id == ZSL_STREAM_ID)?;
                Some(Stream {
                    usage: vendor.usage,
                    max_buffers: vendor.max_buffers,
                    ..zsl.stream_template()
                })
            });
            helper.set_stream(hidden)?;
        }

        for stream in &mut streams {
            match adjusted.iter().find(|v| v.id == stream.id) {
                Some(vendor) => {
                    if vendor.width != stream.width
                        || vendor.height != stream.height
                        || vendor.format != stream.format
                        || vendor.stream_type != stream.stream_type
                    {
                        warn!(
                            "camera {}: ignoring vendor change to stream {}",
                            self.camera_id, stream.id
                        );
                    }
                    stream.usage = vendor.usage;
                    stream.max_buffers = vendor.max_buffers;
                }
                None => warn!(
                    "camera {}: vendor dropped stream {}",
                    self.camera_id, stream.id
                ),
            }
        }

        self.streams.replace(&streams)?;
        self.set_state(SessionState::StreamsConfigured);
        info!(
            "camera {}: configured {} streams",
            self.camera_id,
            streams.len()
        );
        Ok(streams)
    }

    pub fn construct_default_request_settings(
        &self,
        template: RequestTemplate,
    ) -> Result<WireMetadata, Error> {
        self.on_ops(move |s| {
            if matches!(
                s.state(),
                SessionState::Uninitialized | SessionState::Closed
            ) {
                return Err(Error::NoDevice);
            }
            let settings = s.device()?.construct_default_request_settings(template)?;
            serialize(&settings)
        })?
    }

    pub fn register_buffer(&self, registration: BufferRegistration) -> Result<(), Error> {
        self.on_ops(move |s| {
            if s.state() == SessionState::Closed {
                return Err(Error::NoDevice);
            }
            s.buffers.register(registration)
        })?
    }

    /// Submits a request and returns its frame number.
    ///
    /// Requests whose settings ask for a reprocessing effect and which carry
    /// an input buffer are answered from the reprocess worker.
    pub fn process_capture_request(&self, request: CaptureRequest) -> Result<u32, Error> {
        self.on_ops(move |s| s.process_capture_request_on_ops(request))?
    }

    fn process_capture_request_on_ops(&self, request: CaptureRequest) -> Result<u32, Error> {
        match self.state() {
            SessionState::Uninitialized | SessionState::Closed => return Err(Error::NoDevice),
            SessionState::Initialized => {
                return Err(Error::invalid(format!(
                    "camera {} has no configured streams",
                    self.camera_id
                )))
            }
            SessionState::StreamsConfigured | SessionState::Capturing => {}
        }
        let streams = self
            .streams
            .snapshot()
            .ok_or_else(|| Error::invalid("no configured streams"))?;
        if request.output_buffers.is_empty() {
            return Err(Error::invalid("request without output buffers"));
        }

        let settings = if request.settings.is_empty() {
            None
        } else {
            Some(
                deserialize(&request.settings)
                    .map_err(|err| Error::invalid(format!("bad settings: {}", err)))?,
            )
        };
        let input_buffer = request
            .input_buffer
            .map(|b| self.resolve_buffer(&streams, b, StreamType::is_input))
            .transpose()?;
        let output_buffers = request
            .output_buffers
            .into_iter()
            .map(|b| self.resolve_buffer(&streams, b, StreamType::is_output))
            .collect::<Result<Vec<_>, _>>()?;

        let frame_number = self.next_frame_number.load(Ordering::SeqCst);
        let mut request = HalCaptureRequest {
            frame_number,
            settings,
            input_buffer,
            output_buffers,
        };

        match self.requested_effect(&request) {
            Some(effects) => {
                let this = self.this.upgrade().ok_or(Error::NoDevice)?;
                self.reprocess
                    .post(move || this.reprocess_request(effects, request))
                    .map_err(|_| Error::NoDevice)?;
                trace!(
                    "camera {}: frame {} diverted to reprocessing",
                    self.camera_id,
                    frame_number
                );
            }
            None => {
                let ticket = self
                    .zsl
                    .as_ref()
                    .and_then(|zsl| zsl.process_request(&mut request));
                let submitted = self
                    .device()
                    .and_then(|mut device| device.process_capture_request(request));
                if let Err(err) = submitted {
                    if let (Some(zsl), Some(ticket)) = (&self.zsl, ticket) {
                        zsl.abandon(frame_number, ticket);
                    }
                    return Err(err);
                }
            }
        }

        self.next_frame_number
            .store(frame_number.wrapping_add(1), Ordering::SeqCst);
        self.set_state(SessionState::Capturing);
        Ok(frame_number)
    }

    fn resolve_buffer(
        &self,
        streams: &StreamSet,
        buffer: StreamBufferRef,
        usable: fn(StreamType) -> bool,
    ) -> Result<HalStreamBuffer, Error> {
        let stream = streams
            .get(&buffer.stream_id)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unknown stream {}", buffer.stream_id)))?;
        if !usable(stream.stream_type) {
            return Err(Error::invalid(format!(
                "stream {} is {:?}",
                stream.id, stream.stream_type
            )));
        }
        let handle = self.buffers.get_registered(buffer.buffer_id)?;
        Ok(HalStreamBuffer {
            stream,
            buffer: handle,
            status: buffer.status,
            acquire_fence: buffer.acquire_fence,
            release_fence: None,
        })
    }

    fn requested_effect(&self, request: &HalCaptureRequest) -> Option<Arc<ReprocessEffectManager>> {
        let effects = self.effects.as_ref()?;
        let settings = request.settings.as_ref()?;
        request.input_buffer.as_ref()?;
        effects
            .has_reprocess_effect_vendor_tag(settings)
            .then(|| effects.clone())
    }

    /// Reprocessing detour, run on the reprocess worker.
    fn reprocess_request(&self, effects: Arc<ReprocessEffectManager>, mut request: HalCaptureRequest) {
        let frame_number = request.frame_number;
        let Some(settings) = request.settings.clone() else {
            self.fail_request(request);
            return;
        };

        let ready = match request.input_buffer.as_mut() {
            Some(input) => wait_acquire_fence(input),
            None => Err(Error::invalid("reprocessing without an input buffer")),
        };
        if let Err(err) = ready {
            error!("frame {}: input buffer not ready: {}", frame_number, err);
            self.fail_request(request);
            return;
        }

        let needs_vendor = match (
            request.input_buffer.as_ref(),
            request.output_buffers.as_slice(),
        ) {
            (Some(input), [output]) => {
                output.stream.width != input.stream.width
                    || output.stream.height != input.stream.height
                    || output.stream.format != input.stream.format
            }
            _ => true,
        };

        if needs_vendor {
            self.reprocess_with_vendor(&effects, settings, request);
        } else {
            self.reprocess_locally(&effects, settings, request);
        }
    }

    /// Applies the effect straight into the single output and answers the
    /// request without the vendor.
    fn reprocess_locally(
        &self,
        effects: &ReprocessEffectManager,
        settings: CameraMetadata,
        mut request: HalCaptureRequest,
    ) {
        let frame_number = request.frame_number;
        let mut result = CameraMetadata::new();
        let applied = match (request.input_buffer.as_ref(), request.output_buffers.first_mut()) {
            (Some(input), Some(output)) => wait_acquire_fence(output).and_then(|_| {
                effects.reprocess_request(&settings, &input.buffer, &output.buffer, &mut result)
            }),
            _ => Err(Error::invalid("reprocessing needs an input and an output")),
        };
        if let Err(err) = applied {
            error!("frame {}: reprocess effect failed: {}", frame_number, err);
            self.fail_request(request);
            return;
        }

        let timestamp = settings
            .find(tags::ANDROID_SENSOR_TIMESTAMP)
            .and_then(|e| e.first::<i64>())
            .unwrap_or_else(now_ns);
        if let Err(err) = result.update(tags::ANDROID_SENSOR_TIMESTAMP, &[timestamp]) {
            warn!("frame {}: {}", frame_number, err);
        }

        self.pipeline.notify(NotifyMessage::Shutter {
            frame_number,
            timestamp: u64::try_from(timestamp).unwrap_or_default(),
        });
        self.pipeline.process_capture_result(HalCaptureResult {
            frame_number,
            result: Some(result),
            output_buffers: request.output_buffers,
            input_buffer: request.input_buffer,
            partial_result: self.pipeline.partial_result_count(),
        });
    }

    /// Applies the effect into a scratch buffer and submits it to the vendor
    /// as the request's input.
    fn reprocess_with_vendor(
        &self,
        effects: &ReprocessEffectManager,
        settings: CameraMetadata,
        mut request: HalCaptureRequest,
    ) {
        let frame_number = request.frame_number;
        let Some(original) = request.input_buffer.take() else {
            self.fail_request(request);
            return;
        };

        let scratch_buffer_id =
            SCRATCH_BUFFER_ID_BASE | self.next_scratch_id.fetch_add(1, Ordering::SeqCst);
        let prepared = effects
            .mapper()
            .allocate(&AllocationDescriptor {
                buffer_id: scratch_buffer_id,
                width: original.buffer.width(),
                height: original.buffer.height(),
                format: original.buffer.hal_format(),
                usage: original.stream.usage,
            })
            .map(Arc::new)
            .and_then(|scratch| {
                let mut result = CameraMetadata::new();
                effects.reprocess_request(&settings, &original.buffer, &scratch, &mut result)?;
                self.buffers.insert(scratch.clone())?;
                Ok((scratch, result))
            });
        let (scratch, result) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                error!("frame {}: reprocess effect failed: {}", frame_number, err);
                request.input_buffer = Some(original);
                self.fail_request(request);
                return;
            }
        };

        let substitution = InputSubstitution {
            frame_number,
            scratch_buffer_id,
            stream_id: original.stream.id,
            buffer_id: original.buffer.buffer_id(),
        };
        self.pipeline.push_substitution(substitution, result);

        let outputs: Vec<HalStreamBuffer> = request.output_buffers.iter().map(shadow).collect();
        request.input_buffer = Some(HalStreamBuffer {
            stream: original.stream.clone(),
            buffer: scratch,
            status: BufferStatus::Ok,
            acquire_fence: None,
            release_fence: None,
        });

        let Some(this) = self.this.upgrade() else {
            return;
        };
        let forwarded = self.ops.post(move || {
            let submitted = if this.state() == SessionState::Closed {
                Err(Error::NoDevice)
            } else {
                this.device()
                    .and_then(|mut device| device.process_capture_request(request))
            };
            if let Err(err) = submitted {
                error!(
                    "frame {}: vendor rejected reprocessing: {}",
                    frame_number, err
                );
                this.pipeline.cancel_substitution(&substitution);
                if let Err(err) = this.buffers.mark_returned(scratch_buffer_id, None) {
                    warn!("scratch buffer {}: {}", scratch_buffer_id, err);
                }
                this.fail_request(HalCaptureRequest {
                    frame_number,
                    settings: None,
                    input_buffer: Some(original),
                    output_buffers: outputs,
                });
            }
        });
        if forwarded.is_err() {
            debug!("frame {}: session closed before reprocessing", frame_number);
        }
    }

    /// Reports `request` as failed: an error notify, then a result handing
    /// every buffer back with an error status.
    fn fail_request(&self, request: HalCaptureRequest) {
        let HalCaptureRequest {
            frame_number,
            input_buffer,
            output_buffers,
            ..
        } = request;
        let failed = |mut buffer: HalStreamBuffer| {
            buffer.status = BufferStatus::Error;
            buffer.release_fence = buffer.acquire_fence.take();
            buffer
        };

        self.pipeline.notify(NotifyMessage::Error {
            frame_number,
            stream_id: None,
            code: ErrorCode::Request,
        });
        self.pipeline.process_capture_result(HalCaptureResult {
            frame_number,
            result: None,
            output_buffers: output_buffers.into_iter().map(failed).collect(),
            input_buffer: input_buffer.map(failed),
            partial_result: 0,
        });
    }

    /// Safe while requests, diverted ones included, are in flight.
    pub fn flush(&self) -> Result<(), Error> {
        self.on_ops(|s| {
            if matches!(
                s.state(),
                SessionState::Uninitialized | SessionState::Closed
            ) {
                return Err(Error::NoDevice);
            }
            s.device()?.flush()
        })?
    }

    /// Writes the vendor's diagnostic dump to `fd`.
    ///
    /// Unlike every other call this runs on the caller's thread.
    pub fn dump(&self, fd: OwnedFd) -> Result<(), Error> {
        if self.state() == SessionState::Closed {
            return Err(Error::NoDevice);
        }
        let mut out = File::from(fd);
        self.device()?.dump(&mut out)
    }

    /// Closes the vendor device and stops the session. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        {
            let mut state = self.state.lock().map_err(|_| Error::NoDevice)?;
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }
        info!("camera {}: closing", self.camera_id);

        self.reprocess.stop();
        let closed = match self.this.upgrade() {
            Some(this) => self
                .ops
                .post_and_wait(move || this.device().and_then(|mut d| d.close()))
                .and_then(|r| r),
            None => self.device().and_then(|mut d| d.close()),
        };
        self.ops.stop();
        self.buffers.stop();
        if let Some(zsl) = &self.zsl {
            if let Err(err) = zsl.set_stream(None) {
                warn!("camera {}: {}", self.camera_id, err);
            }
            zsl.stop();
        }
        if let Some(proxy) = self.pipeline.detach() {
            // Stopped from its own thread so a client closing from inside a
            // result callback does not wait on itself.
            let draining = proxy.clone();
            if proxy.post_task(move || draining.stop()).is_err() {
                trace!("camera {}: result channel already stopped", self.camera_id);
            }
        }

        let callback = self.close_callback.lock().ok().and_then(|mut c| c.take());
        if let Some(callback) = callback {
            callback();
        }

        if let Err(err) = &closed {
            error!("camera {}: vendor close failed: {}", self.camera_id, err);
        }
        closed
    }
}

impl Drop for CameraDeviceSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Closed {
            debug!("camera {}: session dropped while open", self.camera_id);
        }
    }
}

fn shadow(buffer: &HalStreamBuffer) -> HalStreamBuffer {
    HalStreamBuffer {
        stream: buffer.stream.clone(),
        buffer: buffer.buffer.clone(),
        status: BufferStatus::Ok,
        acquire_fence: None,
        release_fence: None,
    }
}

fn wait_acquire_fence(buffer: &mut HalStreamBuffer) -> Result<(), Error> {
    let Some(fence) = buffer.acquire_fence.take() else {
        return Ok(());
    };
    if fence::wait(fence.as_fd(), ACQUIRE_FENCE_TIMEOUT)? {
        Ok(())
    } else {
        Err(Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!(
                "acquire fence of buffer {} did not signal",
                buffer.buffer.buffer_id()
            ),
        )))
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

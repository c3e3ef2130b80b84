// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Zero shutter lag capture.
//!
//! On devices that can reprocess their private format every regular request
//! gets an extra output on a hidden bidirectional stream. Filled buffers stay
//! in a ring with their frame's result metadata. A still capture asking for
//! zero shutter lag is turned into a reprocessing request whose input is the
//! ring frame closest to the moment the capture was requested.
//!
//! ```text
//!  attach ──▶ InFlight ──result──▶ Waiting ──release fence──▶ Ready ──select──▶ reprocess input
//!                 │                                              │                   │
//!                 └──error status──▶ Failed       evicted ◀──────┘   input returned ─┴─▶ pool
//! ```
//!
//! Buffers only go back to the pool after their release fence signalled.

use crate::{
    buffer::BufferHandle,
    camera3::{BufferStatus, HalCaptureRequest, HalStreamBuffer},
    fence,
    format::HalPixelFormat,
    mapper::{AllocationDescriptor, BufferMapper},
    metadata::{tags, CameraMetadata},
    stream::{Stream, StreamType},
    worker::{Worker, WorkerHandle},
    Error,
};
use log::{debug, error, info, trace, warn};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    os::fd::{AsFd, OwnedFd},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Id of the hidden stream. Never handed to clients.
pub const ZSL_STREAM_ID: u64 = u64::MAX;

/// Pool buffers use ids from this bit up.
pub const ZSL_BUFFER_ID_BASE: u64 = 1 << 62;

/// Frames kept for selection.
pub const ZSL_RING_SIZE: usize = 12;

/// Distance between the capture request and the ideal frame.
pub const ZSL_LOOKBACK_NS: i64 = 66_666_666;

const DEFAULT_PIPELINE_MAX_DEPTH: usize = 20;

const USAGE_SW_READ_OFTEN: u64 = 0x3;
const USAGE_SW_WRITE_OFTEN: u64 = 0x30;
const USAGE_HW_CAMERA_ZSL: u64 = 0x6_0000;
/// Marks a stream whose buffers are still captures.
pub const USAGE_STILL_CAPTURE: u64 = 0x2000_0000;

/// How a ring frame is picked for a still capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZslSelection {
    /// The newest frame not yet picked.
    LastSubmitted,
    /// The frame closest to one lookback before now.
    Closest,
    /// Like [`ZslSelection::Closest`], among frames with converged 3A.
    #[default]
    Closest3A,
}

impl FromStr for ZslSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "last-submitted" => Ok(ZslSelection::LastSubmitted),
            "closest" => Ok(ZslSelection::Closest),
            "closest-3a" => Ok(ZslSelection::Closest3A),
            other => Err(Error::invalid(format!(
                "unknown selection '{}', expected last-submitted, closest or closest-3a",
                other
            ))),
        }
    }
}

impl fmt::Display for ZslSelection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ZslSelection::LastSubmitted => "last-submitted",
            ZslSelection::Closest => "closest",
            ZslSelection::Closest3A => "closest-3a",
        })
    }
}

/// Fixed set of buffers cycled through the hidden stream.
pub struct ZslBufferPool {
    buffers: HashMap<u64, Arc<BufferHandle>>,
    free: Mutex<VecDeque<u64>>,
}

impl ZslBufferPool {
    /// Allocates `count` buffers of the private format.
    ///
    /// Buffers allocated before a failure are freed again.
    pub fn allocate(
        mapper: &dyn BufferMapper,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Self, Error> {
        let mut buffers = HashMap::with_capacity(count);
        let mut free = VecDeque::with_capacity(count);
        for index in 0..count as u64 {
            let handle = mapper.allocate(&AllocationDescriptor {
                buffer_id: ZSL_BUFFER_ID_BASE | index,
                width,
                height,
                format: HalPixelFormat::ImplementationDefined,
                usage: USAGE_HW_CAMERA_ZSL | USAGE_SW_READ_OFTEN | USAGE_SW_WRITE_OFTEN,
            })?;
            free.push_back(handle.buffer_id());
            buffers.insert(handle.buffer_id(), Arc::new(handle));
        }
        Ok(ZslBufferPool {
            buffers,
            free: Mutex::new(free),
        })
    }

    /// Takes a free buffer, `None` when all are in use.
    pub fn get(&self) -> Option<Arc<BufferHandle>> {
        let buffer_id = self.free.lock().ok()?.pop_front()?;
        self.buffers.get(&buffer_id).cloned()
    }

    /// Puts a buffer back. Fails for buffers of another pool and buffers that
    /// are already free.
    pub fn release(&self, buffer_id: u64) -> bool {
        if !self.buffers.contains_key(&buffer_id) {
            error!("buffer {} is not a zero shutter lag buffer", buffer_id);
            return false;
        }
        let Ok(mut free) = self.free.lock() else {
            return false;
        };
        if free.contains(&buffer_id) {
            warn!("zero shutter lag buffer {} released twice", buffer_id);
            return false;
        }
        free.push_back(buffer_id);
        true
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn available(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl fmt::Debug for ZslBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ZslBufferPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotBuffer {
    /// With the vendor.
    InFlight,
    /// Returned, release fence pending.
    Waiting,
    Ready,
    Failed,
}

struct Slot {
    frame_number: u32,
    buffer: Arc<BufferHandle>,
    state: SlotBuffer,
    metadata: Option<CameraMetadata>,
    selected: bool,
}

impl Slot {
    fn is_candidate(&self) -> bool {
        self.state == SlotBuffer::Ready && self.metadata.is_some() && !self.selected
    }

    fn timestamp(&self) -> Option<i64> {
        self.metadata
            .as_ref()?
            .find(tags::ANDROID_SENSOR_TIMESTAMP)?
            .first::<i64>()
    }
}

#[derive(Default)]
struct Ring {
    stream: Option<Arc<Stream>>,
    /// Oldest first.
    slots: VecDeque<Slot>,
    /// Buffers pushed out of the ring while the vendor still had them.
    evicted: HashSet<u64>,
}

impl Ring {
    fn slot_mut(&mut self, frame_number: u32, buffer_id: u64) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|s| s.frame_number == frame_number && s.buffer.buffer_id() == buffer_id)
    }

    /// Drops the oldest slot, releasing its buffer unless it is still in use.
    fn evict_oldest(&mut self, pool: &ZslBufferPool) {
        let Some(slot) = self.slots.pop_front() else {
            return;
        };
        let buffer_id = slot.buffer.buffer_id();
        match slot.state {
            // The reprocessing request hands a selected buffer back.
            _ if slot.selected => {}
            SlotBuffer::Ready | SlotBuffer::Failed => {
                pool.release(buffer_id);
            }
            SlotBuffer::InFlight | SlotBuffer::Waiting => {
                self.evicted.insert(buffer_id);
            }
        }
    }

    fn clear(&mut self, pool: &ZslBufferPool) {
        while !self.slots.is_empty() {
            self.evict_oldest(pool);
        }
    }

    fn select(&mut self, strategy: ZslSelection, now_ns: i64) -> Option<&mut Slot> {
        if strategy == ZslSelection::LastSubmitted {
            return self.slots.iter_mut().rev().find(|s| s.is_candidate());
        }

        let ideal = now_ns.saturating_sub(ZSL_LOOKBACK_NS);
        let mut best: Option<(usize, i64)> = None;
        // Newest first, so the distance to the ideal point only shrinks.
        for (index, slot) in self.slots.iter().enumerate().rev() {
            if !slot.is_candidate() {
                continue;
            }
            let Some(timestamp) = slot.timestamp() else {
                warn!("frame {}: no sensor timestamp", slot.frame_number);
                continue;
            };
            let diff = timestamp - ideal;
            if diff > ZSL_LOOKBACK_NS {
                continue;
            }
            if diff < 0 {
                break;
            }
            let usable = strategy == ZslSelection::Closest
                || slot.metadata.as_ref().is_some_and(is_3a_converged);
            if usable && best.map_or(true, |(_, min)| diff < min) {
                best = Some((index, diff));
            }
        }
        let (index, _) = best?;
        self.slots.get_mut(index)
    }
}

/// What [`ZslHelper::process_request`] added to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZslTicket {
    /// A ring output was attached.
    Attached { buffer_id: u64 },
    /// The request now reprocesses a ring frame.
    Reprocess { buffer_id: u64, source_frame: u32 },
}

/// Zero shutter lag state of one device session.
pub struct ZslHelper {
    camera_id: u32,
    width: u32,
    height: u32,
    max_num_input_streams: usize,
    realtime_timestamps: bool,
    strategy: ZslSelection,
    pool: Arc<ZslBufferPool>,
    ring: Arc<Mutex<Ring>>,
    fence: Worker,
    fence_wait: Duration,
}

impl ZslHelper {
    /// Sets up zero shutter lag for a camera with `characteristics`.
    ///
    /// Fails with [`Error::NotSupported`] when the camera cannot reprocess its
    /// private format or lists no private input size.
    pub fn new(
        camera_id: u32,
        characteristics: &CameraMetadata,
        mapper: &dyn BufferMapper,
        strategy: ZslSelection,
        fence_wait: Duration,
    ) -> Result<Self, Error> {
        let capable = characteristics
            .find(tags::ANDROID_REQUEST_AVAILABLE_CAPABILITIES)
            .and_then(|e| e.values::<u8>())
            .is_some_and(|caps| {
                caps.contains(&tags::ANDROID_REQUEST_AVAILABLE_CAPABILITIES_PRIVATE_REPROCESSING)
            });
        if !capable {
            return Err(Error::NotSupported);
        }
        let (width, height) = select_stream_size(characteristics).ok_or(Error::NotSupported)?;

        let pipeline_depth = characteristics
            .find(tags::ANDROID_REQUEST_PIPELINE_MAX_DEPTH)
            .and_then(|e| e.first::<u8>())
            .map(usize::from)
            .unwrap_or_else(|| {
                warn!(
                    "camera {}: no pipeline depth, assuming {}",
                    camera_id, DEFAULT_PIPELINE_MAX_DEPTH
                );
                DEFAULT_PIPELINE_MAX_DEPTH
            });
        let max_num_input_streams = characteristics
            .find(tags::ANDROID_REQUEST_MAX_NUM_INPUT_STREAMS)
            .and_then(|e| e.first::<i32>())
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        let realtime_timestamps = characteristics
            .find(tags::ANDROID_SENSOR_INFO_TIMESTAMP_SOURCE)
            .and_then(|e| e.first::<u8>())
            == Some(tags::ANDROID_SENSOR_INFO_TIMESTAMP_SOURCE_REALTIME);

        let pool = ZslBufferPool::allocate(mapper, width, height, ZSL_RING_SIZE + pipeline_depth)?;
        let fence = Worker::start(&format!("camhal-zsl-{}", camera_id))?;
        info!(
            "camera {}: zero shutter lag at {}x{} with {} buffers",
            camera_id,
            width,
            height,
            pool.capacity()
        );
        Ok(ZslHelper {
            camera_id,
            width,
            height,
            max_num_input_streams,
            realtime_timestamps,
            strategy,
            pool: Arc::new(pool),
            ring: Arc::new(Mutex::new(Ring::default())),
            fence,
            fence_wait,
        })
    }

    fn ring(&self) -> Result<MutexGuard<'_, Ring>, Error> {
        self.ring
            .lock()
            .map_err(|_| Error::Poisoned("zero shutter lag ring"))
    }

    pub fn strategy(&self) -> ZslSelection {
        self.strategy
    }

    /// The hidden stream as offered to the vendor.
    pub fn stream_template(&self) -> Stream {
        Stream {
            id: ZSL_STREAM_ID,
            stream_type: StreamType::Bidirectional,
            width: self.width,
            height: self.height,
            format: HalPixelFormat::ImplementationDefined,
            usage: 0,
            max_buffers: 0,
            data_space: 0,
            rotation: 0,
            crop_rotate_scale_degrees: 0,
        }
    }

    /// Whether `streams` leave room for the hidden stream and contain a still
    /// capture output.
    pub fn can_enable(&self, streams: &[Stream]) -> bool {
        let inputs = streams.iter().filter(|s| s.stream_type.is_input()).count();
        let still = streams.iter().any(|s| {
            s.stream_type.is_output()
                && (s.format == HalPixelFormat::Blob || s.usage & USAGE_STILL_CAPTURE != 0)
        });
        let private_output = streams.iter().any(|s| {
            s.stream_type.is_output() && s.usage & USAGE_HW_CAMERA_ZSL == USAGE_HW_CAMERA_ZSL
        });
        still && inputs < self.max_num_input_streams && !private_output
    }

    /// Installs the configured hidden stream, or disables zero shutter lag
    /// with `None`. Ring frames of a previous configuration are dropped.
    pub fn set_stream(&self, stream: Option<Stream>) -> Result<(), Error> {
        let mut ring = self.ring()?;
        ring.clear(&self.pool);
        match (&ring.stream, &stream) {
            (None, Some(_)) => info!("camera {}: zero shutter lag enabled", self.camera_id),
            (Some(_), None) => info!("camera {}: zero shutter lag disabled", self.camera_id),
            _ => {}
        }
        ring.stream = stream.map(Arc::new);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.ring().map(|r| r.stream.is_some()).unwrap_or(false)
    }

    /// Rewrites `request` for zero shutter lag.
    ///
    /// A still capture asking for it becomes a reprocessing of a ring frame.
    /// Any other request without an input gets a ring output attached.
    pub fn process_request(&self, request: &mut HalCaptureRequest) -> Option<ZslTicket> {
        if request.input_buffer.is_some() {
            return None;
        }
        let mut ring = self.ring().ok()?;
        let stream = ring.stream.clone()?;

        if request.settings.as_ref().is_some_and(is_zsl_requested) {
            let now = self.now_ns();
            match ring.select(self.strategy, now) {
                Some(slot) => {
                    slot.selected = true;
                    let ticket = ZslTicket::Reprocess {
                        buffer_id: slot.buffer.buffer_id(),
                        source_frame: slot.frame_number,
                    };
                    info!(
                        "frame {}: still capture reprocesses frame {}",
                        request.frame_number, slot.frame_number
                    );
                    request.input_buffer = Some(HalStreamBuffer {
                        stream,
                        buffer: slot.buffer.clone(),
                        status: BufferStatus::Ok,
                        acquire_fence: None,
                        release_fence: None,
                    });
                    request.settings = slot.metadata.clone();
                    return Some(ticket);
                }
                None => warn!(
                    "frame {}: no frame to reprocess, capturing normally",
                    request.frame_number
                ),
            }
        }

        if ring.slots.len() >= ZSL_RING_SIZE {
            ring.evict_oldest(&self.pool);
        }
        let Some(buffer) = self.pool.get() else {
            warn!("camera {}: zero shutter lag pool exhausted", self.camera_id);
            return None;
        };
        let buffer_id = buffer.buffer_id();
        ring.slots.push_back(Slot {
            frame_number: request.frame_number,
            buffer: buffer.clone(),
            state: SlotBuffer::InFlight,
            metadata: None,
            selected: false,
        });
        request.output_buffers.push(HalStreamBuffer {
            stream,
            buffer,
            status: BufferStatus::Ok,
            acquire_fence: None,
            release_fence: None,
        });
        Some(ZslTicket::Attached { buffer_id })
    }

    /// Undoes `ticket` for a request the vendor never accepted.
    pub fn abandon(&self, frame_number: u32, ticket: ZslTicket) {
        let Ok(mut ring) = self.ring() else {
            return;
        };
        match ticket {
            ZslTicket::Attached { buffer_id } => {
                let before = ring.slots.len();
                ring.slots.retain(|s| {
                    !(s.frame_number == frame_number && s.buffer.buffer_id() == buffer_id)
                });
                if ring.slots.len() != before || ring.evicted.remove(&buffer_id) {
                    self.pool.release(buffer_id);
                }
            }
            ZslTicket::Reprocess { buffer_id, .. } => {
                let slot = ring
                    .slots
                    .iter_mut()
                    .find(|s| s.buffer.buffer_id() == buffer_id);
                if let Some(slot) = slot {
                    slot.selected = false;
                } else {
                    self.pool.release(buffer_id);
                }
            }
        }
    }

    /// Whether `buffer` travels on the hidden stream.
    pub fn owns(buffer: &HalStreamBuffer) -> bool {
        buffer.stream.id == ZSL_STREAM_ID
    }

    /// Takes back a ring output the vendor filled for `frame_number`.
    pub fn output_returned(&self, frame_number: u32, buffer: HalStreamBuffer) {
        let buffer_id = buffer.buffer.buffer_id();
        if buffer.status == BufferStatus::Error {
            debug!("frame {}: zero shutter lag output failed", frame_number);
            self.settle(frame_number, buffer_id, false);
            return;
        }
        if let Ok(mut ring) = self.ring() {
            if let Some(slot) = ring.slot_mut(frame_number, buffer_id) {
                slot.state = SlotBuffer::Waiting;
            }
        }
        self.after_fence(FenceTarget::Slot(frame_number), buffer_id, buffer.release_fence);
    }

    /// Takes back a ring buffer used as a reprocessing input.
    pub fn input_returned(&self, buffer: HalStreamBuffer) {
        let buffer_id = buffer.buffer.buffer_id();
        self.after_fence(FenceTarget::Pool, buffer_id, buffer.release_fence);
    }

    /// Stores the complete result metadata of `frame_number`.
    pub fn result_metadata(&self, frame_number: u32, metadata: &CameraMetadata) {
        let Ok(mut ring) = self.ring() else {
            return;
        };
        if let Some(slot) = ring.slots.iter_mut().find(|s| s.frame_number == frame_number) {
            slot.metadata = Some(metadata.clone());
        }
    }

    fn after_fence(&self, target: FenceTarget, buffer_id: u64, fence: Option<OwnedFd>) {
        let Some(worker) = self.fence.handle() else {
            debug!("camera {}: fence worker stopped", self.camera_id);
            return;
        };
        let task = FenceTask {
            ring: self.ring.clone(),
            pool: self.pool.clone(),
            worker: worker.clone(),
            target,
            buffer_id,
            fence,
            wait: self.fence_wait,
        };
        if worker.post(move || task.run()).is_err() {
            trace!("camera {}: fence worker stopped", self.camera_id);
        }
    }

    fn settle(&self, frame_number: u32, buffer_id: u64, ready: bool) {
        if let Ok(mut ring) = self.ring.lock() {
            settle_slot(&mut ring, &self.pool, frame_number, buffer_id, ready);
        }
    }

    /// Nanoseconds on the clock the sensor stamps frames with.
    pub fn now_ns(&self) -> i64 {
        let clock = if self.realtime_timestamps {
            libc::CLOCK_BOOTTIME
        } else {
            libc::CLOCK_MONOTONIC
        };
        let mut t = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: t is a valid timespec for the duration of the call.
        if unsafe { libc::clock_gettime(clock, &mut t) } != 0 {
            return 0;
        }
        i64::from(t.tv_sec)
            .saturating_mul(1_000_000_000)
            .saturating_add(i64::from(t.tv_nsec))
    }

    /// Free pool buffers.
    pub fn available_buffers(&self) -> usize {
        self.pool.available()
    }

    /// Ring frames a still capture could pick right now.
    pub fn ready_frames(&self) -> usize {
        self.ring()
            .map(|r| r.slots.iter().filter(|s| s.is_candidate()).count())
            .unwrap_or(0)
    }

    pub fn pool_size(&self) -> usize {
        self.pool.capacity()
    }

    /// Runs the queued fence waits and stops the fence worker.
    pub fn stop(&self) {
        self.fence.stop();
    }
}

impl fmt::Debug for ZslHelper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ZslHelper")
            .field("camera_id", &self.camera_id)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("strategy", &self.strategy)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

fn settle_slot(
    ring: &mut Ring,
    pool: &ZslBufferPool,
    frame_number: u32,
    buffer_id: u64,
    ready: bool,
) {
    if let Some(slot) = ring.slot_mut(frame_number, buffer_id) {
        slot.state = if ready {
            SlotBuffer::Ready
        } else {
            SlotBuffer::Failed
        };
    } else if ring.evicted.remove(&buffer_id) {
        pool.release(buffer_id);
    }
}

#[derive(Debug, Clone, Copy)]
enum FenceTarget {
    /// Mark the ring slot of this frame ready.
    Slot(u32),
    /// Put the buffer back into the pool.
    Pool,
}

/// One fence wait, re-posted on every timeout.
struct FenceTask {
    ring: Arc<Mutex<Ring>>,
    pool: Arc<ZslBufferPool>,
    worker: WorkerHandle,
    target: FenceTarget,
    buffer_id: u64,
    fence: Option<OwnedFd>,
    wait: Duration,
}

impl FenceTask {
    fn run(self) {
        let signalled = match &self.fence {
            None => Ok(true),
            Some(fence) => fence::wait(fence.as_fd(), self.wait),
        };
        let usable = match signalled {
            Ok(true) => true,
            Ok(false) => {
                let worker = self.worker.clone();
                if worker.post(move || self.run()).is_err() {
                    trace!("zero shutter lag fence worker stopped");
                }
                return;
            }
            Err(err) => {
                warn!(
                    "zero shutter lag buffer {}: release fence wait failed: {}",
                    self.buffer_id, err
                );
                false
            }
        };

        match self.target {
            FenceTarget::Pool => {
                self.pool.release(self.buffer_id);
            }
            FenceTarget::Slot(frame_number) => {
                if let Ok(mut ring) = self.ring.lock() {
                    settle_slot(&mut ring, &self.pool, frame_number, self.buffer_id, usable);
                }
            }
        }
    }
}

/// Largest private-format input size among the stream configurations.
fn select_stream_size(characteristics: &CameraMetadata) -> Option<(u32, u32)> {
    let configs = characteristics
        .find(tags::ANDROID_SCALER_AVAILABLE_STREAM_CONFIGURATIONS)?
        .values::<i32>()?;
    configs
        .chunks_exact(4)
        .filter(|c| {
            c[0] == HalPixelFormat::ImplementationDefined as i32
                && c[3] == tags::ANDROID_SCALER_AVAILABLE_STREAM_CONFIGURATIONS_INPUT
        })
        .filter_map(|c| Some((u32::try_from(c[1]).ok()?, u32::try_from(c[2]).ok()?)))
        .filter(|(w, h)| *w > 0 && *h > 0)
        .max_by_key(|(w, h)| u64::from(*w) * u64::from(*h))
}

/// Whether `settings` enable zero shutter lag for a still capture.
pub fn is_zsl_requested(settings: &CameraMetadata) -> bool {
    let enabled = settings
        .find(tags::ANDROID_CONTROL_ENABLE_ZSL)
        .and_then(|e| e.first::<u8>())
        .is_some_and(|v| v != 0);
    let intent = settings
        .find(tags::ANDROID_CONTROL_CAPTURE_INTENT)
        .and_then(|e| e.first::<u8>());
    enabled
        && matches!(
            intent,
            Some(tags::ANDROID_CONTROL_CAPTURE_INTENT_STILL_CAPTURE)
                | Some(tags::ANDROID_CONTROL_CAPTURE_INTENT_ZERO_SHUTTER_LAG)
        )
}

/// Whether auto exposure, focus and white balance settled in `metadata`.
///
/// A missing state counts as not converged unless its mode is off.
pub fn is_3a_converged(metadata: &CameraMetadata) -> bool {
    let get = |tag| metadata.find(tag).and_then(|e| e.first::<u8>());
    let settled = |mode_tag, state_tag, states: &[u8]| {
        get(mode_tag) == Some(tags::ANDROID_CONTROL_MODE_OFF)
            || get(state_tag).is_some_and(|s| states.contains(&s))
    };
    settled(
        tags::ANDROID_CONTROL_AE_MODE,
        tags::ANDROID_CONTROL_AE_STATE,
        &[
            tags::ANDROID_CONTROL_AE_STATE_CONVERGED,
            tags::ANDROID_CONTROL_AE_STATE_FLASH_REQUIRED,
            tags::ANDROID_CONTROL_AE_STATE_LOCKED,
        ],
    ) && settled(
        tags::ANDROID_CONTROL_AF_MODE,
        tags::ANDROID_CONTROL_AF_STATE,
        &[
            tags::ANDROID_CONTROL_AF_STATE_PASSIVE_FOCUSED,
            tags::ANDROID_CONTROL_AF_STATE_FOCUSED_LOCKED,
        ],
    ) && settled(
        tags::ANDROID_CONTROL_AWB_MODE,
        tags::ANDROID_CONTROL_AWB_STATE,
        &[
            tags::ANDROID_CONTROL_AWB_STATE_CONVERGED,
            tags::ANDROID_CONTROL_AWB_STATE_LOCKED,
        ],
    )
}

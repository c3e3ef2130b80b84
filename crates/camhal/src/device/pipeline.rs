// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Result and notify demultiplexing.
//!
//! The vendor device calls back from its own threads. Each callback is posted
//! as-is onto the session's callback worker and translated there: buffers are
//! marked returned, scratch inputs swapped back to the client's buffer,
//! zero shutter lag buffers taken out of the result, partial metadata tracked
//! and the final partial replaced by the union of all partials plus any
//! reprocessing metadata.

use super::{
    partial::PartialResultAccumulator,
    zsl::{ZslHelper, ZSL_STREAM_ID},
    FatalErrorHandler,
};
use crate::{
    buffer::BufferRegistry,
    camera3::{
        CaptureCallbacks, CaptureResult, ErrorCode, HalCaptureResult, HalStreamBuffer,
        NotifyMessage, StreamBufferRef,
    },
    delegate::RemoteProxy,
    hal::DeviceCallbacks,
    metadata::{serialize, tags, CameraMetadata, WireMetadata},
};
use log::{debug, error, trace, warn};
use std::{
    collections::{HashMap, VecDeque},
    os::fd::AsFd,
    sync::{Arc, Mutex, Weak},
};

pub(crate) type CaptureProxy = RemoteProxy<dyn CaptureCallbacks>;

/// A reprocessing request whose input was replaced by a scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputSubstitution {
    pub frame_number: u32,
    pub scratch_buffer_id: u64,
    pub stream_id: u64,
    pub buffer_id: u64,
}

struct Demux {
    partials: PartialResultAccumulator,
    substitutions: VecDeque<InputSubstitution>,
    reprocess_results: HashMap<u32, CameraMetadata>,
}

pub(crate) struct ResultPipeline {
    camera_id: u32,
    this: Weak<ResultPipeline>,
    buffers: Arc<BufferRegistry>,
    proxy: Mutex<Option<Arc<CaptureProxy>>>,
    demux: Mutex<Demux>,
    zsl: Option<Arc<ZslHelper>>,
    on_fatal_error: FatalErrorHandler,
}

impl ResultPipeline {
    pub fn new(
        camera_id: u32,
        partial_result_count: u32,
        buffers: Arc<BufferRegistry>,
        zsl: Option<Arc<ZslHelper>>,
        on_fatal_error: FatalErrorHandler,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| ResultPipeline {
            camera_id,
            this: this.clone(),
            buffers,
            proxy: Mutex::new(None),
            demux: Mutex::new(Demux {
                partials: PartialResultAccumulator::new(partial_result_count),
                substitutions: VecDeque::new(),
                reprocess_results: HashMap::new(),
            }),
            zsl,
            on_fatal_error,
        })
    }

    pub fn partial_result_count(&self) -> u32 {
        self.demux
            .lock()
            .map(|d| d.partials.partial_result_count())
            .unwrap_or(1)
    }

    pub fn attach(&self, proxy: Arc<CaptureProxy>) {
        if let Ok(mut current) = self.proxy.lock() {
            *current = Some(proxy);
        }
    }

    pub fn detach(&self) -> Option<Arc<CaptureProxy>> {
        self.proxy.lock().ok().and_then(|mut p| p.take())
    }

    /// Frames with partial results received but not yet complete.
    pub fn pending_frames(&self) -> usize {
        self.demux
            .lock()
            .map(|d| d.partials.pending_frames())
            .unwrap_or(0)
    }

    /// Forgets the partials and reprocessing metadata of a failed frame.
    fn discard_frame(&self, frame_number: u32) {
        if let Ok(mut demux) = self.demux.lock() {
            if demux.partials.discard(frame_number) {
                debug!("frame {}: dropped partial results", frame_number);
            }
            demux.reprocess_results.remove(&frame_number);
        }
    }

    fn proxy(&self) -> Option<Arc<CaptureProxy>> {
        self.proxy.lock().ok().and_then(|p| p.clone())
    }

    /// Records a scratch input to swap back when the vendor returns it, and
    /// the effect metadata to merge into the frame's final partial.
    pub fn push_substitution(&self, substitution: InputSubstitution, result: CameraMetadata) {
        if let Ok(mut demux) = self.demux.lock() {
            demux.substitutions.push_back(substitution);
            if !result.is_empty() {
                demux
                    .reprocess_results
                    .insert(substitution.frame_number, result);
            }
        }
    }

    /// Forgets a substitution whose request the vendor rejected.
    pub fn cancel_substitution(&self, substitution: &InputSubstitution) {
        if let Ok(mut demux) = self.demux.lock() {
            demux
                .substitutions
                .retain(|s| s.scratch_buffer_id != substitution.scratch_buffer_id);
            demux.reprocess_results.remove(&substitution.frame_number);
        }
    }

    fn return_buffer(&self, buffer: HalStreamBuffer) -> StreamBufferRef {
        let buffer_id = buffer.buffer.buffer_id();
        let fence = buffer.release_fence.as_ref().map(|f| f.as_fd());
        if let Err(err) = self.buffers.mark_returned(buffer_id, fence) {
            warn!(
                "camera {}: returning buffer {}: {}",
                self.camera_id, buffer_id, err
            );
        }
        StreamBufferRef {
            stream_id: buffer.stream.id,
            buffer_id,
            status: buffer.status,
            acquire_fence: None,
            release_fence: buffer.release_fence,
        }
    }

    /// Turns a vendor result into the client form.
    ///
    /// Returns `None` when nothing is left for the client, as for a result
    /// that only carried a zero shutter lag buffer.
    pub fn translate(&self, hal: HalCaptureResult) -> Option<CaptureResult> {
        let HalCaptureResult {
            frame_number,
            result,
            mut output_buffers,
            mut input_buffer,
            partial_result,
        } = hal;

        if let Some(zsl) = &self.zsl {
            let (hidden, visible): (Vec<_>, Vec<_>) =
                output_buffers.into_iter().partition(ZslHelper::owns);
            output_buffers = visible;
            for buffer in hidden {
                zsl.output_returned(frame_number, buffer);
            }
            if let Some(input) = input_buffer.take() {
                if ZslHelper::owns(&input) {
                    zsl.input_returned(input);
                } else {
                    input_buffer = Some(input);
                }
            }
        }
        if result.is_none() && output_buffers.is_empty() && input_buffer.is_none() {
            return None;
        }

        let restored = input_buffer.as_ref().and_then(|input| {
            let mut demux = self.demux.lock().ok()?;
            let front = demux.substitutions.front()?;
            if front.scratch_buffer_id != input.buffer.buffer_id() {
                return None;
            }
            demux.substitutions.pop_front()
        });

        let input_buffer = input_buffer.map(|input| {
            let returned = self.return_buffer(input);
            match restored {
                Some(original) => {
                    trace!(
                        "frame {}: scratch buffer {} restored to {}",
                        frame_number,
                        original.scratch_buffer_id,
                        original.buffer_id
                    );
                    if let Err(err) = self.buffers.mark_returned(original.buffer_id, None) {
                        warn!("returning input buffer {}: {}", original.buffer_id, err);
                    }
                    StreamBufferRef {
                        stream_id: original.stream_id,
                        buffer_id: original.buffer_id,
                        status: returned.status,
                        acquire_fence: None,
                        release_fence: None,
                    }
                }
                None => returned,
            }
        });

        let output_buffers = output_buffers
            .into_iter()
            .map(|b| self.return_buffer(b))
            .collect();

        let (result, partial_result) = match result {
            Some(metadata) => self.translate_metadata(frame_number, partial_result, metadata),
            None => (WireMetadata::default(), 0),
        };

        Some(CaptureResult {
            frame_number,
            result,
            output_buffers,
            input_buffer,
            partial_result,
        })
    }

    fn translate_metadata(
        &self,
        frame_number: u32,
        partial_result: u32,
        metadata: CameraMetadata,
    ) -> (WireMetadata, u32) {
        let Ok(mut demux) = self.demux.lock() else {
            return (WireMetadata::default(), 0);
        };

        let index = if partial_result == 0 && demux.partials.partial_result_count() == 1 {
            1
        } else {
            partial_result
        };
        let timestamped = metadata.contains(tags::ANDROID_SENSOR_TIMESTAMP)
            || demux
                .partials
                .is_metadata_key_available(frame_number, tags::ANDROID_SENSOR_TIMESTAMP);
        let forwarded = match demux.partials.add(frame_number, index, &metadata) {
            Ok(Some(mut union)) => {
                if !timestamped {
                    warn!("frame {}: result without sensor timestamp", frame_number);
                }
                if let Some(zsl) = &self.zsl {
                    zsl.result_metadata(frame_number, &union);
                }
                if let Some(extra) = demux.reprocess_results.remove(&frame_number) {
                    if let Err(err) = union.append(&extra) {
                        error!("frame {}: merging reprocess result: {}", frame_number, err);
                    }
                }
                union
            }
            Ok(None) => metadata,
            Err(err) => {
                error!("camera {}: {}", self.camera_id, err);
                return (WireMetadata::default(), 0);
            }
        };
        drop(demux);

        match serialize(&forwarded) {
            Ok(wire) => (wire, index),
            Err(err) => {
                error!("frame {}: serializing result: {}", frame_number, err);
                (WireMetadata::default(), 0)
            }
        }
    }

    fn fatal(&self) {
        (self.on_fatal_error)(self.camera_id);
    }
}

impl DeviceCallbacks for ResultPipeline {
    fn process_capture_result(&self, result: HalCaptureResult) {
        let Some(proxy) = self.proxy() else {
            warn!(
                "camera {}: result for frame {} without a client",
                self.camera_id, result.frame_number
            );
            return;
        };
        let this = self.this.clone();
        proxy.post(move |callbacks| {
            match this.upgrade().and_then(|pipeline| pipeline.translate(result)) {
                Some(result) => callbacks.process_capture_result(result),
                None => Ok(()),
            }
        });
    }

    fn notify(&self, message: NotifyMessage) {
        let (fatal, failed_frame) = match message {
            NotifyMessage::Error {
                code: ErrorCode::Device,
                ..
            } => (true, None),
            NotifyMessage::Error {
                frame_number,
                code: ErrorCode::Request | ErrorCode::Result,
                ..
            } => (false, Some(frame_number)),
            NotifyMessage::Error {
                frame_number,
                stream_id: Some(stream_id),
                code: ErrorCode::Buffer,
            } if self.zsl.is_some() && stream_id == ZSL_STREAM_ID => {
                debug!("frame {}: zero shutter lag buffer failed", frame_number);
                return;
            }
            _ => (false, None),
        };
        if fatal {
            error!("camera {}: fatal device error", self.camera_id);
        }

        match self.proxy() {
            Some(proxy) if !proxy.is_closed() => {
                let this = self.this.clone();
                proxy.post(move |callbacks| {
                    if let (Some(frame_number), Some(pipeline)) = (failed_frame, this.upgrade()) {
                        pipeline.discard_frame(frame_number);
                    }
                    let delivered = callbacks.notify(message);
                    if fatal {
                        if let Some(pipeline) = this.upgrade() {
                            pipeline.fatal();
                        }
                    }
                    delivered
                });
            }
            _ => {
                if let Some(frame_number) = failed_frame {
                    self.discard_frame(frame_number);
                }
                if fatal {
                    self.fatal();
                } else {
                    warn!("camera {}: notify without a client", self.camera_id);
                }
            }
        }
    }
}

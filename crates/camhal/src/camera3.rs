// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Requests, results and status types.
//!
//! Types without a `Hal` prefix are what clients send and receive. They refer
//! to streams and buffers by id only, since local handles never cross the
//! client boundary. The `Hal` types are what vendor devices see: resolved
//! streams and owned buffer handles.

use crate::{
    buffer::BufferHandle,
    format::HalPixelFormat,
    fourcc::FourCC,
    metadata::{CameraMetadata, WireMetadata},
    stream::{Stream, StreamType},
    Error,
};
use serde::{Deserialize, Serialize};
use std::{os::fd::OwnedFd, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CameraFacing {
    Back = 0,
    Front = 1,
    External = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CameraDeviceStatus {
    NotPresent = 0,
    Present = 1,
    Enumerating = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TorchModeStatus {
    NotAvailable = 0,
    AvailableOff = 1,
    AvailableOn = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RequestTemplate {
    Preview = 1,
    StillCapture = 2,
    VideoRecord = 3,
    VideoSnapshot = 4,
    ZeroShutterLag = 5,
    Manual = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum BufferStatus {
    #[default]
    Ok = 0,
    Error = 1,
}

/// Error kinds reported through [`NotifyMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    /// The device is in an unrecoverable state.
    Device = 1,
    Request = 2,
    Result = 3,
    Buffer = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyMessage {
    Shutter {
        frame_number: u32,
        timestamp: u64,
    },
    Error {
        frame_number: u32,
        stream_id: Option<u64>,
        code: ErrorCode,
    },
}

/// Static description of a camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub facing: CameraFacing,
    pub orientation: i32,
    pub device_version: u32,
    pub static_camera_characteristics: WireMetadata,
}

/// One stream requested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub id: u64,
    pub stream_type: StreamType,
    pub width: u32,
    pub height: u32,
    pub format: HalPixelFormat,
    pub usage: u64,
    pub data_space: u32,
    pub rotation: u32,
    pub crop_rotate_scale_degrees: u32,
}

impl From<&StreamSpec> for Stream {
    fn from(spec: &StreamSpec) -> Self {
        Stream {
            id: spec.id,
            stream_type: spec.stream_type,
            width: spec.width,
            height: spec.height,
            format: spec.format,
            usage: spec.usage,
            max_buffers: 0,
            data_space: spec.data_space,
            rotation: spec.rotation,
            crop_rotate_scale_degrees: spec.crop_rotate_scale_degrees,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub streams: Vec<StreamSpec>,
    pub operation_mode: u32,
}

/// A buffer registration sent by a client ahead of using the buffer.
#[derive(Debug)]
pub struct BufferRegistration {
    pub buffer_id: u64,
    pub drm_format: FourCC,
    pub hal_format: HalPixelFormat,
    pub width: u32,
    pub height: u32,
    pub fds: Vec<OwnedFd>,
    pub strides: Vec<u32>,
    pub offsets: Vec<u32>,
}

/// A buffer of a request or result, referenced by ids.
#[derive(Debug, Default)]
pub struct StreamBufferRef {
    pub stream_id: u64,
    pub buffer_id: u64,
    pub status: BufferStatus,
    pub acquire_fence: Option<OwnedFd>,
    pub release_fence: Option<OwnedFd>,
}

/// A capture request as submitted by a client.
///
/// The frame number is assigned by the device session on submission.
#[derive(Debug, Default)]
pub struct CaptureRequest {
    pub settings: WireMetadata,
    pub input_buffer: Option<StreamBufferRef>,
    pub output_buffers: Vec<StreamBufferRef>,
}

/// A capture result as delivered to a client.
///
/// `partial_result` is zero exactly when `result` carries no entries.
#[derive(Debug, Default)]
pub struct CaptureResult {
    pub frame_number: u32,
    pub result: WireMetadata,
    pub output_buffers: Vec<StreamBufferRef>,
    pub input_buffer: Option<StreamBufferRef>,
    pub partial_result: u32,
}

/// Result and notify channel a client binds with `initialize`.
pub trait CaptureCallbacks: Send + Sync {
    fn process_capture_result(&self, result: CaptureResult) -> Result<(), Error>;

    fn notify(&self, message: NotifyMessage) -> Result<(), Error>;
}

/// Device and torch status channel a client binds with `set_callbacks`.
pub trait StatusCallbacks: Send + Sync {
    fn camera_device_status_change(
        &self,
        camera_id: u32,
        status: CameraDeviceStatus,
    ) -> Result<(), Error>;

    fn torch_mode_status_change(&self, camera_id: u32, status: TorchModeStatus)
        -> Result<(), Error>;
}

/// A stream buffer handed to a vendor device.
#[derive(Debug)]
pub struct HalStreamBuffer {
    pub stream: Arc<Stream>,
    pub buffer: Arc<BufferHandle>,
    pub status: BufferStatus,
    pub acquire_fence: Option<OwnedFd>,
    pub release_fence: Option<OwnedFd>,
}

#[derive(Debug, Default)]
pub struct HalCaptureRequest {
    pub frame_number: u32,
    /// `None` repeats the settings of the previous request.
    pub settings: Option<CameraMetadata>,
    pub input_buffer: Option<HalStreamBuffer>,
    pub output_buffers: Vec<HalStreamBuffer>,
}

#[derive(Debug, Default)]
pub struct HalCaptureResult {
    pub frame_number: u32,
    pub result: Option<CameraMetadata>,
    pub output_buffers: Vec<HalStreamBuffer>,
    pub input_buffer: Option<HalStreamBuffer>,
    pub partial_result: u32,
}

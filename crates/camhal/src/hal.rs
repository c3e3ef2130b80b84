// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Vendor camera module interface.
//!
//! A vendor module is synchronous and callback based. The adapter calls every
//! [`CameraDevice`] method except [`CameraDevice::dump`] from the device's own
//! worker thread. Vendors report results and status changes through
//! [`DeviceCallbacks`] and [`ModuleCallbacks`] from threads of their choosing.

use crate::{
    camera3::{
        CameraDeviceStatus, CameraFacing, HalCaptureRequest, HalCaptureResult, NotifyMessage,
        RequestTemplate, TorchModeStatus,
    },
    metadata::CameraMetadata,
    stream::Stream,
    Error,
};
use std::{io::Write, sync::Arc};

/// Static information a module reports for one of its cameras.
#[derive(Debug, Clone)]
pub struct HalCameraInfo {
    pub facing: CameraFacing,
    pub orientation: i32,
    pub device_version: u32,
    pub static_camera_characteristics: CameraMetadata,
}

/// Implemented by the adapter, called by a module on status changes.
pub trait ModuleCallbacks: Send + Sync {
    fn camera_device_status_change(&self, camera_id: u32, status: CameraDeviceStatus);

    fn torch_mode_status_change(&self, camera_id: u32, status: TorchModeStatus);
}

/// Implemented by the adapter, called by a device to deliver results.
pub trait DeviceCallbacks: Send + Sync {
    fn process_capture_result(&self, result: HalCaptureResult);

    fn notify(&self, message: NotifyMessage);
}

/// A vendor camera module.
///
/// Setup happens in this order: [`init`](CameraModule::init),
/// [`get_number_of_cameras`](CameraModule::get_number_of_cameras),
/// [`set_callbacks`](CameraModule::set_callbacks), then
/// [`get_camera_info`](CameraModule::get_camera_info) for each camera. A module
/// must not invoke callbacks before `set_callbacks` returns.
pub trait CameraModule: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    fn get_number_of_cameras(&self) -> u32;

    fn get_camera_info(&self, camera_id: u32) -> Result<HalCameraInfo, Error>;

    fn set_callbacks(&self, callbacks: Arc<dyn ModuleCallbacks>) -> Result<(), Error>;

    fn open(&self, camera_id: u32) -> Result<Box<dyn CameraDevice>, Error>;

    fn set_torch_mode(&self, _camera_id: u32, _enabled: bool) -> Result<(), Error> {
        Err(Error::NotSupported)
    }
}

/// An opened vendor camera device.
pub trait CameraDevice: Send {
    fn initialize(&mut self, callbacks: Arc<dyn DeviceCallbacks>) -> Result<(), Error>;

    /// Configures `streams`. Only `usage` and `max_buffers` may be changed.
    fn configure_streams(&mut self, streams: &mut [Stream], operation_mode: u32)
        -> Result<(), Error>;

    fn construct_default_request_settings(
        &mut self,
        template: RequestTemplate,
    ) -> Result<CameraMetadata, Error>;

    fn process_capture_request(&mut self, request: HalCaptureRequest) -> Result<(), Error>;

    fn flush(&mut self) -> Result<(), Error>;

    fn dump(&self, out: &mut dyn Write) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;
}

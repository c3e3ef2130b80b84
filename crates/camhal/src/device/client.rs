// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::CameraDeviceSession;
use crate::{
    camera3::{
        BufferRegistration, CaptureCallbacks, CaptureRequest, RequestTemplate,
        StreamConfiguration,
    },
    delegate::Binding,
    metadata::WireMetadata,
    stream::Stream,
    Error,
};
use log::warn;
use std::{fmt, os::fd::OwnedFd, sync::Arc};

/// A client's channel to one open device.
///
/// Calls run on the session's ops worker. Dropping the client loses the
/// channel, which closes the session.
pub struct CameraDeviceClient {
    camera_id: u32,
    binding: Binding<CameraDeviceSession>,
}

impl fmt::Debug for CameraDeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CameraDeviceClient")
            .field("camera_id", &self.camera_id)
            .finish_non_exhaustive()
    }
}

impl CameraDeviceClient {
    pub(crate) fn bind(session: Arc<CameraDeviceSession>) -> Self {
        let camera_id = session.camera_id();
        let binding = Binding::with_worker(session.ops_worker().clone(), session.clone());
        let weak = Arc::downgrade(&session);
        binding.set_connection_error_handler(move || {
            if let Some(session) = weak.upgrade() {
                if let Err(err) = session.close() {
                    warn!("camera {}: close on channel loss: {}", camera_id, err);
                }
            }
        });
        CameraDeviceClient { camera_id, binding }
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    /// The session behind this channel.
    pub fn session(&self) -> &Arc<CameraDeviceSession> {
        self.binding.target()
    }

    pub fn initialize(&self, callbacks: Arc<dyn CaptureCallbacks>) -> Result<(), Error> {
        self.binding.call(move |s| s.initialize(callbacks))?
    }

    pub fn configure_streams(&self, config: StreamConfiguration) -> Result<Vec<Stream>, Error> {
        self.binding.call(move |s| s.configure_streams(config))?
    }

    pub fn construct_default_request_settings(
        &self,
        template: RequestTemplate,
    ) -> Result<WireMetadata, Error> {
        self.binding
            .call(move |s| s.construct_default_request_settings(template))?
    }

    pub fn register_buffer(&self, registration: BufferRegistration) -> Result<(), Error> {
        self.binding.call(move |s| s.register_buffer(registration))?
    }

    /// Returns the frame number assigned to the request.
    pub fn process_capture_request(&self, request: CaptureRequest) -> Result<u32, Error> {
        self.binding.call(move |s| s.process_capture_request(request))?
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.binding.call(|s| s.flush())?
    }

    /// Runs on the calling thread so a wedged ops worker can still be dumped.
    pub fn dump(&self, fd: OwnedFd) -> Result<(), Error> {
        self.binding.connection().check()?;
        self.binding.target().dump(fd)
    }

    /// Closes the session and the channel. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        let closed = self.binding.target().close();
        self.binding.close();
        closed
    }
}

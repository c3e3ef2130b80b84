// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{AdapterInner, CameraModuleOps, VendorTagOps};
use crate::{
    camera3::{CameraInfo, StatusCallbacks},
    delegate::Binding,
    device::CameraDeviceClient,
    worker::Worker,
    Error,
};
use std::sync::Arc;

/// One client's channel to the adapter.
///
/// Every call runs on the adapter's module worker. Dropping the client drops
/// its status listener.
pub struct CameraModuleClient {
    client_id: u64,
    binding: Binding<AdapterInner>,
}

impl CameraModuleClient {
    pub(crate) fn bind(client_id: u64, worker: Arc<Worker>, adapter: Arc<AdapterInner>) -> Self {
        let binding = Binding::with_worker(worker, adapter.clone());
        let adapter = Arc::downgrade(&adapter);
        binding.set_connection_error_handler(move || {
            if let Some(adapter) = adapter.upgrade() {
                adapter.remove_listener(client_id);
            }
        });
        CameraModuleClient { client_id, binding }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Disconnects. Later calls fail with [`Error::Disconnected`].
    pub fn close(&self) {
        self.binding.close();
    }
}

impl CameraModuleOps for CameraModuleClient {
    fn open_device(&self, camera_id: u32) -> Result<CameraDeviceClient, Error> {
        self.binding.call(move |a| a.open_device(camera_id))?
    }

    fn get_number_of_cameras(&self) -> Result<u32, Error> {
        self.binding.call(|a| a.get_number_of_cameras())?
    }

    fn get_camera_info(&self, camera_id: u32) -> Result<CameraInfo, Error> {
        self.binding.call(move |a| a.get_camera_info(camera_id))?
    }

    fn set_callbacks(&self, callbacks: Arc<dyn StatusCallbacks>) -> Result<(), Error> {
        let client_id = self.client_id;
        self.binding
            .call(move |a| a.set_callbacks(client_id, callbacks))?
    }

    fn set_torch_mode(&self, camera_id: u32, enabled: bool) -> Result<(), Error> {
        self.binding
            .call(move |a| a.set_torch_mode(camera_id, enabled))?
    }

    fn init(&self) -> Result<(), Error> {
        self.binding.connection().check()
    }

    fn get_vendor_tag_ops(&self) -> Result<VendorTagOps, Error> {
        self.binding.call(|a| a.get_vendor_tag_ops())
    }
}

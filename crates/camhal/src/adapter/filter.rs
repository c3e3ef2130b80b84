// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{CameraModuleOps, VendorTagOps};
use crate::{
    camera3::{CameraDeviceStatus, CameraFacing, CameraInfo, StatusCallbacks, TorchModeStatus},
    device::CameraDeviceClient,
    Error,
};
use log::{debug, warn};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
};

#[derive(Debug, Default)]
struct IdMap {
    /// Exposed id to the id of the wrapped implementation.
    to_inner: BTreeMap<u32, u32>,
    from_inner: BTreeMap<u32, u32>,
    num_builtin: u32,
    next_id: u32,
}

impl IdMap {
    fn insert(&mut self, inner_id: u32) -> u32 {
        if let Some(id) = self.from_inner.get(&inner_id) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.to_inner.insert(id, inner_id);
        self.from_inner.insert(inner_id, id);
        id
    }
}

/// Exposes only the cameras of the given facings, renumbered from zero.
///
/// Wraps any [`CameraModuleOps`] without changing the contract: unknown ids
/// still fail with `EINVAL`, and status callbacks arrive with the exposed
/// ids. Hot-plugged cameras of an accepted facing get the next free id.
pub struct FacingFilter {
    inner: Arc<dyn CameraModuleOps>,
    facings: Vec<CameraFacing>,
    ids: Arc<Mutex<IdMap>>,
}

impl FacingFilter {
    pub fn new(inner: Arc<dyn CameraModuleOps>, facings: &[CameraFacing]) -> Result<Self, Error> {
        let mut ids = IdMap::default();
        for inner_id in 0..inner.get_number_of_cameras()? {
            let info = inner.get_camera_info(inner_id)?;
            if facings.contains(&info.facing) {
                let id = ids.insert(inner_id);
                debug!("camera {} exposed as {}", inner_id, id);
            }
        }
        ids.num_builtin = ids.next_id;

        Ok(FacingFilter {
            inner,
            facings: facings.to_vec(),
            ids: Arc::new(Mutex::new(ids)),
        })
    }

    fn to_inner(&self, camera_id: u32) -> Result<u32, Error> {
        self.ids
            .lock()
            .ok()
            .and_then(|ids| ids.to_inner.get(&camera_id).copied())
            .ok_or_else(|| Error::invalid(format!("unknown camera {}", camera_id)))
    }
}

impl CameraModuleOps for FacingFilter {
    fn open_device(&self, camera_id: u32) -> Result<CameraDeviceClient, Error> {
        self.inner.open_device(self.to_inner(camera_id)?)
    }

    fn get_number_of_cameras(&self) -> Result<u32, Error> {
        self.ids
            .lock()
            .map(|ids| ids.num_builtin)
            .map_err(|_| Error::Poisoned("camera id map"))
    }

    fn get_camera_info(&self, camera_id: u32) -> Result<CameraInfo, Error> {
        self.inner.get_camera_info(self.to_inner(camera_id)?)
    }

    fn set_callbacks(&self, callbacks: Arc<dyn StatusCallbacks>) -> Result<(), Error> {
        self.inner.set_callbacks(Arc::new(RemappingStatusCallbacks {
            inner: Arc::downgrade(&self.inner),
            facings: self.facings.clone(),
            ids: self.ids.clone(),
            target: callbacks,
        }))
    }

    fn set_torch_mode(&self, camera_id: u32, enabled: bool) -> Result<(), Error> {
        self.inner.set_torch_mode(self.to_inner(camera_id)?, enabled)
    }

    fn init(&self) -> Result<(), Error> {
        self.inner.init()
    }

    fn get_vendor_tag_ops(&self) -> Result<VendorTagOps, Error> {
        self.inner.get_vendor_tag_ops()
    }
}

/// Translates status callbacks of the wrapped implementation to exposed ids
/// and drops those of filtered-out cameras.
struct RemappingStatusCallbacks {
    inner: Weak<dyn CameraModuleOps>,
    facings: Vec<CameraFacing>,
    ids: Arc<Mutex<IdMap>>,
    target: Arc<dyn StatusCallbacks>,
}

impl RemappingStatusCallbacks {
    fn lookup(&self, inner_id: u32) -> Option<u32> {
        self.ids
            .lock()
            .ok()
            .and_then(|ids| ids.from_inner.get(&inner_id).copied())
    }

    /// Assigns an id to a newly plugged camera of an accepted facing.
    fn admit(&self, inner_id: u32) -> Option<u32> {
        let inner = self.inner.upgrade()?;
        let facing = match inner.get_camera_info(inner_id) {
            Ok(info) => info.facing,
            Err(err) => {
                warn!("camera {} plugged without info: {}", inner_id, err);
                return None;
            }
        };
        if !self.facings.contains(&facing) {
            return None;
        }
        self.ids.lock().ok().map(|mut ids| ids.insert(inner_id))
    }
}

impl StatusCallbacks for RemappingStatusCallbacks {
    fn camera_device_status_change(
        &self,
        camera_id: u32,
        status: CameraDeviceStatus,
    ) -> Result<(), Error> {
        let mapped = match (self.lookup(camera_id), status) {
            (Some(id), _) => Some(id),
            (None, CameraDeviceStatus::Present) => self.admit(camera_id),
            (None, _) => None,
        };
        match mapped {
            Some(id) => self.target.camera_device_status_change(id, status),
            None => Ok(()),
        }
    }

    fn torch_mode_status_change(
        &self,
        camera_id: u32,
        status: TorchModeStatus,
    ) -> Result<(), Error> {
        match self.lookup(camera_id) {
            Some(id) => self.target.torch_mode_status_change(id, status),
            None => Ok(()),
        }
    }
}

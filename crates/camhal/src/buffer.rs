// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Registered buffers and fence-gated reclamation.
//!
//! Clients register every buffer by a `buffer_id` before referencing it in a
//! request. The registry owns the duplicated plane descriptors from then on.
//! When a result hands a buffer back the entry becomes
//! [`BufferState::Returned`] and a reclamation task waits on the buffer's
//! release fence on a dedicated worker. Only once the fence signalled is the
//! entry erased and, with the last reference, the descriptors closed.
//!
//! ```text
//! Registered ──mark_returned──▶ Returned ──fence signalled──▶ (reclaimed)
//!      ▲                            │
//!      └────────── register ────────┘  (the pending reclamation is skipped)
//! ```

use crate::{
    camera3::BufferRegistration,
    fence,
    format::HalPixelFormat,
    fourcc::FourCC,
    worker::{Worker, WorkerHandle},
    Error,
};
use log::{debug, trace, warn};
use std::{
    collections::HashMap,
    fmt,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Default bound of one release fence wait.
pub const DEFAULT_FENCE_WAIT: Duration = Duration::from_millis(5);

/// A validated buffer with its owned plane descriptors.
///
/// The descriptors close when the last [`Arc`] to the handle drops. The
/// registry keeps one reference and every in-flight request holds another.
pub struct BufferHandle {
    buffer_id: u64,
    drm_format: FourCC,
    hal_format: HalPixelFormat,
    width: u32,
    height: u32,
    planes: Vec<OwnedFd>,
    strides: Vec<u32>,
    offsets: Vec<u32>,
}

impl BufferHandle {
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    pub fn drm_format(&self) -> FourCC {
        self.drm_format
    }

    pub fn hal_format(&self) -> HalPixelFormat {
        self.hal_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.planes.get(index).map(|fd| fd.as_fd())
    }

    pub fn strides(&self) -> &[u32] {
        &self.strides
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }
}

impl TryFrom<BufferRegistration> for BufferHandle {
    type Error = Error;

    /// Validates a registration.
    ///
    /// Fails with `EINVAL` when the HAL format cannot be backed by the DRM
    /// format, or the plane, stride and offset counts disagree with each other
    /// or with the DRM format.
    fn try_from(reg: BufferRegistration) -> Result<Self, Error> {
        reg.hal_format.check_compatible(reg.drm_format)?;

        let planes = reg.fds.len();
        if planes == 0 || reg.strides.len() != planes || reg.offsets.len() != planes {
            return Err(Error::invalid(format!(
                "buffer {}: {} fds, {} strides, {} offsets",
                reg.buffer_id,
                planes,
                reg.strides.len(),
                reg.offsets.len()
            )));
        }
        if let Some(expected) = reg.drm_format.num_planes() {
            if expected != planes {
                return Err(Error::invalid(format!(
                    "buffer {}: {} needs {} planes, got {}",
                    reg.buffer_id, reg.drm_format, expected, planes
                )));
            }
        }
        if reg.width == 0 || reg.height == 0 {
            return Err(Error::invalid(format!(
                "buffer {}: empty size {}x{}",
                reg.buffer_id, reg.width, reg.height
            )));
        }

        Ok(BufferHandle {
            buffer_id: reg.buffer_id,
            drm_format: reg.drm_format,
            hal_format: reg.hal_format,
            width: reg.width,
            height: reg.height,
            planes: reg.fds,
            strides: reg.strides,
            offsets: reg.offsets,
        })
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("buffer_id", &self.buffer_id)
            .field("drm_format", &self.drm_format)
            .field("hal_format", &self.hal_format)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("planes", &self.planes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the client or in flight in a request.
    Registered,
    /// Handed back in a result, waiting for its release fence.
    Returned,
}

struct Entry {
    handle: Arc<BufferHandle>,
    state: BufferState,
    generation: u64,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, Entry>,
    next_generation: u64,
}

/// Buffer table of one device session.
pub struct BufferRegistry {
    table: Arc<Mutex<Table>>,
    worker: Worker,
    fence_wait: Duration,
}

impl BufferRegistry {
    /// Creates a registry with its own reclamation worker.
    pub fn new(name: &str, fence_wait: Duration) -> Result<Self, Error> {
        Ok(BufferRegistry {
            table: Arc::new(Mutex::new(Table::default())),
            worker: Worker::start(name)?,
            fence_wait,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Table>, Error> {
        self.table
            .lock()
            .map_err(|_| Error::Poisoned("buffer table"))
    }

    /// Validates and stores a buffer as [`BufferState::Registered`].
    ///
    /// A buffer id already present is replaced. A pending reclamation of the
    /// replaced handle still waits for its fence but leaves the new entry alone.
    pub fn register(&self, registration: BufferRegistration) -> Result<(), Error> {
        let handle = BufferHandle::try_from(registration)?;
        self.insert(Arc::new(handle))
    }

    /// Stores an already validated handle, such as one from the allocator.
    pub fn insert(&self, handle: Arc<BufferHandle>) -> Result<(), Error> {
        let buffer_id = handle.buffer_id();
        let mut table = self.lock()?;
        table.next_generation += 1;
        let generation = table.next_generation;
        let previous = table.entries.insert(
            buffer_id,
            Entry {
                handle,
                state: BufferState::Registered,
                generation,
            },
        );
        match previous.map(|p| p.state) {
            Some(BufferState::Registered) => {
                debug!("buffer {} re-registered before use", buffer_id)
            }
            Some(BufferState::Returned) => {
                debug!("buffer {} re-registered before reclamation", buffer_id)
            }
            None => trace!("buffer {} registered", buffer_id),
        }
        Ok(())
    }

    pub fn get(&self, buffer_id: u64) -> Option<Arc<BufferHandle>> {
        let table = self.table.lock().ok()?;
        table.entries.get(&buffer_id).map(|e| e.handle.clone())
    }

    /// Looks up a buffer that may be used in a request.
    pub fn get_registered(&self, buffer_id: u64) -> Result<Arc<BufferHandle>, Error> {
        let table = self.lock()?;
        match table.entries.get(&buffer_id) {
            Some(entry) if entry.state == BufferState::Registered => Ok(entry.handle.clone()),
            Some(_) => Err(Error::invalid(format!(
                "buffer {} was returned and not registered again",
                buffer_id
            ))),
            None => Err(Error::invalid(format!("unknown buffer {}", buffer_id))),
        }
    }

    /// State of `buffer_id`, `None` once reclaimed or never registered.
    pub fn state(&self, buffer_id: u64) -> Option<BufferState> {
        let table = self.table.lock().ok()?;
        table.entries.get(&buffer_id).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `buffer_id` returned and schedules its reclamation.
    ///
    /// The release fence is duplicated; the caller keeps its own descriptor.
    pub fn mark_returned(
        &self,
        buffer_id: u64,
        release_fence: Option<BorrowedFd<'_>>,
    ) -> Result<(), Error> {
        let fence = release_fence.map(|f| f.try_clone_to_owned()).transpose()?;

        let (handle, generation) = {
            let mut table = self.lock()?;
            let entry = table
                .entries
                .get_mut(&buffer_id)
                .ok_or_else(|| Error::invalid(format!("unknown buffer {}", buffer_id)))?;
            if entry.state == BufferState::Returned {
                return Ok(());
            }
            entry.state = BufferState::Returned;
            (entry.handle.clone(), entry.generation)
        };

        let worker = self.worker.handle().ok_or(Error::Disconnected)?;
        let task = Reclaim {
            table: self.table.clone(),
            worker: worker.clone(),
            buffer_id,
            generation,
            handle,
            fence,
            wait: self.fence_wait,
        };
        worker.post(move || task.run())
    }

    /// Stops the reclamation worker after the queued waits.
    pub fn stop(&self) {
        self.worker.stop();
    }
}

/// One pending reclamation, re-posted on every fence timeout.
struct Reclaim {
    table: Arc<Mutex<Table>>,
    worker: WorkerHandle,
    buffer_id: u64,
    generation: u64,
    handle: Arc<BufferHandle>,
    fence: Option<OwnedFd>,
    wait: Duration,
}

impl Reclaim {
    fn run(self) {
        let signalled = match &self.fence {
            None => true,
            Some(fence) => match fence::wait(fence.as_fd(), self.wait) {
                Ok(signalled) => signalled,
                Err(err) => {
                    warn!(
                        "buffer {}: release fence wait failed: {}",
                        self.buffer_id, err
                    );
                    true
                }
            },
        };

        if !signalled {
            let worker = self.worker.clone();
            if worker.post(move || self.run()).is_err() {
                trace!("reclamation worker stopped");
            }
            return;
        }

        if let Ok(mut table) = self.table.lock() {
            let current = table.entries.get(&self.buffer_id).is_some_and(|e| {
                e.generation == self.generation && e.state == BufferState::Returned
            });
            if current {
                table.entries.remove(&self.buffer_id);
                trace!("buffer {} reclaimed", self.buffer_id);
            } else {
                debug!(
                    "buffer {} was registered again, keeping the new handle",
                    self.buffer_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs::File,
        io::Write,
        os::unix::net::UnixStream,
        thread,
        time::Instant,
    };

    fn fd() -> OwnedFd {
        OwnedFd::from(File::open("/dev/null").unwrap())
    }

    fn registration(buffer_id: u64) -> BufferRegistration {
        BufferRegistration {
            buffer_id,
            drm_format: FourCC::NV12,
            hal_format: HalPixelFormat::ImplementationDefined,
            width: 640,
            height: 480,
            fds: vec![fd(), fd()],
            strides: vec![640, 640],
            offsets: vec![0, 640 * 480],
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_register_validates() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();

        let mut reg = registration(1);
        reg.hal_format = HalPixelFormat::Blob;
        assert_eq!(registry.register(reg).unwrap_err().errno(), -libc::EINVAL);

        let mut reg = registration(1);
        reg.strides.pop();
        assert!(registry.register(reg).is_err());

        let mut reg = registration(1);
        reg.fds.pop();
        reg.strides.pop();
        reg.offsets.pop();
        assert!(registry.register(reg).is_err());

        assert!(registry.is_empty());
        registry.register(registration(1)).unwrap();
        assert_eq!(registry.state(1), Some(BufferState::Registered));
        assert_eq!(registry.get(1).unwrap().num_planes(), 2);
    }

    #[test]
    fn test_poisoned_table() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();
        let table = registry.table.clone();
        let _ = thread::spawn(move || {
            let _guard = table.lock().unwrap();
            panic!("poison the buffer table");
        })
        .join();

        let err = registry.register(registration(2)).unwrap_err();
        assert!(matches!(err, Error::Poisoned("buffer table")));
        assert_eq!(err.errno(), -libc::EIO);
        assert!(registry.state(2).is_none());
    }

    #[test]
    fn test_reclaim_without_fence() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();
        registry.register(registration(3)).unwrap();
        registry.mark_returned(3, None).unwrap();
        assert!(wait_until(|| registry.state(3).is_none()));
        assert!(registry.mark_returned(3, None).is_err());
    }

    #[test]
    fn test_reclaim_waits_for_fence() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();
        registry.register(registration(4)).unwrap();

        let (mut producer, release) = UnixStream::pair().unwrap();
        registry.mark_returned(4, Some(release.as_fd())).unwrap();
        drop(release);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.state(4), Some(BufferState::Returned));
        assert!(matches!(registry.get_registered(4), Err(Error::InvalidArgument(_))));

        producer.write_all(&[1]).unwrap();
        assert!(wait_until(|| registry.state(4).is_none()));
    }

    #[test]
    fn test_reregister_before_reclaim() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();
        registry.register(registration(9)).unwrap();
        let first = registry.get(9).unwrap();

        let (mut producer, release) = UnixStream::pair().unwrap();
        registry.mark_returned(9, Some(release.as_fd())).unwrap();

        let mut reg = registration(9);
        reg.width = 320;
        registry.register(reg).unwrap();

        producer.write_all(&[1]).unwrap();
        // Reclamation of the first handle completes and drops its reference.
        assert!(wait_until(|| Arc::strong_count(&first) == 1));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(9), Some(BufferState::Registered));
        assert_eq!(registry.get_registered(9).unwrap().width(), 320);
    }

    #[test]
    fn test_reregister_while_registered() {
        let registry = BufferRegistry::new("test-fence", DEFAULT_FENCE_WAIT).unwrap();
        registry.register(registration(2)).unwrap();
        let mut reg = registration(2);
        reg.height = 240;
        registry.register(reg).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(2).unwrap().height(), 240);
    }
}

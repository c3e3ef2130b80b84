// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Camera HAL Adapter for Rust
//!
//! The adapter sits between one or more vendor camera modules and any number of
//! remote clients. Vendor modules expose a blocking, callback-based protocol
//! (open a device, configure streams, submit capture requests, receive capture
//! results); clients see an asynchronous interface where every device is
//! isolated on its own worker threads and every buffer and fence crossing the
//! boundary is owned by the adapter.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use camhal::adapter::{AdapterConfig, CameraHalAdapter, CameraModuleOps};
//! use camhal::hal::CameraModule;
//! use camhal::mapper::BufferMapper;
//!
//! # fn run(modules: Vec<Arc<dyn CameraModule>>, mapper: Arc<dyn BufferMapper>) -> Result<(), camhal::Error> {
//! let adapter = CameraHalAdapter::new(modules, Vec::new(), Some(mapper), AdapterConfig::default())?;
//! adapter.start()?;
//!
//! let module = adapter.open_camera_hal()?;
//! println!("{} cameras", module.get_number_of_cameras()?);
//! let device = module.open_device(0)?;
//! # let _ = device;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! Each open device owns four workers: one for every call into the vendor
//! device, one for result and notify delivery, one for fence-gated buffer
//! reclamation and one for the reprocessing detour. The multiplexer owns a
//! module worker and a status-callback worker. No lock is held while waiting
//! on a worker round-trip.

use std::{error, fmt, io};

/// Error type for camera HAL adapter operations
#[derive(Debug)]
pub enum Error {
    /// Operation on a device that is not initialized, not open or already closed (`ENODEV`)
    NoDevice,

    /// Malformed request: unknown stream or buffer, format mismatch, bad camera id (`EINVAL`)
    InvalidArgument(String),

    /// The device is already open (`EBUSY`)
    Busy,

    /// I/O error from underlying system calls
    Io(io::Error),

    /// Metadata serialization or allocation failure (`EIO`)
    Codec(String),

    /// The vendor module does not implement the operation (`ENOSYS`)
    NotSupported,

    /// The channel to the peer is gone; further calls fail fast (`EPIPE`)
    Disconnected,

    /// Negative errno returned by a vendor module
    Vendor(i32),

    /// A vendor module shared object could not be loaded
    LibraryNotLoaded(libloading::Error),

    /// A thread panicked while holding the named lock (`EIO`)
    Poisoned(&'static str),
}

impl Error {
    /// Returns the negative errno carried across the client boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NoDevice => -libc::ENODEV,
            Error::InvalidArgument(_) => -libc::EINVAL,
            Error::Busy => -libc::EBUSY,
            Error::Io(err) => -err.raw_os_error().unwrap_or(libc::EIO),
            Error::Codec(_) => -libc::EIO,
            Error::NotSupported => -libc::ENOSYS,
            Error::Disconnected => -libc::EPIPE,
            Error::Vendor(code) => {
                if *code > 0 {
                    -code
                } else {
                    *code
                }
            }
            Error::LibraryNotLoaded(_) => -libc::ENOENT,
            Error::Poisoned(_) => -libc::EIO,
        }
    }

    /// Builds an [`Error::InvalidArgument`] from anything printable.
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoDevice => write!(f, "no such device"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Busy => write!(f, "device busy"),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Codec(msg) => write!(f, "metadata codec error: {}", msg),
            Error::NotSupported => write!(f, "operation not supported by the camera module"),
            Error::Disconnected => write!(f, "channel disconnected"),
            Error::Vendor(code) => write!(f, "vendor module error: {}", code),
            Error::LibraryNotLoaded(err) => {
                write!(f, "camera module library could not be loaded: {}", err)
            }
            Error::Poisoned(what) => write!(f, "{} lock poisoned", what),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::LibraryNotLoaded(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<libloading::Error> for Error {
    fn from(err: libloading::Error) -> Self {
        Error::LibraryNotLoaded(err)
    }
}

/// The fourcc module provides portable handling of transport format codes.
pub mod fourcc;

/// The format module maps HAL pixel formats onto transport formats.
pub mod format;

/// The metadata module provides the capture settings/result table and its wire codec.
pub mod metadata;

/// The fence module waits on release and acquire fences.
pub mod fence;

/// The worker module provides dedicated single-threaded task runners.
pub mod worker;

/// The delegate module binds interfaces to workers and detects channel loss.
pub mod delegate;

/// The buffer module owns registered buffers and their fence-gated reclamation.
pub mod buffer;

/// The stream module holds the configured stream table.
pub mod stream;

/// The camera3 module defines the request, result and status types.
pub mod camera3;

/// The hal module defines the vendor camera module interface.
pub mod hal;

/// The mapper module defines the external buffer allocator interface.
pub mod mapper;

/// The reprocess module provides software reprocessing effects.
pub mod reprocess;

/// The device module provides the per-device capture pipeline.
pub mod device;

/// The adapter module multiplexes vendor modules into one camera id space.
pub mod adapter;

/// The loader module discovers vendor modules on disk.
pub mod loader;

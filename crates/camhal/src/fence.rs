// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sync fence waits.
//!
//! Release and acquire fences are sync-file descriptors that become readable
//! once the producer or consumer is done with the buffer.

use std::{
    io,
    os::fd::{AsRawFd, BorrowedFd},
    time::Duration,
};

/// Waits at most `timeout` for `fence` to signal.
///
/// Returns `Ok(true)` once the fence has signalled and `Ok(false)` when the
/// timeout elapsed first. Interrupted waits are retried with the full timeout.
pub fn wait(fence: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let mut pfd = libc::pollfd {
        fd: fence.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: pfd points to exactly one valid pollfd for the duration of the call.
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(false);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("fence fd {} is in an error state", pfd.fd),
            ));
        }
        return Ok(true);
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::ServerError;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Install signal handlers for graceful shutdown on SIGINT and SIGTERM
///
/// Returns an Arc<AtomicBool> that will be set to true when either signal is
/// received. The main loop checks it between dispatcher polls.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, ServerError> {
    let term = Arc::new(AtomicBool::new(false));

    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&term)).map_err(|e| {
            ServerError::General(format!("Failed to register signal handler: {}", e))
        })?;
    }

    log::debug!("Installed SIGINT and SIGTERM handlers");
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_install_signal_handler() {
        let term = install_signal_handler().unwrap();
        assert!(!term.load(Ordering::Relaxed));
    }
}

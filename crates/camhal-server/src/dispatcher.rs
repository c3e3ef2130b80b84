// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Registration with the camera dispatcher.
//!
//! The dispatcher speaks newline-delimited JSON over a Unix stream socket. The
//! server sends one `register` message and waits for `{"status":"ok"}`. After
//! that the connection stays open for as long as the server is registered;
//! when the dispatcher goes away the server exits so its supervisor can start
//! a fresh instance.

use crate::error::ServerError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    io::{BufRead, BufReader, Write},
    net::Shutdown,
    os::unix::net::UnixStream,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message<'a> {
    Register {
        name: &'a str,
        pid: u32,
        cameras: u32,
    },
}

#[derive(Debug, Deserialize)]
pub struct Reply {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// An open registration. Dropping it disconnects from the dispatcher.
pub struct Registration {
    stream: UnixStream,
    lost: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl Registration {
    /// Whether the dispatcher closed the connection.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("dispatcher socket shutdown: {}", e);
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

/// Connects to the dispatcher at `path` and registers as `name`.
pub fn register(path: &Path, name: &str, cameras: u32) -> Result<Registration, ServerError> {
    let mut stream = UnixStream::connect(path).map_err(|e| {
        ServerError::Dispatcher(format!("Cannot connect to {}: {}", path.display(), e))
    })?;
    let io_err = |e: std::io::Error| ServerError::Dispatcher(format!("Socket error: {}", e));
    stream.set_read_timeout(Some(REGISTER_TIMEOUT)).map_err(io_err)?;

    let mut line = serde_json::to_string(&Message::Register {
        name,
        pid: std::process::id(),
        cameras,
    })?;
    line.push('\n');
    stream.write_all(line.as_bytes()).map_err(io_err)?;

    let mut reader = BufReader::new(stream.try_clone().map_err(io_err)?);
    let mut answer = String::new();
    if reader.read_line(&mut answer).map_err(io_err)? == 0 {
        return Err(ServerError::Dispatcher(
            "Dispatcher closed the connection during registration".to_string(),
        ));
    }
    let reply: Reply = serde_json::from_str(answer.trim())?;
    if reply.status != "ok" {
        return Err(ServerError::Dispatcher(format!(
            "Registration refused: {}",
            reply.message.as_deref().unwrap_or(&reply.status)
        )));
    }
    stream.set_read_timeout(None).map_err(io_err)?;
    info!("registered with dispatcher at {} as {}", path.display(), name);

    let lost = Arc::new(AtomicBool::new(false));
    let monitor = {
        let lost = lost.clone();
        thread::Builder::new()
            .name("camhal-dispatcher".to_string())
            .spawn(move || watch(reader, lost))
            .map_err(|e| ServerError::General(format!("Cannot start monitor: {}", e)))?
    };

    Ok(Registration {
        stream,
        lost,
        monitor: Some(monitor),
    })
}

/// Reads until the dispatcher hangs up. Anything it sends is only logged.
fn watch(mut reader: BufReader<UnixStream>, lost: Arc<AtomicBool>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => debug!("dispatcher: {}", line.trim()),
            Err(e) => {
                warn!("dispatcher read failed: {}", e);
                break;
            }
        }
    }
    lost.store(true, Ordering::SeqCst);
}

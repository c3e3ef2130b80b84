// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Binding of interfaces to dedicated workers.
//!
//! Two symmetric halves sit on every channel crossing the client boundary:
//!
//! - a [`Binding`] wraps an adapter-side implementation and runs every inbound
//!   call on its own worker, whichever thread the caller used;
//! - a [`RemoteProxy`] wraps an interface implemented by the far side and runs
//!   every outbound call on its own worker.
//!
//! Both share a [`Connection`]. Losing the channel fires the registered
//! connection-error handler exactly once and every later call fails fast with
//! [`Error::Disconnected`].

use crate::{
    worker::{Worker, WorkerHandle},
    Error,
};
use log::{debug, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

type ErrorHandler = Box<dyn FnOnce() + Send + 'static>;

/// Shared state of one channel.
#[derive(Default)]
pub struct Connection {
    closed: AtomicBool,
    on_error: Mutex<Option<ErrorHandler>>,
}

impl Connection {
    pub fn new() -> Arc<Self> {
        Arc::new(Connection::default())
    }

    /// Registers the closure fired when the channel is lost.
    ///
    /// Replaces any previous handler. On an already closed connection the
    /// handler runs immediately.
    pub fn set_connection_error_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            handler();
            return;
        }
        if let Ok(mut on_error) = self.on_error.lock() {
            *on_error = Some(Box::new(handler));
        }
    }

    /// Marks the channel lost. Only the first call fires the handler.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = self.on_error.lock().ok().and_then(|mut h| h.take());
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fails with [`Error::Disconnected`] once the channel is lost.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Runs inbound calls on an implementation from one dedicated worker.
pub struct Binding<T: ?Sized + Send + Sync + 'static> {
    target: Arc<T>,
    worker: Arc<Worker>,
    connection: Arc<Connection>,
}

impl<T: ?Sized + Send + Sync + 'static> Binding<T> {
    /// Binds `target` to a new worker named `name`.
    pub fn new(name: &str, target: Arc<T>) -> Result<Self, Error> {
        Ok(Binding::with_worker(Arc::new(Worker::start(name)?), target))
    }

    /// Binds `target` to an existing worker shared with other users.
    pub fn with_worker(worker: Arc<Worker>, target: Arc<T>) -> Self {
        Binding {
            target,
            worker,
            connection: Connection::new(),
        }
    }

    /// Runs `f` on the binding's worker and waits for its value.
    pub fn call<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> R + Send + 'static,
    {
        self.connection.check()?;
        let target = self.target.clone();
        self.worker.post_and_wait(move || f(&target))
    }

    /// Queues `f` on the binding's worker without waiting.
    pub fn post<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.connection.check()?;
        let target = self.target.clone();
        self.worker.post(move || f(&target))
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn set_connection_error_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.connection.set_connection_error_handler(handler);
    }

    /// Closes the channel. The worker stops once its last user drops it.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl<T: ?Sized + Send + Sync + 'static> Drop for Binding<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outbound calls to an interface implemented by the far side.
///
/// Each call returns `Err` when the far side could not be reached, which is
/// treated as channel loss. Calls posted after the loss are dropped silently.
pub struct RemoteProxy<T: ?Sized + Send + Sync + 'static> {
    remote: Arc<T>,
    worker: Arc<Worker>,
    connection: Arc<Connection>,
}

impl<T: ?Sized + Send + Sync + 'static> RemoteProxy<T> {
    pub fn new(name: &str, remote: Arc<T>) -> Result<Self, Error> {
        Ok(RemoteProxy::with_worker(
            Arc::new(Worker::start(name)?),
            remote,
        ))
    }

    /// Runs the outbound calls on a worker shared with other proxies.
    pub fn with_worker(worker: Arc<Worker>, remote: Arc<T>) -> Self {
        RemoteProxy {
            remote,
            worker,
            connection: Connection::new(),
        }
    }

    /// Queues `f` on the proxy's worker.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&T) -> Result<(), Error> + Send + 'static,
    {
        if self.connection.is_closed() {
            return;
        }
        let remote = self.remote.clone();
        let connection = self.connection.clone();
        let posted = self.worker.post(move || {
            if connection.is_closed() {
                return;
            }
            if let Err(err) = f(&remote) {
                warn!("remote call failed, closing channel: {}", err);
                connection.close();
            }
        });
        if posted.is_err() {
            debug!("{} stopped, dropping call", self.worker.name());
            self.connection.close();
        }
    }

    /// Queues `task` behind the calls posted so far.
    pub fn post_task<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.post(task)
    }

    pub fn worker_handle(&self) -> Option<WorkerHandle> {
        self.worker.handle()
    }

    pub fn belongs_to_current_thread(&self) -> bool {
        self.worker.belongs_to_current_thread()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn set_connection_error_handler<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.connection.set_connection_error_handler(handler);
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Waits for every call posted so far to finish.
    pub fn flush(&self) -> Result<(), Error> {
        self.worker.post_and_wait(|| ())
    }

    /// Stops the worker after the queued calls.
    pub fn stop(&self) {
        self.worker.stop();
    }
}

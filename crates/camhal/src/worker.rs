// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Dedicated single-threaded task runners.
//!
//! A [`Worker`] owns one named thread that runs posted tasks in FIFO order.
//! Every vendor device call, every callback delivery and every fence wait in
//! the adapter runs on a worker, so the thread that performed an operation is
//! always known.
//!
//! # Example
//!
//! ```
//! use camhal::worker::Worker;
//!
//! let worker = Worker::start("example")?;
//! let answer = worker.post_and_wait(|| 6 * 7)?;
//! assert_eq!(answer, 42);
//! worker.stop();
//! # Ok::<(), camhal::Error>(())
//! ```

use crate::Error;
use log::{debug, error};
use std::{
    sync::{mpsc, Mutex},
    thread::{self, JoinHandle, ThreadId},
};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

/// A cloneable handle that posts to a [`Worker`] without owning it.
///
/// Tasks may hold a handle to re-post themselves. Posts made after the worker
/// stopped are dropped.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<Message>,
    thread_id: ThreadId,
}

impl WorkerHandle {
    pub fn post<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Message::Run(Box::new(task)))
            .map_err(|_| Error::Disconnected)
    }

    pub fn belongs_to_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

/// A named thread running posted tasks one at a time.
pub struct Worker {
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns the worker thread.
    ///
    /// Fails with [`Error::NoDevice`] when the thread cannot be created.
    pub fn start(name: &str) -> Result<Self, Error> {
        let (sender, receiver) = mpsc::channel::<Message>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for message in receiver {
                    match message {
                        Message::Run(task) => task(),
                        Message::Stop => break,
                    }
                }
            })
            .map_err(|err| {
                error!("failed to start worker {}: {}", name, err);
                Error::NoDevice
            })?;

        debug!("worker {} started", name);
        Ok(Worker {
            name: name.to_owned(),
            thread_id: thread.thread().id(),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a handle for posting from tasks, or `None` once stopped.
    pub fn handle(&self) -> Option<WorkerHandle> {
        let sender = self.sender.lock().ok()?.clone()?;
        Some(WorkerHandle {
            sender,
            thread_id: self.thread_id,
        })
    }

    /// Queues `task` and returns immediately.
    pub fn post<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle().ok_or(Error::Disconnected)?.post(task)
    }

    /// Queues `task` and blocks until it ran, returning its value.
    ///
    /// Called from the worker's own thread the task runs inline. Fails with
    /// [`Error::Disconnected`] when the worker stopped before running it.
    pub fn post_and_wait<R, F>(&self, task: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.belongs_to_current_thread() {
            return Ok(task());
        }

        let (reply, wait) = mpsc::sync_channel(1);
        self.post(move || {
            let _ = reply.send(task());
        })?;
        wait.recv().map_err(|_| Error::Disconnected)
    }

    pub fn belongs_to_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs the already queued tasks, then ends the thread.
    ///
    /// Idempotent. When called from the worker itself the thread is left to
    /// exit on its own instead of being joined.
    pub fn stop(&self) {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            return;
        };
        let _ = sender.send(Message::Stop);
        drop(sender);

        let thread = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(thread) = thread {
            if self.belongs_to_current_thread() {
                return;
            }
            if thread.join().is_err() {
                error!("worker {} panicked", self.name);
            }
        }
        debug!("worker {} stopped", self.name);
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_tasks_run_in_order() {
        let worker = Worker::start("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = seen.clone();
            worker.post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        worker.post_and_wait(|| ()).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_on_worker_thread() {
        let worker = Arc::new(Worker::start("affinity").unwrap());
        assert!(!worker.belongs_to_current_thread());
        let w = worker.clone();
        assert!(worker.post_and_wait(move || w.belongs_to_current_thread()).unwrap());

        let name = worker
            .post_and_wait(|| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("affinity"));
    }

    #[test]
    fn test_nested_post_and_wait_runs_inline() {
        let worker = Arc::new(Worker::start("nested").unwrap());
        let w = worker.clone();
        let value = worker
            .post_and_wait(move || w.post_and_wait(|| 5).unwrap())
            .unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_stop_drains_and_rejects() {
        let worker = Worker::start("stop").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let count = count.clone();
            worker
                .post(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        worker.stop();
        worker.stop();
        assert_eq!(count.load(Ordering::SeqCst), 8);
        assert!(!worker.is_running());
        assert!(matches!(worker.post(|| ()), Err(Error::Disconnected)));
        assert!(matches!(worker.post_and_wait(|| 1), Err(Error::Disconnected)));
    }

    #[test]
    fn test_stop_from_own_thread() {
        let worker = Arc::new(Worker::start("self-stop").unwrap());
        let w = worker.clone();
        worker.post_and_wait(move || w.stop()).unwrap();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_handle_reposts() {
        let worker = Worker::start("repost").unwrap();
        let handle = worker.handle().unwrap();
        let (tx, rx) = mpsc::channel();
        let h = handle.clone();
        handle
            .post(move || {
                h.post(move || tx.send(current_thread_name()).unwrap()).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap(), "repost");
        worker.stop();
        assert!(handle.post(|| ()).is_err());
    }

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or_default().to_owned()
    }
}

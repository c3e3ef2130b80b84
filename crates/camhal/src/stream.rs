// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{format::HalPixelFormat, Error};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Direction of a stream relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StreamType {
    Output = 0,
    Input = 1,
    Bidirectional = 2,
}

impl StreamType {
    /// Whether buffers of this stream can be a request's input.
    pub fn is_input(self) -> bool {
        matches!(self, StreamType::Input | StreamType::Bidirectional)
    }

    pub fn is_output(self) -> bool {
        matches!(self, StreamType::Output | StreamType::Bidirectional)
    }
}

/// One configured stream.
///
/// Type, size and format are set by the client. The vendor module may only
/// adjust `usage` and `max_buffers` while configuring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: u64,
    pub stream_type: StreamType,
    pub width: u32,
    pub height: u32,
    pub format: HalPixelFormat,
    pub usage: u64,
    pub max_buffers: u32,
    pub data_space: u32,
    pub rotation: u32,
    pub crop_rotate_scale_degrees: u32,
}

/// An immutable set of streams keyed by id.
pub type StreamSet = HashMap<u64, Arc<Stream>>;

/// The active stream set of a device.
///
/// The set is never edited in place. Configuring builds a complete new set and
/// swaps it in, so a lookup sees either the previous set or the new one.
#[derive(Debug, Default)]
pub struct StreamTable {
    current: Mutex<Option<Arc<StreamSet>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        StreamTable::default()
    }

    /// Installs `streams` as the active set.
    ///
    /// Fails with `EINVAL` on duplicate stream ids, leaving the table untouched.
    pub fn replace(&self, streams: &[Stream]) -> Result<Arc<StreamSet>, Error> {
        let mut set = StreamSet::with_capacity(streams.len());
        for stream in streams {
            if set.insert(stream.id, Arc::new(stream.clone())).is_some() {
                return Err(Error::invalid(format!("duplicate stream id {}", stream.id)));
            }
        }
        let set = Arc::new(set);
        if let Ok(mut current) = self.current.lock() {
            *current = Some(set.clone());
        }
        Ok(set)
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// The active set, `None` before a successful configuration.
    pub fn snapshot(&self) -> Option<Arc<StreamSet>> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Stream>> {
        self.snapshot().and_then(|set| set.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn stream(id: u64, width: u32) -> Stream {
        Stream {
            id,
            stream_type: StreamType::Output,
            width,
            height: 480,
            format: HalPixelFormat::ImplementationDefined,
            usage: 0,
            max_buffers: 0,
            data_space: 0,
            rotation: 0,
            crop_rotate_scale_degrees: 0,
        }
    }

    #[test]
    fn test_replace_and_lookup() {
        let table = StreamTable::new();
        assert!(!table.is_configured());
        assert!(table.get(0).is_none());

        table.replace(&[stream(0, 640), stream(1, 320)]).unwrap();
        assert_eq!(table.get(1).unwrap().width, 320);

        table.replace(&[stream(2, 1280)]).unwrap();
        assert!(table.get(0).is_none());
        assert_eq!(table.get(2).unwrap().width, 1280);

        table.clear();
        assert!(!table.is_configured());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let table = StreamTable::new();
        table.replace(&[stream(7, 640)]).unwrap();
        let err = table.replace(&[stream(1, 1), stream(1, 2)]).unwrap_err();
        assert_eq!(err.errno(), -libc::EINVAL);
        assert_eq!(table.get(7).unwrap().width, 640);
    }

    #[test]
    fn test_lookup_never_sees_partial_swap() {
        let table = Arc::new(StreamTable::new());
        let small: Vec<Stream> = (0..8).map(|id| stream(id, 1)).collect();
        let large: Vec<Stream> = (0..8).map(|id| stream(id, 2)).collect();
        table.replace(&small).unwrap();

        let writer = {
            let table = table.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let set = if i % 2 == 0 { &large } else { &small };
                    table.replace(set).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let set = table.snapshot().unwrap();
            let width = set[&0].width;
            assert!(set.values().all(|s| s.width == width));
        }
        writer.join().unwrap();
    }
}

//! # Routing Table (`BPF_MAP_TYPE_PERF_EVENT_ARRAY`)
//!
//! `bpf_perf_event_output` looks up the current CPU's slot in this map and
//! writes into the perf event stored there. Deleting a slot makes the kernel
//! drop output for that CPU at the source.
//!
//! aya exposes perf event arrays only through its own buffer type, so slot
//! updates go through a libbpf map handle on the same map.

use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use aya::maps::MapData;
use libbpf_rs::{MapCore, MapFlags, MapHandle};

use crate::domain::ReaderError;

/// Kernel-side table routing each CPU's output to a descriptor
///
/// The reader keeps its own handle (see [`EventArray::try_clone`]) for its whole
/// lifetime: closing the last handle to a perf event array clears it.
pub trait EventArray: Send + Sized {
    /// Number of CPU slots, fixed when the table was created
    fn max_entries(&self) -> u32;

    /// # Errors
    /// Returns the OS error if the slot cannot be written
    fn insert(&self, index: u32, fd: RawFd) -> io::Result<()>;

    /// # Errors
    /// Returns `ErrorKind::NotFound` if the slot is already empty
    fn delete(&self, index: u32) -> io::Result<()>;

    /// Duplicate the handle
    ///
    /// # Errors
    /// Returns the OS error if the handle cannot be duplicated
    fn try_clone(&self) -> io::Result<Self>;
}

/// Perf event array map accessed through a libbpf handle
#[derive(Debug)]
pub struct BpfEventArray {
    map: MapHandle,
    max_entries: u32,
}

impl BpfEventArray {
    /// Wrap a map loaded or opened through aya
    ///
    /// # Errors
    /// Returns an error if the map info cannot be queried or the map reopened
    pub fn from_map_data(map: &MapData) -> Result<Self, ReaderError> {
        let id = map.info()?.id();
        Self::from_handle(MapHandle::from_map_id(id)?)
    }

    /// Open a map pinned in bpffs, e.g. `/sys/fs/bpf/events`
    ///
    /// # Errors
    /// Returns an error if the pin cannot be opened
    pub fn from_pin<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        Self::from_handle(MapHandle::from_pinned_path(path)?)
    }

    fn from_handle(map: MapHandle) -> Result<Self, ReaderError> {
        let max_entries = map.info()?.info.max_entries;
        Ok(Self { map, max_entries })
    }
}

impl EventArray for BpfEventArray {
    fn max_entries(&self) -> u32 {
        self.max_entries
    }

    fn insert(&self, index: u32, fd: RawFd) -> io::Result<()> {
        let value = u32::try_from(fd)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative descriptor"))?;
        self.map
            .update(&index.to_ne_bytes(), &value.to_ne_bytes(), MapFlags::ANY)
            .map_err(into_io)
    }

    fn delete(&self, index: u32) -> io::Result<()> {
        self.map.delete(&index.to_ne_bytes()).map_err(into_io)
    }

    fn try_clone(&self) -> io::Result<Self> {
        let map = MapHandle::try_from(&self.map).map_err(into_io)?;
        Ok(Self { map, max_entries: self.max_entries })
    }
}

/// Keep "slot already empty" (ENOENT) recognizable as `NotFound`
fn into_io(err: libbpf_rs::Error) -> io::Error {
    let kind = match err.kind() {
        libbpf_rs::ErrorKind::NotFound => io::ErrorKind::NotFound,
        libbpf_rs::ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
        libbpf_rs::ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

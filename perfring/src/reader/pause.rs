//! # Pause / Resume
//!
//! Pausing removes every CPU's descriptor from the routing table, so the kernel
//! drops new output at the source. Records already in the rings stay readable.
//! Resuming puts the cached descriptors back.
//!
//! Only the routing table and the cached descriptor list are touched, never the
//! rings or the multiplexer, which is what lets these run while a read blocks.

use std::io;
use std::os::fd::RawFd;

use log::warn;

use crate::domain::{CpuId, ReaderError};
use crate::source::EventArray;

pub struct PauseController<A: EventArray> {
    array: A,
    /// Descriptor per CPU, owned by the matching ring and valid while it is open
    fds: Vec<RawFd>,
}

impl<A: EventArray> PauseController<A> {
    #[must_use]
    pub fn new(array: A, fds: Vec<RawFd>) -> Self {
        Self { array, fds }
    }

    /// Delete every CPU's slot; already-empty slots are fine
    ///
    /// # Errors
    /// Returns `Pause` with the CPU whose slot could not be deleted
    pub fn pause(&self) -> Result<(), ReaderError> {
        for cpu in self.cpus() {
            match self.array.delete(cpu.0) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(ReaderError::Pause { cpu, source }),
            }
        }
        Ok(())
    }

    /// Insert every cached descriptor at its CPU's slot
    ///
    /// Stops at the first failure without undoing earlier slots. Insertion is
    /// idempotent per slot, so calling this again is safe.
    ///
    /// # Errors
    /// Returns `Resume` with the CPU whose slot could not be written
    pub fn resume(&self) -> Result<(), ReaderError> {
        for (cpu, &fd) in self.cpus().zip(&self.fds) {
            self.array.insert(cpu.0, fd).map_err(|source| ReaderError::Resume { cpu, fd, source })?;
        }
        Ok(())
    }

    /// Best-effort pause used when construction fails half way
    pub(crate) fn unroute(&self) {
        if let Err(e) = self.pause() {
            warn!("Failed to clear routing table after setup error: {e}");
        }
    }

    fn cpus(&self) -> impl Iterator<Item = CpuId> {
        (0u32..).take(self.fds.len()).map(CpuId)
    }
}

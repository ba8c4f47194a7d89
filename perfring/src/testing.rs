//! Test doubles for the kernel side: file-backed rings and an in-memory routing table

#![allow(unsafe_code)] // producer side of the shared mapping

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use perfring_common::{
    PerfEventHeader, HEADER_LEN, META_DATA_HEAD, META_DATA_OFFSET, META_DATA_SIZE,
    META_DATA_TAIL, PERF_RECORD_LOST, PERF_RECORD_SAMPLE,
};

use crate::domain::CpuId;
use crate::reader::RingLayout;
use crate::source::{EventArray, EventSource, RingEvent};

// ============================================================================
// Record encoding
// ============================================================================

/// Encode a record the way the kernel does: header, body, zero padding to 8 bytes
pub(crate) fn encode_raw(kind: u32, body: &[u8]) -> Vec<u8> {
    let size = (HEADER_LEN + body.len()).next_multiple_of(8);
    let header = PerfEventHeader { kind, misc: 0, size: u16::try_from(size).unwrap() };
    let mut out = header.to_ne_bytes().to_vec();
    out.extend_from_slice(body);
    out.resize(size, 0);
    out
}

pub(crate) fn encode_sample(data: &[u8]) -> Vec<u8> {
    let mut body = u32::try_from(data.len()).unwrap().to_ne_bytes().to_vec();
    body.extend_from_slice(data);
    encode_raw(PERF_RECORD_SAMPLE, &body)
}

pub(crate) fn encode_lost(id: u64, lost: u64) -> Vec<u8> {
    let mut body = id.to_ne_bytes().to_vec();
    body.extend_from_slice(&lost.to_ne_bytes());
    encode_raw(PERF_RECORD_LOST, &body)
}

// ============================================================================
// Rings
// ============================================================================

/// Ring backed by a temp file, with an eventfd standing in for perf readiness
pub(crate) struct FakeRing {
    file: File,
    wake: Arc<EventFd>,
    released: Arc<AtomicUsize>,
}

impl AsFd for FakeRing {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl RingEvent for FakeRing {
    fn readiness_fd(&self) -> BorrowedFd<'_> {
        self.wake.as_fd()
    }

    fn acknowledge(&self) -> io::Result<()> {
        match self.wake.read() {
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FakeRing {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Kernel side of a fake ring: writes records and moves `data_head`
pub(crate) struct FakeProducer {
    ptr: NonNull<u8>,
    len: usize,
    data_offset: usize,
    data_size: usize,
    wake: Arc<EventFd>,
    _file: File,
}

impl FakeProducer {
    fn new(file: File, wake: Arc<EventFd>, layout: &RingLayout) -> io::Result<Self> {
        let len = layout.mmap_len();
        let ptr = unsafe {
            mmap(
                None,
                NonZeroUsize::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }?;
        Ok(Self {
            ptr: ptr.cast(),
            len,
            data_offset: layout.page_size,
            data_size: layout.data_pages * layout.page_size,
            wake,
            _file: file,
        })
    }

    fn cursor(&self, offset: usize) -> &AtomicU64 {
        unsafe { &*self.ptr.as_ptr().add(offset).cast::<AtomicU64>() }
    }

    pub(crate) fn head(&self) -> u64 {
        self.cursor(META_DATA_HEAD).load(Ordering::Acquire)
    }

    pub(crate) fn tail(&self) -> u64 {
        self.cursor(META_DATA_TAIL).load(Ordering::Acquire)
    }

    pub(crate) fn data_size(&self) -> usize {
        self.data_size
    }

    /// Publish the data area the way kernels since 4.1 do
    fn set_data_area(&mut self, offset: usize, size: usize) {
        self.cursor(META_DATA_OFFSET).store(offset as u64, Ordering::Release);
        self.cursor(META_DATA_SIZE).store(size as u64, Ordering::Release);
        self.data_offset = offset;
        self.data_size = size;
    }

    /// Move both cursors, as if `pos` bytes had been produced and consumed
    pub(crate) fn set_cursors(&self, pos: u64) {
        self.cursor(META_DATA_HEAD).store(pos, Ordering::Release);
        self.cursor(META_DATA_TAIL).store(pos, Ordering::Release);
    }

    /// Append an encoded record, publish it and signal readiness
    pub(crate) fn write(&self, record: &[u8]) {
        let head = self.head();
        for (i, byte) in record.iter().enumerate() {
            let pos = usize::try_from((head + i as u64) % self.data_size as u64).unwrap();
            unsafe { self.ptr.as_ptr().add(self.data_offset + pos).write_volatile(*byte) };
        }
        self.cursor(META_DATA_HEAD).store(head + record.len() as u64, Ordering::Release);
        self.wake.write(1).unwrap();
    }
}

impl Drop for FakeProducer {
    fn drop(&mut self) {
        let _ = unsafe { munmap(self.ptr.cast(), self.len) };
    }
}

pub(crate) struct FakeSource {
    producers: Vec<FakeProducer>,
    event_fds: Vec<RawFd>,
    released: Arc<AtomicUsize>,
    fail_at: Option<u32>,
    data_area: Option<(usize, usize)>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self {
            producers: Vec::new(),
            event_fds: Vec::new(),
            released: Arc::new(AtomicUsize::new(0)),
            fail_at: None,
            data_area: None,
        }
    }

    /// Stamp `data_offset`/`data_size` into every ring's metadata page
    pub(crate) fn with_data_area(mut self, offset: usize, size: usize) -> Self {
        self.data_area = Some((offset, size));
        self
    }

    /// Fail to open the ring for `cpu`
    pub(crate) fn failing_at(mut self, cpu: u32) -> Self {
        self.fail_at = Some(cpu);
        self
    }

    pub(crate) fn producer(&self, cpu: usize) -> &FakeProducer {
        &self.producers[cpu]
    }

    pub(crate) fn opened(&self) -> usize {
        self.producers.len()
    }

    /// Rings dropped so far
    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Descriptors the rings were opened with, by CPU
    pub(crate) fn event_fds(&self) -> Vec<RawFd> {
        self.event_fds.clone()
    }
}

impl EventSource for FakeSource {
    type Event = FakeRing;

    fn open(&mut self, cpu: CpuId, layout: &RingLayout) -> io::Result<FakeRing> {
        if self.fail_at == Some(cpu.0) {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        let file = tempfile::tempfile()?;
        file.set_len(layout.mmap_len() as u64)?;
        let wake = Arc::new(EventFd::from_value_and_flags(
            0,
            EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK,
        )?);

        let mut producer = FakeProducer::new(file.try_clone()?, Arc::clone(&wake), layout)?;
        if let Some((offset, size)) = self.data_area {
            producer.set_data_area(offset, size);
        }
        self.producers.push(producer);
        self.event_fds.push(file.as_raw_fd());
        Ok(FakeRing { file, wake, released: Arc::clone(&self.released) })
    }
}

// ============================================================================
// Routing table
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Insert(u32, RawFd),
    Delete(u32),
}

#[derive(Default)]
struct ArrayState {
    entries: BTreeMap<u32, RawFd>,
    ops: Vec<Op>,
    fail_insert_at: Option<u32>,
    fail_delete_at: Option<u32>,
    clones: usize,
    clones_dropped: usize,
}

pub(crate) struct FakeArray {
    max_entries: u32,
    state: Arc<Mutex<ArrayState>>,
    is_clone: bool,
}

impl FakeArray {
    pub(crate) fn new(max_entries: u32) -> Self {
        Self { max_entries, state: Arc::default(), is_clone: false }
    }

    /// Inspection handle shared with every clone
    pub(crate) fn handle(&self) -> ArrayHandle {
        ArrayHandle(Arc::clone(&self.state))
    }
}

impl EventArray for FakeArray {
    fn max_entries(&self) -> u32 {
        self.max_entries
    }

    fn insert(&self, index: u32, fd: RawFd) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Insert(index, fd));
        if state.fail_insert_at == Some(index) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        state.entries.insert(index, fd);
        Ok(())
    }

    fn delete(&self, index: u32) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Delete(index));
        if state.fail_delete_at == Some(index) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state
            .entries
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn try_clone(&self) -> io::Result<Self> {
        self.state.lock().unwrap().clones += 1;
        Ok(Self { max_entries: self.max_entries, state: Arc::clone(&self.state), is_clone: true })
    }
}

impl Drop for FakeArray {
    fn drop(&mut self) {
        if self.is_clone {
            if let Ok(mut state) = self.state.lock() {
                state.clones_dropped += 1;
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct ArrayHandle(Arc<Mutex<ArrayState>>);

impl ArrayHandle {
    pub(crate) fn ops(&self) -> Vec<Op> {
        self.0.lock().unwrap().ops.clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    pub(crate) fn entry(&self, index: u32) -> Option<RawFd> {
        self.0.lock().unwrap().entries.get(&index).copied()
    }

    pub(crate) fn fail_insert_at(&self, index: u32) {
        self.0.lock().unwrap().fail_insert_at = Some(index);
    }

    pub(crate) fn fail_delete_at(&self, index: u32) {
        self.0.lock().unwrap().fail_delete_at = Some(index);
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.0.lock().unwrap();
        state.fail_insert_at = None;
        state.fail_delete_at = None;
    }

    pub(crate) fn clones(&self) -> usize {
        self.0.lock().unwrap().clones
    }

    pub(crate) fn clones_dropped(&self) -> usize {
        self.0.lock().unwrap().clones_dropped
    }
}

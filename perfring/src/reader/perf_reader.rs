//! # Perf Reader
//!
//! Owns one [`RingBuffer`] per CPU slot of the routing table, the
//! [`Multiplexer`] they are registered with, and the [`PauseController`].
//!
//! ## Read Cycle
//!
//! 1. With no pending rings, block in [`Multiplexer::wait`]. Every ready ring
//!    has its head snapshotted and is pushed on the pending stack; the control
//!    tag ends the read with `Closed`.
//! 2. Decode from the ring on top of the stack. A ring that reached its
//!    snapshot is popped; otherwise its tail is committed and the record
//!    returned.
//!
//! Snapshotting the head per wake (rather than per record) bounds how much of
//! one CPU's backlog is served before all CPUs are polled again.
//!
//! ## Locking
//!
//! `read` is serialized by the read lock, `pause`/`resume` by the pause lock.
//! `close` takes both, read lock first, after waking any blocked `read`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use super::multiplexer::{ControlSignal, Multiplexer, CONTROL_TAG};
use super::pause::PauseController;
use super::ring_buffer::{RingBuffer, RingLayout};
use crate::domain::{CpuId, Record, ReaderError};
use crate::source::{BpfEventArray, EventArray, EventSource, PerfEventSource};

/// Reader tuning
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Bytes buffered in a ring before it reports readable. Must be smaller
    /// than the per-CPU buffer. 0 wakes on every record.
    pub watermark: usize,
}

/// State only touched under the read lock
struct ReadState {
    mux: Multiplexer,
    rings: Vec<RingBuffer>,
    /// Indices into `rings` not yet drained to their snapshotted head
    pending: Vec<usize>,
}

/// Blocking reader over a perf event array's per-CPU rings
///
/// The reader assumes it is the only writer of the routing table's slots:
/// `resume` reinserts the descriptors cached at construction without checking
/// what else may have been stored there since.
///
/// Dropping the reader closes it.
pub struct Reader<A: EventArray = BpfEventArray> {
    read: Mutex<Option<ReadState>>,
    pause: Mutex<Option<PauseController<A>>>,
    control: Mutex<Option<ControlSignal>>,
    closed: AtomicBool,
    cpu_count: usize,
}

impl<A: EventArray> Reader<A> {
    /// Create a reader with default options
    ///
    /// `per_cpu_buffer` is rounded up to whole pages.
    ///
    /// # Errors
    /// See [`Reader::with_source`]
    pub fn new(array: &A, per_cpu_buffer: usize) -> Result<Self, ReaderError> {
        Self::with_options(array, per_cpu_buffer, ReaderOptions::default())
    }

    /// Create a reader backed by `perf_event_open` events
    ///
    /// # Errors
    /// See [`Reader::with_source`]
    pub fn with_options(
        array: &A,
        per_cpu_buffer: usize,
        opts: ReaderOptions,
    ) -> Result<Self, ReaderError> {
        Self::with_source(array, &mut PerfEventSource, per_cpu_buffer, opts)
    }

    /// Create a reader whose rings are opened by `source`
    ///
    /// One ring is opened per routing-table slot and its descriptor inserted
    /// into the table. Everything acquired so far is released on failure.
    ///
    /// # Errors
    /// - `Config` for a zero-sized buffer, a watermark not below it, or an
    ///   empty routing table
    /// - `Setup` if a descriptor, mapping, or the epoll instance can't be created
    /// - `Resume` if a descriptor can't be inserted into the routing table
    pub fn with_source<S: EventSource>(
        array: &A,
        source: &mut S,
        per_cpu_buffer: usize,
        opts: ReaderOptions,
    ) -> Result<Self, ReaderError> {
        let layout = RingLayout::new(per_cpu_buffer, opts.watermark)?;
        let cpu_count = array.max_entries();
        if cpu_count < 1 {
            return Err(ReaderError::Config("routing table has no entries".into()));
        }

        let mut mux = Multiplexer::new(cpu_count as usize + 1)?;
        let mut rings = Vec::with_capacity(cpu_count as usize);
        for cpu in (0..cpu_count).map(CpuId) {
            let ring = RingBuffer::with_layout(cpu, &layout, source)?;
            if let Some(fd) = ring.readiness_fd() {
                mux.register(fd, u64::from(cpu.0))?;
            }
            rings.push(ring);
        }

        let control = ControlSignal::new()?;
        mux.register(&control, CONTROL_TAG)?;

        let array = array.try_clone().map_err(|e| ReaderError::setup("routing table handle", e))?;
        let fds = rings.iter().filter_map(RingBuffer::event_fd).collect();
        let pause = PauseController::new(array, fds);
        if let Err(e) = pause.resume() {
            pause.unroute();
            return Err(e);
        }

        debug!(
            "Opened perf reader: {cpu_count} CPUs, {} data pages per ring, watermark {}",
            layout.data_pages, layout.watermark
        );

        Ok(Self {
            read: Mutex::new(Some(ReadState {
                mux,
                pending: Vec::with_capacity(rings.len()),
                rings,
            })),
            pause: Mutex::new(Some(pause)),
            control: Mutex::new(Some(control)),
            closed: AtomicBool::new(false),
            cpu_count: cpu_count as usize,
        })
    }

    /// Number of per-CPU rings, fixed at construction
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Read the next record from any CPU
    ///
    /// Blocks until a ring reports at least `watermark` buffered bytes.
    /// Records from different CPUs are not ordered relative to each other.
    /// [`Reader::close`] interrupts a blocked call.
    ///
    /// # Errors
    /// - `Closed` once the reader is closed
    /// - `UnknownEventKind` for an unrecognized record; it is skipped and the
    ///   next call continues with the following record
    /// - `Malformed` for a corrupt ring; the ring resynchronizes next cycle
    pub fn read(&self) -> Result<Record, ReaderError> {
        let mut guard = lock(&self.read);
        if self.is_closed() {
            return Err(ReaderError::Closed);
        }
        guard.as_mut().ok_or(ReaderError::Closed)?.next_record()
    }

    /// Stop the kernel from writing to the rings
    ///
    /// Records already buffered remain readable. A blocked `read` is not woken.
    ///
    /// # Errors
    /// - `Closed` once the reader is closed
    /// - `Pause` with the CPU whose slot couldn't be deleted
    pub fn pause(&self) -> Result<(), ReaderError> {
        let guard = lock(&self.pause);
        if self.is_closed() {
            return Err(ReaderError::Closed);
        }
        guard.as_ref().ok_or(ReaderError::Closed)?.pause()
    }

    /// Route kernel output to the rings again
    ///
    /// # Errors
    /// - `Closed` once the reader is closed
    /// - `Resume` with the first CPU whose slot couldn't be written. Earlier
    ///   CPUs stay routed; calling `resume` again is safe.
    pub fn resume(&self) -> Result<(), ReaderError> {
        let guard = lock(&self.pause);
        if self.is_closed() {
            return Err(ReaderError::Closed);
        }
        guard.as_ref().ok_or(ReaderError::Closed)?.resume()
    }

    /// Release every resource and interrupt a blocked `read`
    ///
    /// Only the first call tears down; later or concurrent calls return
    /// `Ok(())` immediately. Afterwards the kernel's output calls fail with
    /// `ENOENT` once the last handle to the routing table is gone.
    ///
    /// # Errors
    /// Returns an error if the blocked reader could not be woken
    pub fn close(&self) -> Result<(), ReaderError> {
        if self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Ok(());
        }

        if let Some(control) = lock(&self.control).as_ref() {
            control.signal()?;
        }

        let mut read = lock(&self.read);
        let mut pause = lock(&self.pause);

        if let Some(state) = read.take() {
            let ReadState { mux, mut rings, .. } = state;
            drop(mux);
            drop(lock(&self.control).take());
            for ring in &mut rings {
                ring.close();
            }
        }
        drop(pause.take());

        debug!("Closed perf reader ({} CPUs)", self.cpu_count);
        Ok(())
    }
}

impl<A: EventArray> Drop for Reader<A> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close perf reader: {e}");
        }
    }
}

impl ReadState {
    fn next_record(&mut self) -> Result<Record, ReaderError> {
        loop {
            if self.pending.is_empty() {
                self.wait_for_rings()?;
            }

            // Serve the top of the stack
            let Some(&index) = self.pending.last() else {
                continue;
            };
            let ring = &mut self.rings[index];
            match ring.next_record() {
                Ok(None) => {
                    self.pending.pop();
                }
                Ok(Some(record)) => {
                    ring.commit_tail();
                    return Ok(record);
                }
                Err(e) => {
                    ring.commit_tail();
                    return Err(e);
                }
            }
        }
    }

    fn wait_for_rings(&mut self) -> Result<(), ReaderError> {
        let Self { mux, rings, pending } = self;
        for tag in mux.wait()? {
            if tag == CONTROL_TAG {
                return Err(ReaderError::Closed);
            }
            let Some(index) = usize::try_from(tag).ok().filter(|&i| i < rings.len()) else {
                warn!("Readiness reported for unknown tag {tag}");
                continue;
            };
            let ring = &mut rings[index];
            if let Err(e) = ring.acknowledge() {
                warn!("Failed to acknowledge readiness on {}: {e}", ring.cpu());
            }
            ring.load_head();
            pending.push(index);
        }
        trace!("Woke with {} ready rings", pending.len());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

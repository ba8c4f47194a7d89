//! # perfring - Per-CPU Perf Ring Reader
//!
//! Reads records that BPF programs emit with `bpf_perf_event_output`. The kernel
//! writes into one memory-mapped ring per CPU; this crate multiplexes all of
//! them behind a single blocking [`Reader::read`].
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  BPF program (kernel, external)                 │
//! │        bpf_perf_event_output(ctx, &EVENTS, CPU, data, len)      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ routing table slot for this CPU
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   perf event array ──▶ ring CPU 0 │ ring CPU 1 │ ... │ ring N   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ mmap + epoll
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     perfring (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Multiplexer  │──▶│  RingBuffer  │──▶│   Decoder    │──▶ Record│
//! │  │   (epoll)    │   │  (per CPU)   │   │              │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                                                       │
//! │         │ control eventfd (close)     PauseController ──▶ map   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`reader`]: the reader and its parts
//!   - `decoder`: wire format to [`Record`]
//!   - `ring_buffer`: one mapped per-CPU ring and its cursors
//!   - `multiplexer`: epoll over all rings plus the shutdown eventfd
//!   - `pause`: removing and restoring routing-table slots
//!   - `perf_reader`: [`Reader`] with `read`, `pause`, `resume`, `close`
//! - [`source`]: the kernel-facing collaborators (routing table, perf events)
//! - [`domain`]: [`CpuId`], [`Record`], [`ReaderError`]
//! - [`output`], [`cli`], [`preflight`], [`cpu_utils`]: support for the binary
//!
//! ## Typical Usage
//!
//! ```no_run
//! use perfring::{Payload, Reader, source::BpfEventArray};
//!
//! # fn main() -> Result<(), perfring::ReaderError> {
//! let array = BpfEventArray::from_pin("/sys/fs/bpf/events")?;
//! let reader = Reader::new(&array, 64 * 1024)?;
//! loop {
//!     match reader.read() {
//!         Ok(record) => match record.payload() {
//!             Payload::Sample(data) => println!("{}: {} bytes", record.cpu(), data.len()),
//!             Payload::Lost(n) => eprintln!("{}: lost {n}", record.cpu()),
//!         },
//!         Err(e) if e.is_closed() => break,
//!         Err(e) if e.is_unknown_event() => continue,
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Head / tail**: producer and consumer cursors in the ring's metadata page
//! - **Watermark**: bytes buffered before a ring reports readable
//! - **Lost record**: the kernel's count of samples dropped on a full ring
//! - **Pause**: clearing routing-table slots so the kernel drops output at the source

pub mod cli;
pub mod cpu_utils;
pub mod domain;
pub mod output;
pub mod preflight;
pub mod reader;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::{CpuId, Payload, Record, ReaderError};
pub use reader::{Reader, ReaderOptions};

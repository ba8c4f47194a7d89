//! # Shared Wire Format (Kernel ↔ Userspace)
//!
//! Defines the record layout the kernel writes into per-CPU perf ring buffers and
//! the positions of the cursor fields inside the ring's metadata page. All types
//! use `#[repr(C)]` and native byte order, matching `<linux/perf_event.h>`.
//!
//! ## Record Layout
//!
//! ```text
//! header:  { type: u32, misc: u16, size: u16 }           (8 bytes)
//! type=2 (Lost):   body { id: u64, lost: u64 }
//! type=9 (Sample): body { size: u32, data: [u8; size] }
//! ```
//!
//! `header.size` covers the whole record, header included, and is always a
//! multiple of 8 for records written by the kernel.
//!
//! ## Key Types
//!
//! - [`PerfEventHeader`] - Header preceding every record in the ring
//! - [`LostBody`] - Body of a `PERF_RECORD_LOST` record

#![no_std]

// ============================================================================
// Record Type Constants
// ============================================================================

/// **Lost Records**: the kernel dropped events because the ring was full
///
/// Body: [`LostBody`]
pub const PERF_RECORD_LOST: u32 = 2;

/// **Sample**: raw bytes submitted via `bpf_perf_event_output`
///
/// Body: `u32` length followed by that many bytes (padded by the kernel)
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Size of [`PerfEventHeader`] on the wire
pub const HEADER_LEN: usize = 8;

/// Size of the length prefix of a sample body
pub const SAMPLE_SIZE_LEN: usize = 4;

/// Size of [`LostBody`] on the wire
pub const LOST_BODY_LEN: usize = 16;

// ============================================================================
// Metadata Page Layout
// ============================================================================

/// Byte offset of `data_head` in `struct perf_event_mmap_page`
///
/// Written by the kernel (producer cursor). Read with acquire ordering.
pub const META_DATA_HEAD: usize = 1024;

/// Byte offset of `data_tail` in `struct perf_event_mmap_page`
///
/// Written by userspace (consumer cursor). Stored with release ordering.
pub const META_DATA_TAIL: usize = 1032;

/// Byte offset of `data_offset` (kernel 4.1+, zero on older kernels)
pub const META_DATA_OFFSET: usize = 1040;

/// Byte offset of `data_size` (kernel 4.1+, zero on older kernels)
pub const META_DATA_SIZE: usize = 1048;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Header preceding every record, `struct perf_event_header`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerfEventHeader {
    /// Record type (`PERF_RECORD_*`)
    pub kind: u32,
    /// Miscellaneous flags, unused by the reader
    pub misc: u16,
    /// Total record size in bytes, header included
    pub size: u16,
}

impl PerfEventHeader {
    /// Decode a header from its native-endian wire bytes
    #[must_use]
    pub fn from_ne_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            kind: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_ne_bytes([bytes[4], bytes[5]]),
            size: u16::from_ne_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode the header in native byte order
    #[must_use]
    pub fn to_ne_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.kind.to_ne_bytes());
        out[4..6].copy_from_slice(&self.misc.to_ne_bytes());
        out[6..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }
}

/// Body of a lost-records notification, `struct perf_event_lost` minus header
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LostBody {
    /// Identifier of the event that lost samples
    pub id: u64,
    /// Number of samples dropped since the previous notification
    pub lost: u64,
}

impl LostBody {
    /// Decode a body from its native-endian wire bytes
    #[must_use]
    pub fn from_ne_bytes(bytes: [u8; LOST_BODY_LEN]) -> Self {
        let mut id = [0u8; 8];
        let mut lost = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        lost.copy_from_slice(&bytes[8..]);
        Self { id: u64::from_ne_bytes(id), lost: u64::from_ne_bytes(lost) }
    }
}

const _: () = assert!(core::mem::size_of::<PerfEventHeader>() == HEADER_LEN);
const _: () = assert!(core::mem::size_of::<LostBody>() == LOST_BODY_LEN);

//! Domain types providing compile-time safety and self-documentation

use std::fmt;

/// CPU ID
///
/// Index of a per-CPU ring, equal to its slot in the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// What a record carries: either sample bytes or a count of dropped samples
///
/// Sample bytes are handed over uninterpreted. The kernel pads them so that the
/// length prefix plus data is 8-byte aligned; callers using variable-length
/// samples must account for that padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Data submitted via `bpf_perf_event_output`
    Sample(Vec<u8>),
    /// Number of samples the kernel dropped because the ring was full
    Lost(u64),
}

/// A decoded record and the CPU whose ring it came from
///
/// Only the record decoder constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub(crate) cpu: CpuId,
    pub(crate) payload: Payload,
}

impl Record {
    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Sample bytes, if this is a sample
    #[must_use]
    pub fn sample(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Sample(data) => Some(data),
            Payload::Lost(_) => None,
        }
    }

    /// Number of lost samples, if this is a lost-records notification
    #[must_use]
    pub fn lost(&self) -> Option<u64> {
        match self.payload {
            Payload::Lost(count) => Some(count),
            Payload::Sample(_) => None,
        }
    }
}

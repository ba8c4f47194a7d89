//! Structured error types for perfring
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;
use thiserror::Error;

use super::types::CpuId;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to set up {what}: {source}")]
    Setup {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("perf reader was closed")]
    Closed,

    #[error("unknown event type: {0}")]
    UnknownEventKind(u32),

    #[error("Malformed record on {cpu}: {reason}")]
    Malformed { cpu: CpuId, reason: &'static str },

    #[error("Couldn't delete event fd for {cpu}: {source}")]
    Pause {
        cpu: CpuId,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't put event fd {fd} for {cpu}: {source}")]
    Resume {
        cpu: CpuId,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("Waiting for ring readiness failed: {0}")]
    Wait(Errno),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Bpf(#[from] libbpf_rs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReaderError {
    pub(crate) fn setup(what: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Setup { what: what.into(), source: source.into() }
    }

    /// True if the error occurred because the reader was closed
    ///
    /// This is terminal: every later call fails the same way.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// True if an unrecognized record type was found in a ring
    ///
    /// The offending record has been skipped; reading may continue.
    #[must_use]
    pub fn is_unknown_event(&self) -> bool {
        matches!(self, Self::UnknownEventKind(_))
    }

    /// CPU index at which a pause or resume aborted
    #[must_use]
    pub fn failed_cpu(&self) -> Option<CpuId> {
        match self {
            Self::Pause { cpu, .. } | Self::Resume { cpu, .. } => Some(*cpu),
            _ => None,
        }
    }
}

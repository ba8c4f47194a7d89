//! External collaborators of the reader, at their interface boundary
//!
//! - [`EventArray`]: the kernel routing table mapping CPU index to descriptor
//! - [`EventSource`]: opens the per-CPU descriptors the rings are mapped from

pub mod event_array;
pub mod perf_event;

pub use event_array::{BpfEventArray, EventArray};
pub use perf_event::{EventSource, PerfEvent, PerfEventSource, RingEvent};

//! Reader core modules
//!
//! - Record decoding (pure wire-format logic)
//! - Per-CPU ring buffers over the kernel's shared mappings
//! - Readiness multiplexing with a shutdown signal
//! - Pause/resume through the routing table
//! - The reader orchestrating all of the above

pub mod decoder;
pub mod multiplexer;
pub mod pause;
pub mod perf_reader;
pub mod ring_buffer;

// Re-export common types
pub use multiplexer::{ControlSignal, Multiplexer, CONTROL_TAG};
pub use pause::PauseController;
pub use perf_reader::{Reader, ReaderOptions};
pub use ring_buffer::{page_size, RingBuffer, RingLayout};

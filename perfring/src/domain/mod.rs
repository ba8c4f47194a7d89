//! Domain model for perfring
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - A closed tagged union for decoded records
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{CpuId, Payload, Record};

pub use errors::ReaderError;

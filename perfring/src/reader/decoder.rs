//! # Record Decoding
//!
//! Turns the bytes of one ring record into a [`Record`]. Pure: no ring state,
//! no I/O. The ring buffer copies a record out (resolving wrap-around) using
//! `header.size` and hands the contiguous bytes here.

use perfring_common::{
    LostBody, PerfEventHeader, HEADER_LEN, LOST_BODY_LEN, PERF_RECORD_LOST, PERF_RECORD_SAMPLE,
    SAMPLE_SIZE_LEN,
};

use crate::domain::{CpuId, Payload, Record, ReaderError};

/// Decode the header at the start of `bytes`
///
/// # Errors
/// Returns `Malformed` if fewer than 8 bytes are given
pub fn decode_header(cpu: CpuId, bytes: &[u8]) -> Result<PerfEventHeader, ReaderError> {
    let raw: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(ReaderError::Malformed { cpu, reason: "truncated header" })?;
    Ok(PerfEventHeader::from_ne_bytes(raw))
}

/// Decode one complete record, header included
///
/// # Errors
/// - `UnknownEventKind` if the header type is neither lost nor sample
/// - `Malformed` if the body is shorter than its layout requires
pub fn decode(cpu: CpuId, bytes: &[u8]) -> Result<Record, ReaderError> {
    let header = decode_header(cpu, bytes)?;
    let body = &bytes[HEADER_LEN..];

    let payload = match header.kind {
        PERF_RECORD_LOST => Payload::Lost(decode_lost(cpu, body)?),
        PERF_RECORD_SAMPLE => Payload::Sample(decode_sample(cpu, body)?),
        other => return Err(ReaderError::UnknownEventKind(other)),
    };

    Ok(Record { cpu, payload })
}

fn decode_lost(cpu: CpuId, body: &[u8]) -> Result<u64, ReaderError> {
    let raw: [u8; LOST_BODY_LEN] = body
        .get(..LOST_BODY_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(ReaderError::Malformed { cpu, reason: "truncated lost record" })?;
    Ok(LostBody::from_ne_bytes(raw).lost)
}

fn decode_sample(cpu: CpuId, body: &[u8]) -> Result<Vec<u8>, ReaderError> {
    let size: [u8; SAMPLE_SIZE_LEN] = body
        .get(..SAMPLE_SIZE_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(ReaderError::Malformed { cpu, reason: "truncated sample size" })?;
    let size = u32::from_ne_bytes(size) as usize;

    body.get(SAMPLE_SIZE_LEN..SAMPLE_SIZE_LEN + size)
        .map(<[u8]>::to_vec)
        .ok_or(ReaderError::Malformed { cpu, reason: "sample exceeds record size" })
}

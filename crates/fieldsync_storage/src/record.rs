//! Record framing.
//!
//! Every record is stored as:
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┐
//! │ len (u32 LE) │ crc32 (u32)  │ payload (len)   │
//! └──────────────┴──────────────┴─────────────────┘
//! ```
//!
//! The checksum covers the payload only. A frame cut short by a crash is a
//! *torn tail* and is dropped on recovery; a complete frame with a bad
//! checksum followed by more data is reported as corruption.

use crate::error::{StorageError, StorageResult};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload accepted in a single frame (16 MiB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Result of scanning a buffer of frames.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameScan {
    /// Payloads of every valid frame, in order.
    pub payloads: Vec<Vec<u8>>,
    /// Length of the valid prefix of the buffer.
    pub valid_len: u64,
    /// Whether bytes after `valid_len` were discarded as a torn tail.
    pub torn_tail: bool,
}

/// Encodes a payload into a frame.
///
/// # Errors
///
/// Returns [`StorageError::RecordTooLarge`] if the payload exceeds
/// [`MAX_RECORD_SIZE`].
pub fn encode_frame(payload: &[u8]) -> StorageResult<Vec<u8>> {
    if payload.len() > MAX_RECORD_SIZE {
        return Err(StorageError::RecordTooLarge {
            len: payload.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decodes every frame in `data`.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] when a complete frame fails its
/// checksum and is not the last frame in the buffer.
pub fn decode_frames(data: &[u8]) -> StorageResult<FrameScan> {
    let mut scan = FrameScan::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < FRAME_HEADER_SIZE {
            scan.torn_tail = true;
            break;
        }

        let len = read_u32(data, offset) as usize;
        let crc = read_u32(data, offset + 4);
        if len > MAX_RECORD_SIZE || remaining - FRAME_HEADER_SIZE < len {
            scan.torn_tail = true;
            break;
        }

        let start = offset + FRAME_HEADER_SIZE;
        let end = start + len;
        let payload = &data[start..end];
        if compute_crc32(payload) != crc {
            if end == data.len() {
                scan.torn_tail = true;
                break;
            }
            return Err(StorageError::Corrupted {
                offset: offset as u64,
                reason: format!("checksum mismatch for {len} byte record"),
            });
        }

        scan.payloads.push(payload.to_vec());
        offset = end;
        scan.valid_len = offset as u64;
    }

    Ok(scan)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

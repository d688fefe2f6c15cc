//! Framing for one named object stored in a flash sector.
//!
//! # Storage Format
//!
//! - Magic number (4 bytes): `0x4F424A53` ('OBJS')
//! - Name hash (4 bytes): FNV-1a hash of the object name
//! - Payload length (2 bytes)
//! - Payload
//! - CRC32 (4 bytes): checksum of everything before it
//!
//! All integers are little-endian. An erased sector (all `0xFF`) has no magic and reads as
//! "no object".

use crc32fast::Hasher;

use crate::{Error, Result};

const MAGIC: u32 = 0x4F42_4A53; // 'OBJS'
/// Bytes of framing before the payload.
pub const HEADER_SIZE: usize = 4 + 4 + 2; // Magic + NameHash + PayloadLen
/// Bytes of framing after the payload.
pub const CRC_SIZE: usize = 4;

/// Largest payload that fits a record of `record_size` bytes.
#[must_use]
pub const fn max_payload(record_size: usize) -> usize {
    record_size.saturating_sub(HEADER_SIZE + CRC_SIZE)
}

/// Write a record for `name` holding `payload` into `record`.
///
/// Bytes after the record are left untouched. Returns the record length.
pub fn encode(record: &mut [u8], name: &str, payload: &[u8]) -> Result<usize> {
    let payload_len = u16::try_from(payload.len()).map_err(|_| Error::StorageFull)?;
    let crc_offset = HEADER_SIZE + payload.len();
    let total = crc_offset + CRC_SIZE;
    let record = record.get_mut(..total).ok_or(Error::StorageFull)?;

    record[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    record[4..8].copy_from_slice(&name_hash(name).to_le_bytes());
    record[8..10].copy_from_slice(&payload_len.to_le_bytes());
    record[HEADER_SIZE..crc_offset].copy_from_slice(payload);
    let crc = compute_crc(&record[..crc_offset]);
    record[crc_offset..].copy_from_slice(&crc.to_le_bytes());
    Ok(total)
}

/// Find the payload of the record for `name` in `record`.
///
/// Returns `Ok(None)` when there is no record, or the record belongs to another name.
/// A record with the right name but a bad length or checksum is an error.
pub fn decode<'a>(record: &'a [u8], name: &str) -> Result<Option<&'a [u8]>> {
    let Some(header) = record.get(..HEADER_SIZE) else {
        return Ok(None);
    };
    if read_u32(&header[0..4]) != MAGIC {
        return Ok(None);
    }
    if read_u32(&header[4..8]) != name_hash(name) {
        debug!("Flash record belongs to another object");
        return Ok(None);
    }

    let payload_len = usize::from(u16::from_le_bytes([header[8], header[9]]));
    let crc_offset = HEADER_SIZE + payload_len;
    let Some(stored_crc) = record.get(crc_offset..crc_offset + CRC_SIZE) else {
        error!("Flash record length {} overruns its sector", payload_len);
        return Err(Error::StorageCorrupted);
    };
    let computed_crc = compute_crc(&record[..crc_offset]);
    if read_u32(stored_crc) != computed_crc {
        error!("Flash record CRC mismatch (computed {})", computed_crc);
        return Err(Error::StorageCorrupted);
    }

    Ok(Some(&record[HEADER_SIZE..crc_offset]))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

/// Compute FNV-1a hash of the object name.
fn name_hash(name: &str) -> u32 {
    const FNV_PRIME: u32 = 16_777_619;
    const FNV_OFFSET: u32 = 2_166_136_261;

    let mut hash = FNV_OFFSET;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Compute CRC32 checksum.
fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

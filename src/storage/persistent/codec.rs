//! Record framing for the write-ahead log.
//!
//! Every record is JSON wrapped in a length prefix and a CRC32 trailer:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! Files start with a 4-byte magic followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a hospitalsim log file.
pub const MAGIC: [u8; 4] = *b"HOSP";

/// Length of the file header (magic + version).
pub const HEADER_LEN: u64 = 5;

/// Records larger than this are treated as corruption.
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes a value into a framed, checksummed record.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len()).map_err(|_| {
        IoError::new(ErrorKind::InvalidData, format!("record of {} bytes is too large", data.len()))
    })?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Reads one record, verifying its checksum.
///
/// A record cut short by the end of the stream yields `ErrorKind::UnexpectedEof`;
/// callers treat that as a torn tail write rather than corruption.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("record size {len} exceeds maximum {MAX_RECORD_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x} (record corrupted)"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning the codec version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

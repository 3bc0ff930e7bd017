//! TL primitive encoding.
//!
//! The self-describing tag-length-value layer under the wire messages:
//! little-endian `int`s, raw `int256`s, length-prefixed byte strings padded
//! to four-byte alignment, boxed booleans, and count-prefixed vectors.
//! Boxed message constructor ids are the CRC-32 of the scheme string.

use crate::error::{TransportError, TransportResult};
use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// `boolTrue = Bool`
pub const BOOL_TRUE: u32 = 0x997275b5;
/// `boolFalse = Bool`
pub const BOOL_FALSE: u32 = 0xbc799737;

/// Constructor id of a TL scheme string.
pub fn scheme_id(scheme: &str) -> u32 {
    CRC32.checksum(scheme.as_bytes())
}

/// Serializer for TL primitives.
#[derive(Default)]
pub struct TlWriter {
    buf: Vec<u8>,
}

impl TlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_int256(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u32(if v { BOOL_TRUE } else { BOOL_FALSE });
    }

    /// Length-prefixed bytes, padded to four-byte alignment: one length
    /// byte below 254, otherwise `0xfe` plus a little-endian 24-bit length.
    pub fn write_bytes(&mut self, data: &[u8]) {
        if data.len() < 0xfe {
            self.buf.push(data.len() as u8);
        } else {
            self.buf.push(0xfe);
            self.buf
                .extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
        }
        self.buf.extend_from_slice(data);
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }
}

/// Deserializer for TL primitives.
pub struct TlReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Bytes left to read.
    pub fn remaining_hint(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> TransportResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(TransportError::Truncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> TransportResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes taken")))
    }

    pub fn read_i32(&mut self) -> TransportResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("4 bytes taken")))
    }

    pub fn read_int256(&mut self) -> TransportResult<[u8; 32]> {
        let bytes = self.take(32)?;
        Ok(bytes.try_into().expect("32 bytes taken"))
    }

    pub fn read_bool(&mut self) -> TransportResult<bool> {
        match self.read_u32()? {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            other => Err(TransportError::Codec(format!(
                "invalid boolean constructor {other:#010x}"
            ))),
        }
    }

    pub fn read_bytes(&mut self) -> TransportResult<Vec<u8>> {
        let first = self.take(1)?[0];
        let (header, len) = if first < 0xfe {
            (1usize, first as usize)
        } else {
            let len_bytes = self.take(3)?;
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], 0]) as usize;
            (4usize, len)
        };
        let data = self.take(len)?.to_vec();
        let padding = (4 - (header + len) % 4) % 4;
        self.take(padding)?;
        Ok(data)
    }

    pub fn read_string(&mut self) -> TransportResult<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|_| TransportError::Codec("string is not valid utf-8".into()))
    }
}

//! TON address codecs: ADNL node addresses and account addresses.

use crate::error::{Error, Result};
use crate::id::Id32;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use crc::{CRC_16_XMODEM, Crc};
use data_encoding::BASE32_NOPAD;
use std::fmt;
use std::str::FromStr;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Leading byte of a decoded ADNL address.
const ADNL_PREFIX: u8 = 0x2d;

/// Parse the 55-character base-32 human form of an ADNL address.
///
/// The form drops the first base-32 character of the 35-byte payload
/// (prefix byte, 32-byte key, big-endian CRC-16/XMODEM), so decoding
/// prepends `F` to restore a multiple of eight characters.
pub fn parse_adnl(address: &str) -> Result<Id32> {
    if address.len() != 55 {
        return Err(Error::InvalidAddress(format!(
            "wrong adnl address length {}",
            address.len()
        )));
    }

    let padded = format!("F{}", address.to_uppercase());
    let decoded = BASE32_NOPAD
        .decode(padded.as_bytes())
        .map_err(|e| Error::InvalidAddress(format!("failed to decode address: {e}")))?;

    if decoded[0] != ADNL_PREFIX {
        return Err(Error::InvalidAddress("invalid adnl prefix".into()));
    }

    let expected = u16::from_be_bytes([decoded[33], decoded[34]]);
    if CRC16.checksum(&decoded[..33]) != expected {
        return Err(Error::InvalidAddress("invalid adnl address checksum".into()));
    }

    Id32::from_slice(&decoded[1..33])
}

/// Render a node key in the 55-character human form parsed by [`parse_adnl`].
pub fn format_adnl(id: &Id32) -> String {
    let mut payload = [0u8; 35];
    payload[0] = ADNL_PREFIX;
    payload[1..33].copy_from_slice(id.as_bytes());
    let crc = CRC16.checksum(&payload[..33]);
    payload[33..35].copy_from_slice(&crc.to_be_bytes());

    let encoded = BASE32_NOPAD.encode(&payload);
    encoded[1..].to_lowercase()
}

/// A TON account address: workchain plus a 32-byte state-init hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    workchain: i32,
    hash: [u8; 32],
}

impl AccountAddress {
    /// Parse either the friendly base64 form or the raw `<wc>:<hex>` form.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_friendly(s).or_else(|_| Self::parse_raw(s))
    }

    /// Parse the raw form `<workchain>:<64 hex chars>`.
    pub fn parse_raw(s: &str) -> Result<Self> {
        let (wc, hash) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidAddress(format!("missing workchain separator in {s:?}")))?;
        let workchain: i32 = wc
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid workchain {wc:?}")))?;
        if hash.len() != 64 {
            return Err(Error::InvalidAddress(format!(
                "raw address hash must be 64 hex chars, got {}",
                hash.len()
            )));
        }
        let bytes = hex::decode(hash)
            .map_err(|e| Error::InvalidAddress(format!("invalid address hex: {e}")))?;
        Ok(Self {
            workchain,
            hash: bytes.try_into().expect("length checked above"),
        })
    }

    /// Parse the friendly 36-byte base64 form (either alphabet): tag byte,
    /// workchain byte, hash, big-endian CRC-16/XMODEM of the first 34 bytes.
    pub fn parse_friendly(s: &str) -> Result<Self> {
        if s.len() != 48 {
            return Err(Error::InvalidAddress(format!(
                "friendly address must be 48 chars, got {}",
                s.len()
            )));
        }
        let decoded = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .map_err(|e| Error::InvalidAddress(format!("invalid address base64: {e}")))?;
        if decoded.len() != 36 {
            return Err(Error::InvalidAddress(format!(
                "friendly address must decode to 36 bytes, got {}",
                decoded.len()
            )));
        }

        let expected = u16::from_be_bytes([decoded[34], decoded[35]]);
        if CRC16.checksum(&decoded[..34]) != expected {
            return Err(Error::InvalidAddress("invalid address checksum".into()));
        }

        Ok(Self {
            workchain: decoded[1] as i8 as i32,
            hash: decoded[2..34].try_into().expect("length checked above"),
        })
    }

    /// Canonical raw rendering, used as the crawler-state key.
    pub fn raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw())
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountAddress({})", self.raw())
    }
}

impl FromStr for AccountAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

//! Single-range `Range` header parsing.

use crate::error::{Error, Result};

/// A parsed byte range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset, inclusive.
    pub from: u64,
    /// Last byte offset, inclusive.
    pub to: u64,
    /// Whether the request actually carried a satisfiable `Range` header.
    pub has_range: bool,
}

/// Parse a `Range` header value against the last valid offset `max`.
///
/// Only a single `bytes=` range is supported. An absent header, or one with
/// a different unit, yields the full body with `has_range = false`.
///
/// An empty `from` means offset 0, not a suffix length. This diverges from
/// RFC 7233 on purpose: `bytes=-N` is served as `[0, min(N, max)]`.
pub fn parse_range(header: Option<&str>, max: u64) -> Result<ByteRange> {
    let Some(spec) = header.and_then(|h| h.strip_prefix("bytes=")) else {
        return Ok(ByteRange {
            from: 0,
            to: max,
            has_range: false,
        });
    };

    if spec.contains(',') {
        return Err(Error::InvalidRange("multiple ranges not supported".into()));
    }
    let (from_part, to_part) = spec
        .split_once('-')
        .ok_or_else(|| Error::InvalidRange(format!("invalid range format {spec:?}")))?;

    let mut from = 0u64;
    if !from_part.is_empty() {
        from = from_part
            .parse()
            .map_err(|_| Error::InvalidRange(format!("invalid range start {from_part:?}")))?;
        if from > max {
            return Err(Error::InvalidRange("from exceeds content length".into()));
        }
    }

    let mut to = max;
    if !to_part.is_empty() {
        to = to_part
            .parse()
            .map_err(|_| Error::InvalidRange(format!("invalid range end {to_part:?}")))?;
        if to > max {
            return Err(Error::InvalidRange("to exceeds content length".into()));
        }
    }

    if from > to {
        return Err(Error::InvalidRange("from cannot be higher than to".into()));
    }

    Ok(ByteRange {
        from,
        to,
        has_range: true,
    })
}

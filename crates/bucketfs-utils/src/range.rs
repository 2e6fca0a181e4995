//! Byte-range header strings for ranged downloads.

/// Format an inclusive byte range request, `bytes=start-end`.
pub fn build_range(offset: u64, len: u64) -> String {
    debug_assert!(len > 0);
    format!("bytes={}-{}", offset, offset + len - 1)
}

/// Parse a request range back into `(offset, size)`.
///
/// Returns `None` for anything that is not a single bounded
/// `bytes=start-end` range.
pub fn parse_range(range: &str) -> Option<(u64, u64)> {
    let spec = range.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, end - start + 1))
}

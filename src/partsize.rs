//! Part-size calculator (C12) and range-generation (C1 consumer, §4.3).

use crate::error::TransferError;
use crate::range::ByteRange;

/// Derive the part size given `numUrls` pre-signed targets, the asset's
/// total `contentLength`, and part-size bounds.
///
/// 1. `required = ceil(contentLength / numUrls)`.
/// 2. Clamp to `[minPartSize, maxPartSize]`; fail if `required > maxPartSize`.
/// 3. If `preferredPartSize` is given, within bounds, and `>= required`,
///    use it; otherwise use the clamped required size.
pub fn calculate_part_size(
    num_urls: u64,
    content_length: u64,
    min_part_size: u64,
    max_part_size: u64,
    preferred_part_size: Option<u64>,
) -> Result<u64, TransferError> {
    if num_urls == 0 {
        return Err(TransferError::IllegalArgument(
            "numUrls must be >= 1".to_string(),
        ));
    }
    if min_part_size < 1 || max_part_size < min_part_size {
        return Err(TransferError::IllegalArgument(
            "minPartSize must be >= 1 and maxPartSize must be >= minPartSize".to_string(),
        ));
    }

    let required = content_length.div_ceil(num_urls).max(1);

    if required > max_part_size {
        return Err(TransferError::IllegalArgument(format!(
            "required part size {} exceeds maxPartSize {}",
            required, max_part_size
        )));
    }

    if let Some(preferred) = preferred_part_size {
        if preferred >= min_part_size && preferred <= max_part_size && preferred >= required {
            return Ok(preferred);
        }
    }

    Ok(required.clamp(min_part_size, max_part_size))
}

/// Emit consecutive closed-interval part ranges of length `part_size`
/// (represented internally as half-open `[low, high)`), except possibly
/// the last, which may be shorter. Zero parts iff `content_length == 0`.
pub fn generate_part_ranges(content_length: u64, part_size: u64) -> Vec<ByteRange> {
    if content_length == 0 || part_size == 0 {
        return Vec::new();
    }

    let mut ranges = Vec::with_capacity((content_length.div_ceil(part_size)) as usize);
    let mut low = 0u64;
    while low < content_length {
        let high = (low + part_size).min(content_length);
        ranges.push(ByteRange::new(low, high));
        low = high;
    }
    ranges
}

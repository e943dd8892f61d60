//! Scaler arithmetic.
//!
//! Every scaler in the pipeline (YUV scaler, HF up-scaler, MCSC poly/post
//! scalers) takes its ratio as `(src << 20) / dst`.

/// Fractional bits of a scale ratio.
pub const FIXED_POINT_BITS: u32 = 20;

/// Ratio encoding 1:1.
pub const RATIO_UNITY: u32 = 1 << FIXED_POINT_BITS;

/// Largest supported up-scale (dst / src).
pub const MAX_UPSCALE: u32 = 8;

/// Largest supported down-scale (src / dst).
pub const MAX_DOWNSCALE: u32 = 16;

/// Scale ratio of `src` to `dst` in 20-bit fixed point.
///
/// Returns `None` when `dst` is zero or the ratio does not fit 32 bits.
pub const fn ratio(src: u32, dst: u32) -> Option<u32> {
    if dst == 0 {
        return None;
    }
    let r = ((src as u64) << FIXED_POINT_BITS) / dst as u64;
    if r > u32::MAX as u64 {
        None
    } else {
        Some(r as u32)
    }
}

/// Destination size recovered from `src` and a ratio.
pub const fn apply_ratio(src: u32, ratio: u32) -> Option<u32> {
    if ratio == 0 {
        return None;
    }
    Some((((src as u64) << FIXED_POINT_BITS) / ratio as u64) as u32)
}

/// Whether a `src` → `dst` scale is within hardware limits.
pub const fn within_limits(src: u32, dst: u32) -> bool {
    if src == 0 || dst == 0 {
        return false;
    }
    dst <= src * MAX_UPSCALE && src <= dst * MAX_DOWNSCALE
}

//! Pixel formats and DMA compression encodings.
//!
//! The hardware codes below are written verbatim into a DMA channel's
//! `FORMAT` / `SBWC` / `LLC_HINT` registers.

/// Pixel layout handled by a DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Unpacked bayer, 16 bits per sample.
    Bayer16,
    /// MIPI-style packed 10-bit bayer.
    BayerPacked10,
    /// MIPI-style packed 12-bit bayer.
    BayerPacked12,
    /// Luma only, 8 bits.
    Y8,
    /// Semi-planar 4:2:0, 8 bits.
    Yuv420Sp8,
    /// Semi-planar 4:2:0, 10 bits in 16-bit containers.
    Yuv420Sp10,
    /// Semi-planar 4:2:2, 8 bits.
    Yuv422Sp8,
    /// Packed RGB, 8 bits per component.
    Rgb888,
    /// Statistics / metadata stream (grid, motion vectors). One byte per unit.
    Meta,
}

impl PixelFormat {
    /// Hardware code for the `FORMAT` register.
    pub const fn hw_code(self) -> u32 {
        match self {
            Self::Bayer16 => 0x00,
            Self::BayerPacked10 => 0x01,
            Self::BayerPacked12 => 0x02,
            Self::Y8 => 0x10,
            Self::Yuv420Sp8 => 0x11,
            Self::Yuv420Sp10 => 0x12,
            Self::Yuv422Sp8 => 0x13,
            Self::Rgb888 => 0x20,
            Self::Meta => 0x30,
        }
    }

    /// Bits per pixel of the first (luma / bayer) plane.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Bayer16 | Self::Yuv420Sp10 => 16,
            Self::BayerPacked10 => 10,
            Self::BayerPacked12 => 12,
            Self::Y8 | Self::Yuv420Sp8 | Self::Yuv422Sp8 | Self::Meta => 8,
            Self::Rgb888 => 24,
        }
    }

    /// Number of memory planes.
    pub const fn planes(self) -> u32 {
        match self {
            Self::Yuv420Sp8 | Self::Yuv420Sp10 | Self::Yuv422Sp8 => 2,
            _ => 1,
        }
    }

    /// Whether the format carries bayer samples.
    pub const fn is_bayer(self) -> bool {
        matches!(self, Self::Bayer16 | Self::BayerPacked10 | Self::BayerPacked12)
    }

    /// Whole bytes per pixel, rounded up. Used for horizontal address offsets.
    pub const fn bytes_per_pixel(self) -> u32 {
        self.bits_per_pixel().div_ceil(8)
    }

    /// Line stride in bytes for `width` pixels, aligned to [`STRIDE_ALIGN`].
    pub const fn stride(self, width: u32) -> u32 {
        let bytes = (width * self.bits_per_pixel()).div_ceil(8);
        bytes.div_ceil(STRIDE_ALIGN) * STRIDE_ALIGN
    }
}

/// DMA line stride alignment in bytes.
pub const STRIDE_ALIGN: u32 = 16;

// ── SBWC ─────────────────────────────────────────────────────────────────────

/// Mask applied to the SBWC base type code.
pub const SBWC_BASE_MASK: u32 = 0x0F;
/// Bit position of the 2-bit "extra" compression-level field.
pub const SBWC_EXTRA_SHIFT: u32 = 4;
/// Mask of the "extra" compression-level field (before shifting).
pub const SBWC_EXTRA_MASK: u32 = 0x3;

/// Block-based DMA compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SbwcType {
    /// Uncompressed.
    #[default]
    Disabled,
    /// Lossless, 32-byte aligned blocks.
    Lossless32,
    /// Lossless, 64-byte aligned blocks.
    Lossless64,
    /// Lossy, 32-byte aligned blocks.
    Lossy32,
    /// Lossy, 64-byte aligned blocks.
    Lossy64,
}

impl SbwcType {
    /// Base type code before masking.
    pub const fn base_code(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Lossless32 => 1,
            Self::Lossless64 => 2,
            Self::Lossy32 => 5,
            Self::Lossy64 => 6,
        }
    }

    /// Encode the `SBWC` register value. Both fields are masked, never added.
    pub const fn encode(self, extra_level: u32) -> u32 {
        (self.base_code() & SBWC_BASE_MASK)
            | ((extra_level & SBWC_EXTRA_MASK) << SBWC_EXTRA_SHIFT)
    }

    /// Whether this mode is lossy.
    pub const fn is_lossy(self) -> bool {
        matches!(self, Self::Lossy32 | Self::Lossy64)
    }
}

/// System-cache allocation hint. Opaque: passed through to `LLC_HINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LlcHint(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sbwc_fields_are_masked() {
        assert_eq!(SbwcType::Lossy64.encode(2), 6 | (2 << 4));
        // Out-of-range extra level must not bleed into neighbouring bits.
        assert_eq!(SbwcType::Lossless32.encode(0x7), 1 | (3 << 4));
        assert_eq!(SbwcType::Disabled.encode(0), 0);
    }

    #[test]
    fn strides_are_aligned() {
        assert_eq!(PixelFormat::Bayer16.stride(1920), 3840);
        assert_eq!(PixelFormat::BayerPacked10.stride(100), 128);
        assert_eq!(PixelFormat::Y8.stride(17) % STRIDE_ALIGN, 0);
    }
}

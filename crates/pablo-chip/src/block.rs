//! ISP block identifiers and their DMA channel tables.

use crate::format::PixelFormat;
use crate::regs;

/// Size of every block's register window in bytes.
pub const REG_WINDOW_SIZE: u32 = 0x1_0000;

/// One image-processing IP block of the Pablo pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockId {
    /// Phase-detect AF statistics, instance 0.
    Paf0,
    /// Phase-detect AF statistics, instance 1.
    Paf1,
    /// 3A statistics and bayer crop, instance 0.
    Taa0,
    /// 3A statistics and bayer crop, instance 1.
    Taa1,
    /// Bayer pre-processing.
    Byrp,
    /// Bayer to RGB/YUV processing.
    Rgbp,
    /// Multi-frame temporal noise reduction.
    Mtnr,
    /// Motion estimation.
    Lme,
    /// Multi-channel scaler.
    Mcsc,
}

impl BlockId {
    /// Every block, in pipeline order.
    pub const ALL: [Self; 9] = [
        Self::Paf0,
        Self::Paf1,
        Self::Taa0,
        Self::Taa1,
        Self::Byrp,
        Self::Rgbp,
        Self::Mtnr,
        Self::Lme,
        Self::Mcsc,
    ];

    /// Short hardware name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Paf0 => "PAF0",
            Self::Paf1 => "PAF1",
            Self::Taa0 => "3AA0",
            Self::Taa1 => "3AA1",
            Self::Byrp => "BYRP",
            Self::Rgbp => "RGBP",
            Self::Mtnr => "MTNR",
            Self::Lme => "LME",
            Self::Mcsc => "MCSC",
        }
    }

    /// Physical base address of the block's register window.
    pub const fn base(self) -> u64 {
        0x1500_0000 + (self as u64) * REG_WINDOW_SIZE as u64
    }

    /// Read-DMA channels of this block.
    pub const fn rdma_channels(self) -> &'static [DmaChannelDesc] {
        match self {
            Self::Paf0 | Self::Paf1 => PAF_RDMA,
            Self::Taa0 | Self::Taa1 | Self::Byrp | Self::Rgbp => BAYER_RDMA,
            Self::Mtnr => MTNR_RDMA,
            Self::Lme => LME_RDMA,
            Self::Mcsc => MCSC_RDMA,
        }
    }

    /// Write-DMA channels of this block.
    pub const fn wdma_channels(self) -> &'static [DmaChannelDesc] {
        match self {
            Self::Paf0 | Self::Paf1 => &[],
            Self::Taa0 | Self::Taa1 => TAA_WDMA,
            Self::Byrp => BYRP_WDMA,
            Self::Rgbp => RGBP_WDMA,
            Self::Mtnr => MTNR_WDMA,
            Self::Lme => LME_WDMA,
            Self::Mcsc => MCSC_WDMA,
        }
    }

    /// Number of scalers instantiated inside the block.
    pub const fn scaler_count(self) -> u32 {
        match self {
            Self::Rgbp => 2, // YUV scaler, HF up-scaler
            Self::Taa0 | Self::Taa1 => 1,
            Self::Mcsc => 5,
            _ => 0,
        }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DmaDirection {
    /// Memory to block.
    Read,
    /// Block to memory.
    Write,
}

/// Static description of one DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannelDesc {
    /// Channel name as used in register dumps.
    pub name: &'static str,
    /// Direction.
    pub direction: DmaDirection,
    /// Index among the channels of the same direction.
    pub index: u8,
    /// Formats the channel can move.
    pub formats: &'static [PixelFormat],
    /// Whether the channel has an SBWC codec.
    pub sbwc: bool,
}

impl DmaChannelDesc {
    /// Offset of the channel's register bank inside the block window.
    pub const fn reg_base(&self) -> u32 {
        let slot = match self.direction {
            DmaDirection::Read => self.index as u32,
            DmaDirection::Write => regs::dma::MAX_RDMA + self.index as u32,
        };
        regs::dma::BASE + slot * regs::dma::STRIDE
    }

    /// Whether `format` can be moved by this channel.
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }
}

const BAYER_FORMATS: &[PixelFormat] = &[
    PixelFormat::Bayer16,
    PixelFormat::BayerPacked10,
    PixelFormat::BayerPacked12,
];

const YUV_FORMATS: &[PixelFormat] = &[
    PixelFormat::Yuv420Sp8,
    PixelFormat::Yuv420Sp10,
    PixelFormat::Yuv422Sp8,
    PixelFormat::Rgb888,
];

const LUMA_FORMATS: &[PixelFormat] = &[PixelFormat::Y8, PixelFormat::Yuv420Sp8];

const META_FORMATS: &[PixelFormat] = &[PixelFormat::Meta];

const fn rdma(name: &'static str, index: u8, formats: &'static [PixelFormat], sbwc: bool) -> DmaChannelDesc {
    DmaChannelDesc { name, direction: DmaDirection::Read, index, formats, sbwc }
}

const fn wdma(name: &'static str, index: u8, formats: &'static [PixelFormat], sbwc: bool) -> DmaChannelDesc {
    DmaChannelDesc { name, direction: DmaDirection::Write, index, formats, sbwc }
}

const BAYER_RDMA: &[DmaChannelDesc] = &[rdma("RDMA_BYR", 0, BAYER_FORMATS, true)];

const PAF_RDMA: &[DmaChannelDesc] = &[rdma("RDMA_PDAF", 0, BAYER_FORMATS, false)];

const TAA_WDMA: &[DmaChannelDesc] = &[
    wdma("WDMA_BCROP", 0, BAYER_FORMATS, true),
    wdma("WDMA_LMEDS", 1, LUMA_FORMATS, false),
    wdma("WDMA_FDPIG", 2, YUV_FORMATS, false),
    wdma("WDMA_DRC", 3, META_FORMATS, false),
];

const BYRP_WDMA: &[DmaChannelDesc] = &[wdma("WDMA_BYR", 0, BAYER_FORMATS, true)];

const RGBP_WDMA: &[DmaChannelDesc] = &[
    wdma("WDMA_YUV", 0, YUV_FORMATS, true),
    wdma("WDMA_HF", 1, LUMA_FORMATS, false),
    wdma("WDMA_SAT", 2, META_FORMATS, false),
];

const MTNR_RDMA: &[DmaChannelDesc] = &[
    rdma("RDMA_CUR_L0", 0, YUV_FORMATS, true),
    rdma("RDMA_PREV_L0", 1, YUV_FORMATS, true),
    rdma("RDMA_PREV_WGT", 2, META_FORMATS, false),
];

const MTNR_WDMA: &[DmaChannelDesc] = &[
    wdma("WDMA_PREV_L0", 0, YUV_FORMATS, true),
    wdma("WDMA_PREV_WGT", 1, META_FORMATS, false),
];

const LME_RDMA: &[DmaChannelDesc] = &[
    rdma("RDMA_CUR", 0, LUMA_FORMATS, false),
    rdma("RDMA_PREV", 1, LUMA_FORMATS, false),
];

const LME_WDMA: &[DmaChannelDesc] = &[
    wdma("WDMA_MV", 0, META_FORMATS, false),
    wdma("WDMA_SAD", 1, META_FORMATS, false),
];

const MCSC_RDMA: &[DmaChannelDesc] = &[rdma("RDMA_IN", 0, YUV_FORMATS, true)];

const MCSC_WDMA: &[DmaChannelDesc] = &[
    wdma("WDMA_OUT0", 0, YUV_FORMATS, true),
    wdma("WDMA_OUT1", 1, YUV_FORMATS, true),
    wdma("WDMA_OUT2", 2, YUV_FORMATS, false),
    wdma("WDMA_OUT3", 3, YUV_FORMATS, false),
    wdma("WDMA_OUT4", 4, YUV_FORMATS, false),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_tables_fit_register_window() {
        for block in BlockId::ALL {
            assert!(block.rdma_channels().len() as u32 <= regs::dma::MAX_RDMA);
            assert!(block.wdma_channels().len() as u32 <= regs::dma::MAX_WDMA);
            for ch in block.rdma_channels().iter().chain(block.wdma_channels()) {
                assert!(ch.reg_base() + regs::dma::STRIDE <= regs::votf::BASE, "{block} {}", ch.name);
            }
        }
    }

    #[test]
    fn channel_indices_are_dense() {
        for block in BlockId::ALL {
            for (i, ch) in block.wdma_channels().iter().enumerate() {
                assert_eq!(ch.index as usize, i);
                assert_eq!(ch.direction, DmaDirection::Write);
            }
        }
    }

    #[test]
    fn register_windows_do_not_overlap() {
        assert_eq!(BlockId::Paf1.base() - BlockId::Paf0.base(), u64::from(REG_WINDOW_SIZE));
        assert_ne!(BlockId::Rgbp.base(), BlockId::Mcsc.base());
    }
}

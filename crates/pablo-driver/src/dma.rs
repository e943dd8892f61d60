//! DMA channel objects
//!
//! A [`DmaChannel`] binds a static channel description to a block
//! instance. It carries the per-frame address list and the CoreX bank
//! its registers are written into.

use crate::error::{PabloError, Result};
use crate::params::{ser_debug, Size};
use pablo_chip::block::{BlockId, DmaChannelDesc, DmaDirection, REG_WINDOW_SIZE};
use pablo_chip::format::{LlcHint, PixelFormat, SbwcType};
use pablo_chip::regs;
use serde::Serialize;

/// Channel command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DmaCommand {
    /// Channel off; no address or format registers are touched
    #[default]
    Disable,
    /// Channel on
    Enable,
}

/// Per-channel DMA configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DmaParam {
    /// Enable / disable
    pub cmd: DmaCommand,
    /// Pixel layout in memory
    #[serde(serialize_with = "ser_debug")]
    pub format: PixelFormat,
    /// Bits per sample in memory
    pub bit_depth: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in lines
    pub height: u32,
    /// Line stride in bytes; 0 derives it from format and width
    pub stride: u32,
    /// Compression mode
    #[serde(serialize_with = "ser_debug")]
    pub sbwc: SbwcType,
    /// 2-bit compression level
    pub sbwc_extra: u32,
    /// System-cache hint
    #[serde(serialize_with = "ser_debug")]
    pub llc: LlcHint,
}

impl DmaParam {
    /// Disabled parameter using the channel's first supported format
    pub fn disabled_for(desc: &DmaChannelDesc) -> Self {
        let format = desc.formats.first().copied().unwrap_or(PixelFormat::Meta);
        Self {
            cmd: DmaCommand::Disable,
            format,
            bit_depth: format.bits_per_pixel(),
            width: 0,
            height: 0,
            stride: 0,
            sbwc: SbwcType::Disabled,
            sbwc_extra: 0,
            llc: LlcHint::default(),
        }
    }

    /// Enabled parameter of `size` in `format`
    pub fn enabled(format: PixelFormat, size: Size) -> Self {
        Self {
            cmd: DmaCommand::Enable,
            format,
            bit_depth: format.bits_per_pixel(),
            width: size.width,
            height: size.height,
            stride: 0,
            sbwc: SbwcType::Disabled,
            sbwc_extra: 0,
            llc: LlcHint::default(),
        }
    }

    /// Whether the channel is on
    pub fn is_enabled(&self) -> bool {
        self.cmd == DmaCommand::Enable
    }

    /// Dimensions
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Stride actually programmed
    pub const fn effective_stride(&self) -> u32 {
        if self.stride != 0 {
            self.stride
        } else {
            self.format.stride(self.width)
        }
    }
}

/// DMA channel bound to a block instance
#[derive(Debug, Clone)]
pub struct DmaChannel {
    block: BlockId,
    desc: &'static DmaChannelDesc,
    corex_id: u32,
    addrs: Vec<u64>,
}

impl DmaChannel {
    /// Create the channel object for `desc` on `block`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::NoData`] if the channel's register bank falls
    /// outside the block window.
    pub fn create(block: BlockId, desc: &'static DmaChannelDesc) -> Result<Self> {
        let limit = match desc.direction {
            DmaDirection::Read => regs::dma::MAX_RDMA,
            DmaDirection::Write => regs::dma::MAX_WDMA,
        };
        let bank_end = desc.reg_base() + regs::dma::STRIDE + regs::COREX_BANK_OFFSET;
        if u32::from(desc.index) >= limit || bank_end > REG_WINDOW_SIZE {
            return Err(PabloError::no_data(format!(
                "{block} {}: register bank outside window",
                desc.name
            )));
        }
        Ok(Self {
            block,
            desc,
            corex_id: 0,
            addrs: Vec::new(),
        })
    }

    /// Static description
    pub const fn desc(&self) -> &'static DmaChannelDesc {
        self.desc
    }

    /// Owning block
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Channel name
    pub const fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Select the CoreX bank subsequent register offsets resolve into
    pub fn set_corex_id(&mut self, id: u32) {
        self.corex_id = id & 1;
    }

    /// CoreX bank in use
    pub const fn corex_id(&self) -> u32 {
        self.corex_id
    }

    /// Set the per-buffer device-virtual addresses of this frame
    ///
    /// # Errors
    ///
    /// Returns error if more addresses than address slots are given.
    pub fn set_address(&mut self, addrs: &[u64]) -> Result<()> {
        if addrs.len() > regs::dma::MAX_ADDRS as usize {
            return Err(PabloError::invalid_geometry(format!(
                "{} {}: {} buffers exceed {} address slots",
                self.block,
                self.desc.name,
                addrs.len(),
                regs::dma::MAX_ADDRS
            )));
        }
        self.addrs.clear();
        self.addrs.extend_from_slice(addrs);
        Ok(())
    }

    /// Addresses of this frame
    pub fn addrs(&self) -> &[u64] {
        &self.addrs
    }

    /// Absolute offset of register `field` in the selected bank
    pub const fn reg(&self, field: u32) -> u32 {
        self.desc.reg_base() + field + self.corex_id * regs::COREX_BANK_OFFSET
    }

    /// Whether the channel reads from memory
    pub fn is_read(&self) -> bool {
        self.desc.direction == DmaDirection::Read
    }
}

/// Create a channel object for every channel of `block`
///
/// All-or-nothing: on the first failure nothing is returned.
///
/// # Errors
///
/// Returns [`PabloError::NoData`] if any channel cannot be constructed.
pub fn create_channels(block: BlockId, descs: &'static [DmaChannelDesc]) -> Result<Vec<DmaChannel>> {
    descs.iter().map(|d| DmaChannel::create(block, d)).collect()
}

/// Read and write channels of one block instance
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    /// Read channels in table order
    pub rdma: Vec<DmaChannel>,
    /// Write channels in table order
    pub wdma: Vec<DmaChannel>,
}

impl ChannelSet {
    /// Create every read and write channel, all or nothing
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::NoData`] if any channel cannot be constructed.
    pub fn create(
        block: BlockId,
        rdma: &'static [DmaChannelDesc],
        wdma: &'static [DmaChannelDesc],
    ) -> Result<Self> {
        Ok(Self {
            rdma: create_channels(block, rdma)?,
            wdma: create_channels(block, wdma)?,
        })
    }

    /// Total channel count
    pub fn len(&self) -> usize {
        self.rdma.len() + self.wdma.len()
    }

    /// Whether no channel exists
    pub fn is_empty(&self) -> bool {
        self.rdma.is_empty() && self.wdma.is_empty()
    }

    /// Point every channel at CoreX bank `id`
    pub fn set_corex_id(&mut self, id: u32) {
        for ch in self.rdma.iter_mut().chain(self.wdma.iter_mut()) {
            ch.set_corex_id(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corex_bank_shifts_registers() {
        let mut ch = DmaChannel::create(BlockId::Rgbp, &BlockId::Rgbp.wdma_channels()[0]).unwrap();
        let bank0 = ch.reg(regs::dma::WIDTH);
        ch.set_corex_id(1);
        assert_eq!(ch.reg(regs::dma::WIDTH), bank0 + regs::COREX_BANK_OFFSET);
        ch.set_corex_id(2);
        assert_eq!(ch.corex_id(), 0);
    }

    #[test]
    fn too_many_addresses() {
        let mut ch = DmaChannel::create(BlockId::Lme, &BlockId::Lme.rdma_channels()[0]).unwrap();
        let addrs = vec![0x1000u64; regs::dma::MAX_ADDRS as usize + 1];
        assert!(ch.set_address(&addrs).is_err());
        assert!(ch.set_address(&addrs[..2]).is_ok());
        assert_eq!(ch.addrs().len(), 2);
    }

    #[test]
    fn stride_derivation() {
        let p = DmaParam::enabled(PixelFormat::Yuv420Sp8, Size::new(1920, 1080));
        assert_eq!(p.effective_stride(), 1920);
        let p = DmaParam { stride: 4096, ..p };
        assert_eq!(p.effective_stride(), 4096);
    }

    #[test]
    fn every_table_constructs() {
        for block in BlockId::ALL {
            assert!(create_channels(block, block.rdma_channels()).is_ok());
            assert!(create_channels(block, block.wdma_channels()).is_ok());
        }
        let set = ChannelSet::create(BlockId::Mtnr, BlockId::Mtnr.rdma_channels(), BlockId::Mtnr.wdma_channels()).unwrap();
        assert_eq!(set.len(), 5);
    }
}

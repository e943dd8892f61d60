//! Hardware block register façade
//!
//! Stateless translation of configuration intents into register writes.
//! The façade validates what it is asked to program and writes it into a
//! [`RegisterSink`]: the command loader for per-frame programming, the
//! register shadow in cached mode, or the backend directly for static
//! setup. It knows nothing about sequencing.

use crate::backend::IspBackend;
use crate::dma::{DmaChannel, DmaParam};
use crate::error::{PabloError, Result};
use crate::params::{GridConfig, InputPath, OtfParam, Rect, Size};
use pablo_chip::block::BlockId;
use pablo_chip::format::SbwcType;
use pablo_chip::regs::{self, SubBlock};
use pablo_chip::scaler;

/// Destination of register writes
pub trait RegisterSink {
    /// Record or perform one 32-bit write
    ///
    /// # Errors
    ///
    /// Returns error if the write cannot be recorded or performed.
    fn write(&mut self, offset: u32, value: u32) -> Result<()>;
}

impl RegisterSink for Vec<(u32, u32)> {
    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        self.push((offset, value));
        Ok(())
    }
}

/// Sink writing straight through the backend
#[derive(Debug, Clone, Copy)]
pub struct DirectRegisters<'a> {
    backend: &'a dyn IspBackend,
    block: BlockId,
}

impl<'a> DirectRegisters<'a> {
    /// Direct access to `block`
    pub fn new(backend: &'a dyn IspBackend, block: BlockId) -> Self {
        Self { backend, block }
    }
}

impl RegisterSink for DirectRegisters<'_> {
    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        self.backend.write32(self.block, offset, value)
    }
}

/// One scaler's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScalerConfig {
    /// Scaler enabled; a disabled scaler only gets its control register cleared
    pub enable: bool,
    /// Input size
    pub src: Size,
    /// Crop of the input actually scaled
    pub crop: Rect,
    /// Output size
    pub dst: Size,
    /// Horizontal start phase in 20-bit fixed point
    pub h_phase: u32,
}

impl ScalerConfig {
    /// Scale all of `src` to `dst`
    pub const fn full(src: Size, dst: Size) -> Self {
        Self {
            enable: true,
            src,
            crop: Rect::from_size(src),
            dst,
            h_phase: 0,
        }
    }

    /// Disabled scaler
    pub const fn disabled() -> Self {
        Self {
            enable: false,
            src: Size::new(0, 0),
            crop: Rect::new(0, 0, 0, 0),
            dst: Size::new(0, 0),
            h_phase: 0,
        }
    }

    /// Horizontal and vertical ratios
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::InvalidGeometry`] for an empty output or an
    /// out-of-range scale.
    pub fn ratios(&self) -> Result<(u32, u32)> {
        let (cw, ch) = (self.crop.width, self.crop.height);
        let (dw, dh) = (self.dst.width, self.dst.height);
        if !scaler::within_limits(cw, dw) || !scaler::within_limits(ch, dh) {
            return Err(PabloError::invalid_geometry(format!(
                "scale {cw}x{ch} -> {dw}x{dh} outside limits"
            )));
        }
        match (scaler::ratio(cw, dw), scaler::ratio(ch, dh)) {
            (Some(h), Some(v)) => Ok((h, v)),
            _ => Err(PabloError::invalid_geometry(format!(
                "no ratio for {cw}x{ch} -> {dw}x{dh}"
            ))),
        }
    }
}

/// Configuration intents every block understands
pub trait BlockFacade {
    /// Chain input and output sizes plus the input path selector
    fn set_chain_size(&mut self, src: Size, dst: Size, input: InputPath) -> Result<()>;

    /// Data-test-pattern generator
    fn set_dtp(&mut self, size: Size, enable: bool) -> Result<()>;

    /// Channel enable flag alone
    fn set_dma_enable(&mut self, channel: &DmaChannel, enable: bool) -> Result<()>;

    /// Full read-DMA programming; `offset` is added to every buffer address
    fn set_dma_input(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()>;

    /// Full write-DMA programming; `offset` is added to every buffer address
    fn set_dma_output(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()>;

    /// OTF input port
    fn set_otf_input(&mut self, otf: &OtfParam) -> Result<()>;

    /// OTF output port
    fn set_otf_output(&mut self, otf: &OtfParam) -> Result<()>;

    /// Lens-shading grid; `stripe_start` is the region start in full-frame pixels
    fn set_grid_config(&mut self, grid: &GridConfig, stripe_start: u32) -> Result<()>;

    /// Denoise window size and its stripe start
    fn set_denoise_size(&mut self, size: Size, stripe_start: u32) -> Result<()>;

    /// Scaler `index` of the block
    fn set_scaler_config(&mut self, index: u32, config: &ScalerConfig) -> Result<()>;

    /// Bypass flag of an optional sub-block
    fn set_bypass(&mut self, sub: SubBlock, bypass: bool) -> Result<()>;
}

/// Façade over any register sink
#[derive(Debug)]
pub struct RegisterFacade<'a, S: RegisterSink + ?Sized> {
    sink: &'a mut S,
    block: BlockId,
}

impl<'a, S: RegisterSink + ?Sized> RegisterFacade<'a, S> {
    /// Façade for `block` writing into `sink`
    pub fn new(block: BlockId, sink: &'a mut S) -> Self {
        Self { sink, block }
    }

    /// Target block
    pub const fn block(&self) -> BlockId {
        self.block
    }

    fn w(&mut self, offset: u32, value: u32) -> Result<()> {
        self.sink.write(offset, value)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn program_dma(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()> {
        let desc = channel.desc();
        if !desc.supports(param.format) {
            return Err(PabloError::unsupported_format(format!(
                "{} {} cannot move {:?}",
                self.block, desc.name, param.format
            )));
        }
        if param.sbwc != SbwcType::Disabled && !desc.sbwc {
            return Err(PabloError::unsupported_format(format!(
                "{} {} has no SBWC codec",
                self.block, desc.name
            )));
        }
        if param.width == 0 || param.height == 0 {
            return Err(PabloError::invalid_geometry(format!(
                "{} {}: empty {}x{} transfer",
                self.block, desc.name, param.width, param.height
            )));
        }
        if channel.addrs().is_empty() {
            return Err(PabloError::NoBuffer { channel: desc.name });
        }

        self.w(channel.reg(regs::dma::FORMAT), param.format.hw_code())?;
        self.w(channel.reg(regs::dma::BITWIDTH), param.bit_depth)?;
        self.w(channel.reg(regs::dma::WIDTH), param.width)?;
        self.w(channel.reg(regs::dma::HEIGHT), param.height)?;
        self.w(channel.reg(regs::dma::STRIDE_BYTES), param.effective_stride())?;
        self.w(channel.reg(regs::dma::SBWC), param.sbwc.encode(param.sbwc_extra))?;
        self.w(channel.reg(regs::dma::LLC_HINT), param.llc.0)?;
        for (n, addr) in (0u32..).zip(channel.addrs()) {
            let dva = addr.wrapping_add(offset);
            self.w(channel.reg(regs::dma::addr_lo(n)), dva as u32)?;
            self.w(channel.reg(regs::dma::addr_hi(n)), (dva >> 32) as u32)?;
        }
        self.w(channel.reg(regs::dma::EN), 1)
    }

    fn program_otf(&mut self, otf: &OtfParam, ctrl: u32, size: u32, pos: u32, crop: u32) -> Result<()> {
        if !otf.enable {
            return self.w(ctrl, 0);
        }
        if otf.size.is_empty() {
            return Err(PabloError::invalid_geometry(format!("{}: empty OTF port", self.block)));
        }
        let crop_rect = if otf.crop.is_empty() { Rect::from_size(otf.size) } else { otf.crop };
        if !crop_rect.fits_within(otf.size) {
            return Err(PabloError::invalid_geometry(format!(
                "{}: OTF crop {crop_rect} exceeds {}",
                self.block, otf.size
            )));
        }
        self.w(size, otf.size.packed())?;
        self.w(pos, crop_rect.packed_pos())?;
        self.w(crop, crop_rect.size().packed())?;
        self.w(ctrl, 1 | (otf.format.hw_code() << 4) | (otf.bit_depth << 12))
    }
}

impl<S: RegisterSink + ?Sized> BlockFacade for RegisterFacade<'_, S> {
    fn set_chain_size(&mut self, src: Size, dst: Size, input: InputPath) -> Result<()> {
        if src.is_empty() || dst.is_empty() {
            return Err(PabloError::invalid_geometry(format!(
                "{}: chain {src} -> {dst}",
                self.block
            )));
        }
        self.w(regs::CHAIN_SRC_SIZE, src.packed())?;
        self.w(regs::CHAIN_DST_SIZE, dst.packed())?;
        self.w(regs::CHAIN_INPUT_SELECT, input.hw_code())
    }

    fn set_dtp(&mut self, size: Size, enable: bool) -> Result<()> {
        self.w(regs::DTP_SIZE, size.packed())?;
        self.w(regs::DTP_BYPASS, u32::from(!enable))
    }

    fn set_dma_enable(&mut self, channel: &DmaChannel, enable: bool) -> Result<()> {
        self.w(channel.reg(regs::dma::EN), u32::from(enable))
    }

    fn set_dma_input(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()> {
        if !channel.is_read() {
            return Err(PabloError::invalid_state(format!(
                "{} {} is not a read channel",
                self.block,
                channel.name()
            )));
        }
        self.program_dma(channel, param, offset)
    }

    fn set_dma_output(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()> {
        if channel.is_read() {
            return Err(PabloError::invalid_state(format!(
                "{} {} is not a write channel",
                self.block,
                channel.name()
            )));
        }
        self.program_dma(channel, param, offset)
    }

    fn set_otf_input(&mut self, otf: &OtfParam) -> Result<()> {
        self.program_otf(
            otf,
            regs::OTF_IN_CTRL,
            regs::OTF_IN_SIZE,
            regs::OTF_IN_CROP_POS,
            regs::OTF_IN_CROP_SIZE,
        )
    }

    fn set_otf_output(&mut self, otf: &OtfParam) -> Result<()> {
        self.program_otf(
            otf,
            regs::OTF_OUT_CTRL,
            regs::OTF_OUT_SIZE,
            regs::OTF_OUT_CROP_POS,
            regs::OTF_OUT_CROP_SIZE,
        )
    }

    fn set_grid_config(&mut self, grid: &GridConfig, stripe_start: u32) -> Result<()> {
        if !grid.enable {
            return self.w(regs::GRID_CTRL, 0);
        }
        if grid.bin.is_empty() || grid.cells.is_empty() {
            return Err(PabloError::invalid_geometry(format!(
                "{}: grid bin {} cells {}",
                self.block, grid.bin, grid.cells
            )));
        }
        // Grid origin moves left by the region start so cells stay anchored to the full frame.
        let start_x = grid.start_x.wrapping_sub(stripe_start) & 0xFFFF;
        let step_x = (1u32 << scaler::FIXED_POINT_BITS) / grid.bin.width;
        let step_y = (1u32 << scaler::FIXED_POINT_BITS) / grid.bin.height;
        self.w(regs::GRID_BIN_SIZE, grid.bin.packed())?;
        self.w(regs::GRID_START, pablo_chip::pack_size(start_x, grid.start_y))?;
        self.w(regs::GRID_STEP, pablo_chip::pack_size(step_x, step_y))?;
        self.w(regs::GRID_COUNT, grid.cells.packed())?;
        self.w(regs::GRID_CTRL, 1)
    }

    fn set_denoise_size(&mut self, size: Size, stripe_start: u32) -> Result<()> {
        self.w(regs::DNS_SIZE, size.packed())?;
        self.w(regs::DNS_STRIPE_START, stripe_start)
    }

    fn set_scaler_config(&mut self, index: u32, config: &ScalerConfig) -> Result<()> {
        if index >= self.block.scaler_count() {
            return Err(PabloError::invalid_geometry(format!(
                "{} has no scaler {index}",
                self.block
            )));
        }
        let reg = |r| regs::scaler::reg(index, r);
        if !config.enable {
            return self.w(reg(regs::scaler::CTRL), 0);
        }
        if !config.crop.fits_within(config.src) || config.crop.is_empty() {
            return Err(PabloError::invalid_geometry(format!(
                "{} scaler {index}: crop {} outside input {}",
                self.block, config.crop, config.src
            )));
        }
        let (h, v) = config.ratios()?;
        self.w(reg(regs::scaler::SRC_SIZE), config.src.packed())?;
        self.w(reg(regs::scaler::CROP_POS), config.crop.packed_pos())?;
        self.w(reg(regs::scaler::CROP_SIZE), config.crop.size().packed())?;
        self.w(reg(regs::scaler::DST_SIZE), config.dst.packed())?;
        self.w(reg(regs::scaler::H_RATIO), h)?;
        self.w(reg(regs::scaler::V_RATIO), v)?;
        self.w(reg(regs::scaler::H_PHASE), config.h_phase)?;
        self.w(reg(regs::scaler::CTRL), 1)
    }

    fn set_bypass(&mut self, sub: SubBlock, bypass: bool) -> Result<()> {
        self.w(sub.bypass_reg(), u32::from(bypass))
    }
}

/// Registers included in a full block dump
pub fn dump_offsets(block: BlockId) -> Vec<u32> {
    let mut offsets = vec![
        regs::CORE_ENABLE,
        regs::COREX_ENABLE,
        regs::irq::INT0_STATUS,
        regs::irq::INT1_STATUS,
        regs::cmdq::QUE_FRAME_ID,
        regs::cmdq::QUEUE_STATUS,
        regs::CHAIN_SRC_SIZE,
        regs::CHAIN_DST_SIZE,
        regs::CHAIN_INPUT_SELECT,
        regs::DTP_SIZE,
        regs::OTF_IN_CTRL,
        regs::OTF_IN_SIZE,
        regs::OTF_OUT_CTRL,
        regs::OTF_OUT_SIZE,
        regs::GRID_CTRL,
        regs::DNS_SIZE,
    ];
    for i in 0..block.scaler_count() {
        for r in [
            regs::scaler::CTRL,
            regs::scaler::SRC_SIZE,
            regs::scaler::DST_SIZE,
            regs::scaler::H_RATIO,
            regs::scaler::V_RATIO,
        ] {
            offsets.push(regs::scaler::reg(i, r));
        }
    }
    for desc in block.rdma_channels().iter().chain(block.wdma_channels()) {
        for r in [regs::dma::EN, regs::dma::FORMAT, regs::dma::WIDTH, regs::dma::HEIGHT] {
            offsets.push(desc.reg_base() + r);
        }
    }
    offsets
}

/// Read every register of [`dump_offsets`] from the backend
///
/// # Errors
///
/// Returns the first read error.
pub fn dump_registers(backend: &dyn IspBackend, block: BlockId) -> Result<Vec<(u32, u32)>> {
    dump_offsets(block)
        .into_iter()
        .map(|off| backend.read32(block, off).map(|v| (off, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DmaCommand, DmaParam};
    use pablo_chip::format::PixelFormat;

    fn wdma(block: BlockId, n: usize) -> DmaChannel {
        let mut ch = DmaChannel::create(block, &block.wdma_channels()[n]).unwrap();
        ch.set_address(&[0x1_2000_0000]).unwrap();
        ch
    }

    #[test]
    fn chain_size_is_packed() {
        let mut out = Vec::new();
        RegisterFacade::new(BlockId::Rgbp, &mut out)
            .set_chain_size(Size::new(4000, 3000), Size::new(1920, 1080), InputPath::Otf)
            .unwrap();
        assert_eq!(out[0], (regs::CHAIN_SRC_SIZE, (4000 << 16) | 3000));
        assert_eq!(out[1], (regs::CHAIN_DST_SIZE, (1920 << 16) | 1080));
    }

    #[test]
    fn scaler_ratio_is_fixed_point() {
        let mut out = Vec::new();
        let cfg = ScalerConfig::full(Size::new(3840, 2160), Size::new(1920, 1080));
        RegisterFacade::new(BlockId::Rgbp, &mut out).set_scaler_config(0, &cfg).unwrap();
        let h = out.iter().find(|(o, _)| *o == regs::scaler::reg(0, regs::scaler::H_RATIO));
        assert_eq!(h.map(|p| p.1), Some(2 << 20));
    }

    #[test]
    fn scaler_limits_are_enforced() {
        let mut out = Vec::new();
        let cfg = ScalerConfig::full(Size::new(4000, 3000), Size::new(100, 100));
        let err = RegisterFacade::new(BlockId::Rgbp, &mut out)
            .set_scaler_config(0, &cfg)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(out.is_empty());
        let err = RegisterFacade::new(BlockId::Lme, &mut out)
            .set_scaler_config(0, &ScalerConfig::disabled())
            .unwrap_err();
        assert!(matches!(err, PabloError::InvalidGeometry { .. }));
    }

    #[test]
    fn unsupported_format_writes_nothing() {
        let mut out = Vec::new();
        let ch = wdma(BlockId::Rgbp, 0);
        let param = DmaParam::enabled(PixelFormat::Bayer16, Size::new(64, 64));
        let err = RegisterFacade::new(BlockId::Rgbp, &mut out)
            .set_dma_output(&ch, &param, 0)
            .unwrap_err();
        assert!(matches!(err, PabloError::UnsupportedFormat { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn dma_output_carries_sbwc_and_offset() {
        let mut out = Vec::new();
        let ch = wdma(BlockId::Rgbp, 0);
        let mut param = DmaParam::enabled(PixelFormat::Yuv420Sp8, Size::new(1920, 1080));
        param.sbwc = if ch.desc().sbwc { SbwcType::Lossy64 } else { SbwcType::Disabled };
        param.sbwc_extra = 2;
        param.cmd = DmaCommand::Enable;
        RegisterFacade::new(BlockId::Rgbp, &mut out)
            .set_dma_output(&ch, &param, 0x100)
            .unwrap();
        let lo = out.iter().find(|(o, _)| *o == ch.reg(regs::dma::addr_lo(0))).unwrap();
        let hi = out.iter().find(|(o, _)| *o == ch.reg(regs::dma::addr_hi(0))).unwrap();
        assert_eq!(lo.1, 0x2000_0100);
        assert_eq!(hi.1, 1);
        let sbwc = out.iter().find(|(o, _)| *o == ch.reg(regs::dma::SBWC)).unwrap();
        assert_eq!(sbwc.1, param.sbwc.encode(2));
        assert_eq!(out.last(), Some(&(ch.reg(regs::dma::EN), 1)));
    }

    #[test]
    fn otf_crop_must_fit() {
        let mut out = Vec::new();
        let otf = OtfParam {
            enable: true,
            size: Size::new(1920, 1080),
            crop: Rect::new(8, 0, 1920, 1080),
            ..OtfParam::default()
        };
        let err = RegisterFacade::new(BlockId::Mcsc, &mut out).set_otf_input(&otf).unwrap_err();
        assert!(matches!(err, PabloError::InvalidGeometry { .. }));
    }

    #[test]
    fn direct_sink_reaches_backend() {
        let sim = crate::backends::SoftwareBackend::new("sim0");
        let mut direct = DirectRegisters::new(&sim, BlockId::Taa0);
        RegisterFacade::new(BlockId::Taa0, &mut direct)
            .set_bypass(SubBlock::Gamma, true)
            .unwrap();
        assert_eq!(sim.register(BlockId::Taa0, SubBlock::Gamma.bypass_reg()), 1);
        assert!(dump_registers(&sim, BlockId::Taa0).unwrap().len() > 16);
    }
}

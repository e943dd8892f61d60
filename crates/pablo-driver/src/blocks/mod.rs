//! Per-block programming hooks
//!
//! The shot pipeline is the same for every block; what differs is how a
//! block derives its chain, scaler and bypass registers from the frame
//! parameters. Each block type implements [`BlockOps`] and is driven by
//! [`crate::HwBlock`].

mod lme;
mod mtnr;
mod paf;
mod rgbp;
mod taa;

pub use lme::{mv_size, sad_size, Lme};
pub use mtnr::Mtnr;
pub use paf::Paf;
pub use rgbp::Rgbp;
pub use taa::Taa;

use crate::config::IspConfig;
use crate::error::{PabloError, Result};
use crate::facade::{BlockFacade, RegisterSink};
use crate::params::{FrameParameterSet, InputPath, Size};
use crate::sequencer::RtaDecision;
use crate::stripe::StripeRegion;
use pablo_chip::block::{BlockId, DmaChannelDesc};
use pablo_chip::regs;

/// Inputs of SIZE_PROGRAM
#[derive(Debug, Clone, Copy)]
pub struct SizeContext<'a> {
    /// Merged parameters of this frame
    pub params: &'a FrameParameterSet,
    /// Stripe region being processed, if the frame is tiled
    pub region: Option<&'a StripeRegion>,
    /// Process configuration
    pub config: &'a IspConfig,
}

impl SizeContext<'_> {
    /// Whether this shot processes one region of a tiled frame
    pub const fn is_tiled(&self) -> bool {
        self.region.is_some()
    }

    /// Size of the image arriving at the block
    pub fn source_size(&self) -> Size {
        match self.params.input_path {
            InputPath::Otf | InputPath::Votf => self.params.otf_input.size,
            InputPath::Rdma => self
                .params
                .rdma
                .first()
                .map(crate::dma::DmaParam::size)
                .unwrap_or_default(),
        }
    }

    /// Reject an empty input crop or one outside the source image
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::InvalidGeometry`].
    pub fn check_input_crop(&self) -> Result<()> {
        let crop = &self.params.input_crop;
        let source = self.source_size();
        if crop.is_empty() || !crop.fits_within(source) {
            return Err(PabloError::invalid_geometry(format!(
                "{}: input crop {crop} outside source {source}",
                self.params.block
            )));
        }
        Ok(())
    }

    /// Input of the processing chain, narrowed to the region when tiled
    pub fn chain_input(&self) -> Size {
        let crop = self.params.input_crop;
        match self.region {
            Some(r) => Size::new(r.input_width(), crop.height),
            None => crop.size(),
        }
    }

    /// Full-frame output size; an unset output crop means no scaling
    pub fn output_size(&self) -> Size {
        let out = self.params.output_crop;
        if out.is_empty() {
            self.params.input_crop.size()
        } else {
            out.size()
        }
    }

    /// Left edge of the region's input inside the cropped frame
    pub fn stripe_start(&self) -> u32 {
        self.region.map_or(0, |r| r.core_offset - r.left_margin)
    }
}

/// Block-specific hooks of the shot pipeline
pub trait BlockOps: Send + Sync + std::fmt::Debug {
    /// Hardware block driven
    fn id(&self) -> BlockId;

    /// Read channels, in table order
    fn rdma_channels(&self) -> &'static [DmaChannelDesc] {
        self.id().rdma_channels()
    }

    /// Write channels, in table order
    fn wdma_channels(&self) -> &'static [DmaChannelDesc] {
        self.id().wdma_channels()
    }

    /// Adjust the merged parameters before DMA programming
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the parameters cannot be used.
    fn tag(&self, _params: &mut FrameParameterSet) -> Result<()> {
        Ok(())
    }

    /// Chain, DTP, grid/denoise, scaler and bypass registers, in that order
    ///
    /// # Errors
    ///
    /// Returns a configuration error on invalid geometry.
    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()>;

    /// Re-derive registers from a late real-time-algorithm decision
    ///
    /// # Errors
    ///
    /// Returns a configuration error on invalid geometry.
    fn update_block_registers(
        &self,
        _ctx: &SizeContext<'_>,
        decision: &RtaDecision,
        facade: &mut dyn BlockFacade,
    ) -> Result<()> {
        for &(sub, bypass) in &decision.bypass {
            facade.set_bypass(sub, bypass)?;
        }
        Ok(())
    }

    /// Static register state applied on `enable`
    ///
    /// # Errors
    ///
    /// Returns error if a register write fails.
    fn prepare(&self, sink: &mut dyn RegisterSink) -> Result<()> {
        prepare_common(sink)
    }
}

/// Interrupt, command-queue and CoreX enables shared by every block
///
/// # Errors
///
/// Returns error if a register write fails.
pub fn prepare_common(sink: &mut dyn RegisterSink) -> Result<()> {
    sink.write(regs::irq::INT0_ENABLE, regs::irq::INT0_MASK)?;
    sink.write(regs::irq::INT1_ENABLE, regs::irq::INT1_MASK)?;
    sink.write(regs::cmdq::ENABLE, 1)?;
    sink.write(regs::COREX_ENABLE, 1)?;
    sink.write(regs::CORE_ENABLE, 1)
}

/// OTF ports and chain size
pub(crate) fn program_chain(ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade, dst: Size) -> Result<()> {
    let params = ctx.params;
    if params.input_path != InputPath::Rdma && params.otf_input.enable {
        facade.set_otf_input(&params.otf_input)?;
    }
    facade.set_chain_size(ctx.chain_input(), dst, params.input_path)?;
    if params.otf_output.enable {
        facade.set_otf_output(&params.otf_output)?;
    }
    Ok(())
}

/// Data test pattern over the chain input
pub(crate) fn program_dtp(ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
    facade.set_dtp(ctx.chain_input(), ctx.config.dtp)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::dma::DmaChannel;
    use crate::error::Result;
    use crate::facade::{BlockFacade, ScalerConfig};
    use crate::params::{GridConfig, InputPath, OtfParam, Rect, Size};
    use crate::dma::DmaParam;
    use pablo_chip::regs::SubBlock;

    /// Facade call, as recorded by [`CallLog`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Chain(Size, Size),
        Dtp(Size, bool),
        DmaEnable(&'static str, bool),
        DmaIn(&'static str, u64),
        DmaOut(&'static str, Size, u64),
        OtfIn,
        OtfOut,
        Grid(u32),
        Denoise(Size, u32),
        Scaler(u32, ScalerConfig),
        Bypass(SubBlock, bool),
    }

    /// Facade that records calls instead of writing registers
    #[derive(Debug, Default)]
    pub struct CallLog(pub Vec<Call>);

    impl CallLog {
        pub fn scalers(&self) -> Vec<(u32, ScalerConfig)> {
            self.0
                .iter()
                .filter_map(|c| match c {
                    Call::Scaler(i, s) => Some((*i, *s)),
                    _ => None,
                })
                .collect()
        }

        pub fn bypasses(&self) -> Vec<(SubBlock, bool)> {
            self.0
                .iter()
                .filter_map(|c| match c {
                    Call::Bypass(s, b) => Some((*s, *b)),
                    _ => None,
                })
                .collect()
        }
    }

    impl BlockFacade for CallLog {
        fn set_chain_size(&mut self, src: Size, dst: Size, _input: InputPath) -> Result<()> {
            self.0.push(Call::Chain(src, dst));
            Ok(())
        }
        fn set_dtp(&mut self, size: Size, enable: bool) -> Result<()> {
            self.0.push(Call::Dtp(size, enable));
            Ok(())
        }
        fn set_dma_enable(&mut self, channel: &DmaChannel, enable: bool) -> Result<()> {
            self.0.push(Call::DmaEnable(channel.name(), enable));
            Ok(())
        }
        fn set_dma_input(&mut self, channel: &DmaChannel, _param: &DmaParam, offset: u64) -> Result<()> {
            self.0.push(Call::DmaIn(channel.name(), offset));
            Ok(())
        }
        fn set_dma_output(&mut self, channel: &DmaChannel, param: &DmaParam, offset: u64) -> Result<()> {
            self.0.push(Call::DmaOut(channel.name(), param.size(), offset));
            Ok(())
        }
        fn set_otf_input(&mut self, _otf: &OtfParam) -> Result<()> {
            self.0.push(Call::OtfIn);
            Ok(())
        }
        fn set_otf_output(&mut self, _otf: &OtfParam) -> Result<()> {
            self.0.push(Call::OtfOut);
            Ok(())
        }
        fn set_grid_config(&mut self, _grid: &GridConfig, stripe_start: u32) -> Result<()> {
            self.0.push(Call::Grid(stripe_start));
            Ok(())
        }
        fn set_denoise_size(&mut self, size: Size, stripe_start: u32) -> Result<()> {
            self.0.push(Call::Denoise(size, stripe_start));
            Ok(())
        }
        fn set_scaler_config(&mut self, index: u32, config: &ScalerConfig) -> Result<()> {
            self.0.push(Call::Scaler(index, *config));
            Ok(())
        }
        fn set_bypass(&mut self, sub: SubBlock, bypass: bool) -> Result<()> {
            self.0.push(Call::Bypass(sub, bypass));
            Ok(())
        }
    }

    /// OTF-fed parameters with a `w`x`h` input crop
    pub fn otf_params(block: pablo_chip::block::BlockId, w: u32, h: u32) -> crate::params::FrameParameterSet {
        let mut p = crate::params::FrameParameterSet::new(block);
        p.otf_input.enable = true;
        p.otf_input.size = Size::new(w, h);
        p.otf_input.crop = Rect::new(0, 0, w, h);
        p.input_crop = Rect::new(0, 0, w, h);
        p.output_crop = Rect::new(0, 0, w, h);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::testing::otf_params;
    use super::*;
    use crate::params::Rect;
    use crate::stripe::StripeTiler;

    #[test]
    fn crop_outside_source_is_rejected() {
        let mut p = otf_params(BlockId::Rgbp, 1920, 1080);
        p.input_crop = Rect::new(100, 0, 1920, 1080);
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        assert!(matches!(ctx.check_input_crop(), Err(PabloError::InvalidGeometry { .. })));
    }

    #[test]
    fn tiled_chain_input_covers_region() {
        let p = otf_params(BlockId::Rgbp, 4096, 2160);
        let config = IspConfig::default();
        let plan = StripeTiler::new(config.stripe).plan(4096, 2, 0).unwrap();
        let ctx = SizeContext { params: &p, region: Some(&plan[1]), config: &config };
        assert_eq!(ctx.chain_input(), Size::new(plan[1].input_width(), 2160));
        assert_eq!(ctx.stripe_start(), plan[1].core_offset - 768);
        assert_eq!(ctx.output_size(), Size::new(4096, 2160));
    }
}

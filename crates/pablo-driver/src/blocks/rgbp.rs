//! RGBP: demosaic and colour pipeline with a YUV scaler and an HF up-scaler

use super::{program_chain, program_dtp, BlockOps, SizeContext};
use crate::error::Result;
use crate::facade::{BlockFacade, ScalerConfig};
use crate::params::{Rect, Size};
use crate::sequencer::RtaDecision;
use crate::stripe::StripeTiler;
use pablo_chip::block::BlockId;
use pablo_chip::format::SbwcType;
use pablo_chip::regs::SubBlock;

/// YUV output scaler
pub const YUV_SCALER: u32 = 0;
/// High-frequency secondary output up-scaler
pub const HF_SCALER: u32 = 1;

const WDMA_HF: usize = 1;

/// RGBP block hooks
#[derive(Debug, Clone, Copy, Default)]
pub struct Rgbp;

impl Rgbp {
    /// YUV scaler from the chain input to `dst` (full-frame size)
    fn yuv_scaler(ctx: &SizeContext<'_>, dst: Size) -> ScalerConfig {
        let src = ctx.chain_input();
        match ctx.region {
            Some(r) => {
                let span = StripeTiler::scaled_span(r, dst.width);
                ScalerConfig {
                    enable: true,
                    src,
                    crop: Rect::new(r.left_margin, 0, r.core_width, src.height),
                    dst: Size::new(span.out_width, dst.height),
                    h_phase: span.h_phase,
                }
            }
            None => ScalerConfig::full(src, dst),
        }
    }

    /// HF up-scaler from the YUV output to the HF write channel size
    fn hf_scaler(ctx: &SizeContext<'_>, yuv: &ScalerConfig) -> ScalerConfig {
        let Some(hf) = ctx.params.wdma.get(WDMA_HF).filter(|p| p.is_enabled()) else {
            return ScalerConfig::disabled();
        };
        match ctx.region {
            Some(r) => {
                let span = StripeTiler::scaled_span(r, hf.width);
                ScalerConfig {
                    h_phase: span.h_phase,
                    ..ScalerConfig::full(yuv.dst, Size::new(span.out_width, hf.height))
                }
            }
            None => ScalerConfig::full(yuv.dst, hf.size()),
        }
    }

    fn program_scalers(ctx: &SizeContext<'_>, dst: Size, facade: &mut dyn BlockFacade) -> Result<()> {
        let yuv = Self::yuv_scaler(ctx, dst);
        facade.set_scaler_config(YUV_SCALER, &yuv)?;
        facade.set_scaler_config(HF_SCALER, &Self::hf_scaler(ctx, &yuv))
    }
}

impl BlockOps for Rgbp {
    fn id(&self) -> BlockId {
        BlockId::Rgbp
    }

    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
        ctx.check_input_crop()?;
        let params = ctx.params;
        let input = ctx.chain_input();

        program_chain(ctx, facade, input)?;
        program_dtp(ctx, facade)?;
        facade.set_grid_config(&params.grid, ctx.stripe_start())?;
        facade.set_denoise_size(input, ctx.stripe_start())?;
        Self::program_scalers(ctx, ctx.output_size(), facade)?;

        if ctx.config.features.decompression {
            let compressed = params
                .rdma
                .first()
                .is_some_and(|p| p.is_enabled() && p.sbwc != SbwcType::Disabled);
            facade.set_bypass(SubBlock::Decompression, !compressed)?;
        }
        if ctx.config.features.gamma {
            facade.set_bypass(SubBlock::Gamma, params.control.gamma_bypass)?;
        }
        facade.set_bypass(SubBlock::Ccm, params.control.ccm_bypass)?;
        facade.set_bypass(SubBlock::Sharpen, params.control.sharpen_bypass)
    }

    fn update_block_registers(
        &self,
        ctx: &SizeContext<'_>,
        decision: &RtaDecision,
        facade: &mut dyn BlockFacade,
    ) -> Result<()> {
        if let Some(dst) = decision.output {
            Self::program_scalers(ctx, dst, facade)?;
        }
        for &(sub, bypass) in &decision.bypass {
            facade.set_bypass(sub, bypass)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{otf_params, Call, CallLog};
    use super::*;
    use crate::config::IspConfig;
    use crate::dma::DmaParam;
    use pablo_chip::format::PixelFormat;

    #[test]
    fn size_program_order() {
        let mut p = otf_params(BlockId::Rgbp, 1920, 1080);
        p.output_crop = Rect::new(0, 0, 1280, 720);
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        Rgbp.program_size(&ctx, &mut log).unwrap();

        let full = Size::new(1920, 1080);
        assert_eq!(log.0[0], Call::OtfIn);
        assert_eq!(log.0[1], Call::Chain(full, full));
        assert_eq!(log.0[2], Call::Dtp(full, false));
        assert_eq!(log.0[3], Call::Grid(0));
        assert_eq!(log.0[4], Call::Denoise(full, 0));
        let scalers = log.scalers();
        assert_eq!(scalers[0], (YUV_SCALER, ScalerConfig::full(full, Size::new(1280, 720))));
        assert_eq!(scalers[1], (HF_SCALER, ScalerConfig::disabled()));
        assert_eq!(log.bypasses()[0], (SubBlock::Decompression, true));
        assert_eq!(log.bypasses()[1], (SubBlock::Gamma, false));
    }

    #[test]
    fn feature_flags_gate_bypass_writes() {
        let p = otf_params(BlockId::Rgbp, 1920, 1080);
        let mut config = IspConfig::default();
        config.features.decompression = false;
        config.features.gamma = false;
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        Rgbp.program_size(&ctx, &mut log).unwrap();
        assert!(log
            .bypasses()
            .iter()
            .all(|(s, _)| !matches!(s, SubBlock::Decompression | SubBlock::Gamma)));
    }

    #[test]
    fn hf_scaler_follows_hf_channel() {
        let mut p = otf_params(BlockId::Rgbp, 1920, 1080);
        p.output_crop = Rect::new(0, 0, 960, 540);
        p.wdma[WDMA_HF] = DmaParam::enabled(PixelFormat::Y8, Size::new(1920, 1080));
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        Rgbp.program_size(&ctx, &mut log).unwrap();
        let hf = log.scalers()[1].1;
        assert!(hf.enable);
        assert_eq!(hf.src, Size::new(960, 540));
        assert_eq!(hf.dst, Size::new(1920, 1080));
    }

    #[test]
    fn tiled_scaler_crops_margins() {
        let p = otf_params(BlockId::Rgbp, 4096, 2160);
        let config = IspConfig::default();
        let plan = StripeTiler::new(config.stripe).plan(4096, 2, 0).unwrap();
        let ctx = SizeContext { params: &p, region: Some(&plan[1]), config: &config };
        let mut log = CallLog::default();
        Rgbp.program_size(&ctx, &mut log).unwrap();
        let yuv = log.scalers()[0].1;
        assert_eq!(yuv.crop.x, 768);
        assert_eq!(yuv.crop.width, plan[1].core_width);
        assert_eq!(yuv.dst.width, plan[1].core_width);
    }

    #[test]
    fn rta_decision_rescales_and_bypasses() {
        let p = otf_params(BlockId::Rgbp, 1920, 1080);
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let decision = RtaDecision {
            bypass: vec![(SubBlock::Sharpen, true)],
            output: Some(Size::new(640, 360)),
        };
        let mut log = CallLog::default();
        Rgbp.update_block_registers(&ctx, &decision, &mut log).unwrap();
        assert_eq!(log.scalers()[0].1.dst, Size::new(640, 360));
        assert_eq!(log.bypasses(), vec![(SubBlock::Sharpen, true)]);
    }
}

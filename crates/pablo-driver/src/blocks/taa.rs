//! 3AA: bayer crop, statistics grid and the face-detection pyramid scaler

use super::{program_chain, program_dtp, BlockOps, SizeContext};
use crate::error::Result;
use crate::facade::{BlockFacade, ScalerConfig};
use crate::params::validate_crop_chain;
use pablo_chip::block::BlockId;
use pablo_chip::regs::SubBlock;

/// Face-detection pyramid scaler
pub const FDPIG_SCALER: u32 = 0;

const WDMA_FDPIG: usize = 2;

/// 3AA block hooks, one per instance
#[derive(Debug, Clone, Copy)]
pub struct Taa {
    id: BlockId,
}

impl Taa {
    /// Hooks for 3AA instance `instance` (0 or 1)
    pub const fn new(instance: u32) -> Self {
        Self {
            id: if instance == 0 { BlockId::Taa0 } else { BlockId::Taa1 },
        }
    }
}

impl Default for Taa {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BlockOps for Taa {
    fn id(&self) -> BlockId {
        self.id
    }

    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
        ctx.check_input_crop()?;
        let params = ctx.params;
        validate_crop_chain(&params.input_crop, &params.output_crop)?;

        let dst = if ctx.is_tiled() { ctx.chain_input() } else { ctx.output_size() };
        program_chain(ctx, facade, dst)?;
        program_dtp(ctx, facade)?;
        facade.set_grid_config(&params.grid, ctx.stripe_start())?;

        let fdpig = match params.wdma.get(WDMA_FDPIG).filter(|p| p.is_enabled()) {
            Some(out) => ScalerConfig::full(dst, out.size()),
            None => ScalerConfig::disabled(),
        };
        facade.set_scaler_config(FDPIG_SCALER, &fdpig)?;
        facade.set_bypass(SubBlock::Lsc, !params.grid.enable)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{otf_params, Call, CallLog};
    use super::*;
    use crate::config::IspConfig;
    use crate::dma::DmaParam;
    use crate::error::PabloError;
    use crate::params::{Rect, Size};
    use pablo_chip::format::PixelFormat;

    #[test]
    fn bayer_crop_cannot_grow() {
        let mut p = otf_params(BlockId::Taa0, 1920, 1080);
        p.input_crop = Rect::new(0, 0, 1280, 720);
        p.output_crop = Rect::new(0, 0, 1920, 1080);
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        let err = Taa::new(0).program_size(&ctx, &mut log).unwrap_err();
        assert!(matches!(err, PabloError::GeometryMismatch { .. }));
        assert!(log.0.is_empty());
    }

    #[test]
    fn fdpig_scales_bayer_crop() {
        let mut p = otf_params(BlockId::Taa1, 4032, 3024);
        p.output_crop = Rect::new(0, 0, 4000, 3000);
        p.wdma[WDMA_FDPIG] = DmaParam::enabled(PixelFormat::Yuv420Sp8, Size::new(640, 480));
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        Taa::new(1).program_size(&ctx, &mut log).unwrap();
        assert_eq!(log.0[1], Call::Chain(Size::new(4032, 3024), Size::new(4000, 3000)));
        let (idx, s) = log.scalers()[0];
        assert_eq!(idx, FDPIG_SCALER);
        assert_eq!(s.src, Size::new(4000, 3000));
        assert_eq!(s.dst, Size::new(640, 480));
        assert_eq!(log.bypasses(), vec![(SubBlock::Lsc, true)]);
    }
}

//! LME: local motion estimation
//!
//! Motion vectors are produced per 16x4 block, four bytes each; the SAD
//! map has two entries per vector.

use super::{program_chain, program_dtp, BlockOps, SizeContext};
use crate::error::Result;
use crate::facade::BlockFacade;
use crate::params::{FrameParameterSet, Size};
use pablo_chip::block::BlockId;

const WDMA_MV: usize = 0;
const WDMA_SAD: usize = 1;

/// Motion-vector map size for an input of `input`
pub const fn mv_size(input: Size) -> Size {
    Size::new(input.width.div_ceil(16) * 4, input.height.div_ceil(4))
}

/// SAD map size for an input of `input`
pub const fn sad_size(input: Size) -> Size {
    let mv = mv_size(input);
    Size::new(mv.width * 2, mv.height)
}

/// LME block hooks
#[derive(Debug, Clone, Copy, Default)]
pub struct Lme;

impl BlockOps for Lme {
    fn id(&self) -> BlockId {
        BlockId::Lme
    }

    fn tag(&self, params: &mut FrameParameterSet) -> Result<()> {
        let input = params.input_crop.size();
        for (index, size) in [(WDMA_MV, mv_size(input)), (WDMA_SAD, sad_size(input))] {
            if let Some(p) = params.wdma.get_mut(index).filter(|p| p.is_enabled()) {
                p.width = size.width;
                p.height = size.height;
                p.stride = 0;
            }
        }
        Ok(())
    }

    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
        ctx.check_input_crop()?;
        program_chain(ctx, facade, mv_size(ctx.chain_input()))?;
        program_dtp(ctx, facade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::DmaParam;
    use crate::params::Rect;
    use pablo_chip::format::PixelFormat;

    #[test]
    fn vector_map_rounds_up() {
        assert_eq!(mv_size(Size::new(1920, 1080)), Size::new(480, 270));
        assert_eq!(mv_size(Size::new(1921, 1081)), Size::new(484, 271));
        assert_eq!(sad_size(Size::new(1920, 1080)), Size::new(960, 270));
    }

    #[test]
    fn tag_overrides_enabled_outputs_only() {
        let mut p = FrameParameterSet::new(BlockId::Lme);
        p.input_crop = Rect::new(0, 0, 1280, 720);
        p.wdma[WDMA_MV] = DmaParam::enabled(PixelFormat::Meta, Size::new(1, 1));
        Lme.tag(&mut p).unwrap();
        assert_eq!(p.wdma[WDMA_MV].size(), Size::new(320, 180));
        assert_eq!(p.wdma[WDMA_SAD].size(), Size::new(0, 0));
    }
}

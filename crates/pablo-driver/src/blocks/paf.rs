//! PAF: phase-detection autofocus front end

use super::{program_chain, program_dtp, BlockOps, SizeContext};
use crate::error::Result;
use crate::facade::BlockFacade;
use pablo_chip::block::BlockId;

/// PAF block hooks, one per instance
#[derive(Debug, Clone, Copy)]
pub struct Paf {
    id: BlockId,
}

impl Paf {
    /// Hooks for PAF instance `instance` (0 or 1)
    pub const fn new(instance: u32) -> Self {
        Self {
            id: if instance == 0 { BlockId::Paf0 } else { BlockId::Paf1 },
        }
    }
}

impl Default for Paf {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BlockOps for Paf {
    fn id(&self) -> BlockId {
        self.id
    }

    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
        ctx.check_input_crop()?;
        let input = ctx.chain_input();
        program_chain(ctx, facade, input)?;
        program_dtp(ctx, facade)?;
        // AF windows
        facade.set_grid_config(&ctx.params.grid, ctx.stripe_start())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{otf_params, Call, CallLog};
    use super::*;
    use crate::config::IspConfig;
    use crate::dma::DmaParam;
    use crate::params::{InputPath, Size};
    use pablo_chip::format::PixelFormat;

    #[test]
    fn reads_from_memory() {
        let mut p = otf_params(BlockId::Paf1, 2016, 1512);
        p.input_path = InputPath::Rdma;
        p.rdma[0] = DmaParam::enabled(PixelFormat::BayerPacked10, Size::new(2016, 1512));
        let config = IspConfig::default();
        let ctx = SizeContext { params: &p, region: None, config: &config };
        let mut log = CallLog::default();
        Paf::new(1).program_size(&ctx, &mut log).unwrap();
        let size = Size::new(2016, 1512);
        assert_eq!(log.0, vec![Call::Chain(size, size), Call::Dtp(size, false), Call::Grid(0)]);
    }
}

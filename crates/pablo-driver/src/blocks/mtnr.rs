//! MTNR: multi-frame temporal noise reduction
//!
//! The previous-frame channels only carry data in [`TnrMode::Normal`].
//! The first frame of a sequence has nothing to read back, and bypass
//! writes nothing for the next frame either.

use super::{program_chain, program_dtp, BlockOps, SizeContext};
use crate::dma::DmaCommand;
use crate::error::Result;
use crate::facade::BlockFacade;
use crate::params::{FrameParameterSet, TnrMode};
use pablo_chip::block::BlockId;
use pablo_chip::regs::SubBlock;
use tracing::trace;

const RDMA_PREV: [usize; 2] = [1, 2];
const WDMA_PREV: [usize; 2] = [0, 1];

/// MTNR block hooks
#[derive(Debug, Clone, Copy, Default)]
pub struct Mtnr;

fn disable(params: &mut [crate::dma::DmaParam], indices: &[usize]) {
    for &i in indices {
        if let Some(p) = params.get_mut(i) {
            p.cmd = DmaCommand::Disable;
        }
    }
}

impl BlockOps for Mtnr {
    fn id(&self) -> BlockId {
        BlockId::Mtnr
    }

    fn tag(&self, params: &mut FrameParameterSet) -> Result<()> {
        match params.tnr_mode {
            TnrMode::Normal => {}
            TnrMode::First => disable(&mut params.rdma, &RDMA_PREV),
            TnrMode::Bypass => {
                disable(&mut params.rdma, &RDMA_PREV);
                disable(&mut params.wdma, &WDMA_PREV);
            }
        }
        trace!("MTNR {:?}: previous-frame channels gated", params.tnr_mode);
        Ok(())
    }

    fn program_size(&self, ctx: &SizeContext<'_>, facade: &mut dyn BlockFacade) -> Result<()> {
        ctx.check_input_crop()?;
        let input = ctx.chain_input();
        program_chain(ctx, facade, input)?;
        program_dtp(ctx, facade)?;
        facade.set_denoise_size(input, ctx.stripe_start())?;
        facade.set_bypass(SubBlock::Denoise, ctx.params.tnr_mode == TnrMode::Bypass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::DmaParam;
    use crate::params::{Param, Size, StreamParams};
    use pablo_chip::format::PixelFormat;

    fn all_enabled() -> FrameParameterSet {
        let mut p = FrameParameterSet::new(BlockId::Mtnr);
        let size = Size::new(1920, 1080);
        for ch in p.rdma.iter_mut().chain(p.wdma.iter_mut()) {
            *ch = DmaParam::enabled(PixelFormat::Yuv420Sp8, size);
        }
        p
    }

    #[test]
    fn normal_keeps_previous_frame() {
        let mut p = all_enabled();
        Mtnr.tag(&mut p).unwrap();
        assert!(p.rdma.iter().chain(&p.wdma).all(DmaParam::is_enabled));
    }

    #[test]
    fn first_frame_reads_nothing_back() {
        let mut p = all_enabled();
        p.tnr_mode = TnrMode::First;
        Mtnr.tag(&mut p).unwrap();
        assert!(p.rdma[0].is_enabled());
        assert!(!p.rdma[1].is_enabled());
        assert!(!p.rdma[2].is_enabled());
        assert!(p.wdma.iter().all(DmaParam::is_enabled));
    }

    #[test]
    fn bypass_writes_nothing_forward() {
        let mut p = all_enabled();
        p.tnr_mode = TnrMode::Bypass;
        Mtnr.tag(&mut p).unwrap();
        assert!(p.rdma[0].is_enabled());
        assert!(!p.wdma.iter().any(DmaParam::is_enabled));
    }

    #[test]
    fn reads_resume_after_first_frame() {
        let mut stream = StreamParams::new(BlockId::Mtnr);
        let enabled = all_enabled();
        for (i, ch) in enabled.rdma.iter().enumerate() {
            stream.set_param(&[Param::Rdma(i as u8, ch.clone())]).unwrap();
        }
        stream.set_param(&[Param::Tnr(TnrMode::First)]).unwrap();

        let mut frame = FrameParameterSet::new(BlockId::Mtnr);
        frame.update_from_control_plane(stream.persistent(), stream.pending());
        Mtnr.tag(&mut frame).unwrap();
        assert!(!frame.rdma[1].is_enabled());

        stream.clear_pending();
        stream.set_param(&[Param::Tnr(TnrMode::Normal)]).unwrap();
        frame.update_from_control_plane(stream.persistent(), stream.pending());
        Mtnr.tag(&mut frame).unwrap();
        assert!(frame.rdma.iter().all(DmaParam::is_enabled));
    }
}

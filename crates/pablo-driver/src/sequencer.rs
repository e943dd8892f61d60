//! Shot pipeline
//!
//! One [`CommandSequencer::shot`] turns a frame descriptor into one
//! command-queue submission:
//!
//! ```text
//! IDLE -> PARAM_UPDATE -> DMA_PROGRAM -> SIZE_PROGRAM -> [RTA_OVERRIDE]
//!      -> CMDQ_COMMIT -> ARMED -> (interrupt) -> DONE
//! ```
//!
//! Every register write of DMA_PROGRAM..RTA_OVERRIDE goes into the command
//! loader, so nothing reaches the hardware before CMDQ_COMMIT. A failure
//! in any stage rolls the loader back to the last committed payload and
//! reports the frame as not done. PARAM_UPDATE rebuilds the parameter set
//! from the stream values on every shot, so per-frame overrides and node
//! requests apply to their own frame only.
//!
//! Shots beyond the first of a repeat group skip programming and
//! re-submit the committed payload.
//!
//! The caller serializes shots per block; the sequencer holds no lock.

use crate::backend::IspBackend;
use crate::blocks::{BlockOps, SizeContext};
use crate::cmdq::CommandLoader;
use crate::config::IspConfig;
use crate::dma::{ChannelSet, DmaCommand, DmaParam};
use crate::error::{PabloError, Result, ShotStage};
use crate::facade::{BlockFacade, RegisterFacade};
use crate::frame::{ErrorType, Frame, FrameNotifier, NodeRequest};
use crate::params::{FrameParameterSet, Size, StreamParams};
use crate::repeat::RepeatTracker;
use crate::stripe::{StripeRegion, StripeSequence, StripeTiler};
use pablo_chip::block::{BlockId, DmaDirection};
use pablo_chip::cmdq::pack_num_buffers;
use pablo_chip::regs::SubBlock;
use tracing::{debug, trace, warn};

/// Position of a shot in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShotState {
    /// Not started
    Idle,
    /// Merging parameters, computing skip
    ParamUpdate,
    /// Programming DMA channels
    DmaProgram,
    /// Programming chain, DTP, grid, scaler and bypass
    SizeProgram,
    /// Applying a late real-time-algorithm decision
    RtaOverride,
    /// Submitting to the command queue
    CmdqCommit,
    /// Waiting for FRAME_START / FRAME_END
    Armed,
    /// Finished
    Done,
}

impl ShotState {
    /// Error tag of a programming state
    pub const fn stage(self) -> Option<ShotStage> {
        match self {
            Self::ParamUpdate => Some(ShotStage::ParamUpdate),
            Self::DmaProgram => Some(ShotStage::DmaProgram),
            Self::SizeProgram => Some(ShotStage::SizeProgram),
            Self::RtaOverride => Some(ShotStage::RtaOverride),
            Self::CmdqCommit => Some(ShotStage::CmdqCommit),
            Self::Idle | Self::Armed | Self::Done => None,
        }
    }
}

/// Late decision of the real-time-algorithm library
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtaDecision {
    /// Sub-block bypass flags to apply
    pub bypass: Vec<(SubBlock, bool)>,
    /// Replacement full-frame output size
    pub output: Option<Size>,
}

/// Real-time-algorithm hook consulted after SIZE_PROGRAM
pub trait RtaOverride: Send + Sync + std::fmt::Debug {
    /// Decision for this frame, or `None` to keep the static programming
    fn decide(&self, block: BlockId, params: &FrameParameterSet) -> Option<RtaDecision>;
}

/// Result of a successful shot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotOutcome {
    /// Frame count
    pub fcount: u32,
    /// Programming skipped, committed payload re-submitted
    pub skipped: bool,
    /// Register pairs submitted
    pub pair_count: u32,
    /// Packed multi-buffer field submitted
    pub num_buffers: u32,
    /// States passed through, `Idle` to `Armed`
    pub states: Vec<ShotState>,
}

/// Stripe region of the current shot and the plan it belongs to
#[derive(Debug, Clone, Copy)]
pub struct StripeShot<'a> {
    /// Every region of the frame
    pub plan: &'a [StripeRegion],
    /// Region of this shot
    pub region: &'a StripeRegion,
}

/// Borrowed per-block state driven through one shot
#[derive(Debug)]
pub struct CommandSequencer<'a> {
    /// Block hooks
    pub ops: &'a dyn BlockOps,
    /// Register and command-queue access
    pub backend: &'a dyn IspBackend,
    /// Process configuration
    pub config: &'a IspConfig,
    /// Command-loader buffers of the block
    pub loader: &'a mut CommandLoader,
    /// DMA channel objects of the block
    pub channels: &'a mut ChannelSet,
    /// Per-frame parameter set of the stream
    pub params: &'a mut FrameParameterSet,
    /// Stream-persistent parameters
    pub stream: &'a StreamParams,
    /// Repeat-group state of the stream
    pub repeat: &'a mut RepeatTracker,
    /// Stripe ordering of the stream
    pub stripes: &'a mut StripeSequence,
    /// Optional late override
    pub rta: Option<&'a dyn RtaOverride>,
    /// Where a failed frame is reported
    pub notifier: &'a dyn FrameNotifier,
}

impl CommandSequencer<'_> {
    /// Program and submit `frame`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::ShotFailed`] tagged with the failing stage.
    /// The command loader is rolled back and the frame reported not done.
    pub fn shot(&mut self, frame: &Frame) -> Result<ShotOutcome> {
        let block = self.ops.id();
        let mut states = vec![ShotState::Idle];
        match self.run(frame, &mut states) {
            Ok(outcome) => {
                debug!(
                    "{block}: frame {} armed ({} pairs, skip={})",
                    frame.fcount, outcome.pair_count, outcome.skipped
                );
                Ok(outcome)
            }
            Err(err) => {
                let stage = states
                    .last()
                    .and_then(|s| s.stage())
                    .unwrap_or(ShotStage::ParamUpdate);
                self.loader.rollback();
                // A failed group head must not make the next shot a repeat
                self.repeat.reset();
                let err = err.at_stage(stage, frame.fcount);
                warn!("{block}: {err}, rolled back");
                self.notifier
                    .frame_not_done(block, frame.fcount, ErrorType::of(&err));
                Err(err)
            }
        }
    }

    fn run(&mut self, frame: &Frame, states: &mut Vec<ShotState>) -> Result<ShotOutcome> {
        let block = self.ops.id();

        states.push(ShotState::ParamUpdate);
        let plan = self.param_update(frame)?;
        let skip = self
            .repeat
            .should_skip(frame.repeat, frame.batch.index, self.loader.has_committed());

        if skip {
            // Re-stage the committed payload unchanged
            self.loader.rollback();
        } else {
            let region = plan.get(frame.stripe.index as usize);
            let stripe = region.map(|region| StripeShot { plan: &plan, region });
            let ctx = SizeContext {
                params: &*self.params,
                region,
                config: self.config,
            };

            self.loader.reset();
            let mut facade = RegisterFacade::new(block, &mut *self.loader);

            states.push(ShotState::DmaProgram);
            let programmed = program_dma(&mut facade, self.channels, ctx.params, frame, stripe)?;
            trace!("{block}: {programmed} DMA channels programmed");

            states.push(ShotState::SizeProgram);
            self.ops.program_size(&ctx, &mut facade)?;

            if let Some(decision) = self.rta.and_then(|rta| rta.decide(block, ctx.params)) {
                states.push(ShotState::RtaOverride);
                self.ops.update_block_registers(&ctx, &decision, &mut facade)?;
            }
        }

        states.push(ShotState::CmdqCommit);
        let num_buffers = pack_num_buffers(frame.batch.count, frame.batch.index);
        let header = self.loader.header(frame.fcount, num_buffers);
        self.loader.sync_for_device(self.backend, &header)?;
        self.backend.submit(block, &self.loader.submission(&header))?;
        self.loader.commit();

        states.push(ShotState::Armed);
        Ok(ShotOutcome {
            fcount: frame.fcount,
            skipped: skip,
            pair_count: header.pair_count,
            num_buffers,
            states: states.clone(),
        })
    }

    /// Merge parameters, check stripe order and plan the regions
    fn param_update(&mut self, frame: &Frame) -> Result<Vec<StripeRegion>> {
        let params = &mut *self.params;
        params.update_from_control_plane(self.stream.persistent(), self.stream.pending());
        for param in &frame.params {
            params.apply(param)?;
        }
        for node in &frame.nodes {
            apply_node(params, node)?;
        }
        if let Some(upstream) = &frame.upstream {
            upstream.validate(&params.input_crop)?;
        }
        params.frame_count = frame.fcount;

        self.stripes
            .observe(frame.fcount, frame.stripe.index, frame.stripe.total)?;
        let crop = params.input_crop;
        let plan = StripeTiler::new(self.config.stripe).plan(crop.width, frame.stripe.total, crop.x)?;
        params.stripe = plan
            .get(frame.stripe.index as usize)
            .map(|r| r.info(crop.height))
            .unwrap_or_default();

        self.ops.tag(params)?;
        Ok(plan)
    }
}

/// Store a node request into the matching DMA parameter
///
/// # Errors
///
/// Returns [`PabloError::InvalidState`] for a node the block does not have.
pub fn apply_node(params: &mut FrameParameterSet, node: &NodeRequest) -> Result<()> {
    let block = params.block;
    let list = match node.direction {
        DmaDirection::Read => &mut params.rdma,
        DmaDirection::Write => &mut params.wdma,
    };
    let param = list.get_mut(usize::from(node.index)).ok_or_else(|| {
        PabloError::invalid_state(format!("{block} has no {:?} node {}", node.direction, node.index))
    })?;
    if !node.request {
        param.cmd = DmaCommand::Disable;
        return Ok(());
    }
    *param = DmaParam {
        cmd: DmaCommand::Enable,
        format: node.format,
        bit_depth: node.bit_depth,
        width: node.crop.width,
        height: node.crop.height,
        stride: 0,
        sbwc: node.sbwc,
        sbwc_extra: node.sbwc_extra,
        llc: param.llc,
    };
    Ok(())
}

fn node_addrs(frame: &Frame, direction: DmaDirection, index: u8) -> &[u64] {
    frame
        .nodes
        .iter()
        .find(|n| n.request && n.direction == direction && n.index == index)
        .map_or(&[], |n| n.addrs.as_slice())
}

/// Program every enabled DMA channel of `channels`
///
/// Disabled channels are skipped without any facade call. When `stripe`
/// is set, read channels cover the region's input and write channels
/// its core plus right margin, at the region's offsets.
///
/// Returns the number of channels programmed.
///
/// # Errors
///
/// Returns the facade's configuration errors, or
/// [`PabloError::InvalidGeometry`] for more buffers than address slots.
pub fn program_dma(
    facade: &mut dyn BlockFacade,
    channels: &mut ChannelSet,
    params: &FrameParameterSet,
    frame: &Frame,
    stripe: Option<StripeShot<'_>>,
) -> Result<usize> {
    let mut programmed = 0;
    let crop_x = params.input_crop.x;

    for (ch, param) in channels.rdma.iter_mut().zip(&params.rdma) {
        if !param.is_enabled() {
            trace!("{}: skip disabled {}", ch.block(), ch.name());
            continue;
        }
        ch.set_address(node_addrs(frame, DmaDirection::Read, ch.desc().index))?;
        let mut param = param.clone();
        let mut offset = 0;
        if let Some(s) = stripe {
            param.width = s.region.input_width();
            offset = s.region.rdma_offset(crop_x, param.format.bytes_per_pixel());
        }
        facade.set_dma_input(ch, &param, offset)?;
        programmed += 1;
    }

    for (ch, param) in channels.wdma.iter_mut().zip(&params.wdma) {
        if !param.is_enabled() {
            trace!("{}: skip disabled {}", ch.block(), ch.name());
            continue;
        }
        ch.set_address(node_addrs(frame, DmaDirection::Write, ch.desc().index))?;
        let mut param = param.clone();
        let mut offset = 0;
        if let Some(s) = stripe {
            param.width = s.region.core_width + s.region.right_margin;
            offset = StripeTiler::wdma_offset(
                s.plan,
                s.region.index,
                param.format.bytes_per_pixel(),
                param.height,
            );
        }
        facade.set_dma_output(ch, &param, offset)?;
        programmed += 1;
    }

    Ok(programmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareBackend;
    use crate::blocks::testing::{Call, CallLog};
    use crate::blocks::Rgbp;
    use crate::frame::{FrameEvent, RecordingNotifier};
    use crate::params::{Param, Rect};
    use pablo_chip::format::PixelFormat;

    struct Fixture {
        backend: SoftwareBackend,
        config: IspConfig,
        loader: CommandLoader,
        channels: ChannelSet,
        params: FrameParameterSet,
        stream: StreamParams,
        repeat: RepeatTracker,
        stripes: StripeSequence,
        notifier: RecordingNotifier,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = SoftwareBackend::new("sim");
            let config = IspConfig::default();
            let loader = CommandLoader::allocate(&backend, config.cmdq_header_size, config.cmdq_payload_size).unwrap();
            let block = BlockId::Rgbp;
            let mut stream = StreamParams::new(block);
            let crop = Rect::new(0, 0, 1920, 1080);
            let mut otf = crate::params::OtfParam::default();
            otf.enable = true;
            otf.size = crop.size();
            otf.crop = crop;
            stream
                .set_param(&[Param::OtfInput(otf), Param::InputCrop(crop), Param::OutputCrop(crop)])
                .unwrap();
            Self {
                backend,
                config,
                loader,
                channels: ChannelSet::create(block, block.rdma_channels(), block.wdma_channels()).unwrap(),
                params: FrameParameterSet::new(block),
                stream,
                repeat: RepeatTracker::default(),
                stripes: StripeSequence::default(),
                notifier: RecordingNotifier::default(),
            }
        }

        fn shot(&mut self, frame: &Frame) -> Result<ShotOutcome> {
            CommandSequencer {
                ops: &Rgbp,
                backend: &self.backend,
                config: &self.config,
                loader: &mut self.loader,
                channels: &mut self.channels,
                params: &mut self.params,
                stream: &self.stream,
                repeat: &mut self.repeat,
                stripes: &mut self.stripes,
                rta: None,
                notifier: &self.notifier,
            }
            .shot(frame)
        }
    }

    fn yuv_frame(fcount: u32) -> Frame {
        Frame::new(0, fcount).with_node(NodeRequest::output(
            0,
            PixelFormat::Yuv420Sp8,
            Rect::new(0, 0, 1920, 1080),
            vec![0x8000_0000],
        ))
    }

    #[test]
    fn states_in_order() {
        let mut f = Fixture::new();
        let out = f.shot(&yuv_frame(1)).unwrap();
        assert_eq!(
            out.states,
            vec![
                ShotState::Idle,
                ShotState::ParamUpdate,
                ShotState::DmaProgram,
                ShotState::SizeProgram,
                ShotState::CmdqCommit,
                ShotState::Armed
            ]
        );
        assert!(!out.skipped);
        assert_eq!(out.num_buffers, 1);
        assert_eq!(f.backend.submissions().len(), 1);
    }

    #[test]
    fn missing_buffer_fails_dma_stage() {
        let mut f = Fixture::new();
        let frame = Frame::new(0, 5).with_node(NodeRequest::output(
            0,
            PixelFormat::Yuv420Sp8,
            Rect::new(0, 0, 1920, 1080),
            Vec::new(),
        ));
        let err = f.shot(&frame).unwrap_err();
        assert_eq!(err.stage(), Some(ShotStage::DmaProgram));
        assert!(f.backend.submissions().is_empty());
        assert_eq!(
            f.notifier.events(),
            vec![FrameEvent::NotDone(BlockId::Rgbp, 5, ErrorType::Config)]
        );
    }

    #[test]
    fn batch_tail_resubmits_committed_payload() {
        let mut f = Fixture::new();
        f.shot(&yuv_frame(1).with_batch(4, 0)).unwrap();
        let out = f.shot(&yuv_frame(1).with_batch(4, 1)).unwrap();
        assert!(out.skipped);
        assert_eq!(out.num_buffers, (4 << 16) | 1);
        let subs = f.backend.submissions();
        assert_eq!(subs[0].payload, subs[1].payload);
    }

    #[test]
    fn failed_group_head_is_not_repeated() {
        let mut f = Fixture::new();
        f.shot(&yuv_frame(1)).unwrap();

        let repeat = crate::repeat::RepeatInfo { instance: 9, count: 3 };
        let mut head = Frame::new(0, 2).with_node(NodeRequest::output(
            0,
            PixelFormat::Yuv420Sp8,
            Rect::new(0, 0, 1920, 1080),
            Vec::new(),
        ));
        head.repeat = repeat;
        assert!(f.shot(&head).is_err());

        let mut next = yuv_frame(3);
        next.repeat = repeat;
        let out = f.shot(&next).unwrap();
        assert!(!out.skipped);
        assert!(out.states.contains(&ShotState::DmaProgram));
    }

    #[test]
    fn node_request_applies_to_its_frame_only() {
        let mut f = Fixture::new();
        let first = f.shot(&yuv_frame(1)).unwrap();
        assert!(f.params.wdma[0].is_enabled());

        let bare = f.shot(&Frame::new(0, 2)).unwrap();
        assert!(!f.params.wdma[0].is_enabled());
        assert!(bare.pair_count < first.pair_count);
    }

    #[test]
    fn frame_override_is_not_carried() {
        let mut f = Fixture::new();
        let small = Rect::new(0, 0, 1280, 720);
        f.shot(&yuv_frame(1).with_param(Param::OutputCrop(small))).unwrap();
        assert_eq!(f.params.output_crop, small);

        f.shot(&yuv_frame(2)).unwrap();
        assert_eq!(f.params.output_crop, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn disabled_channels_get_no_calls() {
        let block = BlockId::Rgbp;
        let mut channels = ChannelSet::create(block, block.rdma_channels(), block.wdma_channels()).unwrap();
        let mut params = FrameParameterSet::new(block);
        params.wdma[0] = DmaParam::enabled(PixelFormat::Yuv420Sp8, Size::new(64, 64));
        let frame = yuv_frame(1);
        let mut log = CallLog::default();
        let n = program_dma(&mut log, &mut channels, &params, &frame, None).unwrap();
        assert_eq!(n, 1);
        assert_eq!(log.0, vec![Call::DmaOut("WDMA_YUV", Size::new(64, 64), 0)]);
    }

    #[test]
    fn striped_write_offsets() {
        let block = BlockId::Rgbp;
        let mut channels = ChannelSet::create(block, block.rdma_channels(), block.wdma_channels()).unwrap();
        let mut params = FrameParameterSet::new(block);
        params.wdma[0] = DmaParam::enabled(PixelFormat::Yuv420Sp8, Size::new(4096, 100));
        let plan = StripeTiler::new(IspConfig::default().stripe).plan(4096, 2, 0).unwrap();
        let stripe = StripeShot { plan: &plan, region: &plan[1] };
        let mut log = CallLog::default();
        program_dma(&mut log, &mut channels, &params, &yuv_frame(1), Some(stripe)).unwrap();
        let expected = u64::from(plan[0].core_width + plan[0].right_margin) * 100;
        assert_eq!(
            log.0,
            vec![Call::DmaOut("WDMA_YUV", Size::new(plan[1].core_width, 100), expected)]
        );
    }

    #[test]
    fn idle_node_disables_channel() {
        let mut params = FrameParameterSet::new(BlockId::Rgbp);
        params.wdma[1] = DmaParam::enabled(PixelFormat::Y8, Size::new(8, 8));
        apply_node(&mut params, &NodeRequest::idle(DmaDirection::Write, 1)).unwrap();
        assert!(!params.wdma[1].is_enabled());
        assert!(apply_node(&mut params, &NodeRequest::idle(DmaDirection::Write, 7)).is_err());
    }
}

//! Hardware block lifecycle
//!
//! ```text
//! CLOSED -> OPENING -> OPEN -> INITIALIZING -> INITIALIZED -> ENABLING
//!        -> RUNNING -> DISABLING -> (INITIALIZED) ... CLOSING -> CLOSED
//!
//! RUNNING -> RESETTING -> RUNNING     (overflow / timeout recovery)
//! ```
//!
//! A block can be shared by several streams. Resources are allocated on
//! the first `open` and released on the last `close`; the block keeps
//! running while any stream is enabled.

use crate::backend::IspBackend;
use crate::blocks::{BlockOps, Lme, Mtnr, Paf, Rgbp, Taa};
use crate::cmdq::{decode_pairs, CommandLoader};
use crate::config::IspConfig;
use crate::dma::ChannelSet;
use crate::error::{PabloError, Result};
use crate::facade::{dump_registers, DirectRegisters};
use crate::frame::{DoneType, Frame, FrameNotifier, StreamId};
use crate::interrupt::{InterruptHandlerSet, IrqContext, IrqRegistry};
use crate::params::{FrameParameterSet, InputPath, Param, StreamParams};
use crate::regcache::ShadowRegisters;
use crate::repeat::RepeatTracker;
use crate::sequencer::{CommandSequencer, RtaOverride, ShotOutcome};
use crate::stripe::StripeSequence;
use crate::votf::{LinkId, VotfLinkManager};
use pablo_chip::block::BlockId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle position of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No resources held
    Closed,
    /// Allocating command-loader buffers and registering interrupts
    Opening,
    /// Resources held, no DMA channels yet
    Open,
    /// Creating DMA channel objects
    Initializing,
    /// Channels created, hardware idle
    Initialized,
    /// Soft reset and static programming in progress
    Enabling,
    /// Accepting shots
    Running,
    /// Waiting for the in-flight frame
    Disabling,
    /// Releasing resources
    Closing,
    /// Soft reset and re-prepare after overflow or timeout
    Resetting,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Opening => "OPENING",
            Self::Open => "OPEN",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::Enabling => "ENABLING",
            Self::Running => "RUNNING",
            Self::Disabling => "DISABLING",
            Self::Closing => "CLOSING",
            Self::Resetting => "RESETTING",
        };
        f.write_str(name)
    }
}

/// Stream options given to `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitFlags {
    /// Where the stream's pixels come from
    pub input_path: InputPath,
}

/// What `dump_registers` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpType {
    /// Every register of the block window
    Full,
    /// The last committed command-loader pairs
    Cmdq,
}

/// Operations the group/frame manager drives a block through
pub trait HardwareBlockDriver: Send + std::fmt::Debug {
    /// Block driven
    fn block(&self) -> BlockId;

    /// Current lifecycle state
    fn state(&self) -> LifecycleState;

    /// Attach `stream`; the first stream allocates the block's resources
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::OutOfMemory`] if buffers cannot be allocated.
    fn open(&mut self, stream: StreamId) -> Result<()>;

    /// Create DMA channels and set stream options
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::NoData`] if a channel cannot be created.
    fn init(&mut self, stream: StreamId, flags: InitFlags) -> Result<()>;

    /// Store stream-persistent parameters; no hardware effect until the next shot
    ///
    /// # Errors
    ///
    /// Returns error for an unknown stream or a missing DMA channel.
    fn set_param(&mut self, stream: StreamId, params: &[Param]) -> Result<()>;

    /// Program and submit one frame
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::ShotFailed`] after rollback.
    fn shot(&mut self, frame: &Frame) -> Result<ShotOutcome>;

    /// Start the hardware for `stream`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if the soft reset does not complete.
    fn enable(&mut self, stream: StreamId) -> Result<()>;

    /// Stop `stream`, waiting a bounded time for the frame in flight
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if the frame did not end; the block
    /// is stopped anyway.
    fn disable(&mut self, stream: StreamId) -> Result<()>;

    /// Detach `stream`; the last stream releases the block's resources
    ///
    /// # Errors
    ///
    /// Returns the disable timeout, if any; resources are released anyway.
    fn close(&mut self, stream: StreamId) -> Result<()>;

    /// Soft reset, re-prepare and resume
    ///
    /// # Errors
    ///
    /// Returns error if the reset does not complete.
    fn reset(&mut self, stream: StreamId) -> Result<()>;

    /// Re-submit the last committed programming
    ///
    /// # Errors
    ///
    /// Returns error if the command queue rejects it.
    fn restore(&mut self, stream: StreamId) -> Result<()>;

    /// Parameter set of `stream` as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error for an unknown stream.
    fn dump_params(&self, stream: StreamId) -> Result<String>;

    /// Register dump
    ///
    /// # Errors
    ///
    /// Returns error if a register cannot be read.
    fn dump_registers(&self, dump: DumpType) -> Result<Vec<(u32, u32)>>;

    /// Declare the armed frame lost if it has not started in time
    fn check_liveness(&self, now: Instant) -> Option<u32>;
}

/// Per-stream state of a block
#[derive(Debug)]
struct StreamSlot {
    params: StreamParams,
    frame: FrameParameterSet,
    repeat: RepeatTracker,
    stripes: StripeSequence,
    fcount: u32,
    running: bool,
}

impl StreamSlot {
    fn new(block: BlockId) -> Self {
        Self {
            params: StreamParams::new(block),
            frame: FrameParameterSet::new(block),
            repeat: RepeatTracker::default(),
            stripes: StripeSequence::default(),
            fcount: 0,
            running: false,
        }
    }
}

/// One hardware block instance
#[derive(Debug)]
pub struct HwBlock<B: BlockOps> {
    ops: B,
    slot: u32,
    backend: Arc<dyn IspBackend>,
    config: Arc<IspConfig>,
    registry: Arc<IrqRegistry>,
    notifier: Arc<dyn FrameNotifier>,
    irq: Arc<IrqContext>,
    state: LifecycleState,
    configured: bool,
    loader: Option<CommandLoader>,
    channels: ChannelSet,
    streams: BTreeMap<StreamId, StreamSlot>,
    regcache: Option<ShadowRegisters>,
    rta: Option<Arc<dyn RtaOverride>>,
    votf: Option<(Arc<Mutex<VotfLinkManager>>, LinkId)>,
}

/// RGBP instance
pub type RgbpBlock = HwBlock<Rgbp>;
/// 3AA instance
pub type TaaBlock = HwBlock<Taa>;
/// MTNR instance
pub type MtnrBlock = HwBlock<Mtnr>;
/// PAF instance
pub type PafBlock = HwBlock<Paf>;
/// LME instance
pub type LmeBlock = HwBlock<Lme>;

impl<B: BlockOps> HwBlock<B> {
    /// Closed block driven by `ops` in hardware slot `slot`
    ///
    /// The slot selects the CoreX bank the block's DMA registers use.
    pub fn new(
        ops: B,
        slot: u32,
        backend: Arc<dyn IspBackend>,
        config: Arc<IspConfig>,
        registry: Arc<IrqRegistry>,
        notifier: Arc<dyn FrameNotifier>,
    ) -> Self {
        let irq = Arc::new(IrqContext::new(ops.id(), notifier.clone()));
        Self {
            ops,
            slot,
            backend,
            config,
            registry,
            notifier,
            irq,
            state: LifecycleState::Closed,
            configured: false,
            loader: None,
            channels: ChannelSet::default(),
            streams: BTreeMap::new(),
            regcache: None,
            rta: None,
            votf: None,
        }
    }

    /// Consult `rta` after SIZE_PROGRAM on every shot
    #[must_use]
    pub fn with_rta(mut self, rta: Arc<dyn RtaOverride>) -> Self {
        self.rta = Some(rta);
        self
    }

    /// Size `link` from this block's output on every programmed shot
    pub fn attach_votf(&mut self, manager: Arc<Mutex<VotfLinkManager>>, link: LinkId) {
        self.votf = Some((manager, link));
    }

    /// Block hooks
    pub const fn ops(&self) -> &B {
        &self.ops
    }

    /// Interrupt counters and armed frame
    pub const fn irq(&self) -> &Arc<IrqContext> {
        &self.irq
    }

    /// Whether hardware has been configured since the last full stop
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether static programming goes through the register cache
    pub const fn regcache_active(&self) -> bool {
        self.regcache.is_some()
    }

    /// Attached streams
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Frame parameter set of `stream` as of its last shot
    pub fn params(&self, stream: StreamId) -> Option<&FrameParameterSet> {
        self.streams.get(&stream).map(|s| &s.frame)
    }

    /// Frame count of the last successful shot of `stream`
    pub fn frame_count(&self, stream: StreamId) -> Option<u32> {
        self.streams.get(&stream).map(|s| s.fcount)
    }

    fn id(&self) -> BlockId {
        self.ops.id()
    }

    fn slot_mut(&mut self, stream: StreamId) -> Result<&mut StreamSlot> {
        let block = self.ops.id();
        self.streams
            .get_mut(&stream)
            .ok_or_else(|| PabloError::invalid_state(format!("{block}: stream {stream} not open")))
    }

    fn expect_state(&self, allowed: &[LifecycleState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PabloError::invalid_state(format!("{}: {op} in {}", self.id(), self.state)))
        }
    }

    fn transition(&mut self, to: LifecycleState) {
        debug!("{}: {} -> {to}", self.id(), self.state);
        self.state = to;
    }

    fn any_running(&self) -> bool {
        self.streams.values().any(|s| s.running)
    }

    /// Soft reset, then static programming through the cache or directly
    fn reset_and_prepare(&mut self) -> Result<()> {
        let block = self.id();
        self.backend.soft_reset(block, self.config.hw_timeout)?;

        self.regcache = None;
        if self.config.reg_cache {
            let mut cache = ShadowRegisters::new(block);
            match cache.reinit(&*self.backend) {
                Ok(()) => self.regcache = Some(cache),
                Err(e) => warn!("{block}: register cache unavailable, writing directly: {e}"),
            }
        }
        match self.regcache.as_mut() {
            Some(cache) => {
                self.ops.prepare(cache)?;
                let written = cache.flush(&*self.backend)?;
                debug!("{block}: prepare flushed {written} registers");
            }
            None => self.ops.prepare(&mut DirectRegisters::new(&*self.backend, block))?,
        }
        Ok(())
    }

    fn release(&mut self) {
        self.registry.unregister(self.id());
        if let Some(loader) = self.loader.take() {
            loader.release(&*self.backend);
        }
        self.channels = ChannelSet::default();
        self.regcache = None;
        self.configured = false;
    }

    fn log_failure_dump(&self) {
        match dump_registers(&*self.backend, self.id()) {
            Ok(regs) => {
                for (offset, value) in regs {
                    error!("{} [{offset:#06x}] = {value:#010x}", self.id());
                }
            }
            Err(e) => error!("{}: register dump failed: {e}", self.id()),
        }
    }
}

impl<B: BlockOps> HardwareBlockDriver for HwBlock<B> {
    fn block(&self) -> BlockId {
        self.id()
    }

    fn state(&self) -> LifecycleState {
        self.state
    }

    fn open(&mut self, stream: StreamId) -> Result<()> {
        let block = self.id();
        if self.streams.contains_key(&stream) {
            return Err(PabloError::invalid_state(format!("{block}: stream {stream} already open")));
        }
        if self.state == LifecycleState::Closed {
            self.transition(LifecycleState::Opening);
            let loader = match CommandLoader::allocate(
                &*self.backend,
                self.config.cmdq_header_size,
                self.config.cmdq_payload_size,
            ) {
                Ok(loader) => loader,
                Err(e) => {
                    self.transition(LifecycleState::Closed);
                    return Err(e);
                }
            };
            self.loader = Some(loader);
            if let Err(e) = self
                .registry
                .register(block, InterruptHandlerSet::new(self.irq.clone()))
            {
                self.release();
                self.transition(LifecycleState::Closed);
                return Err(e);
            }
            self.transition(LifecycleState::Open);
        }
        self.streams.insert(stream, StreamSlot::new(block));
        info!("{block}: stream {stream} opened ({} streams)", self.streams.len());
        Ok(())
    }

    fn init(&mut self, stream: StreamId, flags: InitFlags) -> Result<()> {
        use LifecycleState::{Initialized, Initializing, Open, Running};
        self.expect_state(&[Open, Initialized, Running], "init")?;
        let block = self.id();
        self.slot_mut(stream)?.params.set_input_path(flags.input_path);

        if self.state == Open {
            self.transition(Initializing);
            match ChannelSet::create(block, self.ops.rdma_channels(), self.ops.wdma_channels()) {
                Ok(mut channels) => {
                    channels.set_corex_id(self.slot);
                    debug!("{block}: {} DMA channels created", channels.len());
                    self.channels = channels;
                    self.transition(Initialized);
                }
                Err(e) => {
                    self.transition(Open);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn set_param(&mut self, stream: StreamId, params: &[Param]) -> Result<()> {
        self.slot_mut(stream)?.params.set_param(params)
    }

    fn shot(&mut self, frame: &Frame) -> Result<ShotOutcome> {
        self.expect_state(&[LifecycleState::Running], "shot")?;
        let block = self.ops.id();
        let Some(slot) = self.streams.get_mut(&frame.stream) else {
            return Err(PabloError::invalid_state(format!("{block}: stream {} not open", frame.stream)));
        };
        let Some(loader) = self.loader.as_mut() else {
            return Err(PabloError::invalid_state(format!("{block}: no command loader")));
        };

        let result = CommandSequencer {
            ops: &self.ops,
            backend: &*self.backend,
            config: &self.config,
            loader,
            channels: &mut self.channels,
            params: &mut slot.frame,
            stream: &slot.params,
            repeat: &mut slot.repeat,
            stripes: &mut slot.stripes,
            rta: self.rta.as_deref(),
            notifier: &*self.notifier,
        }
        .shot(frame);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.config.dump_on_error {
                    self.log_failure_dump();
                }
                return Err(e);
            }
        };
        slot.params.clear_pending();
        slot.fcount = frame.fcount;
        let done = if outcome.skipped { DoneType::Repeated } else { DoneType::Normal };
        self.irq.arm(frame.fcount, done, Instant::now());

        // The frame is queued; a link failure surfaces through the manager
        if !outcome.skipped {
            if let Some((manager, link)) = &self.votf {
                let out = slot.frame.output_crop.size();
                let size = if out.is_empty() { slot.frame.input_crop.size() } else { out };
                match manager.lock() {
                    Ok(mut m) => {
                        if let Err(e) = m.set_size(*link, size.width, size.height) {
                            warn!("{block}: frame {} armed without VOTF resize: {e}", frame.fcount);
                        }
                    }
                    Err(_) => warn!("{block}: VOTF manager poisoned, frame {} not resized", frame.fcount),
                }
            }
        }
        Ok(outcome)
    }

    fn enable(&mut self, stream: StreamId) -> Result<()> {
        use LifecycleState::{Enabling, Initialized, Running};
        self.expect_state(&[Initialized, Running], "enable")?;
        self.slot_mut(stream)?;
        let block = self.id();
        if self.state == Initialized {
            self.transition(Enabling);
            if let Err(e) = self.reset_and_prepare() {
                self.transition(Initialized);
                return Err(e);
            }
            self.irq.set_overflow_recovery(false);
            self.configured = true;
            self.transition(Running);
        }
        self.slot_mut(stream)?.running = true;
        info!("{block}: stream {stream} enabled");
        Ok(())
    }

    fn disable(&mut self, stream: StreamId) -> Result<()> {
        use LifecycleState::{Disabling, Initialized, Running};
        self.expect_state(&[Running], "disable")?;
        let block = self.id();
        let disable_timeout = self.config.disable_timeout;
        {
            let slot = self.slot_mut(stream)?;
            slot.running = false;
            slot.fcount = 0;
            slot.repeat.reset();
            slot.stripes.reset();
        }

        let waited = self.irq.wait_frame_end(disable_timeout);
        if let Err(e) = &waited {
            warn!("{block}: {e}, stopping anyway");
            self.irq.disarm();
        }

        if self.any_running() {
            debug!("{block}: stream {stream} disabled, block still shared");
            return waited;
        }
        self.transition(Disabling);
        self.irq.reset_counters();
        self.configured = false;
        self.transition(Initialized);
        info!("{block}: stream {stream} disabled");
        waited
    }

    fn close(&mut self, stream: StreamId) -> Result<()> {
        let block = self.id();
        let running = self.slot_mut(stream)?.running;
        let result = if running { self.disable(stream) } else { Ok(()) };
        self.streams.remove(&stream);
        if self.streams.is_empty() {
            self.transition(LifecycleState::Closing);
            self.irq.disarm();
            self.release();
            self.transition(LifecycleState::Closed);
        }
        info!("{block}: stream {stream} closed");
        result
    }

    fn reset(&mut self, stream: StreamId) -> Result<()> {
        use LifecycleState::{Resetting, Running};
        self.expect_state(&[Running], "reset")?;
        self.slot_mut(stream)?;
        let block = self.id();
        self.transition(Resetting);
        self.irq.set_overflow_recovery(true);
        if let Some(lost) = self.irq.disarm() {
            warn!("{block}: frame {} dropped by reset", lost.fcount);
        }

        let mut result = self.reset_and_prepare();
        if let Some((manager, link)) = &self.votf {
            match manager.lock() {
                Ok(mut m) => result = result.and(m.force_flush(*link)),
                Err(_) => warn!("{block}: VOTF manager poisoned, link not flushed"),
            }
        }
        for slot in self.streams.values_mut() {
            slot.repeat.reset();
            slot.stripes.reset();
        }
        self.irq.set_overflow_recovery(false);
        self.transition(Running);
        match &result {
            Ok(()) => info!("{block}: reset complete"),
            Err(e) => error!("{block}: reset incomplete: {e}"),
        }
        result
    }

    fn restore(&mut self, stream: StreamId) -> Result<()> {
        self.expect_state(&[LifecycleState::Running], "restore")?;
        let block = self.id();
        let fcount = self.slot_mut(stream)?.fcount;
        let Some(loader) = self.loader.as_mut() else {
            return Err(PabloError::invalid_state(format!("{block}: no command loader")));
        };
        if !loader.has_committed() {
            debug!("{block}: nothing committed to restore");
            return Ok(());
        }
        loader.rollback();
        let header = loader.header(fcount, pablo_chip::cmdq::pack_num_buffers(1, 0));
        loader.sync_for_device(&*self.backend, &header)?;
        self.backend.submit(block, &loader.submission(&header))?;
        info!("{block}: restored {} registers", header.pair_count);
        Ok(())
    }

    fn dump_params(&self, stream: StreamId) -> Result<String> {
        let slot = self.streams.get(&stream).ok_or_else(|| {
            PabloError::invalid_state(format!("{}: stream {stream} not open", self.id()))
        })?;
        Ok(serde_json::to_string_pretty(&slot.frame)?)
    }

    fn dump_registers(&self, dump: DumpType) -> Result<Vec<(u32, u32)>> {
        match dump {
            DumpType::Full => dump_registers(&*self.backend, self.id()),
            DumpType::Cmdq => Ok(self
                .loader
                .as_ref()
                .and_then(CommandLoader::committed)
                .map(|bytes| decode_pairs(bytes).into_iter().map(|p| (p.addr, p.value)).collect())
                .unwrap_or_default()),
        }
    }

    fn check_liveness(&self, now: Instant) -> Option<u32> {
        self.irq.check_liveness(now, self.config.shot_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareBackend;
    use crate::frame::{NodeRequest, NullNotifier};
    use crate::params::{OtfParam, Rect};
    use pablo_chip::format::PixelFormat;

    fn rgbp(sim: &Arc<SoftwareBackend>) -> RgbpBlock {
        HwBlock::new(
            Rgbp,
            0,
            sim.clone(),
            Arc::new(IspConfig::default()),
            Arc::new(IrqRegistry::new()),
            Arc::new(NullNotifier),
        )
    }

    fn running(sim: &Arc<SoftwareBackend>) -> RgbpBlock {
        let mut b = rgbp(sim);
        b.open(0).unwrap();
        b.init(0, InitFlags::default()).unwrap();
        let crop = Rect::new(0, 0, 640, 480);
        let otf = OtfParam {
            enable: true,
            size: crop.size(),
            crop,
            ..OtfParam::default()
        };
        b.set_param(0, &[Param::OtfInput(otf), Param::InputCrop(crop), Param::OutputCrop(crop)])
            .unwrap();
        b.enable(0).unwrap();
        b
    }

    fn frame(fcount: u32) -> Frame {
        Frame::new(0, fcount).with_node(NodeRequest::output(
            0,
            PixelFormat::Yuv420Sp8,
            Rect::new(0, 0, 640, 480),
            vec![0x9000_0000],
        ))
    }

    #[test]
    fn states_follow_calls() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = rgbp(&sim);
        assert_eq!(b.state(), LifecycleState::Closed);
        b.open(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Open);
        b.init(0, InitFlags::default()).unwrap();
        assert_eq!(b.state(), LifecycleState::Initialized);
        b.enable(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Running);
        assert!(b.regcache_active());
        b.disable(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Initialized);
        b.close(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Closed);
    }

    #[test]
    fn shot_requires_running() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = rgbp(&sim);
        b.open(0).unwrap();
        assert!(matches!(b.shot(&frame(1)), Err(PabloError::InvalidState { .. })));
    }

    #[test]
    fn open_failure_leaves_closed() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = rgbp(&sim);
        sim.fail_next_alloc();
        assert!(matches!(b.open(0), Err(PabloError::OutOfMemory { .. })));
        assert_eq!(b.state(), LifecycleState::Closed);
        b.open(0).unwrap();
    }

    #[test]
    fn enable_failure_stays_initialized() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = rgbp(&sim);
        b.open(0).unwrap();
        b.init(0, InitFlags::default()).unwrap();
        sim.fail_reads(true);
        assert!(b.enable(0).is_err());
        sim.fail_reads(false);
        assert_eq!(b.state(), LifecycleState::Initialized);
        b.enable(0).unwrap();
    }

    #[test]
    fn uncached_prepare_writes_directly() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = HwBlock::new(
            Rgbp,
            0,
            sim.clone(),
            Arc::new(IspConfig::default().with_reg_cache(false)),
            Arc::new(IrqRegistry::new()),
            Arc::new(NullNotifier),
        );
        b.open(0).unwrap();
        b.init(0, InitFlags::default()).unwrap();
        b.enable(0).unwrap();
        assert!(!b.regcache_active());
        assert_eq!(sim.register(BlockId::Rgbp, pablo_chip::regs::CORE_ENABLE), 1);
    }

    #[test]
    fn shot_arms_frame_and_dumps() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = running(&sim);
        b.shot(&frame(3)).unwrap();
        assert_eq!(b.irq().armed().map(|a| a.fcount), Some(3));
        assert_eq!(b.frame_count(0), Some(3));
        let json = b.dump_params(0).unwrap();
        assert!(json.contains("\"frame_count\": 3"));
        assert!(!b.dump_registers(DumpType::Cmdq).unwrap().is_empty());
    }

    #[test]
    fn shared_block_keeps_running() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = running(&sim);
        b.open(1).unwrap();
        b.init(1, InitFlags::default()).unwrap();
        b.enable(1).unwrap();
        b.disable(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Running);
        assert!(b.is_configured());
        b.disable(1).unwrap();
        assert_eq!(b.state(), LifecycleState::Initialized);
        assert!(!b.is_configured());
    }

    #[test]
    fn reset_returns_to_running() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = running(&sim);
        b.shot(&frame(1)).unwrap();
        b.reset(0).unwrap();
        assert_eq!(b.state(), LifecycleState::Running);
        assert!(b.irq().armed().is_none());
        assert!(!b.irq().in_overflow_recovery());
        b.shot(&frame(2)).unwrap();
    }

    #[test]
    fn restore_resubmits_committed() {
        let sim = Arc::new(SoftwareBackend::new("sim"));
        let mut b = running(&sim);
        b.shot(&frame(1)).unwrap();
        b.restore(0).unwrap();
        let subs = sim.submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].payload, subs[1].payload);
    }
}

//! Interrupt dispatch and frame liveness
//!
//! Each open block registers an [`InterruptHandlerSet`] in the shared
//! [`IrqRegistry`]. The interrupt source (a UIO wait loop, or a test
//! raising simulated status bits) calls [`IrqRegistry::dispatch`], which
//! reads and clears the status register of one line and runs that line's
//! handler.
//!
//! Handlers only count, record and notify. They never program registers
//! and never fail: anomalies are logged and the pipeline keeps going.

use crate::backend::IspBackend;
use crate::error::{PabloError, Result};
use crate::frame::{DoneType, ErrorType, FrameNotifier};
use pablo_chip::block::BlockId;
use pablo_chip::regs::irq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Interrupt line of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// Frame progress (INT0)
    General,
    /// Errors (INT1)
    Secondary,
}

impl IrqLine {
    const fn status_reg(self) -> u32 {
        match self {
            Self::General => irq::INT0_STATUS,
            Self::Secondary => irq::INT1_STATUS,
        }
    }

    const fn clear_reg(self) -> u32 {
        match self {
            Self::General => irq::INT0_CLEAR,
            Self::Secondary => irq::INT1_CLEAR,
        }
    }
}

/// Frame handed to hardware and not yet finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedFrame {
    /// Frame count
    pub fcount: u32,
    /// When the command queue accepted it
    pub at: Instant,
    /// FRAME_START seen
    pub started: bool,
    /// Completion reported on FRAME_END
    pub done: DoneType,
}

/// Counters and wake-ups shared between a block and its interrupt handlers
#[derive(Debug)]
pub struct IrqContext {
    block: BlockId,
    notifier: Arc<dyn FrameNotifier>,
    frame_start: AtomicU32,
    frame_end: AtomicU32,
    dma_done: AtomicU32,
    errors: AtomicU32,
    overflow_recovery: AtomicBool,
    armed: Mutex<Option<ArmedFrame>>,
    frame_end_cv: Condvar,
}

impl IrqContext {
    /// Context of `block` reporting to `notifier`
    pub fn new(block: BlockId, notifier: Arc<dyn FrameNotifier>) -> Self {
        Self {
            block,
            notifier,
            frame_start: AtomicU32::new(0),
            frame_end: AtomicU32::new(0),
            dma_done: AtomicU32::new(0),
            errors: AtomicU32::new(0),
            overflow_recovery: AtomicBool::new(false),
            armed: Mutex::new(None),
            frame_end_cv: Condvar::new(),
        }
    }

    fn armed_lock(&self) -> MutexGuard<'_, Option<ArmedFrame>> {
        // A poisoned lock only means a notifier panicked; the record is still valid.
        self.armed.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Block this context belongs to
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Record that frame `fcount` was committed at `now`
    ///
    /// A frame still armed never saw its FRAME_END and is reported not done.
    pub fn arm(&self, fcount: u32, done: DoneType, now: Instant) {
        let prev = self
            .armed_lock()
            .replace(ArmedFrame { fcount, at: now, started: false, done });
        if let Some(prev) = prev {
            warn!("{}: frame {} still armed when {fcount} was committed", self.block, prev.fcount);
            self.notifier.frame_not_done(self.block, prev.fcount, ErrorType::Hardware);
        }
    }

    /// Frame currently armed
    pub fn armed(&self) -> Option<ArmedFrame> {
        *self.armed_lock()
    }

    /// FRAME_START interrupts seen
    pub fn frame_start_count(&self) -> u32 {
        self.frame_start.load(Ordering::Acquire)
    }

    /// FRAME_END interrupts seen
    pub fn frame_end_count(&self) -> u32 {
        self.frame_end.load(Ordering::Acquire)
    }

    /// DMA_DONE interrupts seen
    pub fn dma_done_count(&self) -> u32 {
        self.dma_done.load(Ordering::Acquire)
    }

    /// Error interrupts seen
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    /// Zero the per-stream counters
    pub fn reset_counters(&self) {
        self.frame_start.store(0, Ordering::Release);
        self.frame_end.store(0, Ordering::Release);
        self.dma_done.store(0, Ordering::Release);
    }

    /// Whether interrupts are being ignored during overflow recovery
    pub fn in_overflow_recovery(&self) -> bool {
        self.overflow_recovery.load(Ordering::Acquire)
    }

    /// Enter or leave overflow recovery
    pub fn set_overflow_recovery(&self, on: bool) {
        self.overflow_recovery.store(on, Ordering::Release);
    }

    /// Block until the armed frame ends
    ///
    /// Returns immediately when nothing is armed.
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if FRAME_END does not arrive in time.
    pub fn wait_frame_end(&self, timeout: Duration) -> Result<()> {
        let armed = self.armed_lock();
        let (armed, result) = self
            .frame_end_cv
            .wait_timeout_while(armed, timeout, |a| a.is_some())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if result.timed_out() && armed.is_some() {
            return Err(PabloError::timeout(format!("{} frame end", self.block), timeout));
        }
        Ok(())
    }

    /// Forget the armed frame without notifying
    pub fn disarm(&self) -> Option<ArmedFrame> {
        let prev = self.armed_lock().take();
        self.frame_end_cv.notify_all();
        prev
    }

    /// Declare the armed frame lost if it has not started within `bound`
    ///
    /// Returns the lost frame count.
    pub fn check_liveness(&self, now: Instant, bound: Duration) -> Option<u32> {
        let lost = {
            let mut armed = self.armed_lock();
            match *armed {
                Some(a) if !a.started && now.saturating_duration_since(a.at) > bound => {
                    *armed = None;
                    Some(a.fcount)
                }
                _ => None,
            }
        };
        if let Some(fcount) = lost {
            error!("{}: frame {fcount} lost, no FRAME_START within {bound:?}", self.block);
            self.frame_end_cv.notify_all();
            self.notifier.frame_not_done(self.block, fcount, ErrorType::Timeout);
        }
        lost
    }

    /// INT0 handler
    pub fn handle_general(&self, status: u32) {
        if self.in_overflow_recovery() {
            trace!("{}: INT0 {status:#x} ignored during recovery", self.block);
            return;
        }
        if status & irq::FRAME_START != 0 && status & irq::FRAME_END != 0 {
            warn!("{}: FRAME_START and FRAME_END reported together", self.block);
        }
        if status & irq::FRAME_START != 0 {
            self.frame_start.fetch_add(1, Ordering::AcqRel);
            let started = {
                let mut armed = self.armed_lock();
                armed.as_mut().map(|a| {
                    a.started = true;
                    a.fcount
                })
            };
            if let Some(fcount) = started {
                self.notifier.frame_start(self.block, fcount);
            }
        }
        if status & irq::FRAME_END != 0 {
            let fe = self.frame_end.fetch_add(1, Ordering::AcqRel) + 1;
            let fs = self.frame_start_count();
            if fe > fs {
                error!("{}: frame end count {fe} ahead of frame start count {fs}", self.block);
            }
            let done = self.armed_lock().take();
            self.frame_end_cv.notify_all();
            if let Some(a) = done {
                self.notifier.frame_done(self.block, a.fcount, a.done);
            }
        }
        if status & irq::DMA_DONE != 0 {
            self.dma_done.fetch_add(1, Ordering::AcqRel);
        }
        if status & (irq::SETTING_DONE | irq::COREX_END) != 0 {
            trace!("{}: setting done / corex end {status:#x}", self.block);
        }
    }

    /// INT1 handler
    pub fn handle_secondary(&self, status: u32) {
        if self.in_overflow_recovery() {
            trace!("{}: INT1 {status:#x} ignored during recovery", self.block);
            return;
        }
        if status == 0 {
            return;
        }
        self.errors.fetch_add(1, Ordering::AcqRel);
        let kind = if status & irq::OVERFLOW != 0 {
            self.set_overflow_recovery(true);
            error!("{}: overflow, entering recovery", self.block);
            ErrorType::Overflow
        } else {
            error!("{}: error interrupt {status:#x}", self.block);
            ErrorType::Hardware
        };
        let lost = self.armed_lock().take();
        self.frame_end_cv.notify_all();
        if let Some(a) = lost {
            self.notifier.frame_not_done(self.block, a.fcount, kind);
        }
    }
}

/// Handler entry point of one line
pub type IrqHandler = fn(&IrqContext, u32);

/// Both handlers of a block plus their shared context
#[derive(Clone)]
pub struct InterruptHandlerSet {
    context: Arc<IrqContext>,
    general: IrqHandler,
    secondary: IrqHandler,
}

impl std::fmt::Debug for InterruptHandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandlerSet")
            .field("block", &self.context.block)
            .finish_non_exhaustive()
    }
}

impl InterruptHandlerSet {
    /// Default handlers on `context`
    pub fn new(context: Arc<IrqContext>) -> Self {
        Self {
            context,
            general: IrqContext::handle_general,
            secondary: IrqContext::handle_secondary,
        }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<IrqContext> {
        &self.context
    }

    fn handler(&self, line: IrqLine) -> IrqHandler {
        match line {
            IrqLine::General => self.general,
            IrqLine::Secondary => self.secondary,
        }
    }
}

/// Block-to-handlers map shared by blocks and the interrupt source
#[derive(Debug, Default)]
pub struct IrqRegistry {
    handlers: Mutex<HashMap<BlockId, InterruptHandlerSet>>,
}

impl IrqRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BlockId, InterruptHandlerSet>> {
        self.handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register the handlers of `block`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::InvalidState`] if the block already has handlers.
    pub fn register(&self, block: BlockId, set: InterruptHandlerSet) -> Result<()> {
        let mut handlers = self.lock();
        if handlers.contains_key(&block) {
            return Err(PabloError::invalid_state(format!("{block}: interrupt handlers already registered")));
        }
        handlers.insert(block, set);
        debug!("{block}: interrupt handlers registered");
        Ok(())
    }

    /// Remove the handlers of `block`
    pub fn unregister(&self, block: BlockId) -> Option<InterruptHandlerSet> {
        self.lock().remove(&block)
    }

    /// Whether `block` has handlers
    pub fn is_registered(&self, block: BlockId) -> bool {
        self.lock().contains_key(&block)
    }

    /// Read-and-clear the status of `line` on `block` and run its handler
    ///
    /// Returns the status bits handled; 0 when nothing was pending or the
    /// block has no handlers.
    ///
    /// # Errors
    ///
    /// Returns error only if the status register cannot be accessed.
    pub fn dispatch(&self, block: BlockId, line: IrqLine, backend: &dyn IspBackend) -> Result<u32> {
        let Some(set) = self.lock().get(&block).cloned() else {
            trace!("{block}: {line:?} interrupt without handlers");
            return Ok(0);
        };
        let status = backend.read32(block, line.status_reg())?;
        if status == 0 {
            return Ok(0);
        }
        backend.write32(block, line.clear_reg(), status)?;
        (set.handler(line))(&set.context, status);
        Ok(status)
    }
}

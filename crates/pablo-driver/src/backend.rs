//! Backend abstraction for ISP hardware access
//!
//! The backend is the "hardware library" underneath the pipeline engine:
//! register access per block, DMA-visible scratch memory, command-queue
//! submission, reset and idle polling. Everything above it is backend
//! agnostic.

use crate::cmdq::CmdqSubmission;
use crate::error::{PabloError, Result};
use pablo_chip::block::BlockId;
use pablo_chip::regs;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Poll interval for the default busy-wait helpers
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// DMA-visible memory region handed out by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRegion {
    /// Device-virtual address
    pub dva: u64,
    /// Size in bytes
    pub size: usize,
}

/// ISP backend trait - unified interface for hardware and simulation
///
/// Methods take `&self`: one backend is shared by every block instance,
/// the VOTF link manager and the interrupt path.
pub trait IspBackend: Debug + Send + Sync {
    /// Open the backend for `device`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be found or mapped.
    fn init(device: &str) -> Result<Self>
    where
        Self: Sized;

    /// Read a 32-bit register of `block`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is outside the block window.
    fn read32(&self, block: BlockId, offset: u32) -> Result<u32>;

    /// Write a 32-bit register of `block`
    ///
    /// # Errors
    ///
    /// Returns error if the offset is outside the block window.
    fn write32(&self, block: BlockId, offset: u32, value: u32) -> Result<()>;

    /// Allocate DMA-visible scratch memory
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::OutOfMemory`] when the pool is exhausted.
    fn alloc_dma(&self, size: usize) -> Result<DmaRegion>;

    /// Release memory from [`IspBackend::alloc_dma`]
    fn free_dma(&self, region: DmaRegion);

    /// Copy staged bytes into a DMA region and make them visible to the device
    ///
    /// # Errors
    ///
    /// Returns error if `data` does not fit the region.
    fn sync_for_device(&self, region: &DmaRegion, data: &[u8]) -> Result<()>;

    /// Append one staged command-loader entry to the block's command queue
    ///
    /// # Errors
    ///
    /// Returns error if a queue register write fails.
    fn submit(&self, block: BlockId, submission: &CmdqSubmission) -> Result<()> {
        self.write32(block, regs::cmdq::QUE_HEADER_ADDR, lower_32(submission.header_dva))?;
        self.write32(block, regs::cmdq::QUE_PAYLOAD_ADDR, lower_32(submission.payload_dva))?;
        self.write32(block, regs::cmdq::QUE_PAIR_COUNT, submission.pair_count)?;
        self.write32(block, regs::cmdq::QUE_FRAME_ID, submission.fcount)?;
        self.write32(block, regs::cmdq::QUE_NUM_BUFFERS, submission.num_buffers)?;
        self.write32(block, regs::cmdq::ADD_TO_QUEUE, 1)
    }

    /// Soft-reset `block` and wait for completion
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if the reset does not complete.
    fn soft_reset(&self, block: BlockId, timeout: Duration) -> Result<()> {
        self.write32(block, regs::SW_RESET, 1)?;
        poll_until(timeout, &format!("{block} soft reset"), || {
            Ok(self.read32(block, regs::SW_RESET_STATUS)? == 0)
        })
    }

    /// Wait until `block` reports idle
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::Timeout`] if the block stays busy.
    fn wait_idle(&self, block: BlockId, timeout: Duration) -> Result<()> {
        poll_until(timeout, &format!("{block} idle"), || {
            Ok(self.read32(block, regs::IDLE_STATUS)? & regs::idle::IDLE != 0)
        })
    }

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// Check if backend is ready
    fn is_ready(&self) -> bool;
}

/// Poll `done` until it returns true or `timeout` elapses
///
/// # Errors
///
/// Returns [`PabloError::Timeout`] on expiry, or the first error from `done`.
pub fn poll_until(
    timeout: Duration,
    what: &str,
    mut done: impl FnMut() -> Result<bool>,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if done()? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(PabloError::timeout(what, timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn lower_32(value: u64) -> u32 {
    value as u32
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Userspace I/O device (`/dev/uioN`)
    Uio,

    /// Software simulation, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uio => write!(f, "UIO"),
            Self::Software => write!(f, "Software (simulated ISP)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Use UIO when the device exists, otherwise simulate
    Auto,

    /// Force UIO
    Uio,

    /// Force software simulation
    Software,
}

/// Select appropriate backend based on availability
///
/// # Errors
///
/// Returns error if the forced backend cannot be initialized.
pub fn select_backend(
    selection: BackendSelection,
    device: &str,
) -> Result<std::sync::Arc<dyn IspBackend>> {
    use crate::backends::software::SoftwareBackend;
    use crate::backends::uio::UioBackend;
    use std::sync::Arc;

    match selection {
        BackendSelection::Auto => {
            if let Ok(backend) = UioBackend::init(device) {
                tracing::info!("Using UIO backend for {device}");
                return Ok(Arc::new(backend));
            }
            tracing::info!("UIO unavailable, simulating {device}");
            SoftwareBackend::init(device).map(|b| Arc::new(b) as Arc<dyn IspBackend>)
        }

        BackendSelection::Uio => {
            UioBackend::init(device).map(|b| Arc::new(b) as Arc<dyn IspBackend>)
        }

        BackendSelection::Software => {
            SoftwareBackend::init(device).map(|b| Arc::new(b) as Arc<dyn IspBackend>)
        }
    }
}

//! Common register map shared by every Pablo block.
//!
//! All offsets are relative to the block's register window
//! (see [`crate::block::BlockId::base`]). Blocks that do not implement a
//! sub-function simply ignore writes to its registers.
//!
//! ## Window layout
//!
//! ```text
//! 0x0000..0x0040  control / reset / idle / CoreX
//! 0x0040..0x0080  interrupt lines 0 and 1
//! 0x0080..0x0100  command queue
//! 0x0100..0x0200  chain, DTP, OTF, grid, denoise
//! 0x0200..0x0240  sub-block bypass flags
//! 0x0400..0x0540  scalers (stride 0x40)
//! 0x2000..0x3000  DMA channels (stride 0x100, RDMA then WDMA)
//! 0x6000..0x7000  VOTF TWS / TRS
//! 0x8000..        CoreX shadow bank 1
//! ```

// ── Control ──────────────────────────────────────────────────────────────────

/// Write 1 to soft-reset the block.
pub const SW_RESET: u32 = 0x0000;
/// Reads 0 once a soft reset completes.
pub const SW_RESET_STATUS: u32 = 0x0004;
/// Reads [`idle::IDLE`] when no frame is in flight.
pub const IDLE_STATUS: u32 = 0x0008;
/// Global block enable.
pub const CORE_ENABLE: u32 = 0x000C;
/// CoreX (double-buffered register set) enable.
pub const COREX_ENABLE: u32 = 0x0010;
/// CoreX bank selected for the next frame.
pub const COREX_SELECT: u32 = 0x0014;
/// Write 1 to copy the selected bank into the active set at frame start.
pub const COREX_UPDATE: u32 = 0x0018;

/// Offset of the CoreX shadow bank 1 relative to bank 0.
pub const COREX_BANK_OFFSET: u32 = 0x8000;

/// Idle status bit definitions
pub mod idle {
    /// No frame in flight, all DMA drained.
    pub const IDLE: u32 = 1 << 0;
}

// ── Interrupts ───────────────────────────────────────────────────────────────

/// Interrupt line registers.
pub mod irq {
    /// Line 0 (general status) pending bits.
    pub const INT0_STATUS: u32 = 0x0040;
    /// Line 0 write-1-to-clear.
    pub const INT0_CLEAR: u32 = 0x0044;
    /// Line 0 enable mask.
    pub const INT0_ENABLE: u32 = 0x0048;
    /// Line 1 (error / secondary status) pending bits.
    pub const INT1_STATUS: u32 = 0x0050;
    /// Line 1 write-1-to-clear.
    pub const INT1_CLEAR: u32 = 0x0054;
    /// Line 1 enable mask.
    pub const INT1_ENABLE: u32 = 0x0058;

    /// Line 0: frame start.
    pub const FRAME_START: u32 = 1 << 0;
    /// Line 0: frame end.
    pub const FRAME_END: u32 = 1 << 1;
    /// Line 0: command-queue setting applied.
    pub const SETTING_DONE: u32 = 1 << 2;
    /// Line 0: CoreX bank copy finished.
    pub const COREX_END: u32 = 1 << 3;
    /// Line 0: all write DMAs finished.
    pub const DMA_DONE: u32 = 1 << 4;
    /// Default line 0 mask.
    pub const INT0_MASK: u32 = FRAME_START | FRAME_END | SETTING_DONE | COREX_END | DMA_DONE;

    /// Line 1: line-buffer overflow.
    pub const OVERFLOW: u32 = 1 << 0;
    /// Line 1: DMA bus error.
    pub const DMA_ERROR: u32 = 1 << 1;
    /// Line 1: command-queue error.
    pub const CMDQ_ERROR: u32 = 1 << 2;
    /// Line 1: VOTF token lost.
    pub const VOTF_LOST: u32 = 1 << 3;
    /// Line 1: frame start arrived while previous frame still active.
    pub const FRAME_COLLISION: u32 = 1 << 4;
    /// Default line 1 mask.
    pub const INT1_MASK: u32 = OVERFLOW | DMA_ERROR | CMDQ_ERROR | VOTF_LOST | FRAME_COLLISION;
}

// ── Command queue ────────────────────────────────────────────────────────────

/// Command-queue registers.
pub mod cmdq {
    /// Queue enable.
    pub const ENABLE: u32 = 0x0080;
    /// Header DVA of the next queued frame.
    pub const QUE_HEADER_ADDR: u32 = 0x0084;
    /// Payload DVA of the next queued frame.
    pub const QUE_PAYLOAD_ADDR: u32 = 0x0088;
    /// Payload pair count.
    pub const QUE_PAIR_COUNT: u32 = 0x008C;
    /// Frame id (fcount) tag.
    pub const QUE_FRAME_ID: u32 = 0x0090;
    /// Packed `(batch << 16) | index` buffer count.
    pub const QUE_NUM_BUFFERS: u32 = 0x0094;
    /// Write 1 to append the staged entry to the queue.
    pub const ADD_TO_QUEUE: u32 = 0x0098;
    /// Number of entries currently queued.
    pub const QUEUE_STATUS: u32 = 0x009C;
}

// ── Chain / DTP / OTF ────────────────────────────────────────────────────────

/// Input size of the processing chain, `(w << 16) | h`.
pub const CHAIN_SRC_SIZE: u32 = 0x0100;
/// Output size of the processing chain.
pub const CHAIN_DST_SIZE: u32 = 0x0104;
/// Chain input select: 0 = OTF, 1 = RDMA, 2 = VOTF.
pub const CHAIN_INPUT_SELECT: u32 = 0x0108;
/// Chain output select bits: bit0 OTF, bit1 WDMA, bit2 VOTF.
pub const CHAIN_OUTPUT_SELECT: u32 = 0x010C;

/// Data-test-pattern generator size.
pub const DTP_SIZE: u32 = 0x0110;
/// Data-test-pattern selection.
pub const DTP_PATTERN: u32 = 0x0114;
/// DTP bypass (1 = pass real pixels).
pub const DTP_BYPASS: u32 = 0x0118;

/// OTF input enable / format.
pub const OTF_IN_CTRL: u32 = 0x0140;
/// OTF input size.
pub const OTF_IN_SIZE: u32 = 0x0144;
/// OTF input crop position `(x << 16) | y`.
pub const OTF_IN_CROP_POS: u32 = 0x0148;
/// OTF input crop size.
pub const OTF_IN_CROP_SIZE: u32 = 0x014C;
/// OTF output enable / format.
pub const OTF_OUT_CTRL: u32 = 0x0150;
/// OTF output size.
pub const OTF_OUT_SIZE: u32 = 0x0154;
/// OTF output crop position.
pub const OTF_OUT_CROP_POS: u32 = 0x0158;
/// OTF output crop size.
pub const OTF_OUT_CROP_SIZE: u32 = 0x015C;

// ── Grid / denoise ───────────────────────────────────────────────────────────

/// Lens-shading grid bin size `(w << 16) | h`.
pub const GRID_BIN_SIZE: u32 = 0x0180;
/// Grid start offset in the full (unstriped) frame.
pub const GRID_START: u32 = 0x0184;
/// Grid step in 10-bit fixed point.
pub const GRID_STEP: u32 = 0x0188;
/// Grid cell count `(nx << 16) | ny`.
pub const GRID_COUNT: u32 = 0x018C;
/// Grid enable.
pub const GRID_CTRL: u32 = 0x0190;

/// Denoise working size.
pub const DNS_SIZE: u32 = 0x01A0;
/// Denoise stripe start x (full-frame coordinate).
pub const DNS_STRIPE_START: u32 = 0x01A4;

// ── Bypass ───────────────────────────────────────────────────────────────────

/// Sub-block bypass flags.
pub mod bypass {
    /// First bypass register; sub-block `n` lives at `BASE + 4 * n`.
    pub const BASE: u32 = 0x0200;
}

/// Optional sub-blocks with a bypass flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubBlock {
    /// SBWC / bayer decompression front-end.
    Decompression,
    /// Gamma LUT.
    Gamma,
    /// Lens-shading correction (grid driven).
    Lsc,
    /// Spatial denoise.
    Denoise,
    /// Colour correction matrix.
    Ccm,
    /// Sharpening.
    Sharpen,
}

impl SubBlock {
    /// Bypass register of this sub-block.
    pub const fn bypass_reg(self) -> u32 {
        bypass::BASE + 4 * (self as u32)
    }
}

// ── Scalers ──────────────────────────────────────────────────────────────────

/// Scaler register banks.
pub mod scaler {
    /// First scaler bank.
    pub const BASE: u32 = 0x0400;
    /// Distance between banks.
    pub const STRIDE: u32 = 0x40;
    /// Enable / mode.
    pub const CTRL: u32 = 0x00;
    /// Source size.
    pub const SRC_SIZE: u32 = 0x04;
    /// Destination size.
    pub const DST_SIZE: u32 = 0x08;
    /// Horizontal ratio, 20-bit fixed point.
    pub const H_RATIO: u32 = 0x0C;
    /// Vertical ratio, 20-bit fixed point.
    pub const V_RATIO: u32 = 0x10;
    /// Input crop position.
    pub const CROP_POS: u32 = 0x14;
    /// Input crop size.
    pub const CROP_SIZE: u32 = 0x18;
    /// Initial horizontal phase offset (stripe continuation).
    pub const H_PHASE: u32 = 0x1C;

    /// Register of field `reg` in scaler bank `index`.
    pub const fn reg(index: u32, reg: u32) -> u32 {
        BASE + index * STRIDE + reg
    }
}

// ── DMA ──────────────────────────────────────────────────────────────────────

/// DMA channel register banks.
pub mod dma {
    /// First channel bank.
    pub const BASE: u32 = 0x2000;
    /// Distance between banks.
    pub const STRIDE: u32 = 0x100;
    /// Read channels per block.
    pub const MAX_RDMA: u32 = 8;
    /// Write channels per block.
    pub const MAX_WDMA: u32 = 8;
    /// Address slots per channel (multi-buffer batches).
    pub const MAX_ADDRS: u32 = 8;

    /// Channel enable.
    pub const EN: u32 = 0x00;
    /// [`crate::format::PixelFormat::hw_code`].
    pub const FORMAT: u32 = 0x04;
    /// Bit depth in memory.
    pub const BITWIDTH: u32 = 0x08;
    /// Width in pixels.
    pub const WIDTH: u32 = 0x0C;
    /// Height in lines.
    pub const HEIGHT: u32 = 0x10;
    /// Line stride in bytes.
    pub const STRIDE_BYTES: u32 = 0x14;
    /// SBWC encoding (see [`crate::format::SbwcType::encode`]).
    pub const SBWC: u32 = 0x18;
    /// LLC allocation hint.
    pub const LLC_HINT: u32 = 0x1C;
    /// Address slot `n` low word.
    pub const fn addr_lo(n: u32) -> u32 {
        0x40 + 8 * n
    }
    /// Address slot `n` high word.
    pub const fn addr_hi(n: u32) -> u32 {
        0x44 + 8 * n
    }
}

/// VOTF fabric window inside each block.
pub mod votf {
    /// Start of the VOTF register window.
    pub const BASE: u32 = 0x6000;
}

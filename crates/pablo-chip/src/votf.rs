//! VOTF (virtual OTF) token-FIFO fabric.
//!
//! Each block exposes write-side ("TWS", producer) and read-side ("TRS",
//! consumer) service ports. A link is programmed by configuring the
//! consumer's TRS first and then the producer's TWS.
//!
//! ```text
//! producer block                         consumer block
//! ┌────────────┐   tokens (N lines)      ┌────────────┐
//! │ TWS[ch]    │ ──────────────────────▶ │ TRS[ch]    │
//! └────────────┘                         └────────────┘
//! ```

use crate::block::BlockId;
use crate::regs;

/// Service ports per direction per block.
pub const MAX_CHANNELS: u8 = 8;

/// First TWS bank.
pub const TWS_BASE: u32 = regs::votf::BASE;
/// First TRS bank.
pub const TRS_BASE: u32 = regs::votf::BASE + 0x800;
/// Distance between banks.
pub const STRIDE: u32 = 0x40;

/// Service enable.
pub const ENABLE: u32 = 0x00;
/// Outstanding-token limit.
pub const LIMIT: u32 = 0x04;
/// Connected peer block (see [`peer_code`]).
pub const PEER_IP: u32 = 0x08;
/// Connected peer channel.
pub const PEER_CH: u32 = 0x0C;
/// Frame width in pixels.
pub const WIDTH: u32 = 0x10;
/// Frame height in lines.
pub const HEIGHT: u32 = 0x14;
/// Lines per token.
pub const TOKEN_SIZE: u32 = 0x18;
/// Write 1 to flush outstanding tokens.
pub const FLUSH: u32 = 0x1C;
/// Reads non-zero while a flush is in progress.
pub const FLUSH_STATUS: u32 = 0x20;
/// Service mode (see [`mode`]).
pub const MODE: u32 = 0x24;

/// Maximum outstanding-token limit.
pub const LIMIT_MAX: u32 = 0xFFFF;

/// Service mode values.
pub mod mode {
    /// Plain token streaming.
    pub const STREAMING: u32 = 0;
    /// Streaming gated on the producer's frame start.
    pub const FRAME_START_STREAMING: u32 = 1;
}

/// TWS register of `field` for channel `ch`.
pub const fn tws_reg(ch: u8, field: u32) -> u32 {
    TWS_BASE + ch as u32 * STRIDE + field
}

/// TRS register of `field` for channel `ch`.
pub const fn trs_reg(ch: u8, field: u32) -> u32 {
    TRS_BASE + ch as u32 * STRIDE + field
}

/// Fabric id of a block, written into a peer's `PEER_IP`.
pub const fn peer_code(block: BlockId) -> u32 {
    0x10 + block as u32
}

/// Natural producer granularity, in lines per token.
///
/// Raw-capture outputs of the 3AA blocks emit 40-line tokens; every
/// pixel-streaming block emits single lines.
pub const fn producer_token_lines(block: BlockId) -> u32 {
    match block {
        BlockId::Taa0 | BlockId::Taa1 => 40,
        _ => 1,
    }
}

/// Token sizes a consumer's TRS accepts.
pub const fn consumer_token_lines(block: BlockId) -> &'static [u32] {
    match block {
        BlockId::Byrp | BlockId::Mtnr => &[1, 40],
        BlockId::Paf0 | BlockId::Paf1 | BlockId::Taa0 | BlockId::Taa1 => &[],
        _ => &[1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trs_and_tws_banks_are_disjoint() {
        assert!(tws_reg(MAX_CHANNELS - 1, MODE) < TRS_BASE);
        assert!(trs_reg(MAX_CHANNELS - 1, MODE) < regs::COREX_BANK_OFFSET);
    }

    #[test]
    fn raw_capture_uses_forty_line_tokens() {
        assert_eq!(producer_token_lines(BlockId::Taa0), 40);
        assert_eq!(producer_token_lines(BlockId::Rgbp), 1);
        assert!(consumer_token_lines(BlockId::Byrp).contains(&40));
        assert!(!consumer_token_lines(BlockId::Mcsc).contains(&40));
    }
}

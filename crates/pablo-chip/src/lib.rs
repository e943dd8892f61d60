//! Silicon model for the Pablo camera ISP.
//!
//! This crate has **no dependencies** and **no hardware access**; it is a
//! pure model of the silicon: block identifiers, the per-block register
//! map, DMA channel tables, VOTF endpoints and the command-loader layout.
//!
//! Register offsets are relative to a block's own window. The driver crate
//! decides how a window is reached (UIO mapping, software simulation).
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`block`] | Block identifiers, register windows, DMA channel tables |
//! | [`regs`] | Common per-block register map and bit definitions |
//! | [`votf`] | VOTF TRS/TWS register layout and token granularity |
//! | [`cmdq`] | Command-loader header/payload wire layout, buffer packing |
//! | [`format`] | Pixel formats, SBWC encoding, LLC hints |
//! | [`scaler`] | 20-bit fixed-point scale ratios and scaler limits |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod block;
pub mod cmdq;
pub mod format;
pub mod regs;
pub mod scaler;
pub mod votf;

/// Pack a width/height pair into the `(w << 16) | h` layout used by every
/// size register.
pub const fn pack_size(width: u32, height: u32) -> u32 {
    ((width & 0xFFFF) << 16) | (height & 0xFFFF)
}

/// Inverse of [`pack_size`].
pub const fn unpack_size(value: u32) -> (u32, u32) {
    (value >> 16, value & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_packing() {
        let packed = pack_size(4032, 3024);
        assert_eq!(packed, (4032 << 16) | 3024);
        assert_eq!(unpack_size(packed), (4032, 3024));
    }
}

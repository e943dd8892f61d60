//! Per-frame pipeline configuration engine for the Pablo camera ISP.
//!
//! Each hardware block (3AA, RGBP, MTNR, PAF, LME) is driven through one
//! shot pipeline that turns a frame descriptor plus stream parameters into
//! a command-loader payload, submits it, and tracks the frame through its
//! interrupts.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   UioBackend      - register window and DMA pool through /dev/uioN
//!
//! Development / CI:
//!   SoftwareBackend - simulated register file, applies command payloads
//! ```
//!
//! # Shot pipeline
//!
//! ```text
//! IDLE -> PARAM_UPDATE -> DMA_PROGRAM -> SIZE_PROGRAM -> [RTA_OVERRIDE]
//!      -> CMDQ_COMMIT -> ARMED -> DONE
//! ```
//!
//! Repeated or batch-tail frames go straight from PARAM_UPDATE to
//! CMDQ_COMMIT with the last committed payload. Any failure rolls the
//! command loader back and reports the frame as not done.
//!
//! # Quick start
//!
//! ```no_run
//! use pablo_driver::params::OtfParam;
//! use pablo_driver::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = select_backend(BackendSelection::Auto, "pablo-isp")?;
//! let config = Arc::new(IspConfig::from_env());
//! let mut rgbp = RgbpBlock::new(
//!     Rgbp,
//!     0,
//!     backend,
//!     config,
//!     Arc::new(IrqRegistry::new()),
//!     Arc::new(NullNotifier),
//! );
//!
//! rgbp.open(0)?;
//! rgbp.init(0, InitFlags::default())?;
//! let crop = Rect::new(0, 0, 1920, 1080);
//! let otf = OtfParam { enable: true, size: crop.size(), crop, ..OtfParam::default() };
//! rgbp.set_param(0, &[Param::OtfInput(otf), Param::InputCrop(crop), Param::OutputCrop(crop)])?;
//! rgbp.enable(0)?;
//! let outcome = rgbp.shot(&Frame::new(0, 1))?;
//! println!("{} registers committed", outcome.pair_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod blocks;
pub mod cmdq;
pub mod config;
pub mod dma;
mod error;
pub mod facade;
pub mod frame;
pub mod interrupt;
mod lifecycle;
pub mod mmio;
pub mod params;
pub mod regcache;
pub mod repeat;
pub mod sequencer;
pub mod stripe;
pub mod votf;

/// Hardware constants (re-exported from pablo-chip).
pub mod chip {
    pub use pablo_chip::block::{BlockId, DmaChannelDesc, DmaDirection};
    pub use pablo_chip::format::{PixelFormat, SbwcType};
    pub use pablo_chip::regs::SubBlock;
}

pub use backend::{poll_until, select_backend, BackendSelection, BackendType, DmaRegion, IspBackend};
pub use backends::{SoftwareBackend, UioBackend};
pub use blocks::{BlockOps, Lme, Mtnr, Paf, Rgbp, SizeContext, Taa};
pub use config::{FeatureFlags, IspConfig, StripeConfig};
pub use error::{PabloError, Result, ShotStage};
pub use frame::{DoneType, ErrorType, Frame, FrameNotifier, NodeRequest, NullNotifier, StreamId};
pub use interrupt::{IrqContext, IrqLine, IrqRegistry};
pub use lifecycle::{
    DumpType, HardwareBlockDriver, HwBlock, InitFlags, LifecycleState, LmeBlock, MtnrBlock,
    PafBlock, RgbpBlock, TaaBlock,
};
pub use params::{FrameParameterSet, InputPath, Param, Rect, Size, StreamParams};
pub use sequencer::{RtaDecision, RtaOverride, ShotOutcome, ShotState};
pub use stripe::{StripeRegion, StripeTiler};
pub use votf::{LinkId, VotfEndpoint, VotfLinkManager, VotfMode};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        select_backend, BackendSelection, Frame, FrameNotifier, HardwareBlockDriver, HwBlock,
        InitFlags, IrqRegistry, IspBackend, IspConfig, NodeRequest, NullNotifier, PabloError,
        Param, Rect, RgbpBlock, Rgbp, Size, StripeTiler,
    };
}

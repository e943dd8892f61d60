//! Frame descriptors and completion callbacks
//!
//! A [`Frame`] is what the group/frame manager hands to `shot`: the frame
//! count, which DMA nodes are requested with which buffers, stripe and
//! burst position, plus any per-frame parameter overrides. Completion is
//! reported back through a [`FrameNotifier`].

use crate::error::PabloError;
use crate::params::{Param, Rect, UpstreamCropSummary};
use crate::repeat::RepeatInfo;
use pablo_chip::block::{BlockId, DmaDirection};
use pablo_chip::format::{PixelFormat, SbwcType};
use std::sync::Mutex;

/// Stream identifier
pub type StreamId = u32;

/// Request for one DMA node of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    /// Channel direction
    pub direction: DmaDirection,
    /// Channel index in the block's table
    pub index: u8,
    /// Whether the node is used this frame
    pub request: bool,
    /// Region of the buffer transferred
    pub crop: Rect,
    /// Pixel layout
    pub format: PixelFormat,
    /// Bits per sample in memory
    pub bit_depth: u32,
    /// Compression mode
    pub sbwc: SbwcType,
    /// Compression level
    pub sbwc_extra: u32,
    /// Device-virtual buffer addresses, one per batch buffer
    pub addrs: Vec<u64>,
}

impl NodeRequest {
    /// Requested write node
    pub fn output(index: u8, format: PixelFormat, crop: Rect, addrs: Vec<u64>) -> Self {
        Self {
            direction: DmaDirection::Write,
            index,
            request: true,
            crop,
            format,
            bit_depth: format.bits_per_pixel(),
            sbwc: SbwcType::Disabled,
            sbwc_extra: 0,
            addrs,
        }
    }

    /// Requested read node
    pub fn input(index: u8, format: PixelFormat, crop: Rect, addrs: Vec<u64>) -> Self {
        Self {
            direction: DmaDirection::Read,
            ..Self::output(index, format, crop, addrs)
        }
    }

    /// Node explicitly not used this frame
    pub fn idle(direction: DmaDirection, index: u8) -> Self {
        Self {
            direction,
            request: false,
            addrs: Vec::new(),
            ..Self::output(index, PixelFormat::Meta, Rect::default(), Vec::new())
        }
    }
}

/// Stripe position of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StripeMeta {
    /// Region index
    pub index: u32,
    /// Region count; below two means untiled
    pub total: u32,
}

/// Multi-buffer burst position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchInfo {
    /// Buffers in the burst
    pub count: u32,
    /// Index of this buffer
    pub index: u32,
}

/// Frame descriptor handed to `shot`
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Frame count
    pub fcount: u32,
    /// Owning stream
    pub stream: StreamId,
    /// DMA node requests
    pub nodes: Vec<NodeRequest>,
    /// Stripe position
    pub stripe: StripeMeta,
    /// Burst position
    pub batch: BatchInfo,
    /// Repeat-group position
    pub repeat: RepeatInfo,
    /// Per-frame overrides applied after the stream parameters
    pub params: Vec<Param>,
    /// Bayer crop of the upstream block, copied into the frame
    pub upstream: Option<UpstreamCropSummary>,
}

impl Frame {
    /// Plain frame `fcount` of `stream`
    pub fn new(stream: StreamId, fcount: u32) -> Self {
        Self {
            fcount,
            stream,
            ..Self::default()
        }
    }

    /// Add a node request
    #[must_use]
    pub fn with_node(mut self, node: NodeRequest) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a per-frame override
    #[must_use]
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Set the stripe position
    #[must_use]
    pub const fn with_stripe(mut self, index: u32, total: u32) -> Self {
        self.stripe = StripeMeta { index, total };
        self
    }

    /// Set the burst position
    #[must_use]
    pub const fn with_batch(mut self, count: u32, index: u32) -> Self {
        self.batch = BatchInfo { count, index };
        self
    }
}

/// Successful completion kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneType {
    /// Frame processed
    Normal,
    /// Frame re-triggered from the previous programming
    Repeated,
}

/// Failure kind reported for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Rejected configuration; the caller must correct parameters
    Config,
    /// Allocation or buffer failure
    Resource,
    /// No frame start within the liveness bound
    Timeout,
    /// Hardware reported an error interrupt
    Hardware,
    /// Frame dropped during overflow recovery
    Overflow,
}

impl ErrorType {
    /// Classify a shot error
    pub fn of(err: &PabloError) -> Self {
        let inner = match err {
            PabloError::ShotFailed { source, .. } => source.as_ref(),
            other => other,
        };
        if inner.is_configuration() || matches!(inner, PabloError::InvalidState { .. }) {
            Self::Config
        } else if inner.is_timeout() {
            Self::Timeout
        } else if matches!(inner, PabloError::OutOfMemory { .. } | PabloError::CommandBufferFull { .. }) {
            Self::Resource
        } else {
            Self::Hardware
        }
    }
}

/// Frame completion callbacks of the group/frame manager
///
/// Called from interrupt dispatch as well as from `shot`, so
/// implementations must not block.
pub trait FrameNotifier: Send + Sync + std::fmt::Debug {
    /// FRAME_START seen for `fcount`
    fn frame_start(&self, block: BlockId, fcount: u32);

    /// Frame finished
    fn frame_done(&self, block: BlockId, fcount: u32, done: DoneType);

    /// Frame lost or rejected
    fn frame_not_done(&self, block: BlockId, fcount: u32, error: ErrorType);
}

/// Notifier that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl FrameNotifier for NullNotifier {
    fn frame_start(&self, _block: BlockId, _fcount: u32) {}
    fn frame_done(&self, _block: BlockId, _fcount: u32, _done: DoneType) {}
    fn frame_not_done(&self, _block: BlockId, _fcount: u32, _error: ErrorType) {}
}

/// Event kept by [`RecordingNotifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// See [`FrameNotifier::frame_start`]
    Start(BlockId, u32),
    /// See [`FrameNotifier::frame_done`]
    Done(BlockId, u32, DoneType),
    /// See [`FrameNotifier::frame_not_done`]
    NotDone(BlockId, u32, ErrorType),
}

/// Notifier that records events in order
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<FrameEvent>>,
}

impl RecordingNotifier {
    /// Events so far
    pub fn events(&self) -> Vec<FrameEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: FrameEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
    }
}

impl FrameNotifier for RecordingNotifier {
    fn frame_start(&self, block: BlockId, fcount: u32) {
        self.push(FrameEvent::Start(block, fcount));
    }

    fn frame_done(&self, block: BlockId, fcount: u32, done: DoneType) {
        self.push(FrameEvent::Done(block, fcount, done));
    }

    fn frame_not_done(&self, block: BlockId, fcount: u32, error: ErrorType) {
        self.push(FrameEvent::NotDone(block, fcount, error));
    }
}

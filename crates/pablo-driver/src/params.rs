//! Frame parameter sets
//!
//! A [`FrameParameterSet`] is the per-(block, stream) configuration record
//! rebuilt on every shot. Stream-persistent parameters arrive through
//! `set_param` and are merged into it region by region, guided by a
//! [`ParamMap`] of pending regions.

use crate::dma::DmaParam;
use crate::error::{PabloError, Result};
use pablo_chip::block::BlockId;
use pablo_chip::format::PixelFormat;
use serde::{Serialize, Serializer};
use tracing::debug;

/// Serialize a silicon-model value by its `Debug` name.
pub(crate) fn ser_debug<T: std::fmt::Debug, S: Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:?}"))
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Size {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Size {
    /// Create a size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Register encoding `(w << 16) | h`
    pub const fn packed(&self) -> u32 {
        pablo_chip::pack_size(self.width, self.height)
    }

    /// Whether `other` fits inside `self`
    pub const fn contains(&self, other: Self) -> bool {
        other.width <= self.width && other.height <= self.height
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Rect {
    /// Create a rectangle
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle at the origin covering `size`
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Dimensions
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether either dimension is zero
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies inside a `bounds`-sized source
    pub fn fits_within(&self, bounds: Size) -> bool {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        right <= u64::from(bounds.width) && bottom <= u64::from(bounds.height)
    }

    /// Register encoding of the position `(x << 16) | y`
    pub const fn packed_pos(&self) -> u32 {
        pablo_chip::pack_size(self.x, self.y)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Where the processing chain takes its pixels from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InputPath {
    /// Direct on-the-fly input from the upstream block
    #[default]
    Otf,
    /// Read DMA from memory
    Rdma,
    /// VOTF token stream
    Votf,
}

impl InputPath {
    /// `CHAIN_INPUT_SELECT` encoding
    pub const fn hw_code(self) -> u32 {
        match self {
            Self::Otf => 0,
            Self::Rdma => 1,
            Self::Votf => 2,
        }
    }
}

/// OTF input or output descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OtfParam {
    /// Port enabled
    pub enable: bool,
    /// Pixel layout on the port
    #[serde(serialize_with = "ser_debug")]
    pub format: PixelFormat,
    /// Bits per sample
    pub bit_depth: u32,
    /// Full size presented on the port
    pub size: Size,
    /// Crop applied on the port
    pub crop: Rect,
}

impl Default for OtfParam {
    fn default() -> Self {
        Self {
            enable: false,
            format: PixelFormat::Bayer16,
            bit_depth: 10,
            size: Size::default(),
            crop: Rect::default(),
        }
    }
}

/// Stripe bookkeeping carried in the parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StripeInfo {
    /// Region index
    pub index: u32,
    /// Region count; 0 means no tiling
    pub total_count: u32,
    /// Margin on the left of this region
    pub left_margin: u32,
    /// Margin on the right of this region
    pub right_margin: u32,
    /// Core start in full-frame coordinates
    pub start_x: u32,
    /// Width of the untiled frame
    pub full_width: u32,
    /// Height of the untiled frame
    pub full_height: u32,
}

impl StripeInfo {
    /// Whether tiling is active
    pub const fn is_tiled(&self) -> bool {
        self.total_count > 1
    }
}

/// Temporal noise reduction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TnrMode {
    /// Blend with the previous frame
    #[default]
    Normal,
    /// First frame of a sequence: no previous frame to read
    First,
    /// TNR disabled
    Bypass,
}

/// Lens-shading grid geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GridConfig {
    /// Grid enabled
    pub enable: bool,
    /// Cell size in pixels
    pub bin: Size,
    /// Grid origin x in full-frame coordinates
    pub start_x: u32,
    /// Grid origin y
    pub start_y: u32,
    /// Cell count
    pub cells: Size,
}

/// Control-plane switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControlParam {
    /// Bypass the gamma LUT
    pub gamma_bypass: bool,
    /// Bypass colour correction
    pub ccm_bypass: bool,
    /// Bypass sharpening
    pub sharpen_bypass: bool,
}

/// Independently updatable part of a parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRegion {
    /// [`ControlParam`]
    Control,
    /// Input crop
    InputCrop,
    /// Output crop
    OutputCrop,
    /// OTF input descriptor
    OtfInput,
    /// OTF output descriptor
    OtfOutput,
    /// Stripe info
    Stripe,
    /// TNR mode
    Tnr,
    /// Grid geometry
    Grid,
    /// Read DMA channel `n`
    Rdma(u8),
    /// Write DMA channel `n`
    Wdma(u8),
}

impl ParamRegion {
    /// Bit of this region in a [`ParamMap`]
    pub const fn bit(self) -> u64 {
        let index = match self {
            Self::Control => 0,
            Self::InputCrop => 1,
            Self::OutputCrop => 2,
            Self::OtfInput => 3,
            Self::OtfOutput => 4,
            Self::Stripe => 5,
            Self::Tnr => 6,
            Self::Grid => 7,
            Self::Rdma(n) => 8 + (n as u32 & 0x7),
            Self::Wdma(n) => 16 + (n as u32 & 0x7),
        };
        1 << index
    }

    fn all(block: BlockId) -> impl Iterator<Item = Self> {
        let fixed = [
            Self::Control,
            Self::InputCrop,
            Self::OutputCrop,
            Self::OtfInput,
            Self::OtfOutput,
            Self::Stripe,
            Self::Tnr,
            Self::Grid,
        ];
        #[allow(clippy::cast_possible_truncation)]
        let rdma = (0..block.rdma_channels().len()).map(|n| Self::Rdma(n as u8));
        #[allow(clippy::cast_possible_truncation)]
        let wdma = (0..block.wdma_channels().len()).map(|n| Self::Wdma(n as u8));
        fixed.into_iter().chain(rdma).chain(wdma)
    }
}

/// Set of pending parameter regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamMap(u64);

impl ParamMap {
    /// Every region
    pub const ALL: Self = Self(u64::MAX);

    /// Empty map
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mark `region`
    pub fn insert(&mut self, region: ParamRegion) {
        self.0 |= region.bit();
    }

    /// Whether `region` is marked
    pub const fn contains(&self, region: ParamRegion) -> bool {
        self.0 & region.bit() != 0
    }

    /// Whether no region is marked
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bits
    pub const fn bits(&self) -> u64 {
        self.0
    }
}

/// One parameter value addressed to a region
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Control switches
    Control(ControlParam),
    /// Input crop
    InputCrop(Rect),
    /// Output crop
    OutputCrop(Rect),
    /// OTF input
    OtfInput(OtfParam),
    /// OTF output
    OtfOutput(OtfParam),
    /// Stripe info
    Stripe(StripeInfo),
    /// TNR mode
    Tnr(TnrMode),
    /// Grid
    Grid(GridConfig),
    /// Read DMA channel
    Rdma(u8, DmaParam),
    /// Write DMA channel
    Wdma(u8, DmaParam),
}

impl Param {
    /// Region this value belongs to
    pub const fn region(&self) -> ParamRegion {
        match self {
            Self::Control(_) => ParamRegion::Control,
            Self::InputCrop(_) => ParamRegion::InputCrop,
            Self::OutputCrop(_) => ParamRegion::OutputCrop,
            Self::OtfInput(_) => ParamRegion::OtfInput,
            Self::OtfOutput(_) => ParamRegion::OtfOutput,
            Self::Stripe(_) => ParamRegion::Stripe,
            Self::Tnr(_) => ParamRegion::Tnr,
            Self::Grid(_) => ParamRegion::Grid,
            Self::Rdma(n, _) => ParamRegion::Rdma(*n),
            Self::Wdma(n, _) => ParamRegion::Wdma(*n),
        }
    }
}

/// Per-(block, stream) configuration record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameParameterSet {
    /// Owning block
    #[serde(serialize_with = "ser_debug")]
    pub block: BlockId,
    /// Chain input path
    pub input_path: InputPath,
    /// Crop applied to the chain input
    pub input_crop: Rect,
    /// Crop applied to the chain output
    pub output_crop: Rect,
    /// OTF input descriptor
    pub otf_input: OtfParam,
    /// OTF output descriptor
    pub otf_output: OtfParam,
    /// Read DMA channels, indexed like the block's channel table
    pub rdma: Vec<DmaParam>,
    /// Write DMA channels
    pub wdma: Vec<DmaParam>,
    /// Stripe bookkeeping
    pub stripe: StripeInfo,
    /// Frame count of the last update
    pub frame_count: u32,
    /// TNR mode
    pub tnr_mode: TnrMode,
    /// Lens-shading grid
    pub grid: GridConfig,
    /// Control switches
    pub control: ControlParam,
}

impl FrameParameterSet {
    /// Empty set with every channel disabled
    pub fn new(block: BlockId) -> Self {
        Self {
            block,
            input_path: InputPath::default(),
            input_crop: Rect::default(),
            output_crop: Rect::default(),
            otf_input: OtfParam::default(),
            otf_output: OtfParam::default(),
            rdma: block.rdma_channels().iter().map(DmaParam::disabled_for).collect(),
            wdma: block.wdma_channels().iter().map(DmaParam::disabled_for).collect(),
            stripe: StripeInfo::default(),
            frame_count: 0,
            tnr_mode: TnrMode::default(),
            grid: GridConfig::default(),
            control: ControlParam::default(),
        }
    }

    /// Store one parameter value
    ///
    /// # Errors
    ///
    /// Returns error if a DMA index is beyond the block's channel table.
    pub fn apply(&mut self, param: &Param) -> Result<()> {
        match param {
            Param::Control(v) => self.control = *v,
            Param::InputCrop(v) => self.input_crop = *v,
            Param::OutputCrop(v) => self.output_crop = *v,
            Param::OtfInput(v) => self.otf_input = *v,
            Param::OtfOutput(v) => self.otf_output = *v,
            Param::Stripe(v) => self.stripe = *v,
            Param::Tnr(v) => self.tnr_mode = *v,
            Param::Grid(v) => self.grid = *v,
            Param::Rdma(n, v) => *self.rdma_mut(*n)? = v.clone(),
            Param::Wdma(n, v) => *self.wdma_mut(*n)? = v.clone(),
        }
        Ok(())
    }

    fn rdma_mut(&mut self, n: u8) -> Result<&mut DmaParam> {
        let block = self.block;
        self.rdma
            .get_mut(usize::from(n))
            .ok_or_else(|| PabloError::invalid_state(format!("{block} has no RDMA{n}")))
    }

    fn wdma_mut(&mut self, n: u8) -> Result<&mut DmaParam> {
        let block = self.block;
        self.wdma
            .get_mut(usize::from(n))
            .ok_or_else(|| PabloError::invalid_state(format!("{block} has no WDMA{n}")))
    }

    /// Copy one region from `src`
    pub fn copy_region(&mut self, src: &Self, region: ParamRegion) {
        match region {
            ParamRegion::Control => self.control = src.control,
            ParamRegion::InputCrop => self.input_crop = src.input_crop,
            ParamRegion::OutputCrop => self.output_crop = src.output_crop,
            ParamRegion::OtfInput => self.otf_input = src.otf_input,
            ParamRegion::OtfOutput => self.otf_output = src.otf_output,
            ParamRegion::Stripe => self.stripe = src.stripe,
            ParamRegion::Tnr => self.tnr_mode = src.tnr_mode,
            ParamRegion::Grid => self.grid = src.grid,
            ParamRegion::Rdma(n) => {
                if let (Some(dst), Some(s)) = (self.rdma.get_mut(usize::from(n)), src.rdma.get(usize::from(n))) {
                    dst.clone_from(s);
                }
            }
            ParamRegion::Wdma(n) => {
                if let (Some(dst), Some(s)) = (self.wdma.get_mut(usize::from(n)), src.wdma.get(usize::from(n))) {
                    dst.clone_from(s);
                }
            }
        }
    }

    /// Rebuild the frame set from the stream-persistent values
    ///
    /// Every region is copied, so overrides and node requests of the
    /// previous frame never carry over. Returns the number of regions
    /// changed since the last commit.
    pub fn update_from_control_plane(&mut self, stream: &Self, pending: ParamMap) -> usize {
        self.input_path = stream.input_path;
        let mut changed = 0;
        for region in ParamRegion::all(self.block) {
            self.copy_region(stream, region);
            if pending.contains(region) {
                changed += 1;
            }
        }
        debug!("{}: rebuilt frame set, {changed} regions changed (pmap {:#x})", self.block, pending.bits());
        changed
    }
}

/// Reject an output crop larger than the input handed to the block
///
/// # Errors
///
/// Returns [`PabloError::GeometryMismatch`]; the crop is never clamped.
pub fn validate_crop_chain(input: &Rect, output: &Rect) -> Result<()> {
    if output.width > input.width || output.height > input.height {
        return Err(PabloError::geometry_mismatch(format!(
            "output crop {output} exceeds input {input}"
        )));
    }
    Ok(())
}

/// Bayer crop of an upstream block, copied by value into each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamCropSummary {
    /// Block that produced the crop
    pub block: BlockId,
    /// Bayer crop handed downstream
    pub bayer_crop: Rect,
}

impl UpstreamCropSummary {
    /// Check a crop taken out of this bayer crop
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::GeometryMismatch`] if `crop` is larger.
    pub fn validate(&self, crop: &Rect) -> Result<()> {
        validate_crop_chain(&self.bayer_crop, crop).map_err(|_| {
            PabloError::geometry_mismatch(format!(
                "crop {crop} exceeds {} bayer crop {}",
                self.block, self.bayer_crop
            ))
        })
    }
}

/// Stream-persistent parameters plus the regions changed since the last commit
#[derive(Debug, Clone)]
pub struct StreamParams {
    persistent: FrameParameterSet,
    pending: ParamMap,
}

impl StreamParams {
    /// Fresh stream: every region pending
    pub fn new(block: BlockId) -> Self {
        Self {
            persistent: FrameParameterSet::new(block),
            pending: ParamMap::ALL,
        }
    }

    /// Store values; no hardware effect until the next shot
    ///
    /// # Errors
    ///
    /// Returns error if a value addresses a missing DMA channel. Values
    /// before the failing one are kept.
    pub fn set_param(&mut self, params: &[Param]) -> Result<()> {
        for param in params {
            self.persistent.apply(param)?;
            self.pending.insert(param.region());
        }
        Ok(())
    }

    /// Select where the stream's pixels come from
    pub fn set_input_path(&mut self, path: InputPath) {
        self.persistent.input_path = path;
    }

    /// Persistent values
    pub const fn persistent(&self) -> &FrameParameterSet {
        &self.persistent
    }

    /// Regions changed since the last commit
    pub const fn pending(&self) -> ParamMap {
        self.pending
    }

    /// Forget pending regions after a successful commit
    pub fn clear_pending(&mut self) {
        self.pending = ParamMap::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::DmaCommand;

    #[test]
    fn crop_chain_rejects_growth() {
        let input = Rect::new(0, 0, 4000, 3000);
        assert!(validate_crop_chain(&input, &Rect::new(8, 8, 4000, 3000)).is_ok());
        let err = validate_crop_chain(&input, &Rect::new(0, 0, 4032, 3000)).unwrap_err();
        assert!(matches!(err, PabloError::GeometryMismatch { .. }));
    }

    #[test]
    fn upstream_summary_names_block() {
        let summary = UpstreamCropSummary {
            block: BlockId::Taa0,
            bayer_crop: Rect::new(0, 0, 1920, 1080),
        };
        let err = summary.validate(&Rect::new(0, 0, 1920, 1088)).unwrap_err();
        assert!(err.to_string().contains("3AA0"));
    }

    #[test]
    fn rebuild_drops_previous_frame_values() {
        let mut stream = StreamParams::new(BlockId::Rgbp);
        stream.clear_pending();
        stream
            .set_param(&[Param::InputCrop(Rect::new(0, 0, 1920, 1080))])
            .unwrap();
        let mut stale = FrameParameterSet::new(BlockId::Rgbp);
        stale.output_crop = Rect::new(0, 0, 640, 480);
        stale.wdma[0].cmd = DmaCommand::Enable;

        let changed = stale.update_from_control_plane(stream.persistent(), stream.pending());
        assert_eq!(changed, 1);
        assert_eq!(stale.input_crop, Rect::new(0, 0, 1920, 1080));
        assert_eq!(stale.output_crop, stream.persistent().output_crop);
        assert!(!stale.wdma[0].is_enabled());
    }

    #[test]
    fn missing_channel_is_rejected() {
        let mut stream = StreamParams::new(BlockId::Paf0);
        let mut param = DmaParam::disabled_for(&BlockId::Paf0.rdma_channels()[0]);
        param.cmd = DmaCommand::Enable;
        assert!(stream.set_param(&[Param::Wdma(0, param)]).is_err());
    }

    #[test]
    fn rect_bounds() {
        assert!(Rect::new(10, 10, 100, 100).fits_within(Size::new(110, 110)));
        assert!(!Rect::new(11, 10, 100, 100).fits_within(Size::new(110, 110)));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits_within(Size::new(u32::MAX, 1)));
    }

    #[test]
    fn param_bits_are_distinct() {
        let regions = ParamRegion::all(BlockId::Mcsc).collect::<Vec<_>>();
        let mut seen = 0u64;
        for r in regions {
            assert_eq!(seen & r.bit(), 0, "{r:?}");
            seen |= r.bit();
        }
    }
}

//! Stripe (horizontal tiling) decomposition
//!
//! A frame wider than a block's line buffer is processed as `N` regions.
//! Every region has a *core* (the pixels it is responsible for) and
//! margins of overlap on its inner sides, so filters near a seam see real
//! neighbours. Cores tile `[0, full_width)` exactly:
//!
//! ```text
//! |<--- core 0 --->|<--- core 1 --->|<----- core 2 ----->|
//!                  |<-m->        <-m->|
//! region 0 reads:  [core 0 + m]
//! region 1 reads:           [m + core 1 + m]
//! region 2 reads:                          [m + core 2]
//! ```
//!
//! Non-last cores are `align_down(full_width / N, align)` wide; the last
//! region takes whatever is left.

use crate::config::StripeConfig;
use crate::error::{PabloError, Result};
use crate::params::{Rect, StripeInfo};
use pablo_chip::scaler;
use tracing::{debug, warn};

/// Denominator of [`StripeRegion::pixel_ratio`]
pub const RATIO_PRECISION: u32 = 1000;

/// One horizontal region of a logical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeRegion {
    /// Region index
    pub index: u32,
    /// Region count
    pub total_count: u32,
    /// Absolute core start in the source (`crop_x + core_offset`)
    pub start_x: u32,
    /// Core start relative to the logical frame
    pub core_offset: u32,
    /// Core width
    pub core_width: u32,
    /// Overlap read left of the core
    pub left_margin: u32,
    /// Overlap read right of the core
    pub right_margin: u32,
    /// `core_width * RATIO_PRECISION / full_width`
    pub pixel_ratio: u32,
    /// Logical frame width
    pub full_width: u32,
}

impl StripeRegion {
    /// First region
    pub const fn is_first(&self) -> bool {
        self.index == 0
    }

    /// Last region
    pub const fn is_last(&self) -> bool {
        self.index + 1 == self.total_count
    }

    /// Absolute start of the pixels this region reads
    pub const fn input_start(&self) -> u32 {
        self.start_x - self.left_margin
    }

    /// Width of the pixels this region reads
    pub const fn input_width(&self) -> u32 {
        self.left_margin + self.core_width + self.right_margin
    }

    /// Input window of this region for a frame of `height` lines starting at `y`
    pub const fn input_rect(&self, y: u32, height: u32) -> Rect {
        Rect::new(self.input_start(), y, self.input_width(), height)
    }

    /// Stripe bookkeeping for the parameter set
    pub const fn info(&self, full_height: u32) -> StripeInfo {
        StripeInfo {
            index: self.index,
            total_count: self.total_count,
            left_margin: self.left_margin,
            right_margin: self.right_margin,
            start_x: self.start_x,
            full_width: self.full_width,
            full_height,
        }
    }

    /// Read-DMA byte offset of this region's first input pixel
    pub fn rdma_offset(&self, crop_x: u32, bytes_per_pixel: u32) -> u64 {
        u64::from(self.input_start().saturating_sub(crop_x)) * u64::from(bytes_per_pixel)
    }
}

/// Output span of one region after scaling the full frame to `dst_width`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledSpan {
    /// First output column produced by the region
    pub out_start: u32,
    /// Output columns produced by the region
    pub out_width: u32,
    /// Fractional source position of `out_start`, 20-bit fixed point
    pub h_phase: u32,
}

/// Stripe planner
#[derive(Debug, Clone, Copy)]
pub struct StripeTiler {
    config: StripeConfig,
}

impl StripeTiler {
    /// Planner with `config` geometry
    pub const fn new(config: StripeConfig) -> Self {
        Self { config }
    }

    /// Geometry in use
    pub const fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Split `full_width` columns starting at `crop_x` into `count` regions
    ///
    /// A count below two disables tiling and yields an empty plan.
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::TooManyRegions`] above the hardware maximum and
    /// [`PabloError::InvalidGeometry`] when the frame is too narrow for the
    /// aligned cores to carry a full margin.
    pub fn plan(&self, full_width: u32, count: u32, crop_x: u32) -> Result<Vec<StripeRegion>> {
        if count < 2 {
            return Ok(Vec::new());
        }
        if count > self.config.max_regions {
            return Err(PabloError::TooManyRegions {
                requested: count,
                max: self.config.max_regions,
            });
        }
        let align = self.config.width_align;
        let margin = self.config.margin_width;
        if align == 0 {
            return Err(PabloError::invalid_geometry("stripe alignment is zero"));
        }
        let base = full_width / count / align * align;
        if base < align || base < margin {
            return Err(PabloError::invalid_geometry(format!(
                "width {full_width} too narrow for {count} regions (core {base}, align {align}, margin {margin})"
            )));
        }

        let regions = (0..count)
            .map(|index| {
                let core_offset = index * base;
                let last = index + 1 == count;
                let core_width = if last { full_width - core_offset } else { base };
                StripeRegion {
                    index,
                    total_count: count,
                    start_x: crop_x + core_offset,
                    core_offset,
                    core_width,
                    left_margin: if index == 0 { 0 } else { margin },
                    right_margin: if last { 0 } else { margin },
                    pixel_ratio: ratio_of(core_width, full_width),
                    full_width,
                }
            })
            .collect::<Vec<_>>();
        debug!(
            "Stripe plan: {full_width}px in {count} regions, core {base}, last {}",
            regions.last().map_or(0, |r| r.core_width)
        );
        Ok(regions)
    }

    /// Region `index` of a plan
    ///
    /// Returns `None` when tiling is disabled.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`StripeTiler::plan`], and
    /// [`PabloError::InvalidState`] for an index outside the plan.
    pub fn region(&self, full_width: u32, count: u32, crop_x: u32, index: u32) -> Result<Option<StripeRegion>> {
        let plan = self.plan(full_width, count, crop_x)?;
        if plan.is_empty() {
            return Ok(None);
        }
        plan.get(index as usize).copied().map(Some).ok_or_else(|| {
            PabloError::invalid_state(format!("stripe index {index} outside 0..{count}"))
        })
    }

    /// Write-DMA byte offset of region `index`
    ///
    /// Every earlier region wrote its core plus its right margin.
    pub fn wdma_offset(plan: &[StripeRegion], index: u32, bytes_per_pixel: u32, height: u32) -> u64 {
        plan.iter()
            .take_while(|r| r.index < index)
            .map(|r| u64::from(r.core_width + r.right_margin))
            .sum::<u64>()
            * u64::from(bytes_per_pixel)
            * u64::from(height)
    }

    /// Output span of `region` when the full frame scales to `dst_width`
    #[allow(clippy::cast_possible_truncation)]
    pub fn scaled_span(region: &StripeRegion, dst_width: u32) -> ScaledSpan {
        let full = u64::from(region.full_width.max(1));
        let dst = u64::from(dst_width);
        let start = u64::from(region.core_offset) * dst / full;
        let end = if region.is_last() {
            dst
        } else {
            u64::from(region.core_offset + region.core_width) * dst / full
        };
        let ratio = u64::from(scaler::ratio(region.full_width, dst_width).unwrap_or(scaler::RATIO_UNITY));
        let mask = u64::from(scaler::RATIO_UNITY - 1);
        ScaledSpan {
            out_start: start as u32,
            out_width: (end - start) as u32,
            h_phase: ((start * ratio) & mask) as u32,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ratio_of(core: u32, full: u32) -> u32 {
    if full == 0 {
        return 0;
    }
    (u64::from(core) * u64::from(RATIO_PRECISION) / u64::from(full)) as u32
}

/// Per-stream check that stripe shots arrive in index order
#[derive(Debug, Clone, Copy, Default)]
pub struct StripeSequence {
    expected: Option<(u32, u32)>,
}

impl StripeSequence {
    /// Record a stripe shot of frame `fcount`
    ///
    /// # Errors
    ///
    /// Returns [`PabloError::InvalidState`] if `index` is not the next
    /// region of the frame in progress.
    pub fn observe(&mut self, fcount: u32, index: u32, total: u32) -> Result<()> {
        if total < 2 {
            self.expected = None;
            return Ok(());
        }
        if index >= total {
            return Err(PabloError::invalid_state(format!(
                "frame {fcount}: stripe {index} of {total}"
            )));
        }
        if index == 0 {
            if let Some((fc, next)) = self.expected {
                warn!("frame {fc}: stripe sequence abandoned at region {next}");
            }
        } else if self.expected != Some((fcount, index)) {
            return Err(PabloError::invalid_state(format!(
                "frame {fcount}: stripe {index} out of order (expected {:?})",
                self.expected
            )));
        }
        self.expected = if index + 1 == total { None } else { Some((fcount, index + 1)) };
        Ok(())
    }

    /// Whether a frame is partially processed
    pub const fn in_progress(&self) -> bool {
        self.expected.is_some()
    }

    /// Forget the frame in progress
    pub fn reset(&mut self) {
        self.expected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiler() -> StripeTiler {
        StripeTiler::new(StripeConfig::default())
    }

    #[test]
    fn cores_cover_frame_exactly_once() {
        let t = tiler();
        for count in 2..=4 {
            for full_width in (count * 1024..=9000).step_by(37) {
                let plan = t.plan(full_width, count, 0).unwrap();
                assert_eq!(plan.len(), count as usize);
                let mut next = 0;
                for r in &plan {
                    assert_eq!(r.core_offset, next, "w={full_width} n={count}");
                    next += r.core_width;
                }
                assert_eq!(next, full_width);
            }
        }
    }

    #[test]
    fn margins_follow_position() {
        let t = tiler();
        for count in 2..=4 {
            let plan = t.plan(8192, count, 0).unwrap();
            for r in &plan {
                let left = if r.is_first() { 0 } else { 768 };
                let right = if r.is_last() { 0 } else { 768 };
                assert_eq!((r.left_margin, r.right_margin), (left, right));
            }
        }
    }

    #[test]
    fn margins_stay_inside_frame() {
        let t = tiler();
        for count in 2..=4 {
            for full_width in (count * 1024..=6000).step_by(53) {
                for r in t.plan(full_width, count, 100).unwrap() {
                    assert!(r.input_start() >= 100);
                    assert!(r.input_start() + r.input_width() <= 100 + full_width);
                }
            }
        }
    }

    #[test]
    fn single_region_disables_tiling() {
        assert!(tiler().plan(4000, 1, 0).unwrap().is_empty());
        assert!(tiler().plan(4000, 0, 0).unwrap().is_empty());
        assert_eq!(tiler().region(4000, 1, 0, 0).unwrap(), None);
    }

    #[test]
    fn region_limit() {
        assert!(matches!(
            tiler().plan(16000, 5, 0),
            Err(PabloError::TooManyRegions { requested: 5, max: 4 })
        ));
    }

    #[test]
    fn too_narrow() {
        assert!(matches!(
            tiler().plan(1500, 2, 0),
            Err(PabloError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn four_k_in_two() {
        let plan = tiler().plan(4000, 2, 16).unwrap();
        assert_eq!(plan[0].core_width, 1536);
        assert_eq!(plan[1].core_width, 2464);
        assert_eq!(plan[0].start_x, 16);
        assert_eq!(plan[1].start_x, 16 + 1536);
        assert_eq!(plan[0].pixel_ratio, 384);
        assert_eq!(plan[1].rdma_offset(16, 2), (1536 - 768) * 2);
    }

    #[test]
    fn wdma_offset_adds_core_and_margin() {
        let plan = tiler().plan(4096, 2, 0).unwrap();
        assert_eq!(StripeTiler::wdma_offset(&plan, 0, 2, 1080), 0);
        assert_eq!(
            StripeTiler::wdma_offset(&plan, 1, 2, 1080),
            u64::from(2048u32 + 768) * 2 * 1080
        );
    }

    #[test]
    fn scaled_spans_tile_output() {
        let plan = tiler().plan(4000, 3, 0).unwrap();
        let spans = plan.iter().map(|r| StripeTiler::scaled_span(r, 1920)).collect::<Vec<_>>();
        let mut next = 0;
        for s in &spans {
            assert_eq!(s.out_start, next);
            next += s.out_width;
        }
        assert_eq!(next, 1920);
        assert_eq!(spans[0].h_phase, 0);
    }

    #[test]
    fn sequence_order() {
        let mut seq = StripeSequence::default();
        seq.observe(5, 0, 3).unwrap();
        seq.observe(5, 1, 3).unwrap();
        assert!(seq.observe(5, 1, 3).is_err());
        seq.observe(5, 2, 3).unwrap();
        assert!(!seq.in_progress());
        assert!(seq.observe(6, 1, 3).is_err());
        seq.observe(6, 0, 3).unwrap();
        assert!(seq.observe(7, 1, 3).is_err());
    }
}

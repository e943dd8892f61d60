//! Repeat-group tracking
//!
//! A repeat group is a run of shots that reuse one programming: the
//! buffers of a multi-buffer burst, or the repeated outputs of a frame.
//! Only the first shot of a group programs the hardware; the rest only
//! re-trigger the committed command-loader payload.

use tracing::trace;

/// Repeat position carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatInfo {
    /// Identity of the repeat group; changes start a new group
    pub instance: u32,
    /// Shots in the group; 0 or 1 means no repeat
    pub count: u32,
}

/// Per-(stream, burst) repeat state
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatTracker {
    last_instance: Option<u32>,
    state: u32,
}

impl RepeatTracker {
    /// Whether the shot described by `repeat` and `batch_index` may skip programming
    ///
    /// `has_committed` tells whether there is a committed payload to
    /// re-trigger; without one every shot programs in full.
    pub fn should_skip(&mut self, repeat: RepeatInfo, batch_index: u32, has_committed: bool) -> bool {
        let mut skip = false;
        if repeat.count > 1 {
            if self.last_instance != Some(repeat.instance) {
                self.state = 0;
                self.last_instance = Some(repeat.instance);
            }
            skip = self.state > 0;
            self.state += 1;
            if self.state >= repeat.count {
                self.state = 0;
            }
        }
        if batch_index > 0 {
            skip = true;
        }
        let skip = skip && has_committed;
        trace!(
            "repeat instance {} state {} batch {batch_index}: skip={skip}",
            repeat.instance, self.state
        );
        skip
    }

    /// Forget the group in progress
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Position inside the current group
    pub const fn state(&self) -> u32 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_of_group_programs() {
        let mut t = RepeatTracker::default();
        let r = RepeatInfo { instance: 7, count: 3 };
        assert!(!t.should_skip(r, 0, true));
        assert!(t.should_skip(r, 0, true));
        assert!(t.should_skip(r, 0, true));
        // Wrapped: next group of the same instance programs again
        assert!(!t.should_skip(r, 0, true));
    }

    #[test]
    fn new_instance_resets() {
        let mut t = RepeatTracker::default();
        assert!(!t.should_skip(RepeatInfo { instance: 1, count: 4 }, 0, true));
        assert!(t.should_skip(RepeatInfo { instance: 1, count: 4 }, 0, true));
        assert!(!t.should_skip(RepeatInfo { instance: 2, count: 4 }, 0, true));
    }

    #[test]
    fn batch_tail_skips_only_with_committed_payload() {
        let mut t = RepeatTracker::default();
        assert!(t.should_skip(RepeatInfo::default(), 1, true));
        assert!(!t.should_skip(RepeatInfo::default(), 1, false));
        assert!(!t.should_skip(RepeatInfo::default(), 0, true));
    }
}

//! Process-wide ISP configuration
//!
//! One `IspConfig` is built at start-up and shared (behind an `Arc`) by every
//! block instance. Nothing in the driver reads tunables from globals.

use crate::error::{PabloError, Result};
use pablo_chip::cmdq;
use std::time::Duration;
use tracing::{debug, warn};

/// Stripe (horizontal tiling) geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeConfig {
    /// Overlap appended on each inner side of a region
    pub margin_width: u32,

    /// Alignment of every non-last region's core width
    pub width_align: u32,

    /// Concurrent region buffers in hardware
    pub max_regions: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            margin_width: 768,
            width_align: 512,
            max_regions: 4,
        }
    }
}

impl StripeConfig {
    /// Check the geometry is usable
    ///
    /// # Errors
    ///
    /// Returns error on zero alignment, zero margin or fewer than two regions.
    pub fn validate(&self) -> Result<()> {
        if self.width_align == 0 {
            return Err(PabloError::invalid_geometry("stripe alignment is zero"));
        }
        if self.margin_width == 0 {
            return Err(PabloError::invalid_geometry("stripe margin is zero"));
        }
        if self.max_regions < 2 {
            return Err(PabloError::invalid_geometry(format!(
                "stripe max_regions {} < 2",
                self.max_regions
            )));
        }
        Ok(())
    }
}

/// Runtime feature gates for optional sub-block programming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Program the decompression bypass from the input SBWC mode
    pub decompression: bool,

    /// Program the gamma bypass from the control parameters
    pub gamma: bool,
}

/// Process-wide ISP configuration
#[derive(Debug, Clone, PartialEq)]
pub struct IspConfig {
    /// Stripe geometry
    pub stripe: StripeConfig,

    /// Shadow static registers in software and flush them in batches
    pub reg_cache: bool,

    /// Optional sub-block gates
    pub features: FeatureFlags,

    /// Route the data-test-pattern generator instead of real pixels
    pub dtp: bool,

    /// Bounded wait for the in-flight frame in `disable`
    pub disable_timeout: Duration,

    /// Maximum delay between command-queue commit and frame start
    pub shot_timeout: Duration,

    /// Bounded wait for idle / reset / flush completion
    pub hw_timeout: Duration,

    /// Command-loader header buffer size
    pub cmdq_header_size: usize,

    /// Command-loader payload buffer size
    pub cmdq_payload_size: usize,

    /// Log a register dump when a shot fails
    pub dump_on_error: bool,
}

impl Default for IspConfig {
    fn default() -> Self {
        Self {
            stripe: StripeConfig::default(),
            reg_cache: true,
            features: FeatureFlags {
                decompression: true,
                gamma: true,
            },
            dtp: false,
            disable_timeout: Duration::from_millis(300),
            shot_timeout: Duration::from_millis(100),
            hw_timeout: Duration::from_millis(10),
            cmdq_header_size: cmdq::HEADER_SIZE,
            cmdq_payload_size: cmdq::PAYLOAD_SIZE,
            dump_on_error: false,
        }
    }
}

impl IspConfig {
    /// Default configuration overlaid with `PABLO_*` environment variables
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from a key lookup (environment or test map)
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var(&lookup, "PABLO_REG_CACHE", parse_bool) {
            self.reg_cache = v;
        }
        if let Some(v) = parse_var(&lookup, "PABLO_DTP", parse_bool) {
            self.dtp = v;
        }
        if let Some(v) = parse_var(&lookup, "PABLO_DUMP_ON_ERROR", parse_bool) {
            self.dump_on_error = v;
        }
        if let Some(v) = parse_var(&lookup, "PABLO_STRIPE_MARGIN", |s| s.parse().ok()) {
            self.stripe.margin_width = v;
        }
        if let Some(v) = parse_var(&lookup, "PABLO_STRIPE_MAX_REGIONS", |s| s.parse().ok()) {
            self.stripe.max_regions = v;
        }
        if let Some(ms) = parse_var(&lookup, "PABLO_DISABLE_TIMEOUT_MS", |s| s.parse().ok()) {
            self.disable_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "PABLO_SHOT_TIMEOUT_MS", |s| s.parse().ok()) {
            self.shot_timeout = Duration::from_millis(ms);
        }
        debug!("ISP config: {self:?}");
        self
    }

    /// Replace the stripe geometry
    #[must_use]
    pub fn with_stripe(mut self, stripe: StripeConfig) -> Self {
        self.stripe = stripe;
        self
    }

    /// Enable or disable the register cache
    #[must_use]
    pub fn with_reg_cache(mut self, enable: bool) -> Self {
        self.reg_cache = enable;
        self
    }

    /// Replace the feature gates
    #[must_use]
    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Set the disable wait bound
    #[must_use]
    pub fn with_disable_timeout(mut self, timeout: Duration) -> Self {
        self.disable_timeout = timeout;
        self
    }

    /// Set the frame-start deadline after commit
    #[must_use]
    pub fn with_shot_timeout(mut self, timeout: Duration) -> Self {
        self.shot_timeout = timeout;
        self
    }

    /// Set command-loader buffer sizes
    #[must_use]
    pub fn with_cmdq_sizes(mut self, header: usize, payload: usize) -> Self {
        self.cmdq_header_size = header;
        self.cmdq_payload_size = payload;
        self
    }

    /// Validate the whole configuration
    ///
    /// # Errors
    ///
    /// Returns error if stripe geometry or buffer sizes are unusable.
    pub fn validate(&self) -> Result<()> {
        self.stripe.validate()?;
        if self.cmdq_header_size < cmdq::HEADER_RECORD_SIZE {
            return Err(PabloError::out_of_memory(format!(
                "command-loader header {:#x} smaller than record {:#x}",
                self.cmdq_header_size,
                cmdq::HEADER_RECORD_SIZE
            )));
        }
        if cmdq::pair_capacity(self.cmdq_payload_size) == 0 {
            return Err(PabloError::out_of_memory("command-loader payload holds no pairs"));
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!("Ignoring {key}={raw:?}: not a valid value");
    }
    parsed
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = IspConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cmdq_header_size, 0x2000);
        assert_eq!(config.cmdq_payload_size, 0x8000);
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("PABLO_REG_CACHE", "off"),
            ("PABLO_STRIPE_MARGIN", "256"),
            ("PABLO_SHOT_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = IspConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| (*v).to_string()));
        assert!(!config.reg_cache);
        assert_eq!(config.stripe.margin_width, 256);
        assert_eq!(config.shot_timeout, IspConfig::default().shot_timeout);
    }

    #[test]
    fn stripe_validation() {
        let bad = StripeConfig {
            max_regions: 1,
            ..StripeConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = StripeConfig {
            width_align: 0,
            ..StripeConfig::default()
        };
        assert!(bad.validate().is_err());
        let wide = StripeConfig::default();
        assert!(wide.margin_width > wide.width_align);
        assert!(wide.validate().is_ok());
    }

    #[test]
    fn tiny_header_rejected() {
        let config = IspConfig::default().with_cmdq_sizes(8, 0x100);
        assert!(config.validate().is_err());
    }
}

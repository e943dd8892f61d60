//! Error types for ISP pipeline operations

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PabloError>;

/// Programming stage of a shot, used to tag [`PabloError::ShotFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShotStage {
    /// Merging control-plane parameters into the frame parameter set
    ParamUpdate,
    /// Programming read/write DMA channels
    DmaProgram,
    /// Programming chain, DTP, grid, scaler and bypass registers
    SizeProgram,
    /// Late override from the real-time algorithm library
    RtaOverride,
    /// Submitting the command-loader buffer to the command queue
    CmdqCommit,
}

impl std::fmt::Display for ShotStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParamUpdate => write!(f, "PARAM_UPDATE"),
            Self::DmaProgram => write!(f, "DMA_PROGRAM"),
            Self::SizeProgram => write!(f, "SIZE_PROGRAM"),
            Self::RtaOverride => write!(f, "RTA_OVERRIDE"),
            Self::CmdqCommit => write!(f, "CMDQ_COMMIT"),
        }
    }
}

/// Errors that can occur during ISP pipeline operations
#[derive(Debug, Error)]
pub enum PabloError {
    /// Crop, size or scale outside what the source or hardware allows
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry {
        /// Reason for failure
        reason: String,
    },

    /// Pixel format not supported by the addressed channel
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat {
        /// Reason for failure
        reason: String,
    },

    /// Upstream output crop larger than the bayer crop handed to it
    #[error("Geometry mismatch: {reason}")]
    GeometryMismatch {
        /// Reason for failure
        reason: String,
    },

    /// Stripe count beyond the hardware region buffer
    #[error("Too many stripe regions: {requested} (max {max})")]
    TooManyRegions {
        /// Requested region count
        requested: u32,
        /// Hardware maximum
        max: u32,
    },

    /// An enabled DMA channel has no buffer address
    #[error("No buffer for enabled channel {channel}")]
    NoBuffer {
        /// Channel name
        channel: &'static str,
    },

    /// Command-loader payload exhausted
    #[error("Command buffer full ({capacity} pairs)")]
    CommandBufferFull {
        /// Payload capacity in pairs
        capacity: usize,
    },

    /// Buffer or channel allocation failed
    #[error("Out of memory: {reason}")]
    OutOfMemory {
        /// Reason for failure
        reason: String,
    },

    /// DMA channel construction failed during init
    #[error("No data: {reason}")]
    NoData {
        /// Reason for failure
        reason: String,
    },

    /// Hardware did not respond in time
    #[error("Timeout after {duration_ms}ms waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// VOTF link configuration rejected
    #[error("VOTF link configuration error: {reason}")]
    LinkConfig {
        /// Reason for failure
        reason: String,
    },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Diagnostic dump could not be rendered
    #[error("Serialization error: {source}")]
    Serialization {
        /// Underlying serializer error
        #[from]
        source: serde_json::Error,
    },

    /// Hardware-level error from device
    #[error("Hardware error: {reason}")]
    HardwareError {
        /// Reason for failure
        reason: String,
    },

    /// A shot failed and was rolled back
    #[error("Shot of frame {fcount} failed at {stage}: {source}")]
    ShotFailed {
        /// Stage that failed
        stage: ShotStage,
        /// Frame count of the failed shot
        fcount: u32,
        /// Underlying error
        #[source]
        source: Box<PabloError>,
    },
}

impl PabloError {
    /// Create an invalid geometry error
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }

    /// Create an unsupported format error
    pub fn unsupported_format(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            reason: reason.into(),
        }
    }

    /// Create a geometry mismatch error
    pub fn geometry_mismatch(reason: impl Into<String>) -> Self {
        Self::GeometryMismatch {
            reason: reason.into(),
        }
    }

    /// Create an out of memory error
    pub fn out_of_memory(reason: impl Into<String>) -> Self {
        Self::OutOfMemory {
            reason: reason.into(),
        }
    }

    /// Create a no data error
    pub fn no_data(reason: impl Into<String>) -> Self {
        Self::NoData {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a link configuration error
    pub fn link_config(reason: impl Into<String>) -> Self {
        Self::LinkConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a hardware error
    pub fn hardware_error(reason: impl Into<String>) -> Self {
        Self::HardwareError {
            reason: reason.into(),
        }
    }

    /// Wrap `self` as the cause of a failed shot
    pub fn at_stage(self, stage: ShotStage, fcount: u32) -> Self {
        Self::ShotFailed {
            stage,
            fcount,
            source: Box::new(self),
        }
    }

    /// Configuration errors abort the shot and are never retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::InvalidGeometry { .. }
            | Self::UnsupportedFormat { .. }
            | Self::GeometryMismatch { .. }
            | Self::TooManyRegions { .. }
            | Self::NoBuffer { .. }
            | Self::CommandBufferFull { .. } => true,
            Self::ShotFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Hardware liveness errors are escalated to the caller, not fatal here.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ShotFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Stage tag of a failed shot, if any
    pub fn stage(&self) -> Option<ShotStage> {
        match self {
            Self::ShotFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shot_failure_keeps_classification() {
        let err = PabloError::invalid_geometry("crop").at_stage(ShotStage::SizeProgram, 7);
        assert!(err.is_configuration());
        assert_eq!(err.stage(), Some(ShotStage::SizeProgram));
        assert!(err.to_string().contains("SIZE_PROGRAM"));

        let err = PabloError::timeout("idle", std::time::Duration::from_millis(5));
        assert!(err.is_timeout());
        assert!(!err.is_configuration());
    }
}

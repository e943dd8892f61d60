//! Backend implementations
//!
//! - [`uio::UioBackend`]: real ISP through a UIO device node
//! - [`software::SoftwareBackend`]: simulated ISP for tests and CI

pub mod software;
pub mod uio;

pub use software::{SoftwareBackend, Submission};
pub use uio::UioBackend;

//! Domain layer - Port definitions
//!
//! This module defines the traits (ports) that adapters implement:
//! the remote extraction call and the host network signal.

pub mod ports;

pub use ports::*;

//! Extraction Clients
//!
//! Implementations of the [`ExtractionClient`](crate::domain::ports::ExtractionClient)
//! port.

pub mod http;

pub use http::{ExtractionConfig, HttpExtractionClient};

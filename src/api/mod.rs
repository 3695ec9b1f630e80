//! API Module
//!
//! REST surface for UI clients, plus the health and Prometheus listeners
//! used by the daemon.

pub mod metrics;
pub mod rest;
pub mod server;

pub use metrics::{run_metrics_server, PrometheusExporter};
pub use rest::{ApiErrorResponse, RestRouter};
pub use server::{run_health_server, ApiServer, ApiServerConfig};

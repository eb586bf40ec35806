//! Observability module providing structured logging.
//!
//! This module initializes the tracing subscriber with a configurable
//! format (pretty, compact, JSON) and environment-based log filtering.

mod tracing_init;

pub use tracing_init::*;

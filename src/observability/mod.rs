//! Observability: logging initialization. Metrics are emitted inline on
//! the hot path via the `metrics` crate macros.

pub mod logging;

//! The proxy pipeline: header rewriting and the request engine.

pub mod engine;
pub mod headers;

pub use engine::{InboundRequest, ProxyEngine, ProxyResponse};

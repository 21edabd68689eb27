//! Request Pipeline
//!
//! Ties the router, providers, reranker and compiler together for one
//! shopping request, then records what happened in memory.
//!
//! # Module Structure
//!
//! - `config`: `PipelineConfig` (router and ranking sections)
//! - `request`: `ShoppingRequest` and the per-request `RequestContext`
//! - `core`: `Pipeline` struct and builder methods
//! - `process`: the `handle` loop
//! - `memory_updates`: turns and graph observations recorded afterwards

mod config;
mod core;
mod memory_updates;
mod process;
mod request;


pub use config::PipelineConfig;
pub use core::Pipeline;
pub use request::{RequestContext, ShoppingRequest};

#[macro_use]
extern crate tracing;

pub mod annotations;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod quantity;
pub mod reconciler;
pub mod synthesizer;
pub mod workload;

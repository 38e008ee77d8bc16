//! The price monitor pipeline.
//!
//! This module provides:
//! - Configuration loading and validation
//! - Per-region workers and the parallel collector
//! - Input actions around the capture step
//! - CSV result output and the run loop

pub mod actions;
pub mod collector;
pub mod config;
pub mod input;
pub mod lifecycle;
pub mod queue;
pub mod runner;
pub mod sink;
pub mod worker;

pub use config::{load_config, read_config, MonitorConfig};
pub use lifecycle::Lifecycle;
pub use runner::{spawn_stdin_control, Monitor};
pub use sink::CsvSink;

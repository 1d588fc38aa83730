//! Training-run orchestration for Medical Segmentation Decathlon tasks.
//!
//! One run, end to end:
//! - layered YAML configuration with command-line overrides ([`config`])
//! - global seeding and matmul precision ([`reproducibility`])
//! - a Decathlon data module with a worker-pool batch loader ([`data`])
//! - a per-voxel segmentation model trained with Adam ([`model`], [`optim`])
//! - a trainer with checkpointing, early stopping and learning rate logging ([`train`])
//!
//! [`orchestrator::train`] wires these together in a fixed order.

pub mod cli;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod model;
pub mod optim;
pub mod orchestrator;
pub mod reproducibility;
pub mod run_id;
pub mod train;

pub use error::{Error, Result};
pub use orchestrator::RunOutcome;

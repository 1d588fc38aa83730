//! Training engine
//!
//! [`Trainer`] drives a [`TrainableModel`](crate::model::TrainableModel)
//! over a [`DataProvider`](crate::data::DataProvider):
//! - Sanity validation before the first epoch
//! - Training steps with periodic loss logging
//! - A full validation pass per epoch
//! - Callback dispatch and early termination

mod core;
mod fit;
mod result;

pub use core::{Trainer, TrainerConfig};
pub use result::TrainResult;

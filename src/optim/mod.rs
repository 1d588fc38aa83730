//! Optimizers and learning rate schedules

mod adam;
mod optimizer;
mod scheduler;

pub use adam::{Adam, AdamState};
pub use optimizer::Optimizer;
pub use scheduler::{ConstantLR, CosineAnnealingLR, LRScheduler};

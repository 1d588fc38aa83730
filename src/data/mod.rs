//! Data providers
//!
//! The trainer consumes data through [`DataProvider`]. The shipped
//! implementation, [`DecathlonDataModule`], reads a Medical Segmentation
//! Decathlon task directory:
//!
//! ```text
//! <root_dir>/Task09_Spleen/
//!   dataset.json
//!   imagesTr/spleen_2.nii.gz
//!   labelsTr/spleen_2.nii.gz
//! ```

mod batch;
pub mod decathlon;
pub mod loader;
mod module;
pub mod nifti;
pub mod synthetic;
pub mod transforms;

pub use batch::{num_batches, Batch, Sample};
pub use decathlon::{Case, DatasetManifest, DecathlonTask};
pub use loader::BatchLoader;
pub use module::{split_cases, val_split_size, DataModuleConfig, DecathlonDataModule};
pub use nifti::{read_volume, write_volume, NiftiDType, NiftiError, Volume};
pub use synthetic::{generate_task, SyntheticSpec};

use crate::error::Result;

/// Iterator over the batches of one pass
pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<Batch>> + 'a>;

/// Source of training and validation batches
pub trait DataProvider {
    /// Prepare splits. Called once before any batches are requested.
    fn setup(&mut self) -> Result<()>;

    /// Training batches for `epoch`, reshuffled per epoch.
    fn train_batches(&self, epoch: usize) -> Result<BatchIter<'_>>;

    /// Validation batches in a fixed order.
    fn val_batches(&self) -> Result<BatchIter<'_>>;

    /// Training batches per epoch.
    fn num_train_batches(&self) -> usize;

    /// Validation batches per pass.
    fn num_val_batches(&self) -> usize;

    /// Number of segmentation classes, once known.
    fn num_classes(&self) -> Option<usize> {
        None
    }
}

//! Decathlon data module: split preparation and batch production

use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;

use super::batch::{num_batches, Batch, Sample};
use super::decathlon::{Case, DatasetManifest, DecathlonTask};
use super::loader::{BatchLoader, LoadFn};
use super::nifti::read_volume;
use super::transforms::{random_crop, random_flip, to_class_ids, zscore_normalize};
use super::{BatchIter, DataProvider};
use crate::error::{Error, Result};
use crate::reproducibility::{stream_rng, streams};

/// Flip probability per spatial axis for training samples
const FLIP_PROBABILITY: f64 = 0.5;

/// Construction parameters of [`DecathlonDataModule`]
#[derive(Clone, Debug, PartialEq)]
pub struct DataModuleConfig {
    pub root_dir: PathBuf,
    pub task: String,
    pub batch_size: usize,
    pub num_workers: usize,
    pub seed: u64,
    pub val_fraction: f32,
    pub patch_size: usize,
}

impl DataModuleConfig {
    /// Parameters with the default split fraction and patch size.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        task: impl Into<String>,
        batch_size: usize,
        num_workers: usize,
        seed: u64,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            task: task.into(),
            batch_size,
            num_workers,
            seed,
            val_fraction: 0.2,
            patch_size: 64,
        }
    }
}

/// State produced by [`DecathlonDataModule::setup`]
#[derive(Clone, Debug)]
struct Splits {
    task: DecathlonTask,
    manifest: DatasetManifest,
    train: Arc<Vec<Case>>,
    val: Arc<Vec<Case>>,
}

/// Data provider over one Decathlon task directory
#[derive(Clone, Debug)]
pub struct DecathlonDataModule {
    config: DataModuleConfig,
    splits: Option<Splits>,
}

/// Number of validation cases for `n` cases and a held-out fraction.
pub fn val_split_size(n: usize, fraction: f32) -> usize {
    ((n as f64 * f64::from(fraction)).round() as usize).max(1)
}

/// Shuffle `cases` with the split stream of `seed` and divide them.
///
/// Both halves are returned in manifest order.
pub fn split_cases(cases: Vec<Case>, fraction: f32, seed: u64) -> Result<(Vec<Case>, Vec<Case>)> {
    let n = cases.len();
    let n_val = val_split_size(n, fraction);
    if n_val >= n {
        return Err(Error::data(format!(
            "{n} case(s) cannot be split into non-empty train and validation sets (val_fraction={fraction})"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut stream_rng(seed, streams::SPLIT, &[]));
    let mut is_val = vec![false; n];
    for &i in &order[..n_val] {
        is_val[i] = true;
    }

    let (val, train): (Vec<_>, Vec<_>) = cases
        .into_iter()
        .zip(is_val)
        .partition(|(_, v)| *v);
    Ok((
        train.into_iter().map(|(c, _)| c).collect(),
        val.into_iter().map(|(c, _)| c).collect(),
    ))
}

/// Augmentation applied to a training sample
#[derive(Clone, Copy, Debug)]
struct Augment {
    seed: u64,
    epoch: u64,
    patch_size: usize,
}

fn load_sample(case: &Case, augment: Option<Augment>) -> Result<Sample> {
    let mut image = read_volume(&case.image)?.data;
    let label_volume = read_volume(&case.label)?;
    if label_volume.channels() != 1 {
        return Err(Error::data(format!(
            "label {} has {} channels, expected 1",
            case.label.display(),
            label_volume.channels()
        )));
    }
    if image.shape()[1..] != label_volume.data.shape()[1..] {
        return Err(Error::data(format!(
            "case {}: image shape {:?} does not match label shape {:?}",
            case.id,
            &image.shape()[1..],
            &label_volume.data.shape()[1..]
        )));
    }

    zscore_normalize(&mut image);
    let mut label = to_class_ids(&label_volume.data);

    if let Some(aug) = augment {
        let mut rng = stream_rng(aug.seed, streams::AUGMENT, &[aug.epoch, case_key(&case.id)]);
        let (mut img, mut lab) = random_crop(&image, &label, aug.patch_size, &mut rng);
        random_flip(&mut img, &mut lab, FLIP_PROBABILITY, &mut rng);
        image = img.as_standard_layout().into_owned();
        label = lab.as_standard_layout().into_owned();
    }

    Ok(Sample {
        case_id: case.id.clone(),
        image,
        label,
    })
}

/// Stable 64-bit key for a case id (FNV-1a).
fn case_key(id: &str) -> u64 {
    id.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl DecathlonDataModule {
    /// Create an unprepared module; call [`DataProvider::setup`] before use.
    pub fn new(config: DataModuleConfig) -> Self {
        Self {
            config,
            splits: None,
        }
    }

    /// Construction parameters.
    pub fn config(&self) -> &DataModuleConfig {
        &self.config
    }

    /// Task resolved by `setup`.
    pub fn task(&self) -> Option<DecathlonTask> {
        self.splits.as_ref().map(|s| s.task)
    }

    /// Manifest read by `setup`.
    pub fn manifest(&self) -> Option<&DatasetManifest> {
        self.splits.as_ref().map(|s| &s.manifest)
    }

    /// Training cases, in manifest order.
    pub fn train_cases(&self) -> &[Case] {
        self.splits
            .as_ref()
            .map(|s| s.train.as_slice())
            .unwrap_or_default()
    }

    /// Validation cases, in manifest order.
    pub fn val_cases(&self) -> &[Case] {
        self.splits
            .as_ref()
            .map(|s| s.val.as_slice())
            .unwrap_or_default()
    }

    fn splits(&self) -> Result<&Splits> {
        self.splits
            .as_ref()
            .ok_or_else(|| Error::data("setup() must be called before requesting batches"))
    }

    /// Training order for `epoch`: indices into the training cases.
    pub fn train_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.train_cases().len()).collect();
        order.shuffle(&mut stream_rng(self.config.seed, streams::SHUFFLE, &[epoch as u64]));
        order
    }

    fn loader(
        &self,
        cases: Arc<Vec<Case>>,
        order: Vec<usize>,
        augment: Option<Augment>,
    ) -> Result<BatchLoader> {
        let batch_size = self.config.batch_size;
        let len = num_batches(order.len(), batch_size);
        let order = Arc::new(order);
        let load: LoadFn = Arc::new(move |index: usize| -> Result<Batch> {
            let start = index * batch_size;
            let end = (start + batch_size).min(order.len());
            let samples = order[start..end]
                .iter()
                .map(|&i| load_sample(&cases[i], augment))
                .collect::<Result<Vec<_>>>()?;
            Ok(Batch::new(index, samples))
        });
        BatchLoader::new(len, self.config.num_workers, load)
    }
}

impl DataProvider for DecathlonDataModule {
    fn setup(&mut self) -> Result<()> {
        let root = &self.config.root_dir;
        if !root.is_dir() {
            return Err(Error::data(format!(
                "root_dir {} does not exist or is not a directory",
                root.display()
            )));
        }
        let task: DecathlonTask = self.config.task.parse().map_err(Error::data)?;
        let task_dir = root.join(task.dir_name());
        if !task_dir.is_dir() {
            return Err(Error::data(format!(
                "task directory {} not found",
                task_dir.display()
            )));
        }
        if self.config.batch_size == 0 {
            return Err(Error::data("batch_size must be at least 1"));
        }

        let manifest = DatasetManifest::load(&task_dir)?;
        let cases = manifest.cases(&task_dir)?;
        let total = cases.len();
        let (train, val) = split_cases(cases, self.config.val_fraction, self.config.seed)?;

        tracing::info!(
            "{task}: {total} labelled cases, {} train / {} val, {} classes",
            train.len(),
            val.len(),
            manifest.num_classes()
        );

        self.splits = Some(Splits {
            task,
            manifest,
            train: Arc::new(train),
            val: Arc::new(val),
        });
        Ok(())
    }

    fn train_batches(&self, epoch: usize) -> Result<BatchIter<'_>> {
        let splits = self.splits()?;
        let augment = Augment {
            seed: self.config.seed,
            epoch: epoch as u64,
            patch_size: self.config.patch_size,
        };
        let order = self.train_order(epoch);
        let loader = self.loader(Arc::clone(&splits.train), order, Some(augment))?;
        Ok(Box::new(loader))
    }

    fn val_batches(&self) -> Result<BatchIter<'_>> {
        let splits = self.splits()?;
        let order = (0..splits.val.len()).collect();
        let loader = self.loader(Arc::clone(&splits.val), order, None)?;
        Ok(Box::new(loader))
    }

    fn num_train_batches(&self) -> usize {
        num_batches(self.train_cases().len(), self.config.batch_size)
    }

    fn num_val_batches(&self) -> usize {
        num_batches(self.val_cases().len(), self.config.batch_size)
    }

    fn num_classes(&self) -> Option<usize> {
        self.manifest().map(DatasetManifest::num_classes)
    }
}

//! Synthetic Decathlon-style tasks for smoke runs and tests
//!
//! Each case is a cube with nested spherical foreground regions, one shell
//! per foreground class, and per-channel intensities that rise with the
//! class id plus uniform noise. The layout on disk matches a real task:
//! `imagesTr/`, `labelsTr/` and `dataset.json`.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::decathlon::{CaseEntry, DatasetManifest, DecathlonTask, MANIFEST_FILE};
use super::nifti::{write_volume, NiftiDType, Volume};
use crate::error::{Error, Result};
use crate::reproducibility::derive_seed;

/// Stream id for synthetic case generation
const SYNTHETIC_STREAM: u64 = 0x5359_4e54;

/// What to generate
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticSpec {
    pub task: DecathlonTask,
    /// Number of labelled cases
    pub cases: usize,
    /// Edge length of each cubic volume
    pub size: usize,
    pub seed: u64,
}

impl SyntheticSpec {
    pub fn new(task: DecathlonTask, cases: usize, size: usize, seed: u64) -> Self {
        Self {
            task,
            cases,
            size,
            seed,
        }
    }
}

fn case_volumes(spec: &SyntheticSpec, index: usize) -> (Volume, Volume) {
    let mut rng = StdRng::seed_from_u64(derive_seed(spec.seed, SYNTHETIC_STREAM, &[index as u64]));
    let n = spec.size;
    let channels = spec.task.modalities().len();
    let foreground = spec.task.labels().len() - 1;

    let extent = n as f32;
    let center: [f32; 3] = std::array::from_fn(|_| rng.random_range(0.35..0.65) * extent);
    let radius = rng.random_range(0.2..0.3) * extent;

    let label = Array4::from_shape_fn((1, n, n, n), |(_, x, y, z)| {
        let d = [x, y, z]
            .iter()
            .zip(center)
            .map(|(&p, c)| (p as f32 - c).powi(2))
            .sum::<f32>()
            .sqrt();
        // class k covers the ball of radius r * (F - k + 1) / F
        (1..=foreground)
            .rev()
            .find(|&k| d <= radius * (foreground - k + 1) as f32 / foreground as f32)
            .unwrap_or(0) as f32
    });

    let mut image = Array4::zeros((channels, n, n, n));
    for ((c, x, y, z), v) in image.indexed_iter_mut() {
        let class = label[[0, x, y, z]];
        let noise: f32 = rng.random_range(-25.0..25.0);
        *v = 100.0 * class * (c + 1) as f32 + noise;
    }

    (Volume::new(image), Volume::new(label))
}

/// Write a synthetic task under `root`, returning the task directory.
pub fn generate_task(root: &Path, spec: &SyntheticSpec) -> Result<PathBuf> {
    if spec.cases < 2 {
        return Err(Error::config("a synthetic task needs at least 2 cases"));
    }
    if spec.size < 2 {
        return Err(Error::config("synthetic volumes need an edge length of at least 2"));
    }

    let task_dir = root.join(spec.task.dir_name());
    let prefix = spec.task.short_name().to_lowercase();
    for sub in ["imagesTr", "labelsTr"] {
        let dir = task_dir.join(sub);
        fs::create_dir_all(&dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
    }

    let mut training = Vec::with_capacity(spec.cases);
    for i in 0..spec.cases {
        let (image, label) = case_volumes(spec, i);
        let file = format!("{prefix}_{i}.nii.gz");
        write_volume(&task_dir.join("imagesTr").join(&file), &image, NiftiDType::I16)?;
        write_volume(&task_dir.join("labelsTr").join(&file), &label, NiftiDType::U8)?;
        training.push(CaseEntry {
            image: format!("./imagesTr/{file}"),
            label: format!("./labelsTr/{file}"),
        });
    }

    let numbered = |names: &[&str]| -> BTreeMap<String, String> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| (i.to_string(), (*n).to_string()))
            .collect()
    };
    let manifest = DatasetManifest {
        name: spec.task.short_name().to_string(),
        description: Some(format!("Synthetic {} volumes", spec.task.short_name())),
        modality: numbered(spec.task.modalities()),
        labels: numbered(spec.task.labels()),
        num_training: Some(spec.cases),
        training,
        test: Vec::new(),
    };
    let path = task_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&path, json).map_err(|e| Error::io(format!("writing {}", path.display()), e))?;

    tracing::info!(
        "Wrote {} synthetic case(s) of size {}³ to {}",
        spec.cases,
        spec.size,
        task_dir.display()
    );
    Ok(task_dir)
}

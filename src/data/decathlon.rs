//! Medical Segmentation Decathlon tasks and their `dataset.json` manifests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Manifest file name inside a task directory
pub const MANIFEST_FILE: &str = "dataset.json";

/// The ten Decathlon tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecathlonTask {
    BrainTumour,
    Heart,
    Liver,
    Hippocampus,
    Prostate,
    Lung,
    Pancreas,
    HepaticVessel,
    Spleen,
    Colon,
}

impl DecathlonTask {
    /// All tasks in numeric order.
    pub const ALL: [Self; 10] = [
        Self::BrainTumour,
        Self::Heart,
        Self::Liver,
        Self::Hippocampus,
        Self::Prostate,
        Self::Lung,
        Self::Pancreas,
        Self::HepaticVessel,
        Self::Spleen,
        Self::Colon,
    ];

    /// Task number, 1-based.
    pub fn number(self) -> u8 {
        match self {
            Self::BrainTumour => 1,
            Self::Heart => 2,
            Self::Liver => 3,
            Self::Hippocampus => 4,
            Self::Prostate => 5,
            Self::Lung => 6,
            Self::Pancreas => 7,
            Self::HepaticVessel => 8,
            Self::Spleen => 9,
            Self::Colon => 10,
        }
    }

    /// Short name, e.g. `Spleen`.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::BrainTumour => "BrainTumour",
            Self::Heart => "Heart",
            Self::Liver => "Liver",
            Self::Hippocampus => "Hippocampus",
            Self::Prostate => "Prostate",
            Self::Lung => "Lung",
            Self::Pancreas => "Pancreas",
            Self::HepaticVessel => "HepaticVessel",
            Self::Spleen => "Spleen",
            Self::Colon => "Colon",
        }
    }

    /// Directory name, e.g. `Task09_Spleen`.
    pub fn dir_name(self) -> String {
        format!("Task{:02}_{}", self.number(), self.short_name())
    }

    /// Imaging modalities, one per input channel.
    pub fn modalities(self) -> &'static [&'static str] {
        match self {
            Self::BrainTumour => &["FLAIR", "T1w", "t1gd", "T2w"],
            Self::Heart | Self::Hippocampus => &["MRI"],
            Self::Prostate => &["T2", "ADC"],
            _ => &["CT"],
        }
    }

    /// Label names indexed by class id; index 0 is background.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Self::BrainTumour => &[
                "background",
                "edema",
                "non-enhancing tumor",
                "enhancing tumour",
            ],
            Self::Heart => &["background", "left atrium"],
            Self::Liver => &["background", "liver", "cancer"],
            Self::Hippocampus => &["background", "Anterior", "Posterior"],
            Self::Prostate => &["background", "PZ", "TZ"],
            Self::Lung | Self::Colon => &["background", "cancer"],
            Self::Pancreas => &["background", "pancreas", "cancer"],
            Self::HepaticVessel => &["background", "Vessel", "Tumour"],
            Self::Spleen => &["background", "spleen"],
        }
    }
}

impl fmt::Display for DecathlonTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

impl FromStr for DecathlonTask {
    type Err = String;

    /// Accepts `Task09_Spleen` or `spleen`, ignoring case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| {
                wanted.eq_ignore_ascii_case(&t.dir_name())
                    || wanted.eq_ignore_ascii_case(t.short_name())
            })
            .ok_or_else(|| format!("unknown Decathlon task '{s}'"))
    }
}

/// One labelled case as listed in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseEntry {
    pub image: String,
    pub label: String,
}

/// Parsed `dataset.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Channel index → modality name
    #[serde(default)]
    pub modality: BTreeMap<String, String>,
    /// Class id → label name
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "numTraining", default, skip_serializing_if = "Option::is_none")]
    pub num_training: Option<usize>,
    pub training: Vec<CaseEntry>,
    #[serde(default)]
    pub test: Vec<String>,
}

/// A case with resolved paths
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Case {
    /// File stem of the image, e.g. `spleen_2`
    pub id: String,
    pub image: PathBuf,
    pub label: PathBuf,
}

fn case_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.trim_end_matches(".gz")
        .trim_end_matches(".nii")
        .to_owned()
}

impl DatasetManifest {
    /// Read `<task_dir>/dataset.json`.
    pub fn load(task_dir: &Path) -> Result<Self> {
        let path = task_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(Error::data(format!(
                "manifest {} not found",
                path.display()
            )));
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::data(format!("invalid manifest {}: {e}", path.display())))
    }

    /// Number of classes including background.
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Number of input channels.
    pub fn num_channels(&self) -> usize {
        self.modality.len().max(1)
    }

    /// Resolve training entries against `task_dir`, checking that every file exists.
    pub fn cases(&self, task_dir: &Path) -> Result<Vec<Case>> {
        if self.training.is_empty() {
            return Err(Error::data(format!(
                "{} lists no training cases",
                task_dir.join(MANIFEST_FILE).display()
            )));
        }

        self.training
            .iter()
            .map(|entry| {
                let image = task_dir.join(&entry.image);
                let label = task_dir.join(&entry.label);
                for path in [&image, &label] {
                    if !path.is_file() {
                        return Err(Error::data(format!(
                            "manifest entry {} does not exist",
                            path.display()
                        )));
                    }
                }
                Ok(Case {
                    id: case_id(&image),
                    image,
                    label,
                })
            })
            .collect()
    }
}

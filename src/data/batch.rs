//! Samples and batches handed from the data provider to the model

use ndarray::{Array3, Array4};

/// One preprocessed case
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Case identifier (image file stem)
    pub case_id: String,
    /// Normalised intensities, `[channel, x, y, z]`
    pub image: Array4<f32>,
    /// Class ids, `[x, y, z]`
    pub label: Array3<u8>,
}

impl Sample {
    /// Number of voxels in the spatial grid.
    pub fn num_voxels(&self) -> usize {
        self.label.len()
    }

    /// Number of input channels.
    pub fn channels(&self) -> usize {
        self.image.shape()[0]
    }
}

/// A batch of samples
///
/// Validation samples keep their full volume, so samples in one batch may
/// differ in spatial shape; they are not stacked into a single tensor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// Position of this batch within its epoch
    pub index: usize,
    pub samples: Vec<Sample>,
}

impl Batch {
    /// Create a batch.
    pub fn new(index: usize, samples: Vec<Sample>) -> Self {
        Self { index, samples }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Case ids in batch order.
    pub fn case_ids(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.case_id.as_str()).collect()
    }
}

/// Number of batches needed for `n` items; the last partial batch is kept.
pub fn num_batches(n: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        n.div_ceil(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_batches_keeps_partial() {
        assert_eq!(num_batches(10, 4), 3);
        assert_eq!(num_batches(8, 4), 2);
        assert_eq!(num_batches(0, 4), 0);
        assert_eq!(num_batches(3, 0), 0);
    }

    #[test]
    fn test_case_ids() {
        let sample = |id: &str| Sample {
            case_id: id.to_string(),
            image: Array4::zeros((1, 2, 2, 2)),
            label: Array3::zeros((2, 2, 2)),
        };
        let batch = Batch::new(0, vec![sample("a"), sample("b")]);
        assert_eq!(batch.case_ids(), vec!["a", "b"]);
        assert_eq!(batch.samples[0].num_voxels(), 8);
        assert_eq!(batch.samples[0].channels(), 1);
    }
}

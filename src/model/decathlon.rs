//! Per-voxel multinomial logistic segmentation model
//!
//! Every voxel is classified independently from the features
//! `[x_c, x_c²]` of each channel `c` plus a bias term. The model owns no
//! dataset-derived wiring: the channel count is taken from the first batch
//! it sees and the class count is a constructor setting.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::loss::{argmax_rows, mean_foreground_dice, softmax_rows, DiceCELoss};
use super::{Metrics, TrainableModel};
use crate::data::{Batch, Sample};
use crate::error::{Error, Result};
use crate::optim::{Adam, AdamState, ConstantLR, CosineAnnealingLR, LRScheduler, Optimizer};
use crate::reproducibility::{float32_matmul_precision, with_global_rng};

/// Background plus one foreground class
pub const DEFAULT_NUM_CLASSES: usize = 2;

fn num_features(channels: usize) -> usize {
    2 * channels + 1
}

/// Per-voxel feature matrix `[voxels, 2C + 1]`.
fn features(sample: &Sample) -> Array2<f32> {
    let channels = sample.channels();
    let mut feats = Array2::ones((sample.num_voxels(), num_features(channels)));
    for (c, channel) in sample.image.axis_iter(Axis(0)).enumerate() {
        for (i, &x) in channel.iter().enumerate() {
            feats[[i, 2 * c]] = x;
            feats[[i, 2 * c + 1]] = x * x;
        }
    }
    feats
}

fn logits(feats: &Array2<f32>, weights: ArrayView2<'_, f32>) -> Array2<f32> {
    if float32_matmul_precision().accumulate_in_f64() {
        feats
            .mapv(f64::from)
            .dot(&weights.t().mapv(f64::from))
            .mapv(|v| v as f32)
    } else {
        feats.dot(&weights.t())
    }
}

/// Serialized form of [`DecathlonModel`]
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModelState {
    num_classes: usize,
    channels: Option<usize>,
    weights: Option<Vec<f32>>,
    optimizer: Option<AdamState>,
    scheduler_step: usize,
}

/// Voxel classifier trained with DiceCE and Adam
pub struct DecathlonModel {
    learning_rate: f32,
    use_scheduler: bool,
    num_classes: usize,
    loss: DiceCELoss,
    channels: Option<usize>,
    /// Row-major `[num_classes, num_features]`
    weights: Option<Array1<f32>>,
    optimizer: Option<Adam>,
    scheduler: Option<Box<dyn LRScheduler>>,
    /// Optimizer state restored before `configure_optimizers`
    pending: Option<(Option<AdamState>, usize)>,
    val_losses: Vec<f64>,
    val_dice: Vec<f64>,
}

impl DecathlonModel {
    /// Model with [`DEFAULT_NUM_CLASSES`] output classes.
    pub fn new(learning_rate: f32, use_scheduler: bool) -> Self {
        Self {
            learning_rate,
            use_scheduler,
            num_classes: DEFAULT_NUM_CLASSES,
            loss: DiceCELoss::default(),
            channels: None,
            weights: None,
            optimizer: None,
            scheduler: None,
            pending: None,
            val_losses: Vec::new(),
            val_dice: Vec::new(),
        }
    }

    /// Set the number of output classes, background included.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes.max(2);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Input channels, once the first batch has been seen.
    pub fn channels(&self) -> Option<usize> {
        self.channels
    }

    /// Flattened parameters, once initialised.
    pub fn parameters(&self) -> Option<&Array1<f32>> {
        self.weights.as_ref()
    }

    pub(crate) fn initialize<R: Rng + ?Sized>(&mut self, channels: usize, rng: &mut R) {
        let f = num_features(channels);
        let bound = 1.0 / (f as f32).sqrt();
        self.weights = Some(Array1::from_shape_fn(self.num_classes * f, |_| {
            rng.random_range(-bound..bound)
        }));
        self.channels = Some(channels);
    }

    fn ensure_initialized(&mut self, batch: &Batch) -> Result<()> {
        let Some(first) = batch.samples.first() else {
            return Err(Error::training(format!("batch {} is empty", batch.index)));
        };
        if self.channels.is_none() {
            let channels = first.channels();
            with_global_rng(|rng| self.initialize(channels, rng));
            tracing::debug!(
                "Initialised {} parameters for {} channel(s), {} classes",
                self.num_classes * num_features(channels),
                channels,
                self.num_classes
            );
        }
        Ok(())
    }

    fn weight_matrix(&self) -> Result<ArrayView2<'_, f32>> {
        let (Some(weights), Some(channels)) = (&self.weights, self.channels) else {
            return Err(Error::training("model parameters are not initialised"));
        };
        weights
            .view()
            .into_shape_with_order((self.num_classes, num_features(channels)))
            .map_err(|e| Error::training(format!("parameter shape mismatch: {e}")))
    }

    /// Class ids clamped to the last class.
    fn targets(&self, sample: &Sample) -> Vec<usize> {
        let last = self.num_classes - 1;
        sample.label.iter().map(|&l| usize::from(l).min(last)).collect()
    }

    /// Features, probabilities and targets for one sample.
    fn forward(&self, sample: &Sample) -> Result<(Array2<f32>, Array2<f32>, Vec<usize>)> {
        let weights = self.weight_matrix()?;
        if Some(sample.channels()) != self.channels {
            return Err(Error::training(format!(
                "case {} has {} channel(s), model expects {}",
                sample.case_id,
                sample.channels(),
                self.channels.unwrap_or_default()
            )));
        }
        if &sample.image.shape()[1..] != sample.label.shape() {
            return Err(Error::training(format!(
                "case {}: image shape {:?} does not match label shape {:?}",
                sample.case_id,
                &sample.image.shape()[1..],
                sample.label.shape()
            )));
        }
        let feats = features(sample);
        let probs = softmax_rows(&logits(&feats, weights));
        Ok((feats, probs, self.targets(sample)))
    }

    /// Argmax class per voxel, in `[x, y, z]` order.
    pub fn predict(&self, sample: &Sample) -> Result<Vec<usize>> {
        let (_, probs, _) = self.forward(sample)?;
        Ok(argmax_rows(&probs))
    }

    fn make_scheduler(&self, max_epochs: usize) -> Box<dyn LRScheduler> {
        if self.use_scheduler {
            Box::new(CosineAnnealingLR::default_min(self.learning_rate, max_epochs))
        } else {
            Box::new(ConstantLR::new(self.learning_rate))
        }
    }
}

impl TrainableModel for DecathlonModel {
    fn configure_optimizers(&mut self, max_epochs: usize) -> Result<()> {
        let mut optimizer = Adam::default_params(self.learning_rate);
        let mut scheduler = self.make_scheduler(max_epochs);
        if let Some((state, step)) = self.pending.take() {
            if let Some(state) = state {
                optimizer.load_state(state);
            }
            scheduler.set_step(step);
        }
        scheduler.apply(&mut optimizer);
        self.optimizer = Some(optimizer);
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn training_step(&mut self, batch: &Batch, _global_step: usize) -> Result<f64> {
        if self.optimizer.is_none() {
            return Err(Error::training(
                "configure_optimizers must be called before training_step",
            ));
        }
        self.ensure_initialized(batch)?;

        let mut grad: Option<Array2<f32>> = None;
        let mut total = 0.0;
        for sample in &batch.samples {
            let (feats, probs, targets) = self.forward(sample)?;
            let out = self.loss.forward(&probs, &targets);
            total += out.loss;
            let sample_grad = out.grad_logits.t().dot(&feats);
            grad = Some(match grad {
                Some(acc) => acc + sample_grad,
                None => sample_grad,
            });
        }

        let scale = 1.0 / batch.len() as f32;
        let grad: Array1<f32> = grad
            .map(|g| g.iter().map(|v| v * scale).collect())
            .unwrap_or_default();
        if let (Some(optimizer), Some(weights)) = (self.optimizer.as_mut(), self.weights.as_mut()) {
            optimizer.step(std::slice::from_mut(weights), std::slice::from_ref(&grad));
        }
        Ok(total / batch.len() as f64)
    }

    fn validation_step(&mut self, batch: &Batch) -> Result<()> {
        self.ensure_initialized(batch)?;
        for sample in &batch.samples {
            let (_, probs, targets) = self.forward(sample)?;
            let out = self.loss.forward(&probs, &targets);
            let pred = argmax_rows(&probs);
            self.val_losses.push(out.loss);
            self.val_dice
                .push(mean_foreground_dice(&pred, &targets, self.num_classes));
        }
        Ok(())
    }

    fn on_validation_epoch_end(&mut self) -> Result<Metrics> {
        if self.val_losses.is_empty() {
            return Ok(Metrics::new());
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        let metrics = Metrics::from([
            ("val_loss".to_string(), mean(&self.val_losses)),
            ("val_dice".to_string(), mean(&self.val_dice)),
        ]);
        self.val_losses.clear();
        self.val_dice.clear();
        Ok(metrics)
    }

    fn on_train_epoch_end(&mut self, _epoch: usize) -> Result<()> {
        if let (Some(scheduler), Some(optimizer)) = (self.scheduler.as_mut(), self.optimizer.as_mut()) {
            scheduler.step();
            scheduler.apply(optimizer);
        }
        Ok(())
    }

    fn learning_rates(&self) -> Vec<(String, f64)> {
        let lr = self
            .optimizer
            .as_ref()
            .map_or(self.learning_rate, |opt| opt.lr());
        let name = self.optimizer.as_ref().map_or("Adam", |opt| opt.name());
        vec![(format!("lr-{name}"), f64::from(lr))]
    }

    fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("learning_rate".to_string(), serde_json::json!(self.learning_rate)),
            ("use_scheduler".to_string(), serde_json::json!(self.use_scheduler)),
            ("num_classes".to_string(), serde_json::json!(self.num_classes)),
        ])
    }

    fn state_dict(&self) -> Result<serde_json::Value> {
        let state = ModelState {
            num_classes: self.num_classes,
            channels: self.channels,
            weights: self.weights.as_ref().map(|w| w.to_vec()),
            optimizer: self.optimizer.as_ref().map(Adam::state),
            scheduler_step: self.scheduler.as_ref().map_or(0, |s| s.current_step()),
        };
        Ok(serde_json::to_value(state)?)
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        let state: ModelState = serde_json::from_value(state)?;
        if state.num_classes != self.num_classes {
            return Err(Error::training(format!(
                "checkpoint has {} classes, model has {}",
                state.num_classes, self.num_classes
            )));
        }
        if let (Some(weights), Some(channels)) = (&state.weights, state.channels) {
            let expected = self.num_classes * num_features(channels);
            if weights.len() != expected {
                return Err(Error::training(format!(
                    "checkpoint holds {} parameters, expected {expected}",
                    weights.len()
                )));
            }
        }
        self.channels = state.channels;
        self.weights = state.weights.map(Array1::from);

        match (self.optimizer.as_mut(), self.scheduler.as_mut()) {
            (Some(optimizer), Some(scheduler)) => {
                if let Some(opt_state) = state.optimizer {
                    optimizer.load_state(opt_state);
                }
                scheduler.set_step(state.scheduler_step);
                scheduler.apply(optimizer);
            }
            _ => self.pending = Some((state.optimizer, state.scheduler_step)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Array4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Foreground where x >= n/2, intensities well separated.
    fn half_sample(id: &str, n: usize, channels: usize) -> Sample {
        let label = Array3::from_shape_fn((n, n, n), |(x, _, _)| u8::from(x >= n / 2));
        let image = Array4::from_shape_fn((channels, n, n, n), |(c, x, y, z)| {
            let base = if x >= n / 2 { 1.5 } else { -1.0 };
            base + 0.05 * ((x + 2 * y + 3 * z + c) % 5) as f32
        });
        Sample {
            case_id: id.to_string(),
            image,
            label,
        }
    }

    fn seeded_model(lr: f32, use_scheduler: bool) -> DecathlonModel {
        let mut model = DecathlonModel::new(lr, use_scheduler);
        model.initialize(1, &mut StdRng::seed_from_u64(0));
        model
    }

    #[test]
    fn test_learns_separable_volume() {
        let mut model = seeded_model(0.1, false);
        model.configure_optimizers(10).unwrap();
        let batch = Batch::new(0, vec![half_sample("a", 6, 1), half_sample("b", 6, 1)]);

        model.validation_step(&batch).unwrap();
        let before = model.on_validation_epoch_end().unwrap()["val_loss"];

        for step in 0..150 {
            let loss = model.training_step(&batch, step).unwrap();
            assert!(loss.is_finite());
        }

        model.validation_step(&batch).unwrap();
        let metrics = model.on_validation_epoch_end().unwrap();
        assert!(metrics["val_loss"] < before);
        assert!(metrics["val_dice"] > 0.95, "val_dice = {}", metrics["val_dice"]);
    }

    #[test]
    fn test_training_requires_optimizer() {
        let mut model = seeded_model(0.1, false);
        let batch = Batch::new(0, vec![half_sample("a", 4, 1)]);
        assert!(model.training_step(&batch, 0).is_err());
    }

    #[test]
    fn test_lazy_init_uses_first_batch_channels() {
        let mut model = DecathlonModel::new(0.01, false);
        assert_eq!(model.channels(), None);
        model.validation_step(&Batch::new(0, vec![half_sample("a", 4, 2)])).unwrap();
        assert_eq!(model.channels(), Some(2));
        assert_eq!(model.parameters().unwrap().len(), 2 * 5);

        let err = model
            .validation_step(&Batch::new(1, vec![half_sample("b", 4, 1)]))
            .unwrap_err();
        assert!(err.to_string().contains("channel"));
    }

    #[test]
    fn test_empty_batch_is_an_error() {
        let mut model = DecathlonModel::new(0.01, false);
        assert!(model.validation_step(&Batch::new(3, Vec::new())).is_err());
    }

    #[test]
    fn test_out_of_range_labels_use_last_class() {
        let mut model = seeded_model(0.01, false);
        let mut sample = half_sample("a", 4, 1);
        sample.label.mapv_inplace(|l| l * 3);
        model.validation_step(&Batch::new(0, vec![sample])).unwrap();
        let metrics = model.on_validation_epoch_end().unwrap();
        assert!(metrics["val_loss"].is_finite());
    }

    #[test]
    fn test_cosine_schedule_per_epoch() {
        let mut model = seeded_model(1e-3, true);
        model.configure_optimizers(4).unwrap();
        assert_eq!(model.learning_rates(), vec![("lr-Adam".to_string(), f64::from(1e-3f32))]);

        let mut prev = model.learning_rates()[0].1;
        for epoch in 0..4 {
            model.on_train_epoch_end(epoch).unwrap();
            let lr = model.learning_rates()[0].1;
            assert!(lr < prev);
            prev = lr;
        }
        assert_abs_diff_eq!(prev, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_schedule() {
        let mut model = seeded_model(1e-3, false);
        model.configure_optimizers(4).unwrap();
        model.on_train_epoch_end(0).unwrap();
        assert_eq!(model.learning_rates()[0].1, f64::from(1e-3f32));
    }

    #[test]
    fn test_state_dict_round_trip() {
        let mut model = seeded_model(0.05, true);
        model.configure_optimizers(5).unwrap();
        let batch = Batch::new(0, vec![half_sample("a", 4, 1)]);
        model.training_step(&batch, 0).unwrap();
        model.on_train_epoch_end(0).unwrap();
        let state = model.state_dict().unwrap();

        let mut restored = DecathlonModel::new(0.05, true);
        restored.load_state_dict(state.clone()).unwrap();
        restored.configure_optimizers(5).unwrap();
        assert_eq!(restored.parameters(), model.parameters());
        assert_eq!(restored.learning_rates(), model.learning_rates());
        assert_eq!(restored.predict(&batch.samples[0]).unwrap(), model.predict(&batch.samples[0]).unwrap());
        assert_eq!(restored.state_dict().unwrap(), state);
    }

    #[test]
    fn test_load_rejects_class_mismatch() {
        let model = seeded_model(0.05, false);
        let state = model.state_dict().unwrap();
        let mut other = DecathlonModel::new(0.05, false).with_num_classes(3);
        assert!(other.load_state_dict(state).is_err());
    }

    #[test]
    fn test_hyperparameters() {
        let model = DecathlonModel::new(0.01, true);
        let hp = model.hyperparameters();
        assert_eq!(hp["use_scheduler"], serde_json::json!(true));
        assert_eq!(hp["num_classes"], serde_json::json!(2));
    }
}

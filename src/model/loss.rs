//! DiceCE loss and Dice metric over per-voxel class probabilities

use ndarray::{Array2, Axis};

/// Row-wise softmax of `[voxels, classes]` logits.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum: f32 = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Output of [`DiceCELoss::forward`]
#[derive(Clone, Debug)]
pub struct DiceCEOutput {
    /// Cross-entropy plus Dice loss
    pub loss: f64,
    pub cross_entropy: f64,
    /// `1 - mean soft Dice`
    pub dice_loss: f64,
    /// dL/dlogits, `[voxels, classes]`
    pub grad_logits: Array2<f32>,
}

/// Cross-entropy plus soft Dice loss
///
/// L = CE + (1 - 1/K Σ_k D_k),  D_k = (2 Σ p·t + s) / (Σ p + Σ t + s)
///
/// Sums run over every voxel of the sample and are accumulated in f64.
#[derive(Clone, Copy, Debug)]
pub struct DiceCELoss {
    smooth: f64,
}

impl Default for DiceCELoss {
    fn default() -> Self {
        Self { smooth: 1e-5 }
    }
}

impl DiceCELoss {
    pub fn new(smooth: f64) -> Self {
        Self { smooth }
    }

    /// Loss and gradient for softmax probabilities `probs` against class ids.
    ///
    /// `targets[i]` must be below `probs.ncols()`.
    pub fn forward(&self, probs: &Array2<f32>, targets: &[usize]) -> DiceCEOutput {
        let (n, k) = probs.dim();
        debug_assert_eq!(n, targets.len());
        let inv_n = 1.0 / n.max(1) as f64;

        let cross_entropy = -targets
            .iter()
            .enumerate()
            .map(|(i, &t)| f64::from(probs[[i, t]]).max(1e-12).ln())
            .sum::<f64>()
            * inv_n;

        // per-class intersection, prediction mass and target mass
        let mut inter = vec![0.0f64; k];
        let mut mass = vec![0.0f64; k];
        let mut count = vec![0.0f64; k];
        for (row, &t) in probs.axis_iter(Axis(0)).zip(targets) {
            for (c, &p) in row.iter().enumerate() {
                mass[c] += f64::from(p);
            }
            inter[t] += f64::from(row[t]);
            count[t] += 1.0;
        }

        let s = self.smooth;
        let denom: Vec<f64> = (0..k).map(|c| mass[c] + count[c] + s).collect();
        let dice: Vec<f64> = (0..k).map(|c| (2.0 * inter[c] + s) / denom[c]).collect();
        let dice_loss = 1.0 - dice.iter().sum::<f64>() / k as f64;

        // dL/dp, then through the softmax Jacobian
        let mut grad_logits = Array2::zeros((n, k));
        let mut g = vec![0.0f64; k];
        for (i, (row, &t)) in probs.axis_iter(Axis(0)).zip(targets).enumerate() {
            for (c, gc) in g.iter_mut().enumerate() {
                let hit = if c == t { 1.0 } else { 0.0 };
                let ddice = (2.0 * hit * denom[c] - (2.0 * inter[c] + s)) / (denom[c] * denom[c]);
                *gc = -ddice / k as f64;
            }
            let p_t = f64::from(row[t]).max(1e-12);
            g[t] -= inv_n / p_t;

            let dot: f64 = row.iter().zip(&g).map(|(&p, &gc)| f64::from(p) * gc).sum();
            for (c, &p) in row.iter().enumerate() {
                grad_logits[[i, c]] = (f64::from(p) * (g[c] - dot)) as f32;
            }
        }

        DiceCEOutput {
            loss: cross_entropy + dice_loss,
            cross_entropy,
            dice_loss,
            grad_logits,
        }
    }
}

/// Index of the largest probability in each row.
pub fn argmax_rows(probs: &Array2<f32>) -> Vec<usize> {
    probs
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (c, &p)| if p > best.1 { (c, p) } else { best })
                .0
        })
        .collect()
}

/// Hard Dice for each foreground class `1..num_classes`.
///
/// A class absent from both prediction and target scores 1.0.
pub fn dice_per_class(pred: &[usize], target: &[usize], num_classes: usize) -> Vec<f64> {
    let mut inter = vec![0usize; num_classes];
    let mut pred_count = vec![0usize; num_classes];
    let mut target_count = vec![0usize; num_classes];
    for (&p, &t) in pred.iter().zip(target) {
        pred_count[p] += 1;
        target_count[t] += 1;
        if p == t {
            inter[p] += 1;
        }
    }
    (1..num_classes)
        .map(|c| {
            let total = pred_count[c] + target_count[c];
            if total == 0 {
                1.0
            } else {
                2.0 * inter[c] as f64 / total as f64
            }
        })
        .collect()
}

/// Mean hard Dice over foreground classes.
pub fn mean_foreground_dice(pred: &[usize], target: &[usize], num_classes: usize) -> f64 {
    let per_class = dice_per_class(pred, target, num_classes);
    if per_class.is_empty() {
        return 1.0;
    }
    per_class.iter().sum::<f64>() / per_class.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = softmax_rows(&array![[1.0, 2.0, 3.0], [1000.0, 0.0, -1000.0]]);
        for row in probs.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert!(probs[[1, 0]] > 0.999);
    }

    #[test]
    fn test_perfect_prediction_has_low_loss() {
        let probs = array![[0.999, 0.001], [0.001, 0.999], [0.999, 0.001]];
        let out = DiceCELoss::default().forward(&probs, &[0, 1, 0]);
        assert!(out.loss < 0.01, "loss = {}", out.loss);
        assert!(out.dice_loss >= 0.0);
    }

    #[test]
    fn test_wrong_prediction_has_high_loss() {
        let probs = array![[0.01, 0.99], [0.99, 0.01]];
        let out = DiceCELoss::default().forward(&probs, &[0, 1]);
        assert!(out.cross_entropy > 4.0);
        assert!(out.dice_loss > 0.9);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let logits = array![[0.3f32, -0.2, 0.1], [1.0, 0.5, -0.5], [-0.4, 0.2, 0.9], [0.0, 0.0, 0.0]];
        let targets = [0, 2, 2, 1];
        let loss_fn = DiceCELoss::default();
        let analytic = loss_fn.forward(&softmax_rows(&logits), &targets).grad_logits;

        let h = 1e-2f32;
        for i in 0..4 {
            for c in 0..3 {
                let mut plus = logits.clone();
                plus[[i, c]] += h;
                let mut minus = logits.clone();
                minus[[i, c]] -= h;
                let numeric = (loss_fn.forward(&softmax_rows(&plus), &targets).loss
                    - loss_fn.forward(&softmax_rows(&minus), &targets).loss)
                    / (2.0 * f64::from(h));
                assert_abs_diff_eq!(f64::from(analytic[[i, c]]), numeric, epsilon = 2e-3);
            }
        }
    }

    #[test]
    fn test_argmax_rows() {
        assert_eq!(argmax_rows(&array![[0.1, 0.9], [0.6, 0.4]]), vec![1, 0]);
    }

    #[test]
    fn test_hard_dice() {
        assert_eq!(dice_per_class(&[0, 1, 1, 0], &[0, 1, 0, 0], 2), vec![2.0 / 3.0]);
        // class 2 absent everywhere counts as perfect
        assert_eq!(dice_per_class(&[0, 1], &[0, 1], 3), vec![1.0, 1.0]);
        // predicted but not present scores zero
        assert_eq!(mean_foreground_dice(&[1, 1], &[0, 0], 2), 0.0);
    }
}

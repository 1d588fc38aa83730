//! Preprocessing and augmentation of image/label pairs

use ndarray::{s, Array3, Array4, Axis};
use rand::Rng;

/// Z-score normalise each channel in place.
///
/// A channel with (near) zero spread is only centred.
pub fn zscore_normalize(image: &mut Array4<f32>) {
    for mut channel in image.axis_iter_mut(Axis(0)) {
        let n = channel.len();
        if n == 0 {
            continue;
        }
        let (sum, sum_sq) = channel.iter().fold((0f64, 0f64), |(s, sq), &v| {
            let v = f64::from(v);
            (s + v, sq + v * v)
        });
        let mean = sum / n as f64;
        let var = (sum_sq / n as f64 - mean * mean).max(0.0);
        let std = var.sqrt();
        let scale = if std > 1e-8 { 1.0 / std } else { 1.0 };
        channel.mapv_inplace(|v| ((f64::from(v) - mean) * scale) as f32);
    }
}

/// Round label intensities to class ids.
pub fn to_class_ids(label: &Array4<f32>) -> Array3<u8> {
    label
        .index_axis(Axis(0), 0)
        .mapv(|v| v.round().clamp(0.0, f32::from(u8::MAX)) as u8)
}

/// Crop a random `patch`³ window, clamped to the volume extent.
pub fn random_crop<R: Rng + ?Sized>(
    image: &Array4<f32>,
    label: &Array3<u8>,
    patch: usize,
    rng: &mut R,
) -> (Array4<f32>, Array3<u8>) {
    let shape = label.shape();
    let mut start = [0usize; 3];
    let mut size = [0usize; 3];
    for axis in 0..3 {
        size[axis] = patch.min(shape[axis]);
        let slack = shape[axis] - size[axis];
        start[axis] = if slack == 0 { 0 } else { rng.random_range(0..=slack) };
    }
    let [x, y, z] = start;
    let [dx, dy, dz] = size;
    (
        image.slice(s![.., x..x + dx, y..y + dy, z..z + dz]).to_owned(),
        label.slice(s![x..x + dx, y..y + dy, z..z + dz]).to_owned(),
    )
}

/// Flip each spatial axis independently with probability `p`.
pub fn random_flip<R: Rng + ?Sized>(
    image: &mut Array4<f32>,
    label: &mut Array3<u8>,
    p: f64,
    rng: &mut R,
) {
    for axis in 0..3 {
        if rng.random_bool(p) {
            image.invert_axis(Axis(axis + 1));
            label.invert_axis(Axis(axis));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zscore_per_channel() {
        let mut image =
            Array::from_shape_vec((2, 2, 1, 1), vec![1.0, 3.0, 10.0, 10.0]).unwrap();
        zscore_normalize(&mut image);
        assert_abs_diff_eq!(image[[0, 0, 0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(image[[0, 1, 0, 0]], 1.0, epsilon = 1e-6);
        // constant channel is only centred
        assert_abs_diff_eq!(image[[1, 0, 0, 0]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_class_ids_round_and_clamp() {
        let label = Array::from_shape_vec((1, 4, 1, 1), vec![0.2, 0.9, 2.49, -3.0]).unwrap();
        let ids = to_class_ids(&label);
        assert_eq!(ids.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_crop_clamps_to_volume() {
        let image = Array4::<f32>::zeros((2, 10, 4, 6));
        let label = Array3::<u8>::zeros((10, 4, 6));
        let mut rng = StdRng::seed_from_u64(0);
        let (img, lab) = random_crop(&image, &label, 5, &mut rng);
        assert_eq!(img.shape(), &[2, 5, 4, 5]);
        assert_eq!(lab.shape(), &[5, 4, 5]);
    }

    #[test]
    fn test_crop_keeps_image_and_label_aligned() {
        let label = Array::from_shape_fn((8, 8, 8), |(x, y, z)| (x * 64 + y * 8 + z) as u8);
        let image = label.mapv(f32::from).insert_axis(Axis(0));
        let mut rng = StdRng::seed_from_u64(3);
        let (mut img, mut lab) = random_crop(&image, &label, 4, &mut rng);
        random_flip(&mut img, &mut lab, 0.5, &mut rng);
        for ((_, &l), &i) in lab.indexed_iter().zip(img.index_axis(Axis(0), 0).iter()) {
            assert_eq!(f32::from(l), i);
        }
    }

    #[test]
    fn test_flip_always_and_never() {
        let mut image = Array::from_shape_vec((1, 2, 1, 1), vec![1.0, 2.0]).unwrap();
        let mut label = Array::from_shape_vec((2, 1, 1), vec![1u8, 2]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        random_flip(&mut image, &mut label, 0.0, &mut rng);
        assert_eq!(label[[0, 0, 0]], 1);
        random_flip(&mut image, &mut label, 1.0, &mut rng);
        assert_eq!(label[[0, 0, 0]], 2);
        assert_eq!(image[[0, 0, 0, 0]], 2.0);
    }
}

//! Utility functions and helpers
//!
//! This module provides common utilities used across the crate.

/// Tensor utilities
pub mod tensor_utils {
    use candle_core::{Device, Result, Tensor};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A 1x1 int64 matrix, the shape reference tools give scalars
    pub fn scalar_matrix(value: i64, device: &Device) -> Result<Tensor> {
        Tensor::from_vec(vec![value], (1, 1), device)
    }

    /// Build a (height, width, 3) u8 image from a per-pixel closure
    pub fn image_from_fn<F>(height: usize, width: usize, device: &Device, f: F) -> Result<Tensor>
    where
        F: Fn(usize, usize) -> [u8; 3],
    {
        let mut data = Vec::with_capacity(height * width * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(y, x));
            }
        }
        Tensor::from_vec(data, (height, width, 3), device)
    }

    /// Seeded random (height, width, 3) u8 image with values in [0, 255)
    pub fn random_image(height: usize, width: usize, seed: u64, device: &Device) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<u8> = (0..height * width * 3).map(|_| rng.gen_range(0..255)).collect();
        Tensor::from_vec(data, (height, width, 3), device)
    }

}

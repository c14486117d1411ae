//! Pixel augmentation.
use tch::{Kind, Tensor};

/// Batched random shift augmentation.
///
/// Pads pixel observations by `pad` replicated pixels on each spatial side
/// and resamples them with a per-sample integer shift, which is equivalent
/// to a random crop of the original size out of the padded image. Shifts
/// are drawn independently for every batch element.
#[derive(Debug, Clone)]
pub struct RandomShift {
    pad: i64,
}

impl RandomShift {
    /// Creates an augmentation with the given padding.
    pub fn new(pad: i64) -> Self {
        Self { pad }
    }

    /// Applies random shifts to pixels `[batch, channels, height, width]`.
    ///
    /// The output is a float tensor on the device of the input; dividing by
    /// 255 is left to the encoders.
    pub fn apply(&self, pixels: &Tensor) -> Tensor {
        let size = pixels.size();
        debug_assert_eq!(size.len(), 4);
        debug_assert_eq!(size[2], size[3]);
        let (n, h) = (size[0], size[2]);
        let device = pixels.device();

        let x = pixels.to_kind(Kind::Float);
        let x = x.pad([self.pad, self.pad, self.pad, self.pad], "replicate", None);

        // base sampling grid over the top-left crop of the padded image
        let eps = 1.0 / (h + 2 * self.pad) as f64;
        let arange = Tensor::linspace(
            -1.0 + eps,
            1.0 - eps,
            h + 2 * self.pad,
            (Kind::Float, device),
        )
        .narrow(0, 0, h)
        .unsqueeze(0)
        .repeat([h, 1])
        .unsqueeze(2);
        let base_grid = Tensor::cat(&[&arange, &arange.transpose(1, 0)], 2)
            .unsqueeze(0)
            .repeat([n, 1, 1, 1]);

        // per-sample integer shifts in pixels of the padded image
        let shift: Vec<f32> = (0..2 * n)
            .map(|_| fastrand::i64(0..2 * self.pad + 1) as f32)
            .collect();
        let shift = Tensor::from_slice(&shift)
            .to(device)
            .reshape([n, 1, 1, 2])
            * (2.0 * eps);

        let grid = base_grid + shift;
        x.grid_sampler(&grid, 0, 0, false)
    }
}

#[cfg(test)]
mod tests {
    use super::RandomShift;
    use tch::{Kind, Tensor};

    #[test]
    fn test_shape_and_range() {
        let pixels = Tensor::randint(256, [2, 3, 16, 16], (Kind::Uint8, tch::Device::Cpu));
        let aug = RandomShift::new(4);

        let shifted = aug.apply(&pixels);
        assert_eq!(shifted.size(), vec![2, 3, 16, 16]);
        assert_eq!(shifted.kind(), Kind::Float);

        let max = f64::try_from(shifted.max()).unwrap();
        let min = f64::try_from(shifted.min()).unwrap();
        assert!(max <= 255.0 && min >= 0.0);
    }

    #[test]
    fn test_zero_pad_is_identity() {
        let pixels = Tensor::randint(256, [1, 1, 8, 8], (Kind::Uint8, tch::Device::Cpu));
        let aug = RandomShift::new(0);

        let shifted = aug.apply(&pixels);
        let diff = f64::try_from((shifted - pixels.to_kind(Kind::Float)).abs().max()).unwrap();
        assert!(diff < 1e-4);
    }
}

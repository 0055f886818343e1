use derive_new::new;
use rand::Rng;

use crate::loader::TileArrays;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoutFill {
    Zero,
    /// One uniform `[0, 1)` value per hole and channel.
    Noise,
}

/// Square holes punched into some channels of a tile at random positions.
#[derive(Debug, Clone, new)]
pub struct Cutout {
    pub channels: Vec<usize>,
    pub fill: CutoutFill,
    /// Inclusive range of the number of holes.
    pub n_holes: (usize, usize),
    /// Inclusive range of the hole side length, in pixels.
    pub length: (usize, usize),
    pub probability: f64,
}

impl Cutout {
    /// Zeroes patches of the fire radiative power channel.
    pub fn fire_dropout() -> Self {
        Self::new(vec![3], CutoutFill::Zero, (1, 5), (5, 50), 0.5)
    }

    /// Replaces patches of the reflectance channels with noise.
    pub fn reflectance_noise() -> Self {
        Self::new(vec![0, 1, 2], CutoutFill::Noise, (1, 5), (5, 50), 0.5)
    }

    /// Returns the number of holes cut.
    pub fn apply<R: Rng + ?Sized>(&self, tile: &mut TileArrays, rng: &mut R) -> usize {
        if !rng.gen_bool(self.probability.clamp(0.0, 1.0)) || tile.height == 0 || tile.width == 0 {
            return 0;
        }

        let (height, width) = tile.shape();
        let n_channels = tile.channels;
        let n_holes = rng.gen_range(self.n_holes.0..=self.n_holes.1);
        let length = rng.gen_range(self.length.0..=self.length.1) as f32;

        for _ in 0..n_holes {
            let center_y = rng.gen_range(0..height) as f32;
            let center_x = rng.gen_range(0..width) as f32;
            let y1 = (center_y - length / 2.0).clamp(0.0, height as f32) as usize;
            let y2 = (center_y + length / 2.0).clamp(0.0, height as f32) as usize;
            let x1 = (center_x - length / 2.0).clamp(0.0, width as f32) as usize;
            let x2 = (center_x + length / 2.0).clamp(0.0, width as f32) as usize;

            for channel in self.channels.iter().filter(|c| **c < n_channels) {
                let value = match self.fill {
                    CutoutFill::Zero => 0.0,
                    CutoutFill::Noise => rng.gen::<f32>(),
                };
                let plane = tile.channel_mut(*channel);
                for y in y1..y2 {
                    plane[y * width + x1..y * width + x2].fill(value);
                }
            }
        }
        n_holes
    }
}

/// Training-time augmentation, applied tile by tile.
#[derive(Debug, Clone, Default)]
pub struct Augmentation {
    transforms: Vec<Cutout>,
}

impl Augmentation {
    pub fn new(transforms: Vec<Cutout>) -> Self {
        Self { transforms }
    }

    pub fn cutouts() -> Self {
        Self::new(vec![Cutout::fire_dropout(), Cutout::reflectance_noise()])
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn apply<R: Rng + ?Sized>(&self, tile: &mut TileArrays, rng: &mut R) {
        for transform in &self.transforms {
            transform.apply(tile, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn ones(channels: usize, side: usize) -> TileArrays {
        TileArrays::new(channels, side, side, vec![1.0; channels * side * side])
    }

    #[test]
    fn zero_hole_stays_inside_tile() {
        let cutout = Cutout::new(vec![0], CutoutFill::Zero, (1, 1), (4, 4), 1.0);
        let mut rng = StdRng::seed_from_u64(5);

        for _ in 0..50 {
            let mut tile = ones(1, 10);
            assert_eq!(cutout.apply(&mut tile, &mut rng), 1);

            let zeros = tile
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v == 0.0)
                .map(|(i, _)| (i / 10, i % 10))
                .collect::<Vec<(usize, usize)>>();
            assert!(!zeros.is_empty() && zeros.len() <= 16);

            let rows = zeros.iter().map(|(y, _)| *y);
            let cols = zeros.iter().map(|(_, x)| *x);
            let (y_min, y_max) = (rows.clone().min().unwrap(), rows.max().unwrap());
            let (x_min, x_max) = (cols.clone().min().unwrap(), cols.max().unwrap());
            assert_eq!(zeros.len(), (y_max - y_min + 1) * (x_max - x_min + 1));
        }
    }

    #[test]
    fn noise_only_touches_selected_channels() {
        let cutout = Cutout::new(vec![0, 1], CutoutFill::Noise, (2, 2), (6, 6), 1.0);
        let mut tile = ones(3, 8);
        let mut rng = StdRng::seed_from_u64(9);
        cutout.apply(&mut tile, &mut rng);

        assert!(tile.values[128..].iter().all(|v| *v == 1.0));
        assert!(tile.values[..128].iter().any(|v| *v != 1.0));
        assert!(tile.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn probability_zero_is_identity() {
        let augmentation = Augmentation::new(vec![Cutout::new(
            vec![0],
            CutoutFill::Zero,
            (1, 5),
            (5, 50),
            0.0,
        )]);
        let mut tile = ones(4, 16);
        augmentation.apply(&mut tile, &mut StdRng::seed_from_u64(1));
        assert_eq!(tile, ones(4, 16));
    }
}

use burn::tensor::{backend::Backend, Tensor};
use derive_new::new;

use crate::error::{BaNetError, Result};

/// Turns a flat, sequence-major batch of tiles into the layout the sequence
/// model expects, and back.
#[derive(Debug, Clone, Copy, new)]
pub struct SequenceReshaper {
    sequence_len: usize,
}

impl SequenceReshaper {
    pub fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    /// `(sequence_len * n, C, H, W)` to `(n, C, sequence_len, H, W)`.
    pub fn to_sequences<B: Backend>(&self, flat: Tensor<B, 4>) -> Result<Tensor<B, 5>> {
        let [len, channels, height, width] = flat.dims();
        if self.sequence_len == 0 || len == 0 || len % self.sequence_len != 0 {
            return Err(BaNetError::ShapeMismatch {
                len,
                sequence_len: self.sequence_len,
            });
        }

        let n_sequences = len / self.sequence_len;
        Ok(flat
            .reshape([n_sequences, self.sequence_len, channels, height, width])
            .swap_dims(1, 2))
    }

    /// Inverse of [`to_sequences`](Self::to_sequences).
    pub fn to_flat<B: Backend>(&self, sequences: Tensor<B, 5>) -> Result<Tensor<B, 4>> {
        let [n_sequences, channels, sequence_len, height, width] = sequences.dims();
        if sequence_len != self.sequence_len {
            return Err(BaNetError::ShapeMismatch {
                len: n_sequences * sequence_len,
                sequence_len: self.sequence_len,
            });
        }

        Ok(sequences
            .swap_dims(1, 2)
            .reshape([n_sequences * sequence_len, channels, height, width]))
    }
}

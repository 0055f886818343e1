use burn::tensor::{activation::sigmoid, backend::Backend, ElementConversion, Tensor};
use derive_new::new;
use serde::{Deserialize, Serialize};

pub const THRESHOLD: f32 = 0.5;

/// Binary cross-entropy on logits, averaged over every element and scaled so
/// the logged value sits in the same range as the other metrics.
#[derive(Debug, Clone, Copy, new)]
pub struct SequenceBceLoss {
    scale: f32,
}

impl Default for SequenceBceLoss {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl SequenceBceLoss {
    pub fn forward<B: Backend, const D: usize>(&self, logits: Tensor<B, D>, targets: Tensor<B, D>) -> Tensor<B, 1> {
        // max(x, 0) - x * y + ln(1 + e^-|x|)
        let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
        let loss = logits.clone().clamp_min(0.0) - logits * targets + softplus;
        loss.mean().mul_scalar(self.scale)
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

/// Fraction of pixels whose thresholded probability agrees with the thresholded target.
pub fn accuracy<B: Backend, const D: usize>(logits: Tensor<B, D>, targets: Tensor<B, D>, threshold: f32) -> f32 {
    let predicted = sigmoid(logits).greater_elem(threshold).float();
    let expected = targets.greater_elem(threshold).float();
    scalar(predicted.equal(expected).float().mean())
}

/// Dice overlap of the burned footprint: probabilities and targets are summed
/// over the sequence before thresholding. Two empty footprints score 1.
pub fn dice2d<B: Backend>(logits: Tensor<B, 5>, targets: Tensor<B, 5>, threshold: f32) -> f32 {
    let predicted = sigmoid(logits).sum_dim(2).greater_elem(threshold).float();
    let expected = targets.sum_dim(2).greater_elem(threshold).float();

    let overlap = scalar((predicted.clone() * expected.clone()).sum());
    let total = scalar((predicted + expected).sum());
    if total == 0.0 {
        1.0
    } else {
        2.0 * overlap / total
    }
}

/// Mean absolute error, in time steps, between the predicted and the true
/// burn step, over pixels predicted burned. `None` when no pixel is.
pub fn burn_date_mae<B: Backend>(logits: Tensor<B, 5>, targets: Tensor<B, 5>, threshold: f32) -> Option<f32> {
    let burned = sigmoid(logits.clone()).sum_dim(2).greater_elem(threshold).float();
    let count = scalar(burned.clone().sum());
    if count == 0.0 {
        return None;
    }

    let predicted_step = logits.argmax(2).float();
    let expected_step = targets.argmax(2).float();
    let error = scalar(((predicted_step - expected_step).abs() * burned).sum());
    Some(error / count)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetrics {
    pub accuracy: f32,
    pub dice: f32,
    pub mae: Option<f32>,
}

impl SequenceMetrics {
    pub fn evaluate<B: Backend>(logits: Tensor<B, 5>, targets: Tensor<B, 5>) -> Self {
        Self {
            accuracy: accuracy(logits.clone(), targets.clone(), THRESHOLD),
            dice: dice2d(logits.clone(), targets.clone(), THRESHOLD),
            mae: burn_date_mae(logits, targets, THRESHOLD),
        }
    }
}

/// Running means over the batches of one epoch.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    loss: f64,
    accuracy: f64,
    dice: f64,
    mae: f64,
    mae_batches: usize,
    batches: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub loss: f32,
    pub accuracy: f32,
    pub dice: f32,
    pub mae: Option<f32>,
}

impl MetricsAccumulator {
    pub fn push_loss(&mut self, loss: f32) {
        self.loss += loss as f64;
        self.batches += 1;
    }

    pub fn push_metrics(&mut self, metrics: &SequenceMetrics) {
        self.accuracy += metrics.accuracy as f64;
        self.dice += metrics.dice as f64;
        if let Some(mae) = metrics.mae {
            self.mae += mae as f64;
            self.mae_batches += 1;
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn summary(&self) -> MetricsSummary {
        let mean = |sum: f64, n: usize| if n == 0 { f32::NAN } else { (sum / n as f64) as f32 };
        MetricsSummary {
            loss: mean(self.loss, self.batches),
            accuracy: mean(self.accuracy, self.batches),
            dice: mean(self.dice, self.batches),
            mae: (self.mae_batches > 0).then(|| mean(self.mae, self.mae_batches)),
        }
    }
}

use burn::prelude::*;
use std::time::Instant;

/// Number of rows whose target is among the `k` highest logits.
///
/// # Shapes
///   - logits [batch, num_classes]
///   - targets [batch]
pub fn top_k_correct<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    k: usize,
) -> usize {
    let [_batch, num_classes] = logits.dims();
    let k = k.clamp(1, num_classes);
    let top = logits.argsort_descending(1).narrow(1, 0, k);
    let targets = targets.unsqueeze_dim::<2>(1).repeat_dim(1, k);
    let hits: i64 = top
        .equal(targets)
        .any_dim(1)
        .int()
        .sum()
        .into_scalar()
        .elem();
    hits as usize
}

/// Running top-k accuracy, reported as an error rate.
#[derive(Clone, Debug)]
pub struct TopKAccuracy {
    k: usize,
    correct: usize,
    total: usize,
}

impl TopKAccuracy {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            correct: 0,
            total: 0,
        }
    }

    pub fn update<B: Backend>(&mut self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        let [batch] = targets.dims();
        self.correct += top_k_correct(logits, targets, self.k);
        self.total += batch;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn error(&self) -> f64 {
        1. - self.accuracy()
    }
}

/// Top-1 and top-5 accuracies, updated together.
#[derive(Clone, Debug)]
pub struct ClassificationErrors {
    pub top1: TopKAccuracy,
    pub top5: TopKAccuracy,
}

impl Default for ClassificationErrors {
    fn default() -> Self {
        Self {
            top1: TopKAccuracy::new(1),
            top5: TopKAccuracy::new(5),
        }
    }
}

impl ClassificationErrors {
    pub fn update<B: Backend>(&mut self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        self.top1.update(logits.clone(), targets.clone());
        self.top5.update(logits, targets);
    }

    pub fn errors(&self) -> (f64, f64) {
        (self.top1.error(), self.top5.error())
    }
}

/// Mean per-sample loss of an epoch made of full batches,
/// `sum / (num_batches * batch_size)`.
#[derive(Clone, Copy, Debug)]
pub struct LossMeter {
    batch_size: usize,
    sum: f64,
    batches: usize,
}

impl LossMeter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            sum: 0.,
            batches: 0,
        }
    }

    /// Adds the mean loss of one full batch.
    pub fn update(&mut self, batch_mean: f64) {
        self.sum += batch_mean * self.batch_size as f64;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn mean(&self) -> f64 {
        if self.batches == 0 {
            0.
        } else {
            self.sum / (self.batches * self.batch_size) as f64
        }
    }
}

/// Samples per second since the last report.
#[derive(Debug)]
pub struct Speedometer {
    since: Instant,
    samples: usize,
}

impl Default for Speedometer {
    fn default() -> Self {
        Self {
            since: Instant::now(),
            samples: 0,
        }
    }
}

impl Speedometer {
    pub fn add(&mut self, samples: usize) {
        self.samples += samples;
    }

    /// Returns the throughput and restarts the measure.
    pub fn report(&mut self) -> f64 {
        let elapsed = self.since.elapsed().as_secs_f64();
        let speed = if elapsed > 0. {
            self.samples as f64 / elapsed
        } else {
            0.
        };
        *self = Self::default();
        speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn top_k_counts_hits() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_floats(
            [
                [0.1, 0.9, 0.0, 0.0],
                [0.8, 0.1, 0.05, 0.05],
                [0.1, 0.2, 0.3, 0.4],
            ],
            &device,
        );
        let targets = Tensor::<B, 1, Int>::from_ints([1, 1, 0], &device);
        assert_eq!(top_k_correct(logits.clone(), targets.clone(), 1), 1);
        assert_eq!(top_k_correct(logits.clone(), targets.clone(), 2), 2);
        // k larger than the number of classes covers everything
        assert_eq!(top_k_correct(logits, targets, 5), 3);
    }

    #[test]
    fn errors_accumulate_over_batches() {
        let device = Default::default();
        let mut errors = ClassificationErrors::default();
        let logits = Tensor::<B, 2>::from_floats([[1.0, 0.0], [1.0, 0.0]], &device);
        errors.update(logits.clone(), Tensor::from_ints([0, 1], &device));
        errors.update(logits, Tensor::from_ints([0, 0], &device));
        let (top1, top5) = errors.errors();
        assert!((top1 - 0.25).abs() < 1e-9);
        assert_eq!(top5, 0.);
        assert_eq!(errors.top1.accuracy(), 0.75);
    }

    #[test]
    fn loss_is_averaged_over_trained_samples() {
        let mut loss = LossMeter::new(4);
        assert_eq!(loss.mean(), 0.);
        loss.update(1.0);
        loss.update(3.0);
        // (4 * 1.0 + 4 * 3.0) / (2 * 4)
        assert_eq!(loss.mean(), 2.0);
        assert_eq!(loss.batches(), 2);
    }
}

use crate::playground::Playground;
use ndarray::Array2;
use serde::Serialize;
use tracing::info;

// How a classifier did on one batch of test data.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestResult {
    pub classes: Vec<String>,
    pub labels: Vec<usize>,
    pub predictions: Vec<usize>,
    pub accuracy: f64,
}

impl TestResult {
    // Counts of (label, prediction) pairs, with a row per label and a column per prediction.
    pub fn confusion_matrix(&self) -> Array2<usize> {
        let size = self
            .labels
            .iter()
            .chain(&self.predictions)
            .map(|&class| class + 1)
            .max()
            .unwrap_or(0)
            .max(self.classes.len());

        let mut matrix = Array2::zeros((size, size));
        for (&label, &prediction) in self.labels.iter().zip(&self.predictions) {
            matrix[[label, prediction]] += 1;
        }
        matrix
    }
}

pub fn test_network(playground: &mut Playground, size: usize) -> TestResult {
    let batch = playground.next_test_batch(size);
    let labels = batch.label_classes();
    let predictions = playground.model().predict_classes(&batch.xs);
    let accuracy = compute_accuracy(&labels, &predictions);
    info!(samples = labels.len(), accuracy, "tested network");

    TestResult {
        classes: playground
            .shape()
            .classes()
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        labels,
        predictions,
        accuracy,
    }
}

// Share of predictions equal to their label. Nothing to compare counts as zero accuracy.
pub fn compute_accuracy(labels: &[usize], predictions: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let hits = labels
        .iter()
        .zip(predictions)
        .filter(|(label, prediction)| label == prediction)
        .count();
    hits as f64 / labels.len() as f64
}

pub fn mean_absolute_error(playground: &mut Playground, size: usize) -> f64 {
    let batch = playground.next_test_batch(size);
    if batch.is_empty() {
        return 0.0;
    }
    let outputs = playground.model().predict(&batch.xs);
    let error = (&outputs - &batch.labels).mapv(f64::abs).mean().unwrap_or(0.0);
    info!(samples = batch.len(), error, "tested network");
    error
}

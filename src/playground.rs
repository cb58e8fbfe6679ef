use crate::dataset::{Batch, DataSource};
use crate::error::{Error, Result};
use crate::filter::LinkFilter;
use crate::network::Network;
use crate::presets::NetworkKind;
use crate::shape::{DenseNetwork, FilterScope, LinkedNetwork};
use crate::testing::{self, TestResult, compute_accuracy};
use ndarray::ArrayView1;
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingRound {
    pub samples_seen: usize,
    pub mean_loss: f64,
    pub final_accuracy: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub samples_seen: usize,
    pub training_accuracy: Option<f64>,
    pub test_accuracy: Option<f64>,
    pub test_error: Option<f64>,
}

// A model under training together with the layout used to draw it and the data it learns from.
pub struct Playground {
    kind: Option<NetworkKind>,
    model: Network,
    shape: DenseNetwork,
    data: Box<dyn DataSource>,
    stats: NetworkStats,
    history: Vec<TrainingRound>,
}

impl Playground {
    pub fn new(model: Network, shape: DenseNetwork, data: Box<dyn DataSource>) -> Result<Playground> {
        if model.sizes() != shape.layer_sizes().as_slice() {
            return Err(Error::ShapeMismatch(format!(
                "model layers {:?} do not match layout layers {:?}",
                model.sizes(),
                shape.layer_sizes()
            )));
        }
        if data.input_size() != model.input_size() || data.output_size() != model.output_size() {
            return Err(Error::ShapeMismatch(format!(
                "data has {} inputs and {} outputs but the model expects {} and {}",
                data.input_size(),
                data.output_size(),
                model.input_size(),
                model.output_size()
            )));
        }

        Ok(Playground {
            kind: None,
            model,
            shape,
            data,
            stats: NetworkStats::default(),
            history: Vec::new(),
        })
    }

    pub fn from_preset(kind: NetworkKind, data_dir: &Path, seed: u64) -> Result<Playground> {
        let mut rng = StdRng::seed_from_u64(seed);
        let model = Network::new(&kind.model(), &mut rng)?;
        let data = kind.data_source(data_dir, seed)?;
        let mut playground = Playground::new(model, kind.shape()?, data)?;
        playground.kind = Some(kind);
        info!(?kind, sizes = ?playground.model.sizes(), "created playground");
        Ok(playground)
    }

    pub fn kind(&self) -> Option<NetworkKind> {
        self.kind
    }

    pub fn model(&self) -> &Network {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Network {
        &mut self.model
    }

    pub fn shape(&self) -> &DenseNetwork {
        &self.shape
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn history(&self) -> &[TrainingRound] {
        &self.history
    }

    // A regressor has no class labels on its output layer to count hits against.
    pub fn is_classifier(&self) -> bool {
        self.kind.map_or(self.model.output_size() > 1, NetworkKind::is_classifier)
    }

    pub fn next_train_batch(&mut self, batch_size: usize) -> Batch {
        self.data.next_train_batch(batch_size)
    }

    pub fn next_test_batch(&mut self, batch_size: usize) -> Batch {
        self.data.next_test_batch(batch_size)
    }

    // Trains on `batches` batches of `batch_size` samples. The accuracy reported for the round is
    // measured on the last batch once it has been learned from.
    pub fn train_round(&mut self, batches: usize, batch_size: usize) -> TrainingRound {
        let mut total_loss = 0.0;
        let mut last_batch = None;
        for _ in 0..batches {
            let batch = self.data.next_train_batch(batch_size);
            total_loss += self.model.train_batch(&batch);
            last_batch = Some(batch);
        }

        let final_accuracy = last_batch.filter(|_| self.is_classifier()).map(|batch| {
            compute_accuracy(&batch.label_classes(), &self.model.predict_classes(&batch.xs))
        });
        let round = TrainingRound {
            samples_seen: batches * batch_size,
            mean_loss: total_loss / batches.max(1) as f64,
            final_accuracy,
        };
        debug!(?round, "training round done");
        self.training_round_done(round.clone());
        round
    }

    fn training_round_done(&mut self, round: TrainingRound) {
        self.stats.samples_seen += round.samples_seen;
        self.stats.training_accuracy = round.final_accuracy;
        self.history.push(round);
    }

    // Classifiers are scored by accuracy, regressors by mean absolute error. An empty test leaves
    // the stats untouched.
    pub fn test(&mut self, test_size: usize) -> Option<TestResult> {
        if test_size == 0 {
            return None;
        }
        if self.is_classifier() {
            let result = testing::test_network(self, test_size);
            self.stats.test_accuracy = Some(result.accuracy);
            Some(result)
        } else {
            let error = testing::mean_absolute_error(self, test_size);
            self.stats.test_error = Some(error);
            None
        }
    }

    // The layout with the activations produced by one input, and the links kept by the filter.
    pub fn snapshot<F: LinkFilter + ?Sized>(
        &self,
        input: ArrayView1<f64>,
        link_filter: &F,
        scope: FilterScope,
    ) -> Result<LinkedNetwork> {
        let activations = self.model.layer_activations(input);
        self.shape
            .derive_links_scoped(&self.model.link_weights(), Some(&activations), link_filter, scope)
    }

    // The layout and the links kept by the filter, with every activation at zero.
    pub fn weights_snapshot<F: LinkFilter + ?Sized>(
        &self,
        link_filter: &F,
        scope: FilterScope,
    ) -> Result<LinkedNetwork> {
        self.shape
            .derive_links_scoped(&self.model.link_weights(), None, link_filter, scope)
    }
}

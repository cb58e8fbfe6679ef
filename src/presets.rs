// The networks the playground ships with. Each one pairs a model with the layout used to draw it
// and the data it learns from.

use crate::dataset::{DataSource, MnistConfig, MnistData};
use crate::error::Result;
use crate::heat_index::TemperatureControlData;
use crate::network::{Activation, DenseLayerSpec, Loss, ModelSpec, Optimizer};
use crate::shape::{DenseNetwork, LayerSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;

const IMAGE_SIZE: usize = 28 * 28;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkKind {
    /// Handwritten digits 0 to 9
    #[default]
    AllDigits,
    /// Handwritten zeros and ones
    ZeroOne,
    /// Fashion-MNIST clothing items
    Fashion,
    /// Heat index from temperature and humidity
    TemperatureControl,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 4] = [
        NetworkKind::AllDigits,
        NetworkKind::ZeroOne,
        NetworkKind::Fashion,
        NetworkKind::TemperatureControl,
    ];

    pub fn is_classifier(self) -> bool {
        self != NetworkKind::TemperatureControl
    }

    pub fn layer_spacing(self) -> f64 {
        match self {
            NetworkKind::AllDigits | NetworkKind::Fashion => 15.0,
            NetworkKind::ZeroOne => 12.0,
            NetworkKind::TemperatureControl => 3.0,
        }
    }

    pub fn layer_specs(self) -> Vec<LayerSpec> {
        let digits = |count: usize| (0..count).map(|digit| digit.to_string());
        match self {
            NetworkKind::AllDigits => vec![
                image_input_layer(),
                LayerSpec::new("Hidden layer 1", 32, 55.0, 0.0, 17.0),
                LayerSpec::new("Hidden layer 2", 32, 55.0, 0.0, 17.0),
                LayerSpec::new("Output layer", 10, 40.0, 5.0, 17.0).with_classes(digits(10)),
            ],
            NetworkKind::ZeroOne => vec![
                image_input_layer(),
                LayerSpec::new("Hidden layer 1", 32, 40.0, 0.0, 14.0),
                LayerSpec::new("Output layer", 2, 20.0, 0.0, 17.0).with_classes(digits(2)),
            ],
            NetworkKind::Fashion => vec![
                image_input_layer(),
                LayerSpec::new("Hidden layer 1", 50, 55.0, 0.0, 10.0),
                LayerSpec::new("Hidden layer 2", 50, 55.0, 0.0, 10.0),
                LayerSpec::new("Output layer", 10, 40.0, 5.0, 16.0)
                    .with_classes([
                        "T-shirt",
                        "Trouser",
                        "Pullover",
                        "Dress",
                        "Coat",
                        "Sandal",
                        "Shirt",
                        "Sneaker",
                        "Bag",
                        "Ankle boot",
                    ])
                    .with_rotated_class_names(),
            ],
            NetworkKind::TemperatureControl => vec![
                LayerSpec::new("Input layer", 2, 3.0, 0.0, 20.0)
                    .with_classes(["Temperature", "Relative humidity"]),
                LayerSpec::new("Output layer", 1, 3.0, 0.0, 20.0).with_classes(["Heat index"]),
            ],
        }
    }

    pub fn shape(self) -> Result<DenseNetwork> {
        DenseNetwork::new(self.layer_spacing(), &self.layer_specs())
    }

    pub fn model(self) -> ModelSpec {
        let dense = |units, activation| DenseLayerSpec { units, activation };
        match self {
            NetworkKind::AllDigits => ModelSpec {
                input_size: IMAGE_SIZE,
                layers: vec![
                    dense(32, Activation::Relu),
                    dense(32, Activation::Relu),
                    dense(10, Activation::Softmax),
                ],
                loss: Loss::CategoricalCrossEntropy,
                optimizer: Optimizer::adam(0.001),
            },
            NetworkKind::ZeroOne => ModelSpec {
                input_size: IMAGE_SIZE,
                layers: vec![dense(32, Activation::Relu), dense(2, Activation::Softmax)],
                loss: Loss::CategoricalCrossEntropy,
                optimizer: Optimizer::adam(0.001),
            },
            NetworkKind::Fashion => ModelSpec {
                input_size: IMAGE_SIZE,
                layers: vec![
                    dense(50, Activation::Relu),
                    dense(50, Activation::Relu),
                    dense(10, Activation::Softmax),
                ],
                loss: Loss::CategoricalCrossEntropy,
                optimizer: Optimizer::sgd(0.1),
            },
            NetworkKind::TemperatureControl => ModelSpec {
                input_size: 2,
                layers: vec![dense(1, Activation::Relu)],
                loss: Loss::MeanAbsoluteError,
                optimizer: Optimizer::sgd(0.1),
            },
        }
    }

    // MNIST digits are read from `data_dir`, Fashion-MNIST from `data_dir/fashion`.
    pub fn data_source(self, data_dir: &Path, seed: u64) -> Result<Box<dyn DataSource>> {
        let source: Box<dyn DataSource> = match self {
            NetworkKind::AllDigits => Box::new(MnistData::load(&MnistConfig::in_dir(data_dir), seed)?),
            NetworkKind::ZeroOne => Box::new(MnistData::load(&MnistConfig::zero_one(data_dir), seed)?),
            NetworkKind::Fashion => {
                Box::new(MnistData::load(&MnistConfig::in_dir(&data_dir.join("fashion")), seed)?)
            }
            NetworkKind::TemperatureControl => Box::new(TemperatureControlData::new(seed)),
        };
        Ok(source)
    }
}

fn image_input_layer() -> LayerSpec {
    LayerSpec::new("Input layer", IMAGE_SIZE, 24.0, 24.0, 7.0).with_neurons_per_row(28)
}

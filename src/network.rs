use crate::dataset::Batch;
use crate::error::{Error, Result};
use itertools::Itertools;
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, Zip};
use ndarray_rand::{
    RandomExt,
    rand::Rng,
    rand_distr::Uniform,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Softmax,
    Linear,
}

impl Activation {
    // Applies the activation to a [size x batch] matrix of weighted inputs. Softmax normalizes
    // each column (i.e. each datum) on its own.
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Linear => z.clone(),
            Activation::Softmax => {
                let mut activation = z.clone();
                for mut column in activation.columns_mut() {
                    // Shifting by the maximum keeps exp() from overflowing.
                    let max = column.fold(f64::NEG_INFINITY, |max, &v| max.max(v));
                    column.mapv_inplace(|v| (v - max).exp());
                    let sum = column.sum();
                    column /= sum;
                }
                activation
            }
        }
    }

    // Derivative of the activation with respect to its weighted input. Softmax is only allowed on
    // the output layer together with cross entropy, where the combined gradient is simply
    // (output - expected), so its factor here is 1.
    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => z.mapv(sigmoid_derivative),
            Activation::Linear | Activation::Softmax => Array::ones(z.raw_dim()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    CategoricalCrossEntropy,
    MeanSquaredError,
    MeanAbsoluteError,
}

impl Loss {
    // Mean loss over the batch. Both matrices are [outputs x batch].
    fn value(self, output: &Array2<f64>, expected: &Array2<f64>) -> f64 {
        let batch_size = output.ncols().max(1) as f64;
        match self {
            Loss::CategoricalCrossEntropy => {
                -Zip::from(output)
                    .and(expected)
                    .fold(0.0, |sum, &a, &y| sum + y * a.max(1e-12).ln())
                    / batch_size
            }
            Loss::MeanSquaredError => (output - expected).mapv(|d| d * d).mean().unwrap_or(0.0),
            Loss::MeanAbsoluteError => (output - expected).mapv(f64::abs).mean().unwrap_or(0.0),
        }
    }

    // Gradient of the loss with respect to the weighted input of the output layer, summed over
    // the batch rather than averaged (the optimizer divides by the batch size).
    fn output_delta(
        self,
        activation: Activation,
        output: &Array2<f64>,
        expected: &Array2<f64>,
        z: &Array2<f64>,
    ) -> Array2<f64> {
        let difference = output - expected;
        match self {
            Loss::CategoricalCrossEntropy => difference,
            Loss::MeanSquaredError => difference * activation.derivative(z),
            Loss::MeanAbsoluteError => difference.mapv(sign) * activation.derivative(z),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimizer {
    Sgd {
        learning_rate: f64,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
}

impl Optimizer {
    pub fn sgd(learning_rate: f64) -> Optimizer {
        Optimizer::Sgd { learning_rate }
    }

    pub fn adam(learning_rate: f64) -> Optimizer {
        Optimizer::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match *self {
            Optimizer::Sgd { learning_rate } | Optimizer::Adam { learning_rate, .. } => {
                learning_rate
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseLayerSpec {
    pub units: usize,
    pub activation: Activation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_size: usize,
    pub layers: Vec<DenseLayerSpec>,
    pub loss: Loss,
    pub optimizer: Optimizer,
}

impl ModelSpec {
    pub fn sizes(&self) -> Vec<usize> {
        std::iter::once(self.input_size)
            .chain(self.layers.iter().map(|layer| layer.units))
            .collect()
    }
}

// First and second moment estimates kept by Adam for every weight and bias.
#[derive(Clone, Debug)]
struct AdamState {
    step: i32,
    weight_moments: Vec<Array2<f64>>,
    weight_velocities: Vec<Array2<f64>>,
    bias_moments: Vec<Array2<f64>>,
    bias_velocities: Vec<Array2<f64>>,
}

impl AdamState {
    fn new(weights: &[Array2<f64>], biases: &[Array2<f64>]) -> AdamState {
        let zeros = |arrays: &[Array2<f64>]| -> Vec<Array2<f64>> {
            arrays.iter().map(|array| Array::zeros(array.raw_dim())).collect()
        };
        AdamState {
            step: 0,
            weight_moments: zeros(weights),
            weight_velocities: zeros(weights),
            bias_moments: zeros(biases),
            bias_velocities: zeros(biases),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Network {
    sizes: Vec<usize>,
    activations: Vec<Activation>,
    biases: Vec<Array2<f64>>,
    weights: Vec<Array2<f64>>,
    loss: Loss,
    optimizer: Optimizer,
    adam: Option<AdamState>,
}

impl Network {
    pub fn new<R: Rng + ?Sized>(spec: &ModelSpec, rng: &mut R) -> Result<Network> {
        let sizes = spec.sizes();
        if spec.layers.is_empty() || sizes.contains(&0) {
            return Err(Error::Config(format!(
                "a model needs at least one layer and no empty layer, got sizes {sizes:?}"
            )));
        }
        let hidden = &spec.layers[..spec.layers.len() - 1];
        if hidden.iter().any(|layer| layer.activation == Activation::Softmax) {
            return Err(Error::Config(
                "softmax is only supported on the output layer".to_string(),
            ));
        }
        // The output delta for cross entropy is only (output - expected) behind a softmax.
        let softmax_output = spec.layers[spec.layers.len() - 1].activation == Activation::Softmax;
        let cross_entropy = spec.loss == Loss::CategoricalCrossEntropy;
        if softmax_output && !cross_entropy {
            return Err(Error::Config(
                "a softmax output needs the categorical cross entropy loss".to_string(),
            ));
        }
        if cross_entropy && !softmax_output {
            return Err(Error::Config(
                "categorical cross entropy needs a softmax output".to_string(),
            ));
        }

        Ok(Network {
            // One [size x 1] column of zeros for every layer after the input layer.
            biases: sizes
                .iter()
                .skip(1)
                .map(|&size| Array2::zeros((size, 1)))
                .collect(),
            // One [next_size x current_size] matrix for every pair of consecutive layers, drawn
            // uniformly from the Glorot range so that wide input layers do not saturate the next.
            weights: sizes
                .iter()
                .tuple_windows()
                .map(|(&current_size, &next_size)| {
                    let limit = (6.0 / (current_size + next_size) as f64).sqrt();
                    Array::random_using(
                        (next_size, current_size),
                        Uniform::new(-limit, limit),
                        rng,
                    )
                })
                .collect(),
            activations: spec.layers.iter().map(|layer| layer.activation).collect(),
            sizes,
            loss: spec.loss,
            optimizer: spec.optimizer,
            adam: None,
        })
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn input_size(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_size(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn optimizer(&self) -> Optimizer {
        self.optimizer
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    // Changes the learning rate in place. Adam keeps its moment estimates.
    pub fn set_learning_rate(&mut self, new_learning_rate: f64) {
        match &mut self.optimizer {
            Optimizer::Sgd { learning_rate } | Optimizer::Adam { learning_rate, .. } => {
                *learning_rate = new_learning_rate
            }
        }
    }

    // The weights in [source x destination] orientation, one matrix per layer gap, which is how
    // the layout expects them. Internally they are stored [destination x source].
    pub fn link_weights(&self) -> Vec<Array2<f64>> {
        self.weights.iter().map(|weight| weight.t().to_owned()).collect()
    }

    pub fn set_weights(&mut self, layer: usize, weights: Array2<f64>) -> Result<()> {
        let current = self
            .weights
            .get_mut(layer)
            .ok_or_else(|| Error::ShapeMismatch(format!("no weight matrix {layer}")))?;
        if current.dim() != weights.dim() {
            return Err(Error::ShapeMismatch(format!(
                "weight matrix {layer} is {:?}, got {:?}",
                current.dim(),
                weights.dim()
            )));
        }
        *current = weights;
        Ok(())
    }

    // Runs a [features x batch] input matrix through the network. Returns the activations of
    // every layer (the input included) and the weighted inputs of every layer after the input.
    fn forward(&self, input: Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut activations = Vec::with_capacity(self.sizes.len());
        let mut zs = Vec::with_capacity(self.sizes.len() - 1);
        activations.push(input);

        for ((bias, weight), activation_fn) in self
            .biases
            .iter()
            .zip(self.weights.iter())
            .zip(self.activations.iter())
        {
            let z = weight.dot(&activations[activations.len() - 1]) + bias;
            activations.push(activation_fn.apply(&z));
            zs.push(z);
        }

        (activations, zs)
    }

    // Activations of every layer for a single input, the input layer included. This is what the
    // layout needs to shade neurons.
    pub fn layer_activations(&self, input: ArrayView1<f64>) -> Vec<Array1<f64>> {
        let column = input.to_owned().insert_axis(Axis(1));
        let (activations, _) = self.forward(column);
        activations
            .into_iter()
            .map(|activation| activation.column(0).to_owned())
            .collect()
    }

    pub fn feedforward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        let column = input.to_owned().insert_axis(Axis(1));
        let (mut activations, _) = self.forward(column);
        activations
            .pop()
            .map(|output| output.column(0).to_owned())
            .unwrap_or_default()
    }

    // Outputs for a [batch x features] matrix, as a [batch x outputs] matrix.
    pub fn predict(&self, xs: &Array2<f64>) -> Array2<f64> {
        let (mut activations, _) = self.forward(xs.t().to_owned());
        activations
            .pop()
            .map(|output| output.reversed_axes())
            .unwrap_or_default()
    }

    // Index of the strongest output for each row of a [batch x features] matrix.
    pub fn predict_classes(&self, xs: &Array2<f64>) -> Vec<usize> {
        self.predict(xs).rows().into_iter().map(argmax).collect()
    }

    // Adjusts the network's biases and weights according to one batch of training data and
    // returns the mean loss of the batch before the update.
    pub fn train_batch(&mut self, batch: &Batch) -> f64 {
        let expected = batch.labels.t().to_owned();
        let (activations, zs) = self.forward(batch.xs.t().to_owned());
        let loss = self.loss.value(&activations[activations.len() - 1], &expected);

        let (nabla_biases, nabla_weights) = self.backpropagate(&activations, &zs, &expected);
        self.apply_gradients(&nabla_biases, &nabla_weights, batch.len());

        loss
    }

    // Calculate the gradients of all biases and weights, summed over the batch.
    fn backpropagate(
        &self,
        activations: &[Array2<f64>],
        zs: &[Array2<f64>],
        expected: &Array2<f64>,
    ) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut nabla_biases: Vec<Array2<f64>> = self
            .biases
            .iter()
            .map(|bias| Array::zeros(bias.raw_dim()))
            .collect();
        let mut nabla_weights: Vec<Array2<f64>> = self
            .weights
            .iter()
            .map(|weight| Array::zeros(weight.raw_dim()))
            .collect();

        // There is one fewer weight matrix than there are activation matrices, so the weights
        // feeding layer l + 1 are at index l, next to the activations of layer l.
        let last = self.weights.len() - 1;
        let mut delta = self.loss.output_delta(
            self.activations[last],
            &activations[last + 1],
            expected,
            &zs[last],
        );

        // Each column of delta belongs to one datum, so summing the columns sums the bias
        // gradients over the batch. The dot product with the transposed activations sums the
        // weight gradients in the same way.
        nabla_biases[last] = delta.sum_axis(Axis(1)).insert_axis(Axis(1));
        nabla_weights[last] = delta.dot(&activations[last].t());

        for l in (0..last).rev() {
            delta = self.weights[l + 1].t().dot(&delta) * self.activations[l].derivative(&zs[l]);
            nabla_biases[l] = delta.sum_axis(Axis(1)).insert_axis(Axis(1));
            nabla_weights[l] = delta.dot(&activations[l].t());
        }

        (nabla_biases, nabla_weights)
    }

    fn apply_gradients(
        &mut self,
        nabla_biases: &[Array2<f64>],
        nabla_weights: &[Array2<f64>],
        batch_size: usize,
    ) {
        let scale = 1.0 / batch_size.max(1) as f64;
        match self.optimizer {
            Optimizer::Sgd { learning_rate } => {
                for (bias, nabla_bias) in self.biases.iter_mut().zip(nabla_biases) {
                    bias.scaled_add(-learning_rate * scale, nabla_bias);
                }
                for (weight, nabla_weight) in self.weights.iter_mut().zip(nabla_weights) {
                    weight.scaled_add(-learning_rate * scale, nabla_weight);
                }
            }
            Optimizer::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                let state = self
                    .adam
                    .get_or_insert_with(|| AdamState::new(&self.weights, &self.biases));
                state.step += 1;
                let step = AdamStep {
                    learning_rate,
                    beta1,
                    beta2,
                    epsilon,
                    scale,
                    first_correction: 1.0 - beta1.powi(state.step),
                    second_correction: 1.0 - beta2.powi(state.step),
                };

                for (((weight, nabla_weight), moment), velocity) in self
                    .weights
                    .iter_mut()
                    .zip(nabla_weights)
                    .zip(state.weight_moments.iter_mut())
                    .zip(state.weight_velocities.iter_mut())
                {
                    step.apply(weight, nabla_weight, moment, velocity);
                }
                for (((bias, nabla_bias), moment), velocity) in self
                    .biases
                    .iter_mut()
                    .zip(nabla_biases)
                    .zip(state.bias_moments.iter_mut())
                    .zip(state.bias_velocities.iter_mut())
                {
                    step.apply(bias, nabla_bias, moment, velocity);
                }
            }
        }
    }
}

struct AdamStep {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    scale: f64,
    first_correction: f64,
    second_correction: f64,
}

impl AdamStep {
    fn apply(
        &self,
        parameter: &mut Array2<f64>,
        gradient: &Array2<f64>,
        moment: &mut Array2<f64>,
        velocity: &mut Array2<f64>,
    ) {
        Zip::from(parameter)
            .and(gradient)
            .and(moment)
            .and(velocity)
            .for_each(|p, &g, m, v| {
                let g = g * self.scale;
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / self.first_correction;
                let v_hat = *v / self.second_correction;
                *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            });
    }
}

// Index of the largest value (the last one on ties). Empty input maps to 0.
pub fn argmax(values: ArrayView1<f64>) -> usize {
    values
        .iter()
        .position_max_by(|a, b| a.total_cmp(b))
        .unwrap_or(0)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-z))
}

fn sigmoid_derivative(z: f64) -> f64 {
    (1.0 - sigmoid(z)) * sigmoid(z)
}

fn sign(d: f64) -> f64 {
    if d > 0.0 {
        1.0
    } else if d < 0.0 {
        -1.0
    } else {
        0.0
    }
}

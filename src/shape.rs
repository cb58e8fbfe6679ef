// Models the shape and layout of a dense feed forward neural network, and derives the weighted
// links between its neurons for drawing.

use crate::error::{Error, Result};
use crate::filter::LinkFilter;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Index of a neuron in the network-wide arena. Ids are assigned layer by layer, in layout order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeuronId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Neuron {
    pub x: f64,
    pub y: f64,
    pub activation: f64,
}

// A weighted connection between a neuron and a neuron of the following layer.
//
// `activation` is the activation of the source neuron when the link was derived. It only
// influences the visual weight used to rank links for drawing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Link {
    pub from: NeuronId,
    pub to: NeuronId,
    pub weight: f64,
    pub activation: f64,
}

impl Link {
    pub fn new(from: NeuronId, to: NeuronId, weight: f64) -> Link {
        Link {
            from,
            to,
            weight,
            activation: 0.0,
        }
    }

    pub fn visual_weight(&self) -> f64 {
        if self.activation != 0.0 {
            self.weight * (1.0 + 0.5 * self.activation)
        } else {
            self.weight
        }
    }

    // Returns a link whose weight is this link's visual weight. The returned link carries no
    // activation, so rescaling it a second time leaves it unchanged.
    pub fn with_visual_weight(self) -> Link {
        Link {
            weight: self.visual_weight(),
            activation: 0.0,
            ..self
        }
    }
}

// Describes the layout of a single layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub neuron_count: usize,
    pub width: f64,
    pub height: f64,
    pub marker_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neurons_per_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub rotate_class_names: bool,
}

impl LayerSpec {
    pub fn new(
        name: impl Into<String>,
        neuron_count: usize,
        width: f64,
        height: f64,
        marker_size: f64,
    ) -> LayerSpec {
        LayerSpec {
            name: name.into(),
            neuron_count,
            width,
            height,
            marker_size,
            neurons_per_row: None,
            classes: None,
            rotate_class_names: false,
        }
    }

    pub fn with_neurons_per_row(mut self, neurons_per_row: usize) -> LayerSpec {
        self.neurons_per_row = Some(neurons_per_row);
        self
    }

    pub fn with_classes<S: Into<String>>(mut self, classes: impl IntoIterator<Item = S>) -> LayerSpec {
        self.classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_rotated_class_names(mut self) -> LayerSpec {
        self.rotate_class_names = true;
        self
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidLayer {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

// Places the neurons of a layer whose topmost row sits at `start_y`.
//
// Neurons fill rows left to right and rows top to bottom. Rows are centred on x = 0 as if they
// were full, so a short last row stays aligned to the left edge of the rows above it.
pub fn compute_layout(start_y: f64, spec: &LayerSpec) -> Result<Vec<Neuron>> {
    if spec.neuron_count == 0 {
        return Err(spec.invalid("a layer needs at least one neuron"));
    }
    let neurons_per_row = match spec.neurons_per_row {
        Some(0) => return Err(spec.invalid("neurons_per_row must be positive")),
        Some(neurons_per_row) => neurons_per_row,
        None => spec.neuron_count,
    };
    let number_of_rows = spec.neuron_count.div_ceil(neurons_per_row);

    let x_space_between_neurons = if neurons_per_row == 1 {
        0.0
    } else {
        spec.width / (neurons_per_row - 1) as f64
    };
    let y_space_between_neurons = if number_of_rows == 1 {
        0.0
    } else {
        spec.height / (number_of_rows - 1) as f64
    };

    let row_x_start = -x_space_between_neurons * (neurons_per_row - 1) as f64 / 2.0;

    Ok((0..spec.neuron_count)
        .map(|i| Neuron {
            x: row_x_start + (i % neurons_per_row) as f64 * x_space_between_neurons,
            y: start_y - (i / neurons_per_row) as f64 * y_space_between_neurons,
            activation: 0.0,
        })
        .collect())
}

#[derive(Clone, Debug, Serialize)]
pub struct Layer {
    pub name: String,
    pub marker_size: f64,
    pub classes: Option<Vec<String>>,
    pub rotate_class_names: bool,
    neurons: Vec<Neuron>,
    first_id: usize,
}

impl Layer {
    pub fn new(start_y: f64, spec: &LayerSpec) -> Result<Layer> {
        Layer::with_first_id(start_y, spec, 0)
    }

    fn with_first_id(start_y: f64, spec: &LayerSpec, first_id: usize) -> Result<Layer> {
        Ok(Layer {
            name: spec.name.clone(),
            marker_size: spec.marker_size,
            classes: spec.classes.clone(),
            rotate_class_names: spec.rotate_class_names,
            neurons: compute_layout(start_y, spec)?,
            first_id,
        })
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NeuronId> {
        (self.first_id..self.first_id + self.neurons.len()).map(NeuronId)
    }

    // Id of the neuron at `index` within this layer.
    pub fn id(&self, index: usize) -> Option<NeuronId> {
        (index < self.neurons.len()).then_some(NeuronId(self.first_id + index))
    }

    pub fn contains(&self, id: NeuronId) -> bool {
        (self.first_id..self.first_id + self.neurons.len()).contains(&id.0)
    }
}

// How a link filter is applied by `DenseNetwork::derive_links_scoped`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    // Each layer gap is filtered on its own, so a top-N filter caps links per gap.
    #[default]
    PerGap,
    // The filter sees the links of every gap at once.
    WholeNetwork,
}

// The neurons of a network with their activations for one pass, and the links to draw.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkedNetwork {
    pub neurons: Vec<Neuron>,
    pub links: Vec<Link>,
}

impl LinkedNetwork {
    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(id.0)
    }
}

// The layout of a dense network: layers stacked top to bottom, starting at y = 0.
//
// The layout is immutable. Activations live in the `LinkedNetwork` returned by each
// `derive_links` call, so calls never interfere with each other.
#[derive(Clone, Debug, Serialize)]
pub struct DenseNetwork {
    layer_spacing: f64,
    layers: Vec<Layer>,
}

impl DenseNetwork {
    pub fn new(layer_spacing: f64, layer_specs: &[LayerSpec]) -> Result<DenseNetwork> {
        if layer_specs.is_empty() {
            return Err(Error::Config("a network needs at least one layer".to_string()));
        }

        let mut layers = Vec::with_capacity(layer_specs.len());
        let mut layer_y = 0.0;
        let mut first_id = 0;
        for spec in layer_specs {
            let layer = Layer::with_first_id(layer_y, spec, first_id)?;
            first_id += layer.len();
            layer_y -= spec.height + layer_spacing;
            layers.push(layer);
        }

        Ok(DenseNetwork {
            layer_spacing,
            layers,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_spacing(&self) -> f64 {
        self.layer_spacing
    }

    pub fn output_layer(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }

    // Class labels of the output layer, if it has any.
    pub fn classes(&self) -> Option<&[String]> {
        self.output_layer().classes.as_deref()
    }

    pub fn layer_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(Layer::len).collect()
    }

    pub fn neuron_count(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    pub fn neurons(&self) -> impl Iterator<Item = &Neuron> {
        self.layers.iter().flat_map(|layer| layer.neurons.iter())
    }

    pub fn layer_of(&self, id: NeuronId) -> Option<usize> {
        let index = self
            .layers
            .partition_point(|layer| layer.first_id + layer.len() <= id.0);
        (index < self.layers.len()).then_some(index)
    }

    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        let layer = &self.layers[self.layer_of(id)?];
        layer.neurons.get(id.0 - layer.first_id)
    }

    // Derives the links between consecutive layers, filtering each layer gap on its own.
    //
    // `weights` holds one `[source][destination]` matrix per layer gap. `activations`, when
    // given, holds one vector per layer with one value per neuron; otherwise every activation
    // is zero.
    pub fn derive_links<F: LinkFilter + ?Sized>(
        &self,
        weights: &[Array2<f64>],
        activations: Option<&[Array1<f64>]>,
        link_filter: &F,
    ) -> Result<LinkedNetwork> {
        self.derive_links_scoped(weights, activations, link_filter, FilterScope::PerGap)
    }

    pub fn derive_links_scoped<F: LinkFilter + ?Sized>(
        &self,
        weights: &[Array2<f64>],
        activations: Option<&[Array1<f64>]>,
        link_filter: &F,
        scope: FilterScope,
    ) -> Result<LinkedNetwork> {
        let neurons = self.activated_neurons(activations)?;

        let gaps = self.layers.len() - 1;
        if weights.len() != gaps {
            return Err(Error::ShapeMismatch(format!(
                "{} layers need {gaps} weight matrices, got {}",
                self.layers.len(),
                weights.len()
            )));
        }

        let mut links = Vec::new();
        for ((from_layer, to_layer), weights_between_layers) in
            self.layers.iter().tuple_windows().zip(weights)
        {
            let expected = (from_layer.len(), to_layer.len());
            if weights_between_layers.dim() != expected {
                return Err(Error::ShapeMismatch(format!(
                    "weights between '{}' and '{}' should be {:?}, got {:?}",
                    from_layer.name,
                    to_layer.name,
                    expected,
                    weights_between_layers.dim()
                )));
            }

            let mut layer_links = Vec::with_capacity(from_layer.len() * to_layer.len());
            for (from, outgoing_weights) in from_layer.ids().zip(weights_between_layers.rows()) {
                let activation = neurons[from.0].activation;
                for (to, &weight) in to_layer.ids().zip(outgoing_weights) {
                    layer_links.push(Link {
                        from,
                        to,
                        weight,
                        activation,
                    });
                }
            }

            match scope {
                FilterScope::PerGap => links.extend(link_filter.filter(layer_links)),
                FilterScope::WholeNetwork => links.extend(layer_links),
            }
        }
        if scope == FilterScope::WholeNetwork {
            links = link_filter.filter(links);
        }

        debug!(
            links = links.len(),
            neurons = neurons.len(),
            ?scope,
            "derived network links"
        );
        Ok(LinkedNetwork { neurons, links })
    }

    fn activated_neurons(&self, activations: Option<&[Array1<f64>]>) -> Result<Vec<Neuron>> {
        let mut neurons: Vec<Neuron> = self.neurons().copied().collect();
        let Some(activations) = activations else {
            return Ok(neurons);
        };

        if activations.len() != self.layers.len() {
            return Err(Error::ActivationMismatch(format!(
                "{} layers but {} activation vectors",
                self.layers.len(),
                activations.len()
            )));
        }
        for (layer, activations_for_layer) in self.layers.iter().zip(activations) {
            if activations_for_layer.len() != layer.len() {
                return Err(Error::ActivationMismatch(format!(
                    "layer '{}' has {} neurons but {} activations",
                    layer.name,
                    layer.len(),
                    activations_for_layer.len()
                )));
            }
            for (id, &activation) in layer.ids().zip(activations_for_layer) {
                neurons[id.0].activation = activation;
            }
        }
        Ok(neurons)
    }
}
